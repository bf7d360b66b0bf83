//! Bitcode container reader.
//!
//! Decodes the binary bitstream container (magic header, nested blocks,
//! abbreviated and unabbreviated records) into a [`molten_ir::Module`].
//! Framing violations fail deterministically with
//! [`molten_core::EngineError::MalformedBitcode`] naming the byte offset;
//! dangling references at end-of-stream fail with `LinkError`. Nothing is
//! executed at read time.

pub mod abbrev;
pub mod bitstream;
pub mod codes;
mod function;
pub mod reader;

pub use reader::parse_module;
