//! Shared foundation for the Molten bitcode interpreter.
//!
//! This crate holds the pieces every other crate needs: the error taxonomy,
//! the engine configuration, and trap diagnostics. It deliberately has no
//! knowledge of the IR model or the memory manager.

pub mod config;
pub mod error;

pub use config::EngineConfig;
pub use error::{EngineError, MemoryErrorKind, Trap, TrapFrame};

/// Crate version string, surfaced by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The bitcode container versions this engine accepts (inclusive module
/// VERSION record values): the relative value-id encoding only.
pub const SUPPORTED_MODULE_VERSIONS: std::ops::RangeInclusive<u64> = 1..=1;
