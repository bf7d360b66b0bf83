//! IR-to-node translation.
//!
//! Each decoded function becomes a [`node::NodeGraph`]: one executable node
//! per instruction, wired through SSA slots, with phi tables per block and
//! address computations folded against the fixed data layout. Translation
//! is total at load time: an unsupported opcode or assembly mnemonic fails
//! the load here, never at run time.

pub mod asm;
pub mod consts;
pub mod node;
pub mod translate;

pub use node::{
    CalleeNode, GepStep, IntrinsicOp, Node, NodeBlock, NodeGraph, PhiNode, Src, Terminator,
};
pub use translate::{translate_function, translate_module, ImageRefs};
