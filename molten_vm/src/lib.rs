//! The node interpreter and its runtime services.
//!
//! One [`engine::Engine`] owns one linked module image: the memory manager,
//! the global symbol table, the translated node graphs and the foreign-
//! function bridge. Guest threads are independent interpreter stacks over
//! that shared context; all cross-thread ordering flows through the memory
//! manager's atomic operations.

pub mod builtins;
pub mod context;
pub mod engine;
pub mod ffi;
pub mod frame;
pub mod interp;
pub mod link;
pub mod ops;
pub mod thread;

pub use context::Context;
pub use engine::Engine;
pub use interp::{Interpreter, VmError};
