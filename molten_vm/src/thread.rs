//! Guest threads.
//!
//! Multiple guest threads are modeled as independent interpreter/frame
//! stacks sharing one context (and through it, one memory manager and one
//! symbol table). The memory manager is the only shared-mutable resource;
//! cross-thread ordering guarantees come exclusively from the atomic
//! operations the guest itself performs.

use crate::context::Context;
use crate::interp::{Interpreter, VmError};
use molten_core::{EngineError, Trap};
use molten_ir::Value;
use std::sync::Arc;
use std::thread::JoinHandle;

/// A running guest thread.
pub struct GuestThread {
    handle: JoinHandle<Result<Option<Value>, Trap>>,
}

impl GuestThread {
    /// Block until the guest thread finishes.
    pub fn join(self) -> Result<Option<Value>, Trap> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(Trap::new(EngineError::GuestAbort)),
        }
    }
}

/// Start a guest thread executing function `index` with `args`.
///
/// The thread owns its own interpreter stack; a trap terminates only this
/// guest execution. Blocking native calls made by the thread are opaque to
/// every other guest thread.
pub fn spawn(ctx: Arc<Context>, index: u32, args: Vec<Value>) -> GuestThread {
    let handle = std::thread::spawn(move || {
        let mut interp = Interpreter::new(&ctx);
        match interp.call_function(index, args) {
            Ok(value) => Ok(value),
            Err(VmError::Exit(code)) => Ok(Some(Value::I32(code as u32))),
            Err(VmError::Trap(trap)) => Err(trap),
            Err(VmError::Unwind(_)) => Err(Trap::new(EngineError::UncaughtUnwind)),
        }
    });
    GuestThread { handle }
}

/// Start a guest thread by function name.
pub fn spawn_by_name(
    ctx: Arc<Context>,
    name: &str,
    args: Vec<Value>,
) -> Result<GuestThread, EngineError> {
    let (index, _) = ctx
        .module
        .function_by_name(name)
        .ok_or_else(|| EngineError::UnresolvedSymbol(name.to_string()))?;
    Ok(spawn(ctx, index, args))
}
