//! The embedding surface: load a bitcode buffer, run its `main`, call
//! exported functions, spawn guest threads, cancel.

use crate::interp::{Interpreter, VmError};
use crate::{context::Context, link};
use molten_core::{EngineConfig, EngineError, Trap};
use molten_ir::{Pointer, Value};
use molten_memory::AllocationKind;
use std::sync::Arc;
use tracing::info;

/// One loaded and linked module, ready to execute.
pub struct Engine {
    ctx: Arc<Context>,
}

impl Engine {
    /// Decode, link and translate a bitcode buffer. Translation-time
    /// errors abort the load; nothing from a failed load survives.
    pub fn load(bytes: &[u8], config: EngineConfig) -> Result<Engine, EngineError> {
        let module = molten_bitcode::parse_module(bytes)?;
        let ctx = link::link(module, config)?;
        info!(triple = %ctx.module.triple, "engine ready");
        Ok(Engine { ctx: Arc::new(ctx) })
    }

    /// The shared execution context (for embedding and guest threads).
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Request cancellation of all running guest executions.
    pub fn cancel(&self) {
        self.ctx.cancel();
    }

    /// Run the guest `main` with the given program arguments and return
    /// the guest exit code.
    pub fn run(&self, args: &[String]) -> Result<i32, Trap> {
        let (index, main) = self
            .ctx
            .module
            .function_by_name("main")
            .ok_or_else(|| Trap::new(EngineError::UnresolvedSymbol("main".into())))?;
        let params = main.param_types(&self.ctx.module.types).len();

        let call_args = if params >= 2 {
            let (argc, argv) = self.build_argv(args).map_err(Trap::new)?;
            vec![Value::I32(argc), Value::Ptr(argv)]
        } else {
            Vec::new()
        };

        let mut interp = Interpreter::new(&self.ctx);
        match interp.call_function(index, call_args) {
            Ok(Some(value)) => Ok(value.as_i64().unwrap_or(0) as i32),
            Ok(None) => Ok(0),
            Err(VmError::Exit(code)) => Ok(code),
            Err(VmError::Trap(trap)) => Err(trap),
            Err(VmError::Unwind(_)) => Err(Trap::new(EngineError::UncaughtUnwind)),
        }
    }

    /// Call an exported guest function by name (host embedding surface).
    pub fn call(&self, name: &str, args: Vec<Value>) -> Result<Option<Value>, Trap> {
        let mut interp = Interpreter::new(&self.ctx);
        match interp.call_by_name(name, args) {
            Ok(value) => Ok(value),
            Err(VmError::Exit(code)) => Ok(Some(Value::I32(code as u32))),
            Err(VmError::Trap(trap)) => Err(trap),
            Err(VmError::Unwind(_)) => Err(Trap::new(EngineError::UncaughtUnwind)),
        }
    }

    /// Build the C `argv` image in guest memory: an array of pointers to
    /// NUL-terminated strings, with a trailing null entry.
    fn build_argv(&self, args: &[String]) -> Result<(u32, Pointer), EngineError> {
        let mem = &self.ctx.mem;
        let mut pointers = Vec::with_capacity(args.len());
        for arg in args {
            let bytes = arg.as_bytes();
            let id = mem.allocate(AllocationKind::Global, bytes.len() as u64 + 1, 1)?;
            mem.write_bytes(Pointer::base(id), bytes)?;
            pointers.push(Pointer::base(id));
        }
        let table = mem.allocate(
            AllocationKind::Global,
            (pointers.len() as u64 + 1) * 8,
            8,
        )?;
        for (i, ptr) in pointers.iter().enumerate() {
            let token = mem.pointer_to_int(*ptr);
            mem.write_bytes(
                Pointer {
                    alloc: table,
                    offset: i as u64 * 8,
                },
                &token.to_le_bytes(),
            )?;
        }
        Ok((args.len() as u32, Pointer::base(table)))
    }
}
