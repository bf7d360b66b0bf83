//! Linking: from a decoded module to an executable context.
//!
//! Allocates the module image (globals and function identities), writes
//! initializers, populates the symbol table, loads configured native
//! libraries, and translates every defined function. Any failure here
//! aborts the load entirely; there is no partial module.

use crate::context::Context;
use crate::ffi::Bridge;
use molten_core::{EngineConfig, EngineError};
use molten_ir::{Module, Pointer};
use molten_memory::{AllocationKind, GlobalSymbolTable, MemoryManager, Symbol};
use molten_nodes::consts::eval_const;
use molten_nodes::ImageRefs;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

/// Link a module into a ready-to-run context.
pub fn link(module: Module, config: EngineConfig) -> Result<Context, EngineError> {
    let mem = Arc::new(MemoryManager::new());
    let symtab = GlobalSymbolTable::new();

    // Global variables first: initializers may take any global's address.
    // External globals (no initializer) get zeroed common storage; only
    // unresolved *functions* fail, and only at first call.
    let mut globals = Vec::with_capacity(module.globals.len());
    for global in &module.globals {
        let size = module.layout.size_of(&module.types, global.value_ty);
        let natural = module.layout.align_of(&module.types, global.value_ty);
        let align = u64::from(global.align).max(natural);
        let id = mem.allocate(AllocationKind::Global, size, align)?;
        let ptr = Pointer::base(id);
        globals.push(ptr);
        if !global.name.is_empty() {
            symtab.define(global.name.clone(), Symbol::Data(ptr));
        }
    }

    // Function identities: one distinct allocation per function so address
    // comparison and indirect calls behave like native function pointers.
    let mut functions = Vec::with_capacity(module.functions.len());
    let mut func_by_alloc = FxHashMap::default();
    for (index, function) in module.functions.iter().enumerate() {
        let id = mem.allocate(AllocationKind::Global, 0, 8)?;
        functions.push(Pointer::base(id));
        func_by_alloc.insert(id, index as u32);
        if !function.name.is_empty() {
            symtab.define(function.name.clone(), Symbol::Function(index as u32));
        }
    }

    // Initializers, then translation, both through the same constant
    // evaluator and image references.
    let refs = ImageRefs {
        globals: &globals,
        functions: &functions,
    };
    for (index, global) in module.globals.iter().enumerate() {
        if let Some(init) = global.init {
            let value = eval_const(&module, &refs, &mem, init)?;
            mem.store(
                &module.types,
                &module.layout,
                globals[index],
                global.value_ty,
                &value,
                0,
            )?;
        }
    }

    let graphs = molten_nodes::translate_module(&module, &refs, &mem)?;

    let bridge = Bridge::from_config(&config)?;
    debug!(
        globals = globals.len(),
        functions = functions.len(),
        "module linked"
    );
    Ok(Context::new_parts(
        module,
        config,
        mem,
        symtab,
        globals,
        functions,
        func_by_alloc,
        graphs,
        bridge,
    ))
}
