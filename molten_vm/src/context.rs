//! The module-scoped execution context.
//!
//! One `Context` per loaded module, passed explicitly to every interpreter
//! and memory-manager call; its lifecycle is "one loaded module, torn down
//! on unload". There is no global mutable state anywhere in the engine.

use crate::ffi::Bridge;
use molten_core::EngineConfig;
use molten_ir::{AllocId, Module, Pointer, Value};
use molten_memory::{GlobalSymbolTable, MemoryManager};
use molten_nodes::NodeGraph;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Everything a guest execution needs, shared across guest threads.
pub struct Context {
    /// The decoded module (immutable after load).
    pub module: Module,
    /// Engine configuration captured at load time.
    pub config: EngineConfig,
    /// The sole shared-mutable resource.
    pub mem: Arc<MemoryManager>,
    /// Name → symbol for the linked image.
    pub symtab: GlobalSymbolTable,
    /// Base pointer of each module global.
    pub globals: Vec<Pointer>,
    /// Address identity of each module function.
    pub functions: Vec<Pointer>,
    /// Reverse map: function-identity allocation → function index, for
    /// indirect calls.
    pub func_by_alloc: FxHashMap<AllocId, u32>,
    /// Translated graphs, one per defined function.
    pub graphs: Vec<Option<Arc<NodeGraph>>>,
    /// The foreign-function bridge.
    pub bridge: Bridge,
    /// Host-managed polyglot values (see the interop builtins).
    pub host_values: HostValues,
    /// Cancellation flag, checked at block boundaries.
    cancel: AtomicBool,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("globals", &self.globals.len())
            .field("functions", &self.functions.len())
            .field("graphs", &self.graphs.len())
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Request cancellation of every guest execution on this context. The
    /// unwind is delivered at each thread's next block boundary.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// True once cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    pub(crate) fn new_parts(
        module: Module,
        config: EngineConfig,
        mem: Arc<MemoryManager>,
        symtab: GlobalSymbolTable,
        globals: Vec<Pointer>,
        functions: Vec<Pointer>,
        func_by_alloc: FxHashMap<AllocId, u32>,
        graphs: Vec<Option<Arc<NodeGraph>>>,
        bridge: Bridge,
    ) -> Self {
        Context {
            module,
            config,
            mem,
            symtab,
            globals,
            functions,
            func_by_alloc,
            graphs,
            bridge,
            host_values: HostValues::default(),
            cancel: AtomicBool::new(false),
        }
    }

    /// Function index for a pointer, if it is a function identity.
    pub fn function_at(&self, ptr: Pointer) -> Option<u32> {
        if ptr.offset != 0 {
            return None;
        }
        self.func_by_alloc.get(&ptr.alloc).copied()
    }
}

// =============================================================================
// Host Values
// =============================================================================

/// Opaque tokens for boxed host values start here; the range never
/// intersects the memory manager's token space because these pointers are
/// handle-less.
const HOST_VALUE_BASE: u64 = 1 << 56;

/// Registry of host-managed values reachable from the guest through the
/// interop builtins. Handles are opaque handle-less pointers; the guest
/// can pass them around and hand them back but never dereference them.
#[derive(Default)]
pub struct HostValues {
    next: AtomicU64,
    values: Mutex<FxHashMap<u64, Value>>,
    exports: Mutex<FxHashMap<String, u64>>,
}

impl HostValues {
    /// Box a value, returning its opaque guest handle.
    pub fn insert(&self, value: Value) -> Pointer {
        let id = HOST_VALUE_BASE + self.next.fetch_add(1, Ordering::Relaxed);
        self.values.lock().insert(id, value);
        Pointer {
            alloc: molten_ir::AllocId::NULL,
            offset: id,
        }
    }

    /// Resolve a handle back to its value.
    pub fn get(&self, handle: Pointer) -> Option<Value> {
        self.values.lock().get(&handle.offset).cloned()
    }

    /// Bind an exported name to a handle.
    pub fn export(&self, name: String, handle: Pointer) {
        self.exports.lock().insert(name, handle.offset);
    }

    /// Look up an exported name.
    pub fn import(&self, name: &str) -> Option<Pointer> {
        self.exports.lock().get(name).map(|&id| Pointer {
            alloc: molten_ir::AllocId::NULL,
            offset: id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_values_roundtrip() {
        let hv = HostValues::default();
        let handle = hv.insert(Value::I64(99));
        assert_eq!(hv.get(handle), Some(Value::I64(99)));
        hv.export("answer".into(), handle);
        let imported = hv.import("answer").unwrap();
        assert_eq!(hv.get(imported), Some(Value::I64(99)));
        assert_eq!(hv.import("missing"), None);
    }
}
