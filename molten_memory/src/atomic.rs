//! Atomic operations over guest memory.
//!
//! Every atomic operation takes the manager's single global atomic lock,
//! which provides sequential consistency: at least the strength of any
//! ordering the guest can request. The ordering parameter is still threaded
//! through so the contract (provide *at least* the requested ordering) is
//! explicit at every call site.

use crate::manager::MemoryManager;
use molten_core::EngineError;
use molten_ir::types::{TypeId, TypeTable};
use molten_ir::{AtomicOrdering, DataLayout, Pointer, RmwOp, Value};

impl MemoryManager {
    /// Atomic load with at least the requested ordering.
    pub fn atomic_load(
        &self,
        types: &TypeTable,
        layout: &DataLayout,
        ptr: Pointer,
        ty: TypeId,
        align: u64,
        _ordering: AtomicOrdering,
    ) -> Result<Value, EngineError> {
        let _guard = self.atomic_lock.lock();
        self.load(types, layout, ptr, ty, align)
    }

    /// Atomic store with at least the requested ordering.
    pub fn atomic_store(
        &self,
        types: &TypeTable,
        layout: &DataLayout,
        ptr: Pointer,
        ty: TypeId,
        value: &Value,
        align: u64,
        _ordering: AtomicOrdering,
    ) -> Result<(), EngineError> {
        let _guard = self.atomic_lock.lock();
        self.store(types, layout, ptr, ty, value, align)
    }

    /// Atomic read-modify-write; returns the previous value.
    pub fn atomic_rmw(
        &self,
        types: &TypeTable,
        layout: &DataLayout,
        op: RmwOp,
        ptr: Pointer,
        ty: TypeId,
        operand: &Value,
        _ordering: AtomicOrdering,
    ) -> Result<Value, EngineError> {
        let _guard = self.atomic_lock.lock();
        let old = self.load(types, layout, ptr, ty, 0)?;
        let new = apply_rmw(op, &old, operand)?;
        self.store(types, layout, ptr, ty, &new, 0)?;
        Ok(old)
    }

    /// Memory fence: synchronizes with every other atomic operation by
    /// taking the same global lock.
    pub fn fence(&self, _ordering: AtomicOrdering) {
        drop(self.atomic_lock.lock());
    }

    /// Atomic compare-exchange; returns the previous value and whether the
    /// exchange happened.
    pub fn atomic_cmpxchg(
        &self,
        types: &TypeTable,
        layout: &DataLayout,
        ptr: Pointer,
        ty: TypeId,
        expected: &Value,
        replacement: &Value,
        _success: AtomicOrdering,
        _failure: AtomicOrdering,
    ) -> Result<(Value, bool), EngineError> {
        let _guard = self.atomic_lock.lock();
        let old = self.load(types, layout, ptr, ty, 0)?;
        let swapped = old == *expected;
        if swapped {
            self.store(types, layout, ptr, ty, replacement, 0)?;
        }
        Ok((old, swapped))
    }
}

/// Combine the old value with the operand per the RMW operation. Integer
/// arithmetic wraps at the value's width; `Xchg` works on any scalar.
fn apply_rmw(op: RmwOp, old: &Value, operand: &Value) -> Result<Value, EngineError> {
    if op == RmwOp::Xchg {
        return Ok(operand.clone());
    }
    let (bits, a) = match (old.int_width(), old.as_u64()) {
        (Some(bits), Some(raw)) => (bits, raw),
        _ => {
            return Err(EngineError::Memory(
                molten_core::error::MemoryErrorKind::TypeMismatch,
            ))
        }
    };
    let b = operand.as_u64().ok_or(EngineError::Memory(
        molten_core::error::MemoryErrorKind::TypeMismatch,
    ))?;
    let sa = old.as_i64().unwrap_or(0);
    let sb = operand.as_i64().unwrap_or(0);
    let raw = match op {
        RmwOp::Xchg => unreachable!(),
        RmwOp::Add => a.wrapping_add(b),
        RmwOp::Sub => a.wrapping_sub(b),
        RmwOp::And => a & b,
        RmwOp::Nand => !(a & b),
        RmwOp::Or => a | b,
        RmwOp::Xor => a ^ b,
        RmwOp::Max => {
            if sa >= sb {
                a
            } else {
                b
            }
        }
        RmwOp::Min => {
            if sa <= sb {
                a
            } else {
                b
            }
        }
        RmwOp::UMax => a.max(b),
        RmwOp::UMin => a.min(b),
    };
    Ok(Value::int(bits, raw))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::AllocationKind;

    fn setup_counter() -> (MemoryManager, TypeTable, DataLayout, Pointer, TypeId) {
        let mem = MemoryManager::new();
        let mut types = TypeTable::new();
        let i64t = types.int(64);
        let id = mem.allocate(AllocationKind::Global, 8, 8).unwrap();
        (mem, types, DataLayout, Pointer::base(id), i64t)
    }

    #[test]
    fn test_rmw_add_returns_old() {
        let (mem, types, layout, p, i64t) = setup_counter();
        let old = mem
            .atomic_rmw(
                &types,
                &layout,
                RmwOp::Add,
                p,
                i64t,
                &Value::I64(5),
                AtomicOrdering::SeqCst,
            )
            .unwrap();
        assert_eq!(old, Value::I64(0));
        assert_eq!(mem.load(&types, &layout, p, i64t, 0).unwrap(), Value::I64(5));
    }

    #[test]
    fn test_rmw_wraps_at_width() {
        let mem = MemoryManager::new();
        let mut types = TypeTable::new();
        let i8t = types.int(8);
        let id = mem.allocate(AllocationKind::Global, 1, 1).unwrap();
        let p = Pointer::base(id);
        mem.store(&types, &DataLayout, p, i8t, &Value::I8(0xff), 0).unwrap();
        mem.atomic_rmw(
            &types,
            &DataLayout,
            RmwOp::Add,
            p,
            i8t,
            &Value::I8(1),
            AtomicOrdering::Relaxed,
        )
        .unwrap();
        assert_eq!(mem.load(&types, &DataLayout, p, i8t, 0).unwrap(), Value::I8(0));
    }

    #[test]
    fn test_signed_vs_unsigned_minmax() {
        let (mem, types, layout, p, i64t) = setup_counter();
        mem.store(&types, &layout, p, i64t, &Value::I64(u64::MAX), 0).unwrap();
        // Signed max: -1 < 3, so 3 wins.
        mem.atomic_rmw(
            &types,
            &layout,
            RmwOp::Max,
            p,
            i64t,
            &Value::I64(3),
            AtomicOrdering::SeqCst,
        )
        .unwrap();
        assert_eq!(mem.load(&types, &layout, p, i64t, 0).unwrap(), Value::I64(3));
        // Unsigned max: u64::MAX wins again.
        mem.store(&types, &layout, p, i64t, &Value::I64(u64::MAX), 0).unwrap();
        mem.atomic_rmw(
            &types,
            &layout,
            RmwOp::UMax,
            p,
            i64t,
            &Value::I64(3),
            AtomicOrdering::SeqCst,
        )
        .unwrap();
        assert_eq!(
            mem.load(&types, &layout, p, i64t, 0).unwrap(),
            Value::I64(u64::MAX)
        );
    }

    #[test]
    fn test_cmpxchg_success_and_failure() {
        let (mem, types, layout, p, i64t) = setup_counter();
        let (old, ok) = mem
            .atomic_cmpxchg(
                &types,
                &layout,
                p,
                i64t,
                &Value::I64(0),
                &Value::I64(9),
                AtomicOrdering::SeqCst,
                AtomicOrdering::SeqCst,
            )
            .unwrap();
        assert_eq!((old, ok), (Value::I64(0), true));
        let (old, ok) = mem
            .atomic_cmpxchg(
                &types,
                &layout,
                p,
                i64t,
                &Value::I64(0),
                &Value::I64(1),
                AtomicOrdering::SeqCst,
                AtomicOrdering::SeqCst,
            )
            .unwrap();
        assert_eq!((old, ok), (Value::I64(9), false));
    }

    #[test]
    fn test_xchg_on_pointers() {
        let mem = MemoryManager::new();
        let mut types = TypeTable::new();
        let i8t = types.int(8);
        let pty = types.pointer_to(i8t);
        let slot = mem.allocate(AllocationKind::Global, 8, 8).unwrap();
        let target = mem.allocate(AllocationKind::Heap, 1, 1).unwrap();
        let old = mem
            .atomic_rmw(
                &types,
                &DataLayout,
                RmwOp::Xchg,
                Pointer::base(slot),
                pty,
                &Value::Ptr(Pointer::base(target)),
                AtomicOrdering::SeqCst,
            )
            .unwrap();
        assert_eq!(old, Value::Ptr(Pointer::NULL));
    }

    #[test]
    fn test_concurrent_increments_are_exact() {
        use std::sync::Arc;
        let mem = Arc::new(MemoryManager::new());
        let mut types = TypeTable::new();
        let i64t = types.int(64);
        let types = Arc::new(types);
        let id = mem.allocate(AllocationKind::Global, 8, 8).unwrap();
        let p = Pointer::base(id);

        const THREADS: usize = 4;
        const PER_THREAD: usize = 500;
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let mem = Arc::clone(&mem);
                let types = Arc::clone(&types);
                std::thread::spawn(move || {
                    for _ in 0..PER_THREAD {
                        mem.atomic_rmw(
                            &types,
                            &DataLayout,
                            RmwOp::Add,
                            p,
                            i64t,
                            &Value::I64(1),
                            AtomicOrdering::SeqCst,
                        )
                        .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(
            mem.load(&types, &DataLayout, p, i64t, 0).unwrap(),
            Value::I64((THREADS * PER_THREAD) as u64)
        );
    }
}
