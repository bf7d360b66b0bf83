//! Call frames.
//!
//! One frame per active call, exclusively owned by that call: the SSA slot
//! file, the stack allocations made by its allocas, and the in-flight
//! unwind token while control transfers to a landing pad. Frames release
//! their allocations in reverse creation order on every exit path.

use molten_ir::{AllocId, Value};
use molten_memory::MemoryManager;

/// Execution state of one call.
pub struct Frame {
    /// SSA value slots: arguments first, then one per value-producing node.
    slots: Vec<Value>,
    /// Stack allocations in creation order.
    allocas: Vec<AllocId>,
    /// Unwind token for the landing pad of the block being entered.
    pub pending_unwind: Option<Value>,
}

impl Frame {
    /// Frame with `slot_count` slots, the first `args.len()` of them bound
    /// to the call's arguments.
    pub fn new(slot_count: u32, args: Vec<Value>) -> Self {
        let mut slots = vec![Value::I64(0); slot_count as usize];
        for (i, arg) in args.into_iter().enumerate() {
            slots[i] = arg;
        }
        Frame {
            slots,
            allocas: Vec::new(),
            pending_unwind: None,
        }
    }

    /// Read a slot.
    #[inline]
    pub fn get(&self, slot: u32) -> &Value {
        &self.slots[slot as usize]
    }

    /// Write a slot.
    #[inline]
    pub fn set(&mut self, slot: u32, value: Value) {
        self.slots[slot as usize] = value;
    }

    /// Record a stack allocation owned by this frame.
    #[inline]
    pub fn push_alloca(&mut self, id: AllocId) {
        self.allocas.push(id);
    }

    /// Number of live stack allocations (the `stacksave` marker).
    #[inline]
    pub fn alloca_mark(&self) -> usize {
        self.allocas.len()
    }

    /// Release stack allocations made after `mark`, newest first
    /// (`stackrestore`).
    pub fn release_to_mark(&mut self, mem: &MemoryManager, mark: usize) {
        while self.allocas.len() > mark {
            if let Some(id) = self.allocas.pop() {
                mem.release_stack(id);
            }
        }
    }

    /// Release every stack allocation, newest first. Called on every exit
    /// path: return, trap, unwind and cancellation.
    pub fn release_all(&mut self, mem: &MemoryManager) {
        self.release_to_mark(mem, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molten_memory::AllocationKind;

    #[test]
    fn test_slots_bind_args_first() {
        let frame = Frame::new(4, vec![Value::I32(1), Value::I32(2)]);
        assert_eq!(frame.get(0), &Value::I32(1));
        assert_eq!(frame.get(1), &Value::I32(2));
        assert_eq!(frame.get(3), &Value::I64(0));
    }

    #[test]
    fn test_release_all_in_reverse_order() {
        let mem = MemoryManager::new();
        let mut frame = Frame::new(0, Vec::new());
        let a = mem.allocate(AllocationKind::Stack, 8, 8).unwrap();
        let b = mem.allocate(AllocationKind::Stack, 8, 8).unwrap();
        frame.push_alloca(a);
        frame.push_alloca(b);
        frame.release_all(&mem);
        assert!(mem.is_dead(a).unwrap());
        assert!(mem.is_dead(b).unwrap());
    }

    #[test]
    fn test_release_to_mark() {
        let mem = MemoryManager::new();
        let mut frame = Frame::new(0, Vec::new());
        let a = mem.allocate(AllocationKind::Stack, 8, 8).unwrap();
        let mark = frame.alloca_mark();
        let b = mem.allocate(AllocationKind::Stack, 8, 8).unwrap();
        frame.push_alloca(a);
        // `a` was pushed after taking the mark, so everything goes.
        frame.release_to_mark(&mem, mark);
        assert!(mem.is_dead(a).unwrap());
        frame.push_alloca(b);
        frame.release_all(&mem);
        assert!(mem.is_dead(b).unwrap());
    }
}
