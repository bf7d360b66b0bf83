//! Allocation ownership and raw byte access.
//!
//! The manager owns every allocation in a slab indexed by [`AllocId`].
//! Entries are never removed: freeing marks the entry dead and drops its
//! backing bytes, so stale handles keep their identity and use-after-free
//! and double-free are detected instead of being undefined.
//!
//! Locking: one `Mutex` per allocation guards its bytes (plain loads and
//! stores from different guest threads serialize per allocation); the
//! global atomic-operation lock lives in [`crate::atomic`].

use molten_core::error::MemoryErrorKind;
use molten_core::EngineError;
use molten_ir::{AllocId, Pointer};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Hard cap on a single allocation, keeping offsets comfortably inside the
/// token range arithmetic.
pub const MAX_ALLOCATION_BYTES: u64 = 1 << 32;

/// Lifetime class of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationKind {
    /// Lives for the module image's lifetime.
    Global,
    /// Owned by one call frame; released when the frame unwinds.
    Stack,
    /// Lives until explicitly freed by the guest.
    Heap,
}

/// One slab entry.
pub(crate) struct AllocEntry {
    pub kind: AllocationKind,
    pub size: u64,
    pub align: u64,
    /// Backing bytes; emptied when the allocation dies.
    pub data: Mutex<Box<[u8]>>,
    /// Set once, never cleared.
    pub dead: AtomicBool,
    /// Base of this allocation's opaque token range; 0 until assigned.
    pub token_base: AtomicU64,
}

/// The arena of all allocations plus the pointer⇄integer mapping table.
pub struct MemoryManager {
    allocs: RwLock<Vec<Arc<AllocEntry>>>,
    /// Serializes every atomic operation (see [`crate::atomic`]).
    pub(crate) atomic_lock: Mutex<()>,
    pub(crate) tokens: Mutex<crate::tokens::TokenTable>,
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryManager {
    pub fn new() -> Self {
        MemoryManager {
            allocs: RwLock::new(Vec::new()),
            atomic_lock: Mutex::new(()),
            tokens: Mutex::new(crate::tokens::TokenTable::new()),
        }
    }

    // =========================================================================
    // Allocation Lifecycle
    // =========================================================================

    /// Allocate `size` zeroed bytes with the given alignment.
    pub fn allocate(
        &self,
        kind: AllocationKind,
        size: u64,
        align: u64,
    ) -> Result<AllocId, EngineError> {
        if size > MAX_ALLOCATION_BYTES {
            return Err(EngineError::Memory(MemoryErrorKind::OutOfBounds {
                offset: 0,
                len: size,
                size: MAX_ALLOCATION_BYTES,
            }));
        }
        let align = align.max(1).next_power_of_two();
        let entry = Arc::new(AllocEntry {
            kind,
            size,
            align,
            data: Mutex::new(vec![0u8; size as usize].into_boxed_slice()),
            dead: AtomicBool::new(false),
            token_base: AtomicU64::new(0),
        });
        let mut allocs = self.allocs.write();
        let id = AllocId::from_raw(allocs.len() as u32);
        allocs.push(entry);
        trace!(id = id.raw(), ?kind, size, align, "allocate");
        Ok(id)
    }

    /// Free a heap allocation. Double-free and free of stack/global memory
    /// are detected errors.
    pub fn free(&self, id: AllocId) -> Result<(), EngineError> {
        let entry = self.entry(id)?;
        if entry.kind != AllocationKind::Heap {
            return Err(EngineError::Memory(MemoryErrorKind::FreeOfNonHeap));
        }
        if entry.dead.swap(true, Ordering::AcqRel) {
            return Err(EngineError::Memory(MemoryErrorKind::DoubleFree));
        }
        *entry.data.lock() = Box::new([]);
        trace!(id = id.raw(), "free");
        Ok(())
    }

    /// Release a stack allocation during frame teardown. Idempotent by
    /// construction (frames release each alloca exactly once).
    pub fn release_stack(&self, id: AllocId) {
        if let Ok(entry) = self.entry(id) {
            if entry.kind == AllocationKind::Stack && !entry.dead.swap(true, Ordering::AcqRel) {
                *entry.data.lock() = Box::new([]);
            }
        }
    }

    /// Size of an allocation (valid even after it died).
    pub fn size_of_alloc(&self, id: AllocId) -> Result<u64, EngineError> {
        Ok(self.entry(id)?.size)
    }

    /// True if the allocation has been freed or released.
    pub fn is_dead(&self, id: AllocId) -> Result<bool, EngineError> {
        Ok(self.entry(id)?.dead.load(Ordering::Acquire))
    }

    pub(crate) fn entry(&self, id: AllocId) -> Result<Arc<AllocEntry>, EngineError> {
        if !id.is_valid() {
            return Err(EngineError::Memory(MemoryErrorKind::NullDereference));
        }
        self.allocs
            .read()
            .get(id.raw() as usize)
            .cloned()
            .ok_or(EngineError::Memory(MemoryErrorKind::NullDereference))
    }

    /// Resolve a pointer for a `len`-byte access, yielding its live entry.
    pub(crate) fn resolve(
        &self,
        ptr: Pointer,
        len: u64,
    ) -> Result<Arc<AllocEntry>, EngineError> {
        if !ptr.alloc.is_valid() {
            return Err(if ptr.offset == 0 {
                EngineError::Memory(MemoryErrorKind::NullDereference)
            } else {
                EngineError::Memory(MemoryErrorKind::InvalidToken { token: ptr.offset })
            });
        }
        let entry = self.entry(ptr.alloc)?;
        if entry.dead.load(Ordering::Acquire) {
            return Err(EngineError::Memory(MemoryErrorKind::UseAfterFree));
        }
        if ptr.offset.checked_add(len).map_or(true, |end| end > entry.size) {
            return Err(EngineError::Memory(MemoryErrorKind::OutOfBounds {
                offset: ptr.offset,
                len,
                size: entry.size,
            }));
        }
        Ok(entry)
    }

    // =========================================================================
    // Raw Byte Access
    // =========================================================================

    /// Bounds-checked byte read.
    pub fn read_bytes(&self, ptr: Pointer, len: u64) -> Result<Vec<u8>, EngineError> {
        let entry = self.resolve(ptr, len)?;
        let data = entry.data.lock();
        let start = ptr.offset as usize;
        // The backing bytes vanish if another thread frees between the
        // liveness check and taking the lock; that is still use-after-free.
        if data.len() < start + len as usize {
            return Err(EngineError::Memory(MemoryErrorKind::UseAfterFree));
        }
        Ok(data[start..start + len as usize].to_vec())
    }

    /// Bounds-checked byte write.
    pub fn write_bytes(&self, ptr: Pointer, bytes: &[u8]) -> Result<(), EngineError> {
        let entry = self.resolve(ptr, bytes.len() as u64)?;
        let mut data = entry.data.lock();
        let start = ptr.offset as usize;
        if data.len() < start + bytes.len() {
            return Err(EngineError::Memory(MemoryErrorKind::UseAfterFree));
        }
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// `memset` over guest memory.
    pub fn fill_bytes(&self, ptr: Pointer, value: u8, len: u64) -> Result<(), EngineError> {
        let entry = self.resolve(ptr, len)?;
        let mut data = entry.data.lock();
        let start = ptr.offset as usize;
        if data.len() < start + len as usize {
            return Err(EngineError::Memory(MemoryErrorKind::UseAfterFree));
        }
        data[start..start + len as usize].fill(value);
        Ok(())
    }

    /// `memcpy`/`memmove` between guest pointers (overlap-safe).
    pub fn copy_bytes(&self, dst: Pointer, src: Pointer, len: u64) -> Result<(), EngineError> {
        if len == 0 {
            return Ok(());
        }
        // Going through an owned buffer makes overlapping and cross-
        // allocation copies uniform.
        let bytes = self.read_bytes(src, len)?;
        self.write_bytes(dst, &bytes)
    }

    /// Guest `strlen`: scan for NUL from `ptr` within its allocation.
    pub fn c_string_len(&self, ptr: Pointer) -> Result<u64, EngineError> {
        let entry = self.resolve(ptr, 0)?;
        let data = entry.data.lock();
        if data.len() < ptr.offset as usize {
            return Err(EngineError::Memory(MemoryErrorKind::UseAfterFree));
        }
        data[ptr.offset as usize..]
            .iter()
            .position(|&b| b == 0)
            .map(|n| n as u64)
            .ok_or(EngineError::Memory(MemoryErrorKind::OutOfBounds {
                offset: entry.size,
                len: 1,
                size: entry.size,
            }))
    }

    /// Read a NUL-terminated guest string.
    pub fn read_c_string(&self, ptr: Pointer) -> Result<String, EngineError> {
        let len = self.c_string_len(ptr)?;
        let bytes = self.read_bytes(ptr, len)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_zeroed() {
        let mem = MemoryManager::new();
        let id = mem.allocate(AllocationKind::Heap, 16, 8).unwrap();
        let bytes = mem.read_bytes(Pointer::base(id), 16).unwrap();
        assert_eq!(bytes, vec![0u8; 16]);
    }

    #[test]
    fn test_out_of_bounds_read() {
        let mem = MemoryManager::new();
        let id = mem.allocate(AllocationKind::Heap, 8, 8).unwrap();
        let err = mem.read_bytes(Pointer { alloc: id, offset: 4 }, 8).unwrap_err();
        match err {
            EngineError::Memory(MemoryErrorKind::OutOfBounds { offset, len, size }) => {
                assert_eq!((offset, len, size), (4, 8, 8));
            }
            other => panic!("expected OutOfBounds, got {:?}", other),
        }
    }

    #[test]
    fn test_one_past_end_is_not_dereferenceable() {
        let mem = MemoryManager::new();
        let id = mem.allocate(AllocationKind::Heap, 8, 8).unwrap();
        // Offset 8 with zero length resolves (one-past pointer is legal)…
        assert!(mem.read_bytes(Pointer { alloc: id, offset: 8 }, 0).is_ok());
        // …but reading a byte there traps.
        assert!(mem.read_bytes(Pointer { alloc: id, offset: 8 }, 1).is_err());
    }

    #[test]
    fn test_double_free_detected() {
        let mem = MemoryManager::new();
        let id = mem.allocate(AllocationKind::Heap, 4, 4).unwrap();
        mem.free(id).unwrap();
        let err = mem.free(id).unwrap_err();
        assert_eq!(err, EngineError::Memory(MemoryErrorKind::DoubleFree));
    }

    #[test]
    fn test_use_after_free_detected() {
        let mem = MemoryManager::new();
        let id = mem.allocate(AllocationKind::Heap, 4, 4).unwrap();
        mem.free(id).unwrap();
        let err = mem.read_bytes(Pointer::base(id), 1).unwrap_err();
        assert_eq!(err, EngineError::Memory(MemoryErrorKind::UseAfterFree));
    }

    #[test]
    fn test_free_of_stack_rejected() {
        let mem = MemoryManager::new();
        let id = mem.allocate(AllocationKind::Stack, 4, 4).unwrap();
        let err = mem.free(id).unwrap_err();
        assert_eq!(err, EngineError::Memory(MemoryErrorKind::FreeOfNonHeap));
    }

    #[test]
    fn test_null_dereference() {
        let mem = MemoryManager::new();
        let err = mem.read_bytes(Pointer::NULL, 1).unwrap_err();
        assert_eq!(err, EngineError::Memory(MemoryErrorKind::NullDereference));
    }

    #[test]
    fn test_token_pointer_dereference() {
        let mem = MemoryManager::new();
        let bogus = Pointer {
            alloc: AllocId::NULL,
            offset: 0xdead,
        };
        let err = mem.read_bytes(bogus, 1).unwrap_err();
        assert_eq!(
            err,
            EngineError::Memory(MemoryErrorKind::InvalidToken { token: 0xdead })
        );
    }

    #[test]
    fn test_copy_bytes_overlapping() {
        let mem = MemoryManager::new();
        let id = mem.allocate(AllocationKind::Heap, 8, 1).unwrap();
        mem.write_bytes(Pointer::base(id), &[1, 2, 3, 4, 0, 0, 0, 0])
            .unwrap();
        mem.copy_bytes(
            Pointer { alloc: id, offset: 2 },
            Pointer::base(id),
            4,
        )
        .unwrap();
        assert_eq!(
            mem.read_bytes(Pointer::base(id), 8).unwrap(),
            vec![1, 2, 1, 2, 3, 4, 0, 0]
        );
    }

    #[test]
    fn test_c_string() {
        let mem = MemoryManager::new();
        let id = mem.allocate(AllocationKind::Global, 8, 1).unwrap();
        mem.write_bytes(Pointer::base(id), b"hi\0rest\0").unwrap();
        assert_eq!(mem.c_string_len(Pointer::base(id)).unwrap(), 2);
        assert_eq!(mem.read_c_string(Pointer::base(id)).unwrap(), "hi");
        // Unterminated scan traps instead of running off the allocation.
        let unterminated = mem.allocate(AllocationKind::Global, 2, 1).unwrap();
        mem.write_bytes(Pointer::base(unterminated), b"ab").unwrap();
        assert!(mem.read_c_string(Pointer::base(unterminated)).is_err());
    }

    #[test]
    fn test_fill() {
        let mem = MemoryManager::new();
        let id = mem.allocate(AllocationKind::Heap, 6, 1).unwrap();
        mem.fill_bytes(Pointer { alloc: id, offset: 2 }, 0xAB, 3).unwrap();
        assert_eq!(
            mem.read_bytes(Pointer::base(id), 6).unwrap(),
            vec![0, 0, 0xAB, 0xAB, 0xAB, 0]
        );
    }

    #[test]
    fn test_allocation_size_cap() {
        let mem = MemoryManager::new();
        assert!(mem
            .allocate(AllocationKind::Heap, MAX_ALLOCATION_BYTES + 1, 8)
            .is_err());
    }
}
