//! The reversible pointer ⇄ integer mapping table.
//!
//! Guest code is free to cast pointers to integers, do arithmetic on them,
//! and cast back. Each allocation is lazily assigned a disjoint range in an
//! opaque "virtual" integer space; a pointer's token is its range base plus
//! its offset. Interior tokens reverse-map through an ordered range lookup,
//! so `(intptr_t)p + 4` round-trips to `p + 4`. Token zero is the null
//! pointer; tokens that map to no range convert to handle-less pointers
//! that trap with `InvalidToken` if dereferenced.

use crate::manager::MemoryManager;
use molten_ir::{AllocId, Pointer};
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;

/// Lowest token ever handed out. Leaving the first page unmapped keeps
/// small integers (and thus common sentinel values) invalid as pointers.
const FIRST_TOKEN: u64 = 0x1000;

/// Spacing granule between ranges; the one-past-the-end token of an
/// allocation never collides with its neighbor's base.
const RANGE_ALIGN: u64 = 16;

/// Token ranges, keyed by base.
pub(crate) struct TokenTable {
    next: u64,
    ranges: BTreeMap<u64, (AllocId, u64)>,
}

impl TokenTable {
    pub(crate) fn new() -> Self {
        TokenTable {
            next: FIRST_TOKEN,
            ranges: BTreeMap::new(),
        }
    }

    fn assign(&mut self, id: AllocId, size: u64) -> u64 {
        let base = self.next;
        let span = size.max(1).div_ceil(RANGE_ALIGN) * RANGE_ALIGN + RANGE_ALIGN;
        self.next += span;
        self.ranges.insert(base, (id, size));
        base
    }

    fn lookup(&self, token: u64) -> Option<(AllocId, u64)> {
        let (&base, &(id, size)) = self.ranges.range(..=token).next_back()?;
        // One-past-the-end tokens still belong to their allocation so that
        // `(intptr_t)(end)` compares and converts consistently.
        if token <= base + size {
            Some((id, token - base))
        } else {
            None
        }
    }
}

impl MemoryManager {
    /// Convert a pointer to its opaque integer token.
    pub fn pointer_to_int(&self, ptr: Pointer) -> u64 {
        if ptr.is_null() {
            return 0;
        }
        if !ptr.alloc.is_valid() {
            // A raw integer the guest previously cast to a pointer; hand it
            // back unchanged.
            return ptr.offset;
        }
        let entry = match self.entry(ptr.alloc) {
            Ok(entry) => entry,
            Err(_) => return 0,
        };
        let mut base = entry.token_base.load(Ordering::Acquire);
        if base == 0 {
            let mut table = self.tokens.lock();
            // Re-check under the lock; another thread may have assigned.
            base = entry.token_base.load(Ordering::Acquire);
            if base == 0 {
                base = table.assign(ptr.alloc, entry.size);
                entry.token_base.store(base, Ordering::Release);
            }
        }
        base.wrapping_add(ptr.offset)
    }

    /// Convert an integer token back to a pointer.
    pub fn int_to_pointer(&self, token: u64) -> Pointer {
        if token == 0 {
            return Pointer::NULL;
        }
        let table = self.tokens.lock();
        match table.lookup(token) {
            Some((alloc, offset)) => Pointer { alloc, offset },
            None => Pointer {
                alloc: AllocId::NULL,
                offset: token,
            },
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::AllocationKind;

    #[test]
    fn test_roundtrip() {
        let mem = MemoryManager::new();
        let id = mem.allocate(AllocationKind::Heap, 32, 8).unwrap();
        let p = Pointer { alloc: id, offset: 12 };
        let token = mem.pointer_to_int(p);
        assert_ne!(token, 0);
        assert_eq!(mem.int_to_pointer(token), p);
    }

    #[test]
    fn test_interior_arithmetic_on_tokens() {
        let mem = MemoryManager::new();
        let id = mem.allocate(AllocationKind::Heap, 32, 8).unwrap();
        let base = mem.pointer_to_int(Pointer::base(id));
        // Integer arithmetic inside the allocation maps back to the same
        // allocation at the adjusted offset.
        assert_eq!(
            mem.int_to_pointer(base + 20),
            Pointer { alloc: id, offset: 20 }
        );
    }

    #[test]
    fn test_one_past_end_token() {
        let mem = MemoryManager::new();
        let id = mem.allocate(AllocationKind::Heap, 16, 8).unwrap();
        let base = mem.pointer_to_int(Pointer::base(id));
        assert_eq!(
            mem.int_to_pointer(base + 16),
            Pointer { alloc: id, offset: 16 }
        );
    }

    #[test]
    fn test_null_and_unknown_tokens() {
        let mem = MemoryManager::new();
        assert_eq!(mem.int_to_pointer(0), Pointer::NULL);
        assert_eq!(mem.pointer_to_int(Pointer::NULL), 0);
        // An unmapped token converts to a handle-less pointer carrying the
        // original integer, so a later ptrtoint round-trips.
        let bogus = mem.int_to_pointer(0x42);
        assert!(!bogus.alloc.is_valid());
        assert_eq!(mem.pointer_to_int(bogus), 0x42);
    }

    #[test]
    fn test_tokens_are_stable_per_allocation() {
        let mem = MemoryManager::new();
        let id = mem.allocate(AllocationKind::Heap, 8, 8).unwrap();
        let a = mem.pointer_to_int(Pointer::base(id));
        let b = mem.pointer_to_int(Pointer::base(id));
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_allocations_get_disjoint_ranges() {
        let mem = MemoryManager::new();
        let a = mem.allocate(AllocationKind::Heap, 64, 8).unwrap();
        let b = mem.allocate(AllocationKind::Heap, 64, 8).unwrap();
        let ta = mem.pointer_to_int(Pointer::base(a));
        let tb = mem.pointer_to_int(Pointer::base(b));
        assert!(ta.abs_diff(tb) >= 64);
        assert_eq!(mem.int_to_pointer(ta + 63).alloc, a);
        assert_eq!(mem.int_to_pointer(tb + 63).alloc, b);
    }

    #[test]
    fn test_freed_allocation_token_still_maps() {
        let mem = MemoryManager::new();
        let id = mem.allocate(AllocationKind::Heap, 8, 8).unwrap();
        let token = mem.pointer_to_int(Pointer::base(id));
        mem.free(id).unwrap();
        // The mapping survives so the dereference trap is UseAfterFree,
        // not InvalidToken.
        assert_eq!(mem.int_to_pointer(token).alloc, id);
    }
}
