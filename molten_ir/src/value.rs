//! Runtime values and the managed pointer representation.
//!
//! A [`Pointer`] is an (allocation handle, byte offset) pair, never a raw
//! host address. This is the load-bearing invariant of the whole engine:
//! every dereference is bounds-checked against the referenced allocation,
//! and guest-visible "addresses" are opaque tokens handed out by the memory
//! manager's mapping table.

use crate::types::{FloatKind, Type, TypeId, TypeTable};

// =============================================================================
// Allocation Handle & Pointer
// =============================================================================

/// Handle naming one allocation owned by the memory manager.
///
/// Handles remain valid identities after the allocation is freed (the
/// allocation is only marked dead), which is what makes double-free and
/// use-after-free detectable instead of undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocId(u32);

impl AllocId {
    /// The null handle. `Pointer { alloc: NULL, offset: 0 }` is the guest
    /// null pointer.
    pub const NULL: AllocId = AllocId(u32::MAX);

    /// Construct from a raw slot index.
    #[inline]
    pub const fn from_raw(index: u32) -> Self {
        AllocId(index)
    }

    /// The raw slot index.
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// True unless this is the null handle.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != u32::MAX
    }
}

/// A guest pointer: allocation handle plus byte offset.
///
/// Arithmetic only ever adjusts `offset`; it can never move a pointer to a
/// different allocation. A pointer whose handle is [`AllocId::NULL`] with a
/// non-zero offset carries a raw integer the guest cast to a pointer without
/// a backing mapping; dereferencing it traps with `InvalidToken`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pointer {
    /// The backing allocation.
    pub alloc: AllocId,
    /// Byte offset from the allocation base. May legally sit one past the
    /// end; only dereference is bounds-checked.
    pub offset: u64,
}

impl Pointer {
    /// The guest null pointer.
    pub const NULL: Pointer = Pointer {
        alloc: AllocId::NULL,
        offset: 0,
    };

    /// Pointer to the base of `alloc`.
    #[inline]
    pub const fn base(alloc: AllocId) -> Self {
        Pointer { alloc, offset: 0 }
    }

    /// True for the null pointer (handle-less with offset zero).
    #[inline]
    pub const fn is_null(self) -> bool {
        !self.alloc.is_valid() && self.offset == 0
    }

    /// Offset this pointer by a signed byte count, wrapping like the
    /// equivalent integer arithmetic would.
    #[inline]
    #[must_use]
    pub fn offset_by(self, bytes: i64) -> Self {
        Pointer {
            alloc: self.alloc,
            offset: self.offset.wrapping_add(bytes as u64),
        }
    }
}

impl std::fmt::Display for Pointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else if self.alloc.is_valid() {
            write!(f, "alloc#{}+{}", self.alloc.raw(), self.offset)
        } else {
            write!(f, "token({:#x})", self.offset)
        }
    }
}

// =============================================================================
// Value
// =============================================================================

/// An SSA-produced datum: scalar bit pattern, pointer, or aggregate.
///
/// Values are immutable once produced in a given evaluation; the interpreter
/// copies them between frame slots by value. Aggregates hold their fields in
/// declaration order; vectors hold their lanes.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 1-bit integer.
    I1(bool),
    /// 8-bit integer bit pattern.
    I8(u8),
    /// 16-bit integer bit pattern.
    I16(u16),
    /// 32-bit integer bit pattern.
    I32(u32),
    /// 64-bit integer bit pattern.
    I64(u64),
    /// 32-bit IEEE float.
    F32(f32),
    /// 64-bit IEEE float.
    F64(f64),
    /// Managed pointer.
    Ptr(Pointer),
    /// Struct or array: ordered sub-values.
    Aggregate(Vec<Value>),
    /// Vector lanes.
    Vector(Vec<Value>),
}

impl Value {
    /// Construct an integer value of the given bit width from a raw
    /// (zero-extended) bit pattern. Widths are rounded to the storage
    /// widths the interpreter evaluates (1/8/16/32/64).
    pub fn int(bits: u32, raw: u64) -> Value {
        match bits {
            1 => Value::I1(raw & 1 != 0),
            2..=8 => Value::I8(raw as u8),
            9..=16 => Value::I16(raw as u16),
            17..=32 => Value::I32(raw as u32),
            _ => Value::I64(raw),
        }
    }

    /// The zero/null value of `ty` (also the `undef` materialization).
    pub fn zero_of(types: &TypeTable, ty: TypeId) -> Value {
        match types.get(ty) {
            Type::Int { bits } => Value::int(*bits, 0),
            Type::Float(FloatKind::Float) => Value::F32(0.0),
            Type::Float(_) => Value::F64(0.0),
            Type::Pointer { .. } | Type::Function { .. } => Value::Ptr(Pointer::NULL),
            Type::Array { elem, len } => {
                Value::Aggregate(vec![Value::zero_of(types, *elem); *len as usize])
            }
            Type::Vector { elem, len } => {
                Value::Vector(vec![Value::zero_of(types, *elem); *len as usize])
            }
            Type::Struct { fields, .. } => {
                Value::Aggregate(fields.iter().map(|f| Value::zero_of(types, *f)).collect())
            }
            Type::Void | Type::Label | Type::Metadata | Type::Token => Value::Aggregate(Vec::new()),
        }
    }

    /// Integer bit pattern, zero-extended to 64 bits.
    #[inline]
    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::I1(b) => Some(u64::from(b)),
            Value::I8(v) => Some(u64::from(v)),
            Value::I16(v) => Some(u64::from(v)),
            Value::I32(v) => Some(u64::from(v)),
            Value::I64(v) => Some(v),
            _ => None,
        }
    }

    /// Integer bit pattern, sign-extended to 64 bits.
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::I1(b) => Some(-i64::from(b)),
            Value::I8(v) => Some(i64::from(v as i8)),
            Value::I16(v) => Some(i64::from(v as i16)),
            Value::I32(v) => Some(i64::from(v as i32)),
            Value::I64(v) => Some(v as i64),
            _ => None,
        }
    }

    /// The boolean of an `i1`.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::I1(b) => Some(b),
            _ => None,
        }
    }

    /// The pointer payload, if any.
    #[inline]
    pub fn as_ptr(&self) -> Option<Pointer> {
        match *self {
            Value::Ptr(p) => Some(p),
            _ => None,
        }
    }

    /// Floating payload widened to f64, if any.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::F32(v) => Some(f64::from(v)),
            Value::F64(v) => Some(v),
            _ => None,
        }
    }

    /// Integer bit width of this value (1/8/16/32/64), if integral.
    #[inline]
    pub fn int_width(&self) -> Option<u32> {
        match self {
            Value::I1(_) => Some(1),
            Value::I8(_) => Some(8),
            Value::I16(_) => Some(16),
            Value::I32(_) => Some(32),
            Value::I64(_) => Some(64),
            _ => None,
        }
    }

    /// True if the value is an integer zero, float zero or null pointer.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Ptr(p) => p.is_null(),
            Value::F32(f) => *f == 0.0,
            Value::F64(f) => *f == 0.0,
            other => other.as_u64() == Some(0),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_construction_masks_width() {
        assert_eq!(Value::int(1, 3), Value::I1(true));
        assert_eq!(Value::int(8, 0x1ff), Value::I8(0xff));
        assert_eq!(Value::int(32, 0xdead_beef), Value::I32(0xdead_beef));
        assert_eq!(Value::int(64, u64::MAX), Value::I64(u64::MAX));
    }

    #[test]
    fn test_sign_extension() {
        assert_eq!(Value::I8(0xff).as_i64(), Some(-1));
        assert_eq!(Value::I16(0x8000).as_i64(), Some(i64::from(i16::MIN)));
        assert_eq!(Value::I32(7).as_i64(), Some(7));
        assert_eq!(Value::I8(0xff).as_u64(), Some(0xff));
    }

    #[test]
    fn test_null_pointer() {
        assert!(Pointer::NULL.is_null());
        assert!(!Pointer::base(AllocId::from_raw(0)).is_null());
        // A token-carrying pointer is not null even without a handle.
        let token = Pointer {
            alloc: AllocId::NULL,
            offset: 0x1000,
        };
        assert!(!token.is_null());
    }

    #[test]
    fn test_pointer_offset_roundtrip() {
        let p = Pointer {
            alloc: AllocId::from_raw(3),
            offset: 16,
        };
        let q = p.offset_by(24).offset_by(-24);
        assert_eq!(p, q);
        assert_eq!(p.offset_by(-32).offset_by(32), p);
    }

    #[test]
    fn test_zero_of_struct() {
        let mut t = TypeTable::new();
        let i32t = t.int(32);
        let i8t = t.int(8);
        let p = t.pointer_to(i8t);
        let s = t.intern(Type::Struct {
            name: None,
            fields: vec![i32t, p],
            packed: false,
            opaque: false,
        });
        match Value::zero_of(&t, s) {
            Value::Aggregate(fields) => {
                assert_eq!(fields[0], Value::I32(0));
                assert_eq!(fields[1], Value::Ptr(Pointer::NULL));
            }
            other => panic!("expected aggregate, got {:?}", other),
        }
    }

    #[test]
    fn test_is_zero() {
        assert!(Value::I32(0).is_zero());
        assert!(Value::Ptr(Pointer::NULL).is_zero());
        assert!(Value::F64(0.0).is_zero());
        assert!(!Value::I32(1).is_zero());
    }
}
