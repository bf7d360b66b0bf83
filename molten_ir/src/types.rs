//! The interned type table.
//!
//! Every value carries exactly one type, and types determine byte size and
//! alignment through [`crate::layout::DataLayout`]. Types are interned in a
//! [`TypeTable`] and referenced by [`TypeId`]; this mirrors the type table of
//! the bitcode container (which indexes types by position) and makes
//! recursive struct types representable without reference cycles.

use crate::ids::Id;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Index into a [`TypeTable`].
pub type TypeId = Id<Type>;

// =============================================================================
// Type
// =============================================================================

/// Floating-point widths the type system distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatKind {
    /// 16-bit IEEE half. Representable, but arithmetic on it is not
    /// translatable.
    Half,
    /// 32-bit IEEE single.
    Float,
    /// 64-bit IEEE double.
    Double,
    /// 80-bit x87 extended. Representable for layout purposes only.
    X86Fp80,
    /// 128-bit IEEE quad. Representable for layout purposes only.
    Fp128,
}

/// A guest type: one tagged variant per kind the container can declare.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// The empty type of functions returning nothing.
    Void,
    /// Arbitrary-width integer. Widths above 64 are representable but not
    /// translatable.
    Int {
        /// Bit width, at least 1.
        bits: u32,
    },
    /// Floating point of the given width.
    Float(FloatKind),
    /// Pointer to `pointee`.
    Pointer {
        /// The pointed-to type.
        pointee: TypeId,
    },
    /// Fixed-length array.
    Array {
        /// Element type.
        elem: TypeId,
        /// Number of elements.
        len: u64,
    },
    /// SIMD vector.
    Vector {
        /// Lane type.
        elem: TypeId,
        /// Lane count.
        len: u32,
    },
    /// Struct with ordered fields.
    Struct {
        /// Optional name from the container's struct-name records.
        name: Option<Arc<str>>,
        /// Ordered field types. Empty for opaque structs.
        fields: Vec<TypeId>,
        /// Packed structs have no inter-field padding.
        packed: bool,
        /// Opaque structs have a name but no body.
        opaque: bool,
    },
    /// Function signature.
    Function {
        /// Return type.
        ret: TypeId,
        /// Parameter types.
        params: Vec<TypeId>,
        /// True if the signature is variadic.
        vararg: bool,
    },
    /// Basic-block label type (appears in the container's type table).
    Label,
    /// Metadata type (appears in the container's type table; values of this
    /// type never reach the interpreter).
    Metadata,
    /// Token type (operand-bundle plumbing; never evaluated).
    Token,
}

impl Type {
    /// True for integer types.
    #[inline]
    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int { .. })
    }

    /// True for floating-point types.
    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float(_))
    }

    /// True for pointer types.
    #[inline]
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer { .. })
    }

    /// True for aggregate (array/struct) types.
    #[inline]
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Array { .. } | Type::Struct { .. })
    }
}

// =============================================================================
// Type Table
// =============================================================================

/// Interned type storage.
///
/// The bitcode reader appends types in container order so that container
/// type indices and [`TypeId`]s coincide; later stages may intern additional
/// types (deduplicated) without disturbing the prefix.
#[derive(Debug, Default, Clone)]
pub struct TypeTable {
    types: Vec<Type>,
    /// Dedup index for types interned after reading. Container-order types
    /// are entered here too so lookups hit them first.
    interned: FxHashMap<Type, TypeId>,
}

impl TypeTable {
    /// An empty table.
    pub fn new() -> Self {
        TypeTable::default()
    }

    /// Append a type at the next index, without deduplication.
    ///
    /// Used by the reader, which must preserve container indices exactly.
    pub fn push(&mut self, ty: Type) -> TypeId {
        let id = TypeId::new(self.types.len() as u32);
        self.interned.entry(ty.clone()).or_insert(id);
        self.types.push(ty);
        id
    }

    /// Replace the type at `id`. Used by the reader to fill in named-struct
    /// bodies declared ahead of their definition.
    pub fn replace(&mut self, id: TypeId, ty: Type) {
        // Drop the stale dedup entry if it pointed at this slot.
        if self.interned.get(&self.types[id.as_usize()]) == Some(&id) {
            let old = self.types[id.as_usize()].clone();
            self.interned.remove(&old);
        }
        self.interned.entry(ty.clone()).or_insert(id);
        self.types[id.as_usize()] = ty;
    }

    /// Build a table from a complete container-order type list, as decoded
    /// from a bitcode type block (forward references already patched).
    pub fn from_container(types: Vec<Type>) -> Self {
        let mut interned = FxHashMap::default();
        for (i, ty) in types.iter().enumerate() {
            interned
                .entry(ty.clone())
                .or_insert_with(|| TypeId::new(i as u32));
        }
        TypeTable { types, interned }
    }

    /// Intern a type, reusing an existing id when one structurally matches.
    pub fn intern(&mut self, ty: Type) -> TypeId {
        if let Some(&id) = self.interned.get(&ty) {
            return id;
        }
        self.push(ty)
    }

    /// Intern an integer type of `bits`.
    #[inline]
    pub fn int(&mut self, bits: u32) -> TypeId {
        self.intern(Type::Int { bits })
    }

    /// Intern a pointer to `pointee`.
    #[inline]
    pub fn pointer_to(&mut self, pointee: TypeId) -> TypeId {
        self.intern(Type::Pointer { pointee })
    }

    /// Look up a type by id.
    #[inline]
    pub fn get(&self, id: TypeId) -> &Type {
        &self.types[id.as_usize()]
    }

    /// Find an existing id for a structurally equal type, without interning.
    #[inline]
    pub fn lookup(&self, ty: &Type) -> Option<TypeId> {
        self.interned.get(ty).copied()
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True if no types have been interned.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Bit width if `id` is an integer type.
    #[inline]
    pub fn int_bits(&self, id: TypeId) -> Option<u32> {
        match self.get(id) {
            Type::Int { bits } => Some(*bits),
            _ => None,
        }
    }

    /// Pointee type if `id` is a pointer type.
    #[inline]
    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.get(id) {
            Type::Pointer { pointee } => Some(*pointee),
            _ => None,
        }
    }

    /// Return type and parameter list if `id` is a function type.
    pub fn signature(&self, id: TypeId) -> Option<(TypeId, &[TypeId], bool)> {
        match self.get(id) {
            Type::Function {
                ret,
                params,
                vararg,
            } => Some((*ret, params.as_slice(), *vararg)),
            _ => None,
        }
    }

    /// Render a type for diagnostics.
    pub fn display(&self, id: TypeId) -> String {
        match self.get(id) {
            Type::Void => "void".to_string(),
            Type::Int { bits } => format!("i{}", bits),
            Type::Float(FloatKind::Half) => "half".to_string(),
            Type::Float(FloatKind::Float) => "float".to_string(),
            Type::Float(FloatKind::Double) => "double".to_string(),
            Type::Float(FloatKind::X86Fp80) => "x86_fp80".to_string(),
            Type::Float(FloatKind::Fp128) => "fp128".to_string(),
            Type::Pointer { pointee } => format!("{}*", self.display(*pointee)),
            Type::Array { elem, len } => format!("[{} x {}]", len, self.display(*elem)),
            Type::Vector { elem, len } => format!("<{} x {}>", len, self.display(*elem)),
            Type::Struct {
                name: Some(name), ..
            } => format!("%{}", name),
            Type::Struct { fields, packed, .. } => {
                let body = fields
                    .iter()
                    .map(|f| self.display(*f))
                    .collect::<Vec<_>>()
                    .join(", ");
                if *packed {
                    format!("<{{ {} }}>", body)
                } else {
                    format!("{{ {} }}", body)
                }
            }
            Type::Function {
                ret,
                params,
                vararg,
            } => {
                let mut body = params
                    .iter()
                    .map(|p| self.display(*p))
                    .collect::<Vec<_>>()
                    .join(", ");
                if *vararg {
                    if !body.is_empty() {
                        body.push_str(", ");
                    }
                    body.push_str("...");
                }
                format!("{} ({})", self.display(*ret), body)
            }
            Type::Label => "label".to_string(),
            Type::Metadata => "metadata".to_string(),
            Type::Token => "token".to_string(),
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
    fn test_push_preserves_container_order() {
        let mut table = TypeTable::new();
        let a = table.push(Type::Int { bits: 32 });
        let b = table.push(Type::Int { bits: 32 });
        // The reader must get distinct, sequential ids even for duplicates.
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
    }

    #[test]
    fn test_intern_deduplicates() {
        let mut table = TypeTable::new();
        let a = table.intern(Type::Int { bits: 8 });
        let b = table.intern(Type::Int { bits: 8 });
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_recursive_struct_via_replace() {
        // struct node { struct node* next; }
        let mut table = TypeTable::new();
        let node = table.push(Type::Struct {
            name: Some("node".into()),
            fields: Vec::new(),
            packed: false,
            opaque: true,
        });
        let node_ptr = table.pointer_to(node);
        table.replace(
            node,
            Type::Struct {
                name: Some("node".into()),
                fields: vec![node_ptr],
                packed: false,
                opaque: false,
            },
        );
        match table.get(node) {
            Type::Struct { fields, opaque, .. } => {
                assert!(!opaque);
                assert_eq!(fields, &[node_ptr]);
            }
            other => panic!("expected struct, got {:?}", other),
        }
    }

    #[test]
    fn test_display() {
        let mut table = TypeTable::new();
        let i8t = table.int(8);
        let p = table.pointer_to(i8t);
        let i32t = table.int(32);
        let f = table.intern(Type::Function {
            ret: i32t,
            params: vec![p],
            vararg: true,
        });
        assert_eq!(table.display(p), "i8*");
        assert_eq!(table.display(f), "i32 (i8*, ...)");
    }

    #[test]
    fn test_signature_lookup() {
        let mut table = TypeTable::new();
        let void = table.intern(Type::Void);
        let i64t = table.int(64);
        let f = table.intern(Type::Function {
            ret: void,
            params: vec![i64t, i64t],
            vararg: false,
        });
        let (ret, params, vararg) = table.signature(f).unwrap();
        assert_eq!(ret, void);
        assert_eq!(params, &[i64t, i64t]);
        assert!(!vararg);
        assert!(table.signature(i64t).is_none());
    }
}
