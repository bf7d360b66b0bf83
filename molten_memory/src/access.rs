//! Typed, bounds- and alignment-checked loads and stores.
//!
//! All byte-level encoding is little-endian per the fixed data layout.
//! Pointers are stored in memory as their opaque tokens (see
//! [`crate::tokens`]), which is what keeps a pointer written through one
//! guest pointer and read through another fully functional, including
//! pointers copied around with `memcpy`.

use crate::manager::MemoryManager;
use molten_core::error::MemoryErrorKind;
use molten_core::EngineError;
use molten_ir::types::{FloatKind, Type, TypeId, TypeTable};
use molten_ir::{DataLayout, Pointer, Value};

impl MemoryManager {
    /// Load a `ty` from `ptr`. `align` is the instruction's alignment
    /// attribute; 0 means the type's natural alignment.
    pub fn load(
        &self,
        types: &TypeTable,
        layout: &DataLayout,
        ptr: Pointer,
        ty: TypeId,
        align: u64,
    ) -> Result<Value, EngineError> {
        let size = layout.size_of(types, ty);
        check_alignment(types, layout, ptr, ty, align)?;
        let bytes = self.read_bytes(ptr, size)?;
        self.decode_value(types, layout, ty, &bytes)
    }

    /// Store `value` (of type `ty`) to `ptr`.
    pub fn store(
        &self,
        types: &TypeTable,
        layout: &DataLayout,
        ptr: Pointer,
        ty: TypeId,
        value: &Value,
        align: u64,
    ) -> Result<(), EngineError> {
        let size = layout.size_of(types, ty);
        check_alignment(types, layout, ptr, ty, align)?;
        let mut bytes = vec![0u8; size as usize];
        self.encode_value(types, layout, ty, value, &mut bytes)?;
        self.write_bytes(ptr, &bytes)
    }

    // =========================================================================
    // Decoding
    // =========================================================================

    fn decode_value(
        &self,
        types: &TypeTable,
        layout: &DataLayout,
        ty: TypeId,
        bytes: &[u8],
    ) -> Result<Value, EngineError> {
        match types.get(ty) {
            Type::Int { bits } => {
                let width = layout.size_of(types, ty) as usize;
                let raw = read_le(&bytes[..width]);
                Ok(Value::int(*bits, raw))
            }
            Type::Float(FloatKind::Float) => {
                Ok(Value::F32(f32::from_bits(read_le(&bytes[..4]) as u32)))
            }
            Type::Float(FloatKind::Double) => Ok(Value::F64(f64::from_bits(read_le(&bytes[..8])))),
            Type::Float(_) => Err(EngineError::UnsupportedInstruction(
                "extended-precision float access".into(),
            )),
            Type::Pointer { .. } | Type::Function { .. } => {
                let token = read_le(&bytes[..8]);
                Ok(Value::Ptr(self.int_to_pointer(token)))
            }
            Type::Array { elem, len } => {
                let stride = layout.size_of(types, *elem) as usize;
                let mut elems = Vec::with_capacity(*len as usize);
                for i in 0..*len as usize {
                    elems.push(self.decode_value(
                        types,
                        layout,
                        *elem,
                        &bytes[i * stride..],
                    )?);
                }
                Ok(Value::Aggregate(elems))
            }
            Type::Vector { elem, len } => {
                let stride = layout.size_of(types, *elem) as usize;
                let mut lanes = Vec::with_capacity(*len as usize);
                for i in 0..*len as usize {
                    lanes.push(self.decode_value(
                        types,
                        layout,
                        *elem,
                        &bytes[i * stride..],
                    )?);
                }
                Ok(Value::Vector(lanes))
            }
            Type::Struct { fields, .. } => {
                let fields = fields.clone();
                let (offsets, _) = layout.struct_offsets(types, ty);
                let mut values = Vec::with_capacity(fields.len());
                for (field, offset) in fields.iter().zip(offsets) {
                    values.push(self.decode_value(
                        types,
                        layout,
                        *field,
                        &bytes[offset as usize..],
                    )?);
                }
                Ok(Value::Aggregate(values))
            }
            Type::Void | Type::Label | Type::Metadata | Type::Token => {
                Ok(Value::Aggregate(Vec::new()))
            }
        }
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    fn encode_value(
        &self,
        types: &TypeTable,
        layout: &DataLayout,
        ty: TypeId,
        value: &Value,
        out: &mut [u8],
    ) -> Result<(), EngineError> {
        match (types.get(ty), value) {
            (Type::Int { .. }, v) => {
                let raw = v.as_u64().ok_or_else(type_confusion)?;
                let width = layout.size_of(types, ty) as usize;
                write_le(raw, &mut out[..width]);
                Ok(())
            }
            (Type::Float(FloatKind::Float), Value::F32(f)) => {
                out[..4].copy_from_slice(&f.to_le_bytes());
                Ok(())
            }
            (Type::Float(FloatKind::Double), Value::F64(f)) => {
                out[..8].copy_from_slice(&f.to_le_bytes());
                Ok(())
            }
            (Type::Float(FloatKind::Double), Value::F32(f)) => {
                out[..8].copy_from_slice(&f64::from(*f).to_le_bytes());
                Ok(())
            }
            (Type::Float(_), _) => Err(EngineError::UnsupportedInstruction(
                "extended-precision float access".into(),
            )),
            (Type::Pointer { .. } | Type::Function { .. }, v) => {
                let token = match v {
                    Value::Ptr(p) => self.pointer_to_int(*p),
                    // Integers stored through pointer-typed memory keep
                    // their bit pattern.
                    other => other.as_u64().ok_or_else(type_confusion)?,
                };
                write_le(token, &mut out[..8]);
                Ok(())
            }
            (Type::Array { elem, .. }, Value::Aggregate(elems))
            | (Type::Vector { elem, .. }, Value::Vector(elems)) => {
                let elem = *elem;
                let stride = layout.size_of(types, elem) as usize;
                for (i, item) in elems.iter().enumerate() {
                    self.encode_value(types, layout, elem, item, &mut out[i * stride..])?;
                }
                Ok(())
            }
            (Type::Struct { fields, .. }, Value::Aggregate(values)) => {
                let fields = fields.clone();
                let (offsets, _) = layout.struct_offsets(types, ty);
                for ((field, offset), item) in fields.iter().zip(offsets).zip(values) {
                    self.encode_value(types, layout, *field, item, &mut out[offset as usize..])?;
                }
                Ok(())
            }
            _ => Err(type_confusion()),
        }
    }
}

fn type_confusion() -> EngineError {
    EngineError::Memory(MemoryErrorKind::TypeMismatch)
}

fn check_alignment(
    types: &TypeTable,
    layout: &DataLayout,
    ptr: Pointer,
    ty: TypeId,
    align: u64,
) -> Result<(), EngineError> {
    let required = if align == 0 {
        layout.align_of(types, ty)
    } else {
        align
    };
    if required > 1 && ptr.offset % required != 0 {
        return Err(EngineError::Memory(MemoryErrorKind::Misaligned {
            offset: ptr.offset,
            required,
        }));
    }
    Ok(())
}

#[inline]
fn read_le(bytes: &[u8]) -> u64 {
    let mut raw = 0u64;
    for (i, b) in bytes.iter().enumerate().take(8) {
        raw |= u64::from(*b) << (i * 8);
    }
    raw
}

#[inline]
fn write_le(value: u64, out: &mut [u8]) {
    for (i, slot) in out.iter_mut().enumerate().take(8) {
        *slot = (value >> (i * 8)) as u8;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::AllocationKind;

    fn setup() -> (MemoryManager, TypeTable, DataLayout) {
        (MemoryManager::new(), TypeTable::new(), DataLayout)
    }

    #[test]
    fn test_scalar_roundtrip() {
        let (mem, mut types, layout) = setup();
        let i32t = types.int(32);
        let id = mem.allocate(AllocationKind::Heap, 8, 8).unwrap();
        let p = Pointer::base(id);
        mem.store(&types, &layout, p, i32t, &Value::I32(0xdead_beef), 0)
            .unwrap();
        assert_eq!(
            mem.load(&types, &layout, p, i32t, 0).unwrap(),
            Value::I32(0xdead_beef)
        );
        // Little-endian byte order in memory.
        assert_eq!(
            mem.read_bytes(p, 4).unwrap(),
            vec![0xef, 0xbe, 0xad, 0xde]
        );
    }

    #[test]
    fn test_float_roundtrip() {
        let (mem, mut types, layout) = setup();
        let f64t = types.intern(Type::Float(FloatKind::Double));
        let id = mem.allocate(AllocationKind::Heap, 8, 8).unwrap();
        let p = Pointer::base(id);
        mem.store(&types, &layout, p, f64t, &Value::F64(6.5), 0).unwrap();
        assert_eq!(mem.load(&types, &layout, p, f64t, 0).unwrap(), Value::F64(6.5));
    }

    #[test]
    fn test_pointer_roundtrip_through_memory() {
        let (mem, mut types, layout) = setup();
        let i8t = types.int(8);
        let pty = types.pointer_to(i8t);
        let target = mem.allocate(AllocationKind::Heap, 4, 1).unwrap();
        let slot = mem.allocate(AllocationKind::Heap, 8, 8).unwrap();
        let stored = Pointer { alloc: target, offset: 2 };
        mem.store(&types, &layout, Pointer::base(slot), pty, &Value::Ptr(stored), 0)
            .unwrap();
        let loaded = mem.load(&types, &layout, Pointer::base(slot), pty, 0).unwrap();
        assert_eq!(loaded, Value::Ptr(stored));
    }

    #[test]
    fn test_null_pointer_roundtrip() {
        let (mem, mut types, layout) = setup();
        let i8t = types.int(8);
        let pty = types.pointer_to(i8t);
        let slot = mem.allocate(AllocationKind::Heap, 8, 8).unwrap();
        mem.store(
            &types,
            &layout,
            Pointer::base(slot),
            pty,
            &Value::Ptr(Pointer::NULL),
            0,
        )
        .unwrap();
        assert_eq!(mem.read_bytes(Pointer::base(slot), 8).unwrap(), vec![0u8; 8]);
        assert_eq!(
            mem.load(&types, &layout, Pointer::base(slot), pty, 0).unwrap(),
            Value::Ptr(Pointer::NULL)
        );
    }

    #[test]
    fn test_struct_roundtrip_with_padding() {
        let (mem, mut types, layout) = setup();
        let i8t = types.int(8);
        let i32t = types.int(32);
        let s = types.intern(Type::Struct {
            name: None,
            fields: vec![i8t, i32t],
            packed: false,
            opaque: false,
        });
        let id = mem.allocate(AllocationKind::Heap, 8, 4).unwrap();
        let v = Value::Aggregate(vec![Value::I8(7), Value::I32(1234)]);
        mem.store(&types, &layout, Pointer::base(id), s, &v, 0).unwrap();
        assert_eq!(mem.load(&types, &layout, Pointer::base(id), s, 0).unwrap(), v);
        // Second field lands at offset 4.
        assert_eq!(
            mem.load(&types, &layout, Pointer { alloc: id, offset: 4 }, i32t, 0)
                .unwrap(),
            Value::I32(1234)
        );
    }

    #[test]
    fn test_misaligned_load_traps() {
        let (mem, mut types, layout) = setup();
        let i32t = types.int(32);
        let id = mem.allocate(AllocationKind::Heap, 8, 8).unwrap();
        let err = mem
            .load(&types, &layout, Pointer { alloc: id, offset: 1 }, i32t, 0)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Memory(MemoryErrorKind::Misaligned { offset: 1, required: 4 })
        ));
        // An explicit align-1 attribute permits the same access.
        assert!(mem
            .load(&types, &layout, Pointer { alloc: id, offset: 1 }, i32t, 1)
            .is_ok());
    }

    #[test]
    fn test_i1_occupies_one_byte() {
        let (mem, mut types, layout) = setup();
        let i1 = types.int(1);
        let id = mem.allocate(AllocationKind::Heap, 1, 1).unwrap();
        mem.store(&types, &layout, Pointer::base(id), i1, &Value::I1(true), 0)
            .unwrap();
        assert_eq!(
            mem.load(&types, &layout, Pointer::base(id), i1, 0).unwrap(),
            Value::I1(true)
        );
    }

    #[test]
    fn test_vector_roundtrip() {
        let (mem, mut types, layout) = setup();
        let i16t = types.int(16);
        let v4 = types.intern(Type::Vector { elem: i16t, len: 4 });
        let id = mem.allocate(AllocationKind::Heap, 8, 8).unwrap();
        let v = Value::Vector(vec![
            Value::I16(1),
            Value::I16(2),
            Value::I16(3),
            Value::I16(4),
        ]);
        mem.store(&types, &layout, Pointer::base(id), v4, &v, 0).unwrap();
        assert_eq!(mem.load(&types, &layout, Pointer::base(id), v4, 0).unwrap(), v);
    }
}
