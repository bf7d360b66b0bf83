//! Conversion operations.

use molten_core::error::MemoryErrorKind;
use molten_core::EngineError;
use molten_ir::types::{FloatKind, Type, TypeId, TypeTable};
use molten_ir::{CastOp, Value};
use molten_memory::MemoryManager;

/// Evaluate a cast to `to` (scalar or lane-wise).
pub fn cast(
    types: &TypeTable,
    mem: &MemoryManager,
    op: CastOp,
    to: TypeId,
    value: &Value,
) -> Result<Value, EngineError> {
    if let (Type::Vector { elem, .. }, Value::Vector(lanes)) = (types.get(to), value) {
        // Bit-level vector reshapes (<2 x i32> ↔ i64 etc.) go through the
        // byte image below; element-wise casts recurse per lane.
        if op != CastOp::BitCast {
            let elem = *elem;
            let out = lanes
                .iter()
                .map(|lane| cast(types, mem, op, elem, lane))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Value::Vector(out));
        }
    }

    match op {
        CastOp::Trunc | CastOp::ZExt => {
            let raw = int_of(value)?;
            Ok(Value::int(int_bits(types, to)?, raw))
        }
        CastOp::SExt => {
            let raw = value
                .as_i64()
                .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
            Ok(Value::int(int_bits(types, to)?, raw as u64))
        }
        CastOp::FpToUi => {
            let f = float_of(value)?;
            Ok(Value::int(int_bits(types, to)?, f as u64))
        }
        CastOp::FpToSi => {
            let f = float_of(value)?;
            Ok(Value::int(int_bits(types, to)?, (f as i64) as u64))
        }
        CastOp::UiToFp => {
            let raw = int_of(value)?;
            float_result(types, to, raw as f64)
        }
        CastOp::SiToFp => {
            let raw = value
                .as_i64()
                .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
            float_result(types, to, raw as f64)
        }
        CastOp::FpTrunc | CastOp::FpExt => float_result(types, to, float_of(value)?),
        CastOp::PtrToInt => {
            let token = match value {
                Value::Ptr(p) => mem.pointer_to_int(*p),
                other => int_of(other)?,
            };
            Ok(Value::int(int_bits(types, to)?, token))
        }
        CastOp::IntToPtr => {
            let raw = int_of(value)?;
            Ok(Value::Ptr(mem.int_to_pointer(raw)))
        }
        CastOp::BitCast | CastOp::AddrSpaceCast => bitcast(types, to, value),
    }
}

/// Bit-preserving reinterpretation. Pointer-to-pointer casts are identity;
/// everything else goes through a little-endian byte image.
fn bitcast(types: &TypeTable, to: TypeId, value: &Value) -> Result<Value, EngineError> {
    if matches!(types.get(to), Type::Pointer { .. }) {
        return match value {
            Value::Ptr(_) => Ok(value.clone()),
            // An integer pattern bitcast at pointer type keeps its bits.
            other => Ok(other.clone()),
        };
    }
    let bytes = scalar_bytes(value)?;
    from_bytes(types, to, &bytes)
}

fn scalar_bytes(value: &Value) -> Result<Vec<u8>, EngineError> {
    match value {
        Value::I1(b) => Ok(vec![u8::from(*b)]),
        Value::I8(v) => Ok(v.to_le_bytes().to_vec()),
        Value::I16(v) => Ok(v.to_le_bytes().to_vec()),
        Value::I32(v) => Ok(v.to_le_bytes().to_vec()),
        Value::I64(v) => Ok(v.to_le_bytes().to_vec()),
        Value::F32(v) => Ok(v.to_le_bytes().to_vec()),
        Value::F64(v) => Ok(v.to_le_bytes().to_vec()),
        Value::Vector(lanes) => {
            let mut out = Vec::new();
            for lane in lanes {
                out.extend(scalar_bytes(lane)?);
            }
            Ok(out)
        }
        Value::Ptr(_) | Value::Aggregate(_) => {
            Err(EngineError::Memory(MemoryErrorKind::TypeMismatch))
        }
    }
}

fn from_bytes(types: &TypeTable, to: TypeId, bytes: &[u8]) -> Result<Value, EngineError> {
    let take = |n: usize, at: usize| -> Result<u64, EngineError> {
        if at + n > bytes.len() {
            return Err(EngineError::Memory(MemoryErrorKind::TypeMismatch));
        }
        let mut raw = 0u64;
        for (i, b) in bytes[at..at + n].iter().enumerate() {
            raw |= u64::from(*b) << (i * 8);
        }
        Ok(raw)
    };
    match types.get(to) {
        Type::Int { bits } => Ok(Value::int(*bits, take((*bits as usize).div_ceil(8), 0)?)),
        Type::Float(FloatKind::Float) => Ok(Value::F32(f32::from_bits(take(4, 0)? as u32))),
        Type::Float(FloatKind::Double) => Ok(Value::F64(f64::from_bits(take(8, 0)?))),
        Type::Vector { elem, len } => {
            let elem = *elem;
            let lane_bytes = match types.get(elem) {
                Type::Int { bits } => (*bits as usize).div_ceil(8),
                Type::Float(FloatKind::Float) => 4,
                Type::Float(FloatKind::Double) => 8,
                _ => return Err(EngineError::Memory(MemoryErrorKind::TypeMismatch)),
            };
            let mut lanes = Vec::with_capacity(*len as usize);
            for i in 0..*len as usize {
                let raw = take(lane_bytes, i * lane_bytes)?;
                lanes.push(match types.get(elem) {
                    Type::Int { bits } => Value::int(*bits, raw),
                    Type::Float(FloatKind::Float) => Value::F32(f32::from_bits(raw as u32)),
                    _ => Value::F64(f64::from_bits(raw)),
                });
            }
            Ok(Value::Vector(lanes))
        }
        _ => Err(EngineError::Memory(MemoryErrorKind::TypeMismatch)),
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn int_of(value: &Value) -> Result<u64, EngineError> {
    value
        .as_u64()
        .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))
}

fn float_of(value: &Value) -> Result<f64, EngineError> {
    value
        .as_f64()
        .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))
}

fn int_bits(types: &TypeTable, ty: TypeId) -> Result<u32, EngineError> {
    types
        .int_bits(ty)
        .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))
}

fn float_result(types: &TypeTable, to: TypeId, value: f64) -> Result<Value, EngineError> {
    match types.get(to) {
        Type::Float(FloatKind::Float) => Ok(Value::F32(value as f32)),
        Type::Float(FloatKind::Double) => Ok(Value::F64(value)),
        _ => Err(EngineError::Memory(MemoryErrorKind::TypeMismatch)),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use molten_ir::Pointer;

    fn setup() -> (TypeTable, MemoryManager) {
        (TypeTable::new(), MemoryManager::new())
    }

    #[test]
    fn test_trunc_and_extensions() {
        let (mut t, mem) = setup();
        let i8t = t.int(8);
        let i64t = t.int(64);
        assert_eq!(
            cast(&t, &mem, CastOp::Trunc, i8t, &Value::I32(0x1ff)).unwrap(),
            Value::I8(0xff)
        );
        assert_eq!(
            cast(&t, &mem, CastOp::ZExt, i64t, &Value::I8(0xff)).unwrap(),
            Value::I64(0xff)
        );
        assert_eq!(
            cast(&t, &mem, CastOp::SExt, i64t, &Value::I8(0xff)).unwrap(),
            Value::I64(u64::MAX)
        );
    }

    #[test]
    fn test_float_int_conversions() {
        let (mut t, mem) = setup();
        let i32t = t.int(32);
        let f64t = t.intern(Type::Float(FloatKind::Double));
        assert_eq!(
            cast(&t, &mem, CastOp::FpToSi, i32t, &Value::F64(-3.7)).unwrap(),
            Value::I32(-3i32 as u32)
        );
        assert_eq!(
            cast(&t, &mem, CastOp::SiToFp, f64t, &Value::I32(-3i32 as u32)).unwrap(),
            Value::F64(-3.0)
        );
        assert_eq!(
            cast(&t, &mem, CastOp::UiToFp, f64t, &Value::I8(0xff)).unwrap(),
            Value::F64(255.0)
        );
    }

    #[test]
    fn test_bitcast_float_bits() {
        let (mut t, mem) = setup();
        let i32t = t.int(32);
        let f32t = t.intern(Type::Float(FloatKind::Float));
        let as_int = cast(&t, &mem, CastOp::BitCast, i32t, &Value::F32(1.0)).unwrap();
        assert_eq!(as_int, Value::I32(0x3f80_0000));
        let back = cast(&t, &mem, CastOp::BitCast, f32t, &as_int).unwrap();
        assert_eq!(back, Value::F32(1.0));
    }

    #[test]
    fn test_bitcast_vector_reshape() {
        let (mut t, mem) = setup();
        let i32t = t.int(32);
        let i64t = t.int(64);
        let v2 = t.intern(Type::Vector { elem: i32t, len: 2 });
        let wide = cast(
            &t,
            &mem,
            CastOp::BitCast,
            i64t,
            &Value::Vector(vec![Value::I32(0x1111_2222), Value::I32(0x3333_4444)]),
        )
        .unwrap();
        assert_eq!(wide, Value::I64(0x3333_4444_1111_2222));
        let back = cast(&t, &mem, CastOp::BitCast, v2, &wide).unwrap();
        assert_eq!(
            back,
            Value::Vector(vec![Value::I32(0x1111_2222), Value::I32(0x3333_4444)])
        );
    }

    #[test]
    fn test_ptr_int_roundtrip() {
        let (mut t, mem) = setup();
        let i64t = t.int(64);
        let i8t = t.int(8);
        let pty = t.pointer_to(i8t);
        let alloc = mem
            .allocate(molten_memory::AllocationKind::Heap, 16, 8)
            .unwrap();
        let p = Pointer { alloc, offset: 4 };
        let token = cast(&t, &mem, CastOp::PtrToInt, i64t, &Value::Ptr(p)).unwrap();
        let back = cast(&t, &mem, CastOp::IntToPtr, pty, &token).unwrap();
        assert_eq!(back, Value::Ptr(p));
    }

    #[test]
    fn test_inttoptr_zero_is_null() {
        let (mut t, mem) = setup();
        let i8t = t.int(8);
        let pty = t.pointer_to(i8t);
        assert_eq!(
            cast(&t, &mem, CastOp::IntToPtr, pty, &Value::I64(0)).unwrap(),
            Value::Ptr(Pointer::NULL)
        );
    }
}
