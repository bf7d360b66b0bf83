//! Aggregate and vector surgery: extractvalue/insertvalue, lane access,
//! shuffles.

use molten_core::error::MemoryErrorKind;
use molten_core::EngineError;
use molten_ir::{Pointer, Value};

/// Walk `indices` into an aggregate value.
pub fn extract_value(agg: &Value, indices: &[u32]) -> Result<Value, EngineError> {
    let mut cur = agg;
    for &index in indices {
        cur = fields_of(cur)?
            .get(index as usize)
            .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
    }
    Ok(cur.clone())
}

/// Replace the element at `indices` with `elem`, returning the new
/// aggregate.
pub fn insert_value(agg: &Value, elem: &Value, indices: &[u32]) -> Result<Value, EngineError> {
    let mut result = agg.clone();
    {
        let mut cur = &mut result;
        for &index in indices {
            let fields = match cur {
                Value::Aggregate(fields) | Value::Vector(fields) => fields,
                _ => return Err(EngineError::Memory(MemoryErrorKind::TypeMismatch)),
            };
            cur = fields
                .get_mut(index as usize)
                .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
        }
        *cur = elem.clone();
    }
    Ok(result)
}

/// Vector lane read. An out-of-range lane index is a trap, not silence.
pub fn extract_element(vec: &Value, index: &Value) -> Result<Value, EngineError> {
    let lanes = lanes_of(vec)?;
    let i = index
        .as_u64()
        .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))? as usize;
    lanes
        .get(i)
        .cloned()
        .ok_or(EngineError::Memory(MemoryErrorKind::OutOfBounds {
            offset: i as u64,
            len: 1,
            size: lanes.len() as u64,
        }))
}

/// Vector lane write.
pub fn insert_element(vec: &Value, elem: &Value, index: &Value) -> Result<Value, EngineError> {
    let mut lanes = lanes_of(vec)?.to_vec();
    let i = index
        .as_u64()
        .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))? as usize;
    if i >= lanes.len() {
        return Err(EngineError::Memory(MemoryErrorKind::OutOfBounds {
            offset: i as u64,
            len: 1,
            size: lanes.len() as u64,
        }));
    }
    lanes[i] = elem.clone();
    Ok(Value::Vector(lanes))
}

/// Lane shuffle: indices select from `a` then `b`; -1 lanes are zeroed.
pub fn shuffle(a: &Value, b: &Value, mask: &[i64]) -> Result<Value, EngineError> {
    let xs = lanes_of(a)?;
    let ys = lanes_of(b)?;
    let mut out = Vec::with_capacity(mask.len());
    for &m in mask {
        if m < 0 {
            out.push(zero_like(xs.first().unwrap_or(&Value::I64(0))));
            continue;
        }
        let m = m as usize;
        let lane = if m < xs.len() {
            xs[m].clone()
        } else {
            ys.get(m - xs.len())
                .cloned()
                .ok_or(EngineError::Memory(MemoryErrorKind::OutOfBounds {
                    offset: m as u64,
                    len: 1,
                    size: (xs.len() + ys.len()) as u64,
                }))?
        };
        out.push(lane);
    }
    Ok(Value::Vector(out))
}

/// Zero value with the same scalar shape as `v`.
pub fn zero_like(v: &Value) -> Value {
    match v {
        Value::I1(_) => Value::I1(false),
        Value::I8(_) => Value::I8(0),
        Value::I16(_) => Value::I16(0),
        Value::I32(_) => Value::I32(0),
        Value::I64(_) => Value::I64(0),
        Value::F32(_) => Value::F32(0.0),
        Value::F64(_) => Value::F64(0.0),
        Value::Ptr(_) => Value::Ptr(Pointer::NULL),
        Value::Aggregate(fields) => Value::Aggregate(fields.iter().map(zero_like).collect()),
        Value::Vector(lanes) => Value::Vector(lanes.iter().map(zero_like).collect()),
    }
}

fn fields_of(v: &Value) -> Result<&[Value], EngineError> {
    match v {
        Value::Aggregate(fields) | Value::Vector(fields) => Ok(fields),
        _ => Err(EngineError::Memory(MemoryErrorKind::TypeMismatch)),
    }
}

fn lanes_of(v: &Value) -> Result<&[Value], EngineError> {
    match v {
        Value::Vector(lanes) => Ok(lanes),
        _ => Err(EngineError::Memory(MemoryErrorKind::TypeMismatch)),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_nested() {
        let agg = Value::Aggregate(vec![
            Value::I32(1),
            Value::Aggregate(vec![Value::I64(2), Value::I64(3)]),
        ]);
        assert_eq!(extract_value(&agg, &[0]).unwrap(), Value::I32(1));
        assert_eq!(extract_value(&agg, &[1, 1]).unwrap(), Value::I64(3));
        assert!(extract_value(&agg, &[2]).is_err());
    }

    #[test]
    fn test_insert_preserves_rest() {
        let agg = Value::Aggregate(vec![Value::I32(1), Value::I32(2)]);
        let updated = insert_value(&agg, &Value::I32(9), &[1]).unwrap();
        assert_eq!(
            updated,
            Value::Aggregate(vec![Value::I32(1), Value::I32(9)])
        );
        // Original untouched.
        assert_eq!(extract_value(&agg, &[1]).unwrap(), Value::I32(2));
    }

    #[test]
    fn test_element_access() {
        let v = Value::Vector(vec![Value::I16(5), Value::I16(6)]);
        assert_eq!(
            extract_element(&v, &Value::I32(1)).unwrap(),
            Value::I16(6)
        );
        assert!(extract_element(&v, &Value::I32(2)).is_err());
        let w = insert_element(&v, &Value::I16(9), &Value::I32(0)).unwrap();
        assert_eq!(
            w,
            Value::Vector(vec![Value::I16(9), Value::I16(6)])
        );
    }

    #[test]
    fn test_shuffle_selects_across_both() {
        let a = Value::Vector(vec![Value::I32(0), Value::I32(1)]);
        let b = Value::Vector(vec![Value::I32(2), Value::I32(3)]);
        let r = shuffle(&a, &b, &[3, 0, -1]).unwrap();
        assert_eq!(
            r,
            Value::Vector(vec![Value::I32(3), Value::I32(0), Value::I32(0)])
        );
    }
}
