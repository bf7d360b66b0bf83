//! Binary operations and comparisons.

use molten_core::error::MemoryErrorKind;
use molten_core::EngineError;
use molten_ir::types::{Type, TypeId, TypeTable};
use molten_ir::{BinOp, FCmpPred, ICmpPred, Value};
use molten_memory::MemoryManager;

// =============================================================================
// Binary Operations
// =============================================================================

/// Evaluate a binary operation at type `ty` (scalar or lane-wise).
/// Integer results wrap at the operand width; only division and remainder
/// by zero trap.
pub fn binary(
    types: &TypeTable,
    ty: TypeId,
    op: BinOp,
    a: &Value,
    b: &Value,
) -> Result<Value, EngineError> {
    if let Type::Vector { elem, .. } = types.get(ty) {
        let elem = *elem;
        return lanewise2(a, b, |x, y| binary(types, elem, op, x, y));
    }
    if matches!(types.get(ty), Type::Float(_)) {
        return float_binary(op, a, b);
    }
    int_binary(op, a, b)
}

fn int_binary(op: BinOp, a: &Value, b: &Value) -> Result<Value, EngineError> {
    let bits = a
        .int_width()
        .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
    let x = a.as_u64().unwrap_or(0);
    let y = b
        .as_u64()
        .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
    let sx = a.as_i64().unwrap_or(0);
    let sy = b.as_i64().unwrap_or(0);

    let raw = match op {
        BinOp::Add => x.wrapping_add(y),
        BinOp::Sub => x.wrapping_sub(y),
        BinOp::Mul => x.wrapping_mul(y),
        BinOp::UDiv => {
            if y == 0 {
                return Err(EngineError::DivisionByZero);
            }
            x / y
        }
        BinOp::SDiv => {
            if sy == 0 {
                return Err(EngineError::DivisionByZero);
            }
            sx.wrapping_div(sy) as u64
        }
        BinOp::URem => {
            if y == 0 {
                return Err(EngineError::DivisionByZero);
            }
            x % y
        }
        BinOp::SRem => {
            if sy == 0 {
                return Err(EngineError::DivisionByZero);
            }
            sx.wrapping_rem(sy) as u64
        }
        // Shifts past the width produce a deterministic fill instead of
        // an unspecified value.
        BinOp::Shl => {
            if y >= u64::from(bits) {
                0
            } else {
                x << y
            }
        }
        BinOp::LShr => {
            if y >= u64::from(bits) {
                0
            } else {
                mask_to(x, bits) >> y
            }
        }
        BinOp::AShr => {
            if y >= u64::from(bits) {
                if sx < 0 {
                    u64::MAX
                } else {
                    0
                }
            } else {
                (sx >> y) as u64
            }
        }
        BinOp::And => x & y,
        BinOp::Or => x | y,
        BinOp::Xor => x ^ y,
    };
    Ok(Value::int(bits, raw))
}

fn float_binary(op: BinOp, a: &Value, b: &Value) -> Result<Value, EngineError> {
    let single = matches!(a, Value::F32(_));
    let x = a
        .as_f64()
        .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
    let y = b
        .as_f64()
        .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
    let r = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        // IEEE division by zero is inf/NaN, not a trap.
        BinOp::UDiv | BinOp::SDiv => x / y,
        BinOp::URem | BinOp::SRem => x % y,
        _ => return Err(EngineError::Memory(MemoryErrorKind::TypeMismatch)),
    };
    Ok(if single {
        Value::F32(r as f32)
    } else {
        Value::F64(r)
    })
}

// =============================================================================
// Comparisons
// =============================================================================

/// Integer (and pointer) comparison; lane-wise over vectors.
pub fn icmp(
    mem: &MemoryManager,
    pred: ICmpPred,
    a: &Value,
    b: &Value,
) -> Result<Value, EngineError> {
    if let (Value::Vector(xs), Value::Vector(ys)) = (a, b) {
        let lanes = xs
            .iter()
            .zip(ys)
            .map(|(x, y)| icmp(mem, pred, x, y))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::Vector(lanes));
    }
    let (x, y) = (comparable(mem, a)?, comparable(mem, b)?);
    let (sx, sy) = (signed_of(a, x), signed_of(b, y));
    let result = match pred {
        ICmpPred::Eq => x == y,
        ICmpPred::Ne => x != y,
        ICmpPred::Ugt => x > y,
        ICmpPred::Uge => x >= y,
        ICmpPred::Ult => x < y,
        ICmpPred::Ule => x <= y,
        ICmpPred::Sgt => sx > sy,
        ICmpPred::Sge => sx >= sy,
        ICmpPred::Slt => sx < sy,
        ICmpPred::Sle => sx <= sy,
    };
    Ok(Value::I1(result))
}

/// An integer image of a comparison operand: integers by bit pattern,
/// pointers by their opaque token (so ordered pointer comparison matches
/// the guest-visible address arithmetic).
fn comparable(mem: &MemoryManager, v: &Value) -> Result<u64, EngineError> {
    match v {
        Value::Ptr(p) => Ok(mem.pointer_to_int(*p)),
        other => other
            .as_u64()
            .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch)),
    }
}

fn signed_of(v: &Value, token: u64) -> i64 {
    match v {
        Value::Ptr(_) => token as i64,
        other => other.as_i64().unwrap_or(token as i64),
    }
}

/// Floating comparison; lane-wise over vectors.
pub fn fcmp(pred: FCmpPred, a: &Value, b: &Value) -> Result<Value, EngineError> {
    if let (Value::Vector(xs), Value::Vector(ys)) = (a, b) {
        let lanes = xs
            .iter()
            .zip(ys)
            .map(|(x, y)| fcmp(pred, x, y))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Value::Vector(lanes));
    }
    let x = a
        .as_f64()
        .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
    let y = b
        .as_f64()
        .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
    let unordered = x.is_nan() || y.is_nan();
    let result = match pred {
        FCmpPred::False => false,
        FCmpPred::True => true,
        FCmpPred::Ord => !unordered,
        FCmpPred::Uno => unordered,
        FCmpPred::Oeq => !unordered && x == y,
        FCmpPred::Ogt => !unordered && x > y,
        FCmpPred::Oge => !unordered && x >= y,
        FCmpPred::Olt => !unordered && x < y,
        FCmpPred::Ole => !unordered && x <= y,
        FCmpPred::One => !unordered && x != y,
        FCmpPred::Ueq => unordered || x == y,
        FCmpPred::Ugt => unordered || x > y,
        FCmpPred::Uge => unordered || x >= y,
        FCmpPred::Ult => unordered || x < y,
        FCmpPred::Ule => unordered || x <= y,
        FCmpPred::Une => unordered || x != y,
    };
    Ok(Value::I1(result))
}

// =============================================================================
// Helpers
// =============================================================================

#[inline]
fn mask_to(raw: u64, bits: u32) -> u64 {
    if bits >= 64 {
        raw
    } else {
        raw & ((1u64 << bits) - 1)
    }
}

fn lanewise2(
    a: &Value,
    b: &Value,
    mut f: impl FnMut(&Value, &Value) -> Result<Value, EngineError>,
) -> Result<Value, EngineError> {
    match (a, b) {
        (Value::Vector(xs), Value::Vector(ys)) if xs.len() == ys.len() => {
            let lanes = xs
                .iter()
                .zip(ys)
                .map(|(x, y)| f(x, y))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Vector(lanes))
        }
        _ => Err(EngineError::Memory(MemoryErrorKind::TypeMismatch)),
    }
}

// =============================================================================
// Tests
// =============================================================================
