//! Constant-pool evaluation.
//!
//! Runs post-link: global and function addresses exist, so every constant
//! (including address-of and constant GEP expressions) evaluates to a
//! runtime [`Value`]. The linker uses this to materialize global
//! initializers; the translator uses it to resolve constant operands into
//! node immediates.

use molten_core::EngineError;
use molten_ir::constant::ConstId;
use molten_ir::types::{FloatKind, Type, TypeId};
use molten_ir::{BinOp, CastOp, Constant, Module, Pointer, Value};
use molten_memory::MemoryManager;

/// Addresses assigned to the module image by the linker.
#[derive(Debug, Clone, Copy)]
pub struct ImageRefs<'a> {
    /// Base pointer of each module global, by index.
    pub globals: &'a [Pointer],
    /// Address of each module function, by index.
    pub functions: &'a [Pointer],
}

/// Evaluate a constant-pool entry to a runtime value.
pub fn eval_const(
    module: &Module,
    refs: &ImageRefs<'_>,
    mem: &MemoryManager,
    id: ConstId,
) -> Result<Value, EngineError> {
    match &module.constants[id.as_usize()] {
        Constant::Null(ty) | Constant::Undef(ty) => Ok(Value::zero_of(&module.types, *ty)),
        Constant::Int { ty, value } => {
            let bits = module
                .types
                .int_bits(*ty)
                .ok_or_else(|| EngineError::UnsupportedInstruction("non-integer literal".into()))?;
            if bits > 64 {
                return Err(EngineError::UnsupportedInstruction(format!("i{bits} constant")));
            }
            Ok(Value::int(bits, *value))
        }
        Constant::Float { ty, bits } => match module.types.get(*ty) {
            Type::Float(FloatKind::Float) => Ok(Value::F32(f32::from_bits(*bits as u32))),
            Type::Float(FloatKind::Double) => Ok(Value::F64(f64::from_bits(*bits))),
            _ => Err(EngineError::UnsupportedInstruction(
                "extended-precision float constant".into(),
            )),
        },
        Constant::Aggregate { ty, elems } => {
            let values = elems
                .iter()
                .map(|&e| eval_const(module, refs, mem, e))
                .collect::<Result<Vec<_>, _>>()?;
            match module.types.get(*ty) {
                Type::Vector { .. } => Ok(Value::Vector(values)),
                _ => Ok(Value::Aggregate(values)),
            }
        }
        Constant::Data { ty, bytes } => eval_data(module, *ty, bytes),
        Constant::GlobalAddr(g) => refs
            .globals
            .get(*g as usize)
            .copied()
            .map(Value::Ptr)
            .ok_or_else(|| EngineError::link(format!("global #{g}"))),
        Constant::FuncAddr(f) => refs
            .functions
            .get(*f as usize)
            .copied()
            .map(Value::Ptr)
            .ok_or_else(|| EngineError::link(format!("function #{f}"))),
        Constant::Gep {
            src_ty,
            base,
            indices,
            ..
        } => {
            let base_value = eval_const(module, refs, mem, *base)?;
            let ptr = base_value
                .as_ptr()
                .ok_or_else(|| EngineError::link("constant GEP over non-pointer"))?;
            let offset = const_gep_offset(module, *src_ty, refs, mem, indices)?;
            Ok(Value::Ptr(ptr.offset_by(offset)))
        }
        Constant::Cast { op, to, value } => {
            let v = eval_const(module, refs, mem, *value)?;
            eval_const_cast(module, mem, *op, *to, v)
        }
        Constant::Binary { op, ty, lhs, rhs } => {
            let a = eval_const(module, refs, mem, *lhs)?;
            let b = eval_const(module, refs, mem, *rhs)?;
            eval_const_binop(module, *op, *ty, a, b)
        }
        Constant::InlineAsm { .. } => Err(EngineError::UnsupportedInstruction(
            "inline assembly outside a call".into(),
        )),
    }
}

/// Decode a byte-array constant into its element values.
fn eval_data(module: &Module, ty: TypeId, bytes: &[u8]) -> Result<Value, EngineError> {
    let (elem, is_vector) = match module.types.get(ty) {
        Type::Array { elem, .. } => (*elem, false),
        Type::Vector { elem, .. } => (*elem, true),
        _ => {
            return Err(EngineError::UnsupportedInstruction(
                "data constant on non-sequential type".into(),
            ))
        }
    };
    let width = module.layout.size_of(&module.types, elem) as usize;
    let mut values = Vec::with_capacity(bytes.len() / width.max(1));
    for chunk in bytes.chunks(width.max(1)) {
        let mut raw = 0u64;
        for (i, b) in chunk.iter().enumerate().take(8) {
            raw |= u64::from(*b) << (i * 8);
        }
        let value = match module.types.get(elem) {
            Type::Int { bits } => Value::int(*bits, raw),
            Type::Float(FloatKind::Float) => Value::F32(f32::from_bits(raw as u32)),
            Type::Float(FloatKind::Double) => Value::F64(f64::from_bits(raw)),
            _ => {
                return Err(EngineError::UnsupportedInstruction(
                    "data constant element type".into(),
                ))
            }
        };
        values.push(value);
    }
    if is_vector {
        Ok(Value::Vector(values))
    } else {
        Ok(Value::Aggregate(values))
    }
}

/// Byte offset of a constant GEP: every index is a constant integer.
fn const_gep_offset(
    module: &Module,
    src_ty: TypeId,
    refs: &ImageRefs<'_>,
    mem: &MemoryManager,
    indices: &[ConstId],
) -> Result<i64, EngineError> {
    let layout = &module.layout;
    let mut offset = 0i64;
    let mut cur = src_ty;
    for (step, &index) in indices.iter().enumerate() {
        let idx = eval_const(module, refs, mem, index)?
            .as_i64()
            .ok_or_else(|| EngineError::link("non-integer constant GEP index"))?;
        if step == 0 {
            let stride = layout.size_of(&module.types, cur) as i64;
            offset = offset.wrapping_add(idx.wrapping_mul(stride));
            continue;
        }
        match module.types.get(cur) {
            Type::Struct { fields, .. } => {
                let field = idx as usize;
                if field >= fields.len() {
                    return Err(EngineError::link("constant GEP field out of range"));
                }
                offset =
                    offset.wrapping_add(layout.field_offset(&module.types, cur, field) as i64);
                cur = fields[field];
            }
            Type::Array { elem, .. } | Type::Vector { elem, .. } => {
                let elem = *elem;
                let stride = layout.size_of(&module.types, elem) as i64;
                offset = offset.wrapping_add(idx.wrapping_mul(stride));
                cur = elem;
            }
            _ => return Err(EngineError::link("constant GEP into scalar")),
        }
    }
    Ok(offset)
}

/// The cast subset constant expressions use.
fn eval_const_cast(
    module: &Module,
    mem: &MemoryManager,
    op: CastOp,
    to: TypeId,
    value: Value,
) -> Result<Value, EngineError> {
    let to_bits = module.types.int_bits(to);
    match op {
        CastOp::BitCast | CastOp::AddrSpaceCast => Ok(value),
        CastOp::PtrToInt => {
            let ptr = value
                .as_ptr()
                .ok_or_else(|| EngineError::link("ptrtoint of non-pointer constant"))?;
            let token = mem.pointer_to_int(ptr);
            Ok(Value::int(to_bits.unwrap_or(64), token))
        }
        CastOp::IntToPtr => {
            let raw = value
                .as_u64()
                .ok_or_else(|| EngineError::link("inttoptr of non-integer constant"))?;
            Ok(Value::Ptr(mem.int_to_pointer(raw)))
        }
        CastOp::Trunc | CastOp::ZExt => {
            let raw = value
                .as_u64()
                .ok_or_else(|| EngineError::link("integer cast of non-integer"))?;
            Ok(Value::int(to_bits.unwrap_or(64), raw))
        }
        CastOp::SExt => {
            let raw = value
                .as_i64()
                .ok_or_else(|| EngineError::link("integer cast of non-integer"))?;
            Ok(Value::int(to_bits.unwrap_or(64), raw as u64))
        }
        _ => Err(EngineError::UnsupportedInstruction(format!(
            "constant {} expression",
            op.name()
        ))),
    }
}

/// The integer binop subset constant expressions use.
fn eval_const_binop(
    module: &Module,
    op: BinOp,
    ty: TypeId,
    a: Value,
    b: Value,
) -> Result<Value, EngineError> {
    let bits = module
        .types
        .int_bits(ty)
        .ok_or_else(|| EngineError::UnsupportedInstruction("non-integer constant binop".into()))?;
    let x = a
        .as_u64()
        .ok_or_else(|| EngineError::link("constant binop operand"))?;
    let y = b
        .as_u64()
        .ok_or_else(|| EngineError::link("constant binop operand"))?;
    let raw = match op {
        BinOp::Add => x.wrapping_add(y),
        BinOp::Sub => x.wrapping_sub(y),
        BinOp::Mul => x.wrapping_mul(y),
        BinOp::And => x & y,
        BinOp::Or => x | y,
        BinOp::Xor => x ^ y,
        BinOp::Shl => x.wrapping_shl(y as u32),
        BinOp::LShr => x.wrapping_shr(y as u32),
        _ => {
            return Err(EngineError::UnsupportedInstruction(format!(
                "constant {} expression",
                op.name()
            )))
        }
    };
    Ok(Value::int(bits, raw))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use molten_ir::constant::ConstId;
    use molten_ir::AllocId;

    fn empty_refs() -> (Vec<Pointer>, Vec<Pointer>) {
        (Vec::new(), Vec::new())
    }

    #[test]
    fn test_int_and_null() {
        let mut module = Module::default();
        let i32t = module.types.int(32);
        module.constants.push(Constant::Int { ty: i32t, value: 7 });
        module.constants.push(Constant::Null(i32t));
        let (g, f) = empty_refs();
        let refs = ImageRefs {
            globals: &g,
            functions: &f,
        };
        let mem = MemoryManager::new();
        assert_eq!(
            eval_const(&module, &refs, &mem, ConstId::new(0)).unwrap(),
            Value::I32(7)
        );
        assert_eq!(
            eval_const(&module, &refs, &mem, ConstId::new(1)).unwrap(),
            Value::I32(0)
        );
    }

    #[test]
    fn test_global_addr_and_gep() {
        // @g = [4 x i32]; constant GEP to element 2 is base + 8.
        let mut module = Module::default();
        let i32t = module.types.int(32);
        let i64t = module.types.int(64);
        let arr = module.types.intern(Type::Array { elem: i32t, len: 4 });
        module.globals.push(molten_ir::GlobalVariable {
            name: "g".into(),
            value_ty: arr,
            init: None,
            is_const: false,
            align: 4,
        });
        module.constants.push(Constant::GlobalAddr(0)); // #0
        module.constants.push(Constant::Int { ty: i64t, value: 0 }); // #1
        module.constants.push(Constant::Int { ty: i64t, value: 2 }); // #2
        module.constants.push(Constant::Gep {
            src_ty: arr,
            base: ConstId::new(0),
            indices: vec![ConstId::new(1), ConstId::new(2)],
            inbounds: true,
        }); // #3

        let base = Pointer::base(AllocId::from_raw(0));
        let globals = vec![base];
        let functions = Vec::new();
        let refs = ImageRefs {
            globals: &globals,
            functions: &functions,
        };
        let mem = MemoryManager::new();
        assert_eq!(
            eval_const(&module, &refs, &mem, ConstId::new(3)).unwrap(),
            Value::Ptr(base.offset_by(8))
        );
    }

    #[test]
    fn test_cstring_data() {
        let mut module = Module::default();
        let i8t = module.types.int(8);
        let arr = module.types.intern(Type::Array { elem: i8t, len: 3 });
        module.constants.push(Constant::Data {
            ty: arr,
            bytes: b"ok\0".to_vec(),
        });
        let (g, f) = empty_refs();
        let refs = ImageRefs {
            globals: &g,
            functions: &f,
        };
        let mem = MemoryManager::new();
        assert_eq!(
            eval_const(&module, &refs, &mem, ConstId::new(0)).unwrap(),
            Value::Aggregate(vec![Value::I8(b'o'), Value::I8(b'k'), Value::I8(0)])
        );
    }

    #[test]
    fn test_ptrtoint_roundtrip() {
        let mut module = Module::default();
        let i64t = module.types.int(64);
        let i8t = module.types.int(8);
        let _p = module.types.pointer_to(i8t);
        module.globals.push(molten_ir::GlobalVariable {
            name: "g".into(),
            value_ty: i8t,
            init: None,
            is_const: false,
            align: 1,
        });
        module.constants.push(Constant::GlobalAddr(0));
        module.constants.push(Constant::Cast {
            op: CastOp::PtrToInt,
            to: i64t,
            value: ConstId::new(0),
        });

        let mem = MemoryManager::new();
        let alloc = mem
            .allocate(molten_memory::AllocationKind::Global, 1, 1)
            .unwrap();
        let globals = vec![Pointer::base(alloc)];
        let functions = Vec::new();
        let refs = ImageRefs {
            globals: &globals,
            functions: &functions,
        };
        let token = eval_const(&module, &refs, &mem, ConstId::new(1)).unwrap();
        let raw = token.as_u64().unwrap();
        assert_ne!(raw, 0);
        assert_eq!(mem.int_to_pointer(raw), Pointer::base(alloc));
    }
}
