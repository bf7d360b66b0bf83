//! Function-body decoding.
//!
//! Operands inside a function body are encoded relative to the number of
//! values defined so far (the module prefix, the arguments, function-local
//! constants, then one value per value-producing instruction). Phi incoming
//! values are sign-rotated and may point forward; every other operand points
//! backward and its type is already known.

use crate::abbrev::Record;
use crate::bitstream::decode_sign_rotated;
use crate::codes::*;
use crate::reader::{decode_align, BlockScope, Entry, ModValue, ReaderState};
use molten_core::EngineError;
use molten_ir::types::{Type, TypeId};
use molten_ir::{
    AtomicOrdering, BinOp, Block, Callee, CastOp, Constant, FCmpPred, ICmpPred, Instruction,
    Operand, RmwOp,
};
use smallvec::SmallVec;
use tracing::trace;

// =============================================================================
// Record Cursor
// =============================================================================

/// Sequential reader over a record's scalar fields.
struct RecordCursor<'r> {
    fields: &'r [u64],
    pos: usize,
    code: u64,
}

impl<'r> RecordCursor<'r> {
    fn new(record: &'r Record) -> Self {
        RecordCursor {
            fields: &record.fields,
            pos: 0,
            code: record.code,
        }
    }

    fn next(&mut self, state: &ReaderState<'_>) -> Result<u64, EngineError> {
        let value = self.fields.get(self.pos).copied().ok_or_else(|| {
            state
                .cursor
                .malformed(format!("function record {} too short", self.code))
        })?;
        self.pos += 1;
        Ok(value)
    }

    fn next_or(&mut self, default: u64) -> u64 {
        let value = self.fields.get(self.pos).copied().unwrap_or(default);
        self.pos += 1;
        value
    }

    fn remaining(&self) -> usize {
        self.fields.len().saturating_sub(self.pos)
    }

    fn done(&self) -> bool {
        self.remaining() == 0
    }
}

// =============================================================================
// Entry Point
// =============================================================================

/// Parse one FUNCTION_BLOCK into the body of `func_idx`.
pub(crate) fn parse_function_body(
    state: &mut ReaderState<'_>,
    func_idx: u32,
) -> Result<(), EngineError> {
    let mut scope = state.begin_block(FUNCTION_BLOCK)?;

    let fn_ty = state.module.functions[func_idx as usize].ty;
    let (_ret, params, _vararg) = state
        .module
        .types
        .signature(fn_ty)
        .map(|(r, p, v)| (r, p.to_vec(), v))
        .ok_or_else(|| state.cursor.malformed("function body without signature"))?;

    state.in_function = true;
    state.cur_nargs = params.len() as u32;
    state.cur_local_consts = 0;
    for (i, param) in params.iter().enumerate() {
        state.values.push(ModValue::Arg(i as u32));
        state.value_types.push(*param);
    }

    let result = parse_body_entries(state, func_idx, &mut scope);

    // Unwind the function-local suffix of the value list whether or not
    // parsing succeeded, so a failed body does not poison the next one.
    state.values.truncate(state.module_value_count);
    state.value_types.truncate(state.module_value_count);
    state.in_function = false;
    state.cur_nargs = 0;
    state.cur_local_consts = 0;
    result
}

fn parse_body_entries(
    state: &mut ReaderState<'_>,
    func_idx: u32,
    scope: &mut BlockScope,
) -> Result<(), EngineError> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut cur_block = 0usize;
    let mut inst_counter = 0u32;

    loop {
        match state.next_entry(scope)? {
            Entry::EndBlock => break,
            Entry::SubBlock(CONSTANTS_BLOCK) => {
                if inst_counter != 0 {
                    return Err(state
                        .cursor
                        .malformed("constants block after instructions"));
                }
                state.parse_constants_block()?;
            }
            Entry::SubBlock(_) => state.skip_block()?,
            Entry::Record(record) => {
                if record.code == FUNC_DECLAREBLOCKS {
                    let count = record.field(0, &state.cursor)? as usize;
                    if count == 0 || count > (1 << 24) {
                        return Err(state.cursor.malformed("bad basic block count"));
                    }
                    blocks = vec![Block::default(); count];
                    continue;
                }
                if record.code == FUNC_DEBUG_LOC || record.code == FUNC_DEBUG_LOC_AGAIN {
                    continue;
                }
                if blocks.is_empty() {
                    return Err(state
                        .cursor
                        .malformed("instruction before DECLAREBLOCKS"));
                }
                if cur_block >= blocks.len() {
                    return Err(state
                        .cursor
                        .malformed("instruction after final terminator"));
                }

                let mut rc = RecordCursor::new(&record);
                let decoded = decode_instruction(state, &mut rc, blocks.len())?;
                let is_term = decoded.inst.is_terminator();
                if let Some(result_ty) = decoded.result {
                    state.values.push(ModValue::Inst(inst_counter));
                    state.value_types.push(result_ty);
                    inst_counter += 1;
                }
                blocks[cur_block].insts.push(decoded.inst);
                if is_term {
                    cur_block += 1;
                }
            }
        }
    }

    if cur_block != blocks.len() {
        return Err(state.cursor.malformed(format!(
            "block {cur_block} has no terminator"
        )));
    }
    trace!(
        function = %state.module.functions[func_idx as usize].name,
        blocks = blocks.len(),
        values = inst_counter,
        "decoded function body"
    );
    state.module.functions[func_idx as usize].blocks = blocks;
    Ok(())
}

// =============================================================================
// Instruction Decoding
// =============================================================================

struct Decoded {
    inst: Instruction,
    /// Type of the defined value, if the instruction defines one.
    result: Option<TypeId>,
}

fn decode_instruction(
    state: &mut ReaderState<'_>,
    rc: &mut RecordCursor<'_>,
    num_blocks: usize,
) -> Result<Decoded, EngineError> {
    match rc.code {
        FUNC_INST_BINOP => {
            let (lhs, ty) = read_vtp(state, rc)?;
            let rhs = read_val(state, rc)?;
            let op = BinOp::from_code(rc.next(state)?)
                .ok_or_else(|| state.cursor.malformed("bad binop code"))?;
            // Optional wrap/exact flags; wrapping semantics are the default
            // evaluation either way.
            let _flags = rc.next_or(0);
            Ok(Decoded {
                inst: Instruction::Binary { op, ty, lhs, rhs },
                result: Some(ty),
            })
        }
        FUNC_INST_CAST => {
            let (value, _from) = read_vtp(state, rc)?;
            let to = state.type_by_id(rc.next(state)?)?;
            let op = CastOp::from_code(rc.next(state)?)
                .ok_or_else(|| state.cursor.malformed("bad cast code"))?;
            Ok(Decoded {
                inst: Instruction::Cast { op, to, value },
                result: Some(to),
            })
        }
        FUNC_INST_GEP | FUNC_INST_GEP_OLD | FUNC_INST_INBOUNDS_GEP_OLD => {
            let (inbounds, explicit_src) = if rc.code == FUNC_INST_GEP {
                let inbounds = rc.next(state)? != 0;
                let src = state.type_by_id(rc.next(state)?)?;
                (inbounds, Some(src))
            } else {
                (rc.code == FUNC_INST_INBOUNDS_GEP_OLD, None)
            };
            let (ptr, ptr_ty) = read_vtp(state, rc)?;
            if matches!(state.module.types.get(ptr_ty), Type::Vector { .. }) {
                return Err(EngineError::UnsupportedInstruction(
                    "getelementptr over pointer vectors".into(),
                ));
            }
            let src_ty = match explicit_src {
                Some(ty) => ty,
                None => state
                    .module
                    .types
                    .pointee(ptr_ty)
                    .ok_or_else(|| state.cursor.malformed("GEP base is not a pointer"))?,
            };
            let mut indices: SmallVec<[Operand; 4]> = SmallVec::new();
            while !rc.done() {
                let (idx, _ty) = read_vtp(state, rc)?;
                indices.push(idx);
            }
            let index_values: Vec<Option<u64>> = indices
                .iter()
                .map(|op| match op {
                    Operand::Const(c) => state.const_int_value(*c),
                    _ => None,
                })
                .collect();
            let elem = state.walk_gep_type(src_ty, &index_values)?;
            let result = state.module.types.pointer_to(elem);
            Ok(Decoded {
                inst: Instruction::Gep {
                    src_ty,
                    ptr,
                    indices,
                    inbounds,
                },
                result: Some(result),
            })
        }
        FUNC_INST_SELECT | FUNC_INST_VSELECT => {
            let (on_true, ty) = read_vtp(state, rc)?;
            let on_false = read_val(state, rc)?;
            let cond = if rc.code == FUNC_INST_VSELECT {
                read_vtp(state, rc)?.0
            } else {
                read_val(state, rc)?
            };
            Ok(Decoded {
                inst: Instruction::Select {
                    ty,
                    cond,
                    on_true,
                    on_false,
                },
                result: Some(ty),
            })
        }
        FUNC_INST_EXTRACTELT => {
            let (vec, vec_ty) = read_vtp(state, rc)?;
            let (index, _) = read_vtp(state, rc)?;
            let elem = vector_elem(state, vec_ty)?;
            Ok(Decoded {
                inst: Instruction::ExtractElement { vec, index },
                result: Some(elem),
            })
        }
        FUNC_INST_INSERTELT => {
            let (vec, vec_ty) = read_vtp(state, rc)?;
            let elem = read_val(state, rc)?;
            let (index, _) = read_vtp(state, rc)?;
            Ok(Decoded {
                inst: Instruction::InsertElement { vec, elem, index },
                result: Some(vec_ty),
            })
        }
        FUNC_INST_SHUFFLEVEC => {
            let (a, a_ty) = read_vtp(state, rc)?;
            let b = read_val(state, rc)?;
            let (mask, mask_ty) = read_vtp(state, rc)?;
            let lanes = match state.module.types.get(mask_ty) {
                Type::Vector { len, .. } => *len,
                _ => return Err(state.cursor.malformed("shuffle mask is not a vector")),
            };
            let elem = vector_elem(state, a_ty)?;
            let result = state.module.types.intern(Type::Vector { elem, len: lanes });
            Ok(Decoded {
                inst: Instruction::ShuffleVector { a, b, mask },
                result: Some(result),
            })
        }
        FUNC_INST_CMP | FUNC_INST_CMP2 => {
            let (lhs, ty) = read_vtp(state, rc)?;
            let rhs = read_val(state, rc)?;
            let pred = rc.next(state)?;
            let scalar = scalar_of(state, ty);
            let inst = if matches!(state.module.types.get(scalar), Type::Float(_)) {
                Instruction::FCmp {
                    pred: FCmpPred::from_code(pred)
                        .ok_or_else(|| state.cursor.malformed("bad fcmp predicate"))?,
                    lhs,
                    rhs,
                }
            } else {
                Instruction::ICmp {
                    pred: ICmpPred::from_code(pred)
                        .ok_or_else(|| state.cursor.malformed("bad icmp predicate"))?,
                    lhs,
                    rhs,
                }
            };
            let bool_ty = state.module.types.int(1);
            let result = match state.module.types.get(ty) {
                Type::Vector { len, .. } => {
                    let len = *len;
                    state.module.types.intern(Type::Vector {
                        elem: bool_ty,
                        len,
                    })
                }
                _ => bool_ty,
            };
            Ok(Decoded {
                inst,
                result: Some(result),
            })
        }
        FUNC_INST_RET => {
            if rc.done() {
                Ok(Decoded {
                    inst: Instruction::Ret { value: None },
                    result: None,
                })
            } else {
                let (value, _) = read_vtp(state, rc)?;
                Ok(Decoded {
                    inst: Instruction::Ret { value: Some(value) },
                    result: None,
                })
            }
        }
        FUNC_INST_BR => {
            let dest = block_ref(state, rc.next(state)?, num_blocks)?;
            if rc.done() {
                Ok(Decoded {
                    inst: Instruction::Br { dest },
                    result: None,
                })
            } else {
                let on_false = block_ref(state, rc.next(state)?, num_blocks)?;
                let cond = read_val(state, rc)?;
                Ok(Decoded {
                    inst: Instruction::CondBr {
                        cond,
                        on_true: dest,
                        on_false,
                    },
                    result: None,
                })
            }
        }
        FUNC_INST_SWITCH => {
            let _cond_ty = state.type_by_id(rc.next(state)?)?;
            let cond = read_val(state, rc)?;
            let default = block_ref(state, rc.next(state)?, num_blocks)?;
            let mut cases = Vec::with_capacity(rc.remaining() / 2);
            while rc.remaining() >= 2 {
                let case_vid = rc.next(state)?;
                let dest = block_ref(state, rc.next(state)?, num_blocks)?;
                let case_const = state.const_for(case_vid)?;
                let case_value = state.const_int_value(case_const).ok_or_else(|| {
                    state.cursor.malformed("switch case is not a constant integer")
                })?;
                cases.push((case_value, dest));
            }
            Ok(Decoded {
                inst: Instruction::Switch {
                    cond,
                    default,
                    cases,
                },
                result: None,
            })
        }
        FUNC_INST_INVOKE => {
            let _paramattr = rc.next(state)?;
            let cc = rc.next(state)?;
            let normal = block_ref(state, rc.next(state)?, num_blocks)?;
            let unwind = block_ref(state, rc.next(state)?, num_blocks)?;
            let explicit = cc & INVOKE_EXPLICIT_TYPE != 0;
            let explicit_ty = if explicit {
                Some(state.type_by_id(rc.next(state)?)?)
            } else {
                None
            };
            let (callee_op, callee_ty) = read_vtp(state, rc)?;
            let sig = resolve_callee_sig(state, explicit_ty, callee_ty)?;
            let args = read_call_args(state, rc, sig)?;
            let callee = classify_callee(state, callee_op);
            let (ret, _, _) = state
                .module
                .types
                .signature(sig)
                .ok_or_else(|| state.cursor.malformed("invoke callee is not a function"))?;
            let result = non_void(state, ret);
            Ok(Decoded {
                inst: Instruction::Invoke {
                    callee,
                    sig,
                    args,
                    normal,
                    unwind,
                },
                result,
            })
        }
        FUNC_INST_UNREACHABLE => Ok(Decoded {
            inst: Instruction::Unreachable,
            result: None,
        }),
        FUNC_INST_PHI => {
            let ty = state.type_by_id(rc.next(state)?)?;
            let mut incoming: SmallVec<[(u32, Operand); 2]> = SmallVec::new();
            while rc.remaining() >= 2 {
                let value = read_val_signed(state, rc)?;
                let block = block_ref(state, rc.next(state)?, num_blocks)?;
                incoming.push((block, value));
            }
            Ok(Decoded {
                inst: Instruction::Phi { ty, incoming },
                result: Some(ty),
            })
        }
        FUNC_INST_ALLOCA => {
            let inst_ty = state.type_by_id(rc.next(state)?)?;
            let _count_ty = state.type_by_id(rc.next(state)?)?;
            let count_vid = rc.next(state)?;
            let align_record = rc.next_or(0);

            const EXPLICIT_TYPE_MASK: u64 = 1 << 6;
            const FLAG_MASK: u64 = (1 << 5) | (1 << 6) | (1 << 7);
            let elem_ty = if align_record & EXPLICIT_TYPE_MASK != 0 {
                inst_ty
            } else {
                state
                    .module
                    .types
                    .pointee(inst_ty)
                    .ok_or_else(|| state.cursor.malformed("alloca type is not a pointer"))?
            };
            let align = decode_align(align_record & !FLAG_MASK);
            let count = state.operand_for(count_vid)?;
            let result = state.module.types.pointer_to(elem_ty);
            Ok(Decoded {
                inst: Instruction::Alloca {
                    elem_ty,
                    count,
                    align,
                },
                result: Some(result),
            })
        }
        FUNC_INST_LOAD | FUNC_INST_LOADATOMIC => {
            let atomic = rc.code == FUNC_INST_LOADATOMIC;
            let (ptr, ptr_ty) = read_vtp(state, rc)?;
            let trailing = if atomic { 4 } else { 2 };
            let ty = if rc.remaining() == trailing + 1 {
                state.type_by_id(rc.next(state)?)?
            } else {
                state
                    .module
                    .types
                    .pointee(ptr_ty)
                    .ok_or_else(|| state.cursor.malformed("load base is not a pointer"))?
            };
            let align = decode_align(rc.next(state)?);
            let _vol = rc.next(state)?;
            let ordering = if atomic {
                let ord = AtomicOrdering::from_code(rc.next(state)?)
                    .ok_or_else(|| state.cursor.malformed("bad load ordering"))?;
                let _scope = rc.next_or(0);
                Some(ord)
            } else {
                None
            };
            Ok(Decoded {
                inst: Instruction::Load {
                    ty,
                    ptr,
                    align,
                    ordering,
                },
                result: Some(ty),
            })
        }
        FUNC_INST_STORE | FUNC_INST_STOREATOMIC | FUNC_INST_STORE_OLD
        | FUNC_INST_STOREATOMIC_OLD => {
            let atomic =
                rc.code == FUNC_INST_STOREATOMIC || rc.code == FUNC_INST_STOREATOMIC_OLD;
            let old = rc.code == FUNC_INST_STORE_OLD || rc.code == FUNC_INST_STOREATOMIC_OLD;
            let (ptr, ptr_ty) = read_vtp(state, rc)?;
            let (value, value_ty) = if old {
                let ty = state
                    .module
                    .types
                    .pointee(ptr_ty)
                    .ok_or_else(|| state.cursor.malformed("store base is not a pointer"))?;
                (read_val(state, rc)?, ty)
            } else {
                read_vtp(state, rc)?
            };
            let align = decode_align(rc.next(state)?);
            let _vol = rc.next(state)?;
            let ordering = if atomic {
                let ord = AtomicOrdering::from_code(rc.next(state)?)
                    .ok_or_else(|| state.cursor.malformed("bad store ordering"))?;
                let _scope = rc.next_or(0);
                Some(ord)
            } else {
                None
            };
            Ok(Decoded {
                inst: Instruction::Store {
                    ptr,
                    value,
                    ty: value_ty,
                    align,
                    ordering,
                },
                result: None,
            })
        }
        FUNC_INST_EXTRACTVAL => {
            let (agg, agg_ty) = read_vtp(state, rc)?;
            let mut indices: SmallVec<[u32; 2]> = SmallVec::new();
            while !rc.done() {
                indices.push(rc.next(state)? as u32);
            }
            let result = walk_aggregate(state, agg_ty, &indices)?;
            Ok(Decoded {
                inst: Instruction::ExtractValue { agg, indices },
                result: Some(result),
            })
        }
        FUNC_INST_INSERTVAL => {
            let (agg, agg_ty) = read_vtp(state, rc)?;
            let (elem, _) = read_vtp(state, rc)?;
            let mut indices: SmallVec<[u32; 2]> = SmallVec::new();
            while !rc.done() {
                indices.push(rc.next(state)? as u32);
            }
            Ok(Decoded {
                inst: Instruction::InsertValue { agg, elem, indices },
                result: Some(agg_ty),
            })
        }
        FUNC_INST_CMPXCHG | FUNC_INST_CMPXCHG_OLD => {
            let new_format = rc.code == FUNC_INST_CMPXCHG;
            let (ptr, ptr_ty) = read_vtp(state, rc)?;
            let (expected, expected_ty) = if new_format {
                read_vtp(state, rc)?
            } else {
                let ty = state
                    .module
                    .types
                    .pointee(ptr_ty)
                    .ok_or_else(|| state.cursor.malformed("cmpxchg base is not a pointer"))?;
                (read_val(state, rc)?, ty)
            };
            let replacement = read_val(state, rc)?;
            let _vol = rc.next(state)?;
            let success_ordering = AtomicOrdering::from_code(rc.next(state)?)
                .ok_or_else(|| state.cursor.malformed("bad cmpxchg ordering"))?;
            let _scope = rc.next(state)?;
            let failure_ordering = if new_format {
                AtomicOrdering::from_code(rc.next(state)?)
                    .ok_or_else(|| state.cursor.malformed("bad cmpxchg failure ordering"))?
            } else {
                strip_release(success_ordering)
            };
            let _weak = rc.next_or(0);
            let result = if new_format {
                let bool_ty = state.module.types.int(1);
                Some(state.module.types.intern(Type::Struct {
                    name: None,
                    fields: vec![expected_ty, bool_ty],
                    packed: false,
                    opaque: false,
                }))
            } else {
                Some(expected_ty)
            };
            Ok(Decoded {
                inst: Instruction::CmpXchg {
                    ptr,
                    expected,
                    replacement,
                    ty: expected_ty,
                    success_ordering,
                    failure_ordering,
                    returns_pair: new_format,
                },
                result,
            })
        }
        FUNC_INST_ATOMICRMW => {
            let (ptr, ptr_ty) = read_vtp(state, rc)?;
            let value = read_val(state, rc)?;
            let op = RmwOp::from_code(rc.next(state)?)
                .ok_or_else(|| state.cursor.malformed("bad atomicrmw operation"))?;
            let _vol = rc.next(state)?;
            let ordering = AtomicOrdering::from_code(rc.next(state)?)
                .ok_or_else(|| state.cursor.malformed("bad atomicrmw ordering"))?;
            let _scope = rc.next_or(0);
            let result = state
                .module
                .types
                .pointee(ptr_ty)
                .ok_or_else(|| state.cursor.malformed("atomicrmw base is not a pointer"))?;
            Ok(Decoded {
                inst: Instruction::AtomicRmw {
                    op,
                    ptr,
                    value,
                    ty: result,
                    ordering,
                },
                result: Some(result),
            })
        }
        FUNC_INST_FENCE => {
            let ordering = AtomicOrdering::from_code(rc.next(state)?)
                .ok_or_else(|| state.cursor.malformed("bad fence ordering"))?;
            Ok(Decoded {
                inst: Instruction::Fence { ordering },
                result: None,
            })
        }
        FUNC_INST_RESUME => {
            let (value, _) = read_vtp(state, rc)?;
            Ok(Decoded {
                inst: Instruction::Resume { value },
                result: None,
            })
        }
        FUNC_INST_LANDINGPAD | FUNC_INST_LANDINGPAD_OLD => {
            let ty = state.type_by_id(rc.next(state)?)?;
            if rc.code == FUNC_INST_LANDINGPAD_OLD {
                let _personality = read_vtp(state, rc)?;
            }
            let _cleanup = rc.next(state)?;
            let num_clauses = rc.next(state)?;
            for _ in 0..num_clauses {
                let _kind = rc.next(state)?;
                let _clause = read_vtp(state, rc)?;
            }
            Ok(Decoded {
                inst: Instruction::LandingPad { ty },
                result: Some(ty),
            })
        }
        FUNC_INST_VAARG => {
            let _list_ty = state.type_by_id(rc.next(state)?)?;
            let list = read_val(state, rc)?;
            let ty = state.type_by_id(rc.next(state)?)?;
            Ok(Decoded {
                inst: Instruction::VaArg { ty, list },
                result: Some(ty),
            })
        }
        FUNC_INST_CALL => {
            let _paramattr = rc.next(state)?;
            let cc = rc.next(state)?;
            let explicit_ty = if cc & CALL_EXPLICIT_TYPE != 0 {
                Some(state.type_by_id(rc.next(state)?)?)
            } else {
                None
            };
            let (callee_op, callee_ty) = read_vtp(state, rc)?;
            let sig = resolve_callee_sig(state, explicit_ty, callee_ty)?;
            let args = read_call_args(state, rc, sig)?;
            let callee = classify_callee(state, callee_op);
            let (ret, _, _) = state
                .module
                .types
                .signature(sig)
                .ok_or_else(|| state.cursor.malformed("call callee is not a function"))?;
            let result = non_void(state, ret);
            Ok(Decoded {
                inst: Instruction::Call { callee, sig, args },
                result,
            })
        }
        FUNC_INST_INDIRECTBR => Err(EngineError::UnsupportedInstruction("indirectbr".into())),
        other => Err(EngineError::UnsupportedInstruction(format!(
            "function record {other}"
        ))),
    }
}

// =============================================================================
// Operand Helpers
// =============================================================================

/// Read a relative (value, type) pair. Backward references take their type
/// from the value list; forward references carry an explicit type field.
fn read_vtp(
    state: &mut ReaderState<'_>,
    rc: &mut RecordCursor<'_>,
) -> Result<(Operand, TypeId), EngineError> {
    let total = state.values.len() as u32;
    let rel = rc.next(state)? as u32;
    let vid = u64::from(total.wrapping_sub(rel));
    if (vid as usize) < state.values.len() {
        let ty = state
            .type_of_value(vid)
            .ok_or_else(|| state.cursor.malformed("operand type not recorded"))?;
        Ok((state.operand_for(vid)?, ty))
    } else {
        let ty = state.type_by_id(rc.next(state)?)?;
        Ok((state.operand_for(vid)?, ty))
    }
}

/// Read a relative value whose type is known from context.
fn read_val(
    state: &mut ReaderState<'_>,
    rc: &mut RecordCursor<'_>,
) -> Result<Operand, EngineError> {
    let total = state.values.len() as u32;
    let rel = rc.next(state)? as u32;
    state.operand_for(u64::from(total.wrapping_sub(rel)))
}

/// Read a sign-rotated relative value (phi incoming operands; may point
/// forward).
fn read_val_signed(
    state: &mut ReaderState<'_>,
    rc: &mut RecordCursor<'_>,
) -> Result<Operand, EngineError> {
    let total = state.values.len() as i64;
    let rel = decode_sign_rotated(rc.next(state)?);
    let vid = total - rel;
    if vid < 0 {
        return Err(state.cursor.malformed("phi operand before value zero"));
    }
    state.operand_for(vid as u64)
}

/// Validate a block reference.
fn block_ref(
    state: &ReaderState<'_>,
    raw: u64,
    num_blocks: usize,
) -> Result<u32, EngineError> {
    if (raw as usize) < num_blocks {
        Ok(raw as u32)
    } else {
        Err(state
            .cursor
            .malformed(format!("branch to undeclared block {raw}")))
    }
}

/// The function signature a call goes through: explicit when the record
/// carries one, otherwise derived from the callee's pointer type.
fn resolve_callee_sig(
    state: &ReaderState<'_>,
    explicit: Option<TypeId>,
    callee_ty: TypeId,
) -> Result<TypeId, EngineError> {
    let sig = match explicit {
        Some(ty) => ty,
        None => state
            .module
            .types
            .pointee(callee_ty)
            .ok_or_else(|| state.cursor.malformed("callee is not a function pointer"))?,
    };
    if state.module.types.signature(sig).is_none() {
        return Err(state.cursor.malformed("call signature is not a function type"));
    }
    Ok(sig)
}

/// Read call/invoke arguments: fixed parameters by bare relative id, then
/// variadic tail arguments as (value, type) pairs.
fn read_call_args(
    state: &mut ReaderState<'_>,
    rc: &mut RecordCursor<'_>,
    sig: TypeId,
) -> Result<SmallVec<[Operand; 6]>, EngineError> {
    let num_fixed = state
        .module
        .types
        .signature(sig)
        .map(|(_, params, _)| params.len())
        .unwrap_or(0);
    let mut args: SmallVec<[Operand; 6]> = SmallVec::new();
    for _ in 0..num_fixed {
        if rc.done() {
            return Err(state.cursor.malformed("call record missing arguments"));
        }
        args.push(read_val(state, rc)?);
    }
    while !rc.done() {
        let (arg, _) = read_vtp(state, rc)?;
        args.push(arg);
    }
    Ok(args)
}

/// Turn a callee operand into its call form.
fn classify_callee(state: &ReaderState<'_>, op: Operand) -> Callee {
    match op {
        Operand::Func(f) => Callee::Direct(f),
        Operand::Const(c) => match &state.module.constants[c.as_usize()] {
            Constant::FuncAddr(f) => Callee::Direct(*f),
            Constant::InlineAsm {
                asm,
                constraints,
                side_effects,
            } => Callee::InlineAsm {
                asm: asm.clone(),
                constraints: constraints.clone(),
                side_effects: *side_effects,
            },
            _ => Callee::Indirect(op),
        },
        _ => Callee::Indirect(op),
    }
}

// =============================================================================
// Type Helpers
// =============================================================================

fn vector_elem(state: &ReaderState<'_>, ty: TypeId) -> Result<TypeId, EngineError> {
    match state.module.types.get(ty) {
        Type::Vector { elem, .. } => Ok(*elem),
        _ => Err(state.cursor.malformed("expected a vector type")),
    }
}

/// Lane type of a vector, or the type itself for scalars.
fn scalar_of(state: &ReaderState<'_>, ty: TypeId) -> TypeId {
    match state.module.types.get(ty) {
        Type::Vector { elem, .. } => *elem,
        _ => ty,
    }
}

fn non_void(state: &ReaderState<'_>, ty: TypeId) -> Option<TypeId> {
    match state.module.types.get(ty) {
        Type::Void => None,
        _ => Some(ty),
    }
}

/// Walk `extractvalue`/`insertvalue` indices into an aggregate type.
fn walk_aggregate(
    state: &ReaderState<'_>,
    mut ty: TypeId,
    indices: &[u32],
) -> Result<TypeId, EngineError> {
    for &index in indices {
        ty = match state.module.types.get(ty) {
            Type::Struct { fields, .. } => *fields.get(index as usize).ok_or_else(|| {
                state.cursor.malformed("aggregate index out of range")
            })?,
            Type::Array { elem, .. } => *elem,
            _ => return Err(state.cursor.malformed("aggregate walk into scalar")),
        };
    }
    Ok(ty)
}

/// Downgrade an ordering to its load-visible half (legacy cmpxchg records
/// have no separate failure ordering).
fn strip_release(ordering: AtomicOrdering) -> AtomicOrdering {
    match ordering {
        AtomicOrdering::AcqRel => AtomicOrdering::Acquire,
        AtomicOrdering::Release => AtomicOrdering::Relaxed,
        other => other,
    }
}
