//! Instruction-to-node factories.
//!
//! One slot is assigned per value-producing instruction, in decode order,
//! matching the operand numbering the reader produced. Address computations
//! fold constant indices into byte offsets against the fixed data layout;
//! intrinsic calls are recognized by name and lowered to dedicated nodes;
//! anything outside the supported set fails the load here with
//! `UnsupportedInstruction`.

use crate::consts::eval_const;
pub use crate::consts::ImageRefs;
use crate::node::{
    CalleeNode, GepStep, IntrinsicOp, Node, NodeBlock, NodeGraph, PhiNode, Src, Terminator,
};
use molten_core::EngineError;
use molten_ir::types::{FloatKind, Type, TypeId};
use molten_ir::{Callee, Instruction, Module, Operand, Value};
use molten_memory::MemoryManager;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// Module Translation
// =============================================================================

/// Translate every defined function. Index `i` of the result corresponds to
/// module function `i`; declarations translate to `None`.
pub fn translate_module(
    module: &Module,
    refs: &ImageRefs<'_>,
    mem: &MemoryManager,
) -> Result<Vec<Option<Arc<NodeGraph>>>, EngineError> {
    let mut graphs = Vec::with_capacity(module.functions.len());
    for (index, function) in module.functions.iter().enumerate() {
        if function.is_declaration {
            graphs.push(None);
        } else {
            let graph = translate_function(module, refs, mem, index as u32)?;
            graphs.push(Some(Arc::new(graph)));
        }
    }
    debug!(
        translated = graphs.iter().filter(|g| g.is_some()).count(),
        "module translated"
    );
    Ok(graphs)
}

/// Translate one defined function into its node graph.
pub fn translate_function(
    module: &Module,
    refs: &ImageRefs<'_>,
    mem: &MemoryManager,
    func_index: u32,
) -> Result<NodeGraph, EngineError> {
    let function = &module.functions[func_index as usize];
    let (ret_ty, params, _vararg) = module
        .types
        .signature(function.ty)
        .ok_or_else(|| EngineError::UnsupportedInstruction("function without signature".into()))?;
    let nargs = params.len() as u32;

    let mut tr = Translator {
        module,
        refs,
        mem,
        next_slot: nargs,
    };

    let mut blocks = Vec::with_capacity(function.blocks.len());
    for block in &function.blocks {
        blocks.push(tr.translate_block(block)?);
    }

    Ok(NodeGraph {
        func_index,
        name: function.name.clone(),
        nargs,
        slot_count: tr.next_slot,
        ret_ty,
        blocks,
    })
}

// =============================================================================
// Translator
// =============================================================================

pub(crate) struct Translator<'a> {
    pub module: &'a Module,
    refs: &'a ImageRefs<'a>,
    mem: &'a MemoryManager,
    next_slot: u32,
}

impl<'a> Translator<'a> {
    /// Allocate the next SSA slot (also used for asm scratch values).
    pub(crate) fn alloc_slot(&mut self) -> u32 {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    /// Existing id of the integer type with `bits`. The assembly path needs
    /// concrete types for its loads and stores; a module whose assembly
    /// touches a width it never declares is outside the supported grammar.
    pub(crate) fn int_ty(&self, bits: u32) -> Result<TypeId, EngineError> {
        self.module
            .types
            .lookup(&Type::Int { bits })
            .ok_or_else(|| EngineError::UnsupportedAssembly(format!("i{bits} operand width")))
    }

    /// Resolve an operand to a node source.
    pub(crate) fn src(&self, op: &Operand) -> Result<Src, EngineError> {
        match op {
            Operand::Local(i) => Ok(Src::Slot(*i)),
            Operand::Const(c) => Ok(Src::Imm(eval_const(self.module, self.refs, self.mem, *c)?)),
            Operand::Global(g) => self
                .refs
                .globals
                .get(*g as usize)
                .map(|p| Src::Imm(Value::Ptr(*p)))
                .ok_or_else(|| EngineError::link(format!("global #{g}"))),
            Operand::Func(f) => self
                .refs
                .functions
                .get(*f as usize)
                .map(|p| Src::Imm(Value::Ptr(*p)))
                .ok_or_else(|| EngineError::link(format!("function #{f}"))),
        }
    }

    fn translate_block(&mut self, block: &molten_ir::Block) -> Result<NodeBlock, EngineError> {
        let mut out = NodeBlock::default();
        let count = block.insts.len();
        if !block.insts.last().map_or(false, |i| i.is_terminator()) {
            return Err(EngineError::UnsupportedInstruction(
                "block without terminator".into(),
            ));
        }
        for (i, inst) in block.insts.iter().enumerate() {
            let is_last = i + 1 == count;
            if inst.is_terminator() {
                if !is_last {
                    return Err(EngineError::UnsupportedInstruction(
                        "terminator before end of block".into(),
                    ));
                }
                out.term = self.translate_terminator(inst)?;
            } else {
                self.translate_instruction(inst, &mut out)?;
            }
        }
        Ok(out)
    }

    // =========================================================================
    // Non-Terminators
    // =========================================================================

    fn translate_instruction(
        &mut self,
        inst: &Instruction,
        out: &mut NodeBlock,
    ) -> Result<(), EngineError> {
        match inst {
            Instruction::Binary { op, ty, lhs, rhs } => {
                self.check_arith_type(*ty)?;
                let node = Node::Binary {
                    dst: self.alloc_slot(),
                    op: *op,
                    ty: *ty,
                    lhs: self.src(lhs)?,
                    rhs: self.src(rhs)?,
                };
                out.nodes.push(node);
            }
            Instruction::Cast { op, to, value } => {
                self.check_arith_type(*to)?;
                let node = Node::Cast {
                    dst: self.alloc_slot(),
                    op: *op,
                    to: *to,
                    src: self.src(value)?,
                };
                out.nodes.push(node);
            }
            Instruction::ICmp { pred, lhs, rhs } => {
                let node = Node::ICmp {
                    dst: self.alloc_slot(),
                    pred: *pred,
                    lhs: self.src(lhs)?,
                    rhs: self.src(rhs)?,
                };
                out.nodes.push(node);
            }
            Instruction::FCmp { pred, lhs, rhs } => {
                let node = Node::FCmp {
                    dst: self.alloc_slot(),
                    pred: *pred,
                    lhs: self.src(lhs)?,
                    rhs: self.src(rhs)?,
                };
                out.nodes.push(node);
            }
            Instruction::Select {
                cond,
                on_true,
                on_false,
                ..
            } => {
                let node = Node::Select {
                    dst: self.alloc_slot(),
                    cond: self.src(cond)?,
                    on_true: self.src(on_true)?,
                    on_false: self.src(on_false)?,
                };
                out.nodes.push(node);
            }
            Instruction::Alloca {
                elem_ty,
                count,
                align,
            } => {
                let elem_size = self.module.layout.size_of(&self.module.types, *elem_ty);
                let natural = self.module.layout.align_of(&self.module.types, *elem_ty);
                let node = Node::Alloca {
                    dst: self.alloc_slot(),
                    elem_size,
                    count: self.src(count)?,
                    align: u64::from(*align).max(natural),
                };
                out.nodes.push(node);
            }
            Instruction::Load {
                ty,
                ptr,
                align,
                ordering,
            } => {
                self.check_access_type(*ty)?;
                let node = Node::Load {
                    dst: self.alloc_slot(),
                    ptr: self.src(ptr)?,
                    ty: *ty,
                    align: u64::from(*align),
                    ordering: *ordering,
                };
                out.nodes.push(node);
            }
            Instruction::Store {
                ptr,
                value,
                ty,
                align,
                ordering,
            } => {
                self.check_access_type(*ty)?;
                let node = Node::Store {
                    ptr: self.src(ptr)?,
                    value: self.src(value)?,
                    ty: *ty,
                    align: u64::from(*align),
                    ordering: *ordering,
                };
                out.nodes.push(node);
            }
            Instruction::Gep {
                src_ty,
                ptr,
                indices,
                ..
            } => {
                let steps = self.fold_gep(*src_ty, indices)?;
                let node = Node::Gep {
                    dst: self.alloc_slot(),
                    base: self.src(ptr)?,
                    steps,
                };
                out.nodes.push(node);
            }
            Instruction::Phi { ty, incoming } => {
                if !out.nodes.is_empty() {
                    return Err(EngineError::UnsupportedInstruction(
                        "phi after non-phi instruction".into(),
                    ));
                }
                let mut mapped: SmallVec<[(u32, Src); 2]> = SmallVec::new();
                for (pred, op) in incoming {
                    mapped.push((*pred, self.src(op)?));
                }
                out.phis.push(PhiNode {
                    dst: self.alloc_slot(),
                    ty: *ty,
                    incoming: mapped,
                });
            }
            Instruction::ExtractValue { agg, indices } => {
                let node = Node::ExtractValue {
                    dst: self.alloc_slot(),
                    agg: self.src(agg)?,
                    indices: indices.clone(),
                };
                out.nodes.push(node);
            }
            Instruction::InsertValue { agg, elem, indices } => {
                let node = Node::InsertValue {
                    dst: self.alloc_slot(),
                    agg: self.src(agg)?,
                    elem: self.src(elem)?,
                    indices: indices.clone(),
                };
                out.nodes.push(node);
            }
            Instruction::ExtractElement { vec, index } => {
                let node = Node::ExtractElement {
                    dst: self.alloc_slot(),
                    vec: self.src(vec)?,
                    index: self.src(index)?,
                };
                out.nodes.push(node);
            }
            Instruction::InsertElement { vec, elem, index } => {
                let node = Node::InsertElement {
                    dst: self.alloc_slot(),
                    vec: self.src(vec)?,
                    elem: self.src(elem)?,
                    index: self.src(index)?,
                };
                out.nodes.push(node);
            }
            Instruction::ShuffleVector { a, b, mask } => {
                let mask = self.shuffle_mask(mask)?;
                let node = Node::ShuffleVector {
                    dst: self.alloc_slot(),
                    a: self.src(a)?,
                    b: self.src(b)?,
                    mask,
                };
                out.nodes.push(node);
            }
            Instruction::AtomicRmw {
                op,
                ptr,
                value,
                ty,
                ordering,
            } => {
                self.check_arith_type(*ty)?;
                let node = Node::AtomicRmw {
                    dst: self.alloc_slot(),
                    op: *op,
                    ptr: self.src(ptr)?,
                    value: self.src(value)?,
                    ty: *ty,
                    ordering: *ordering,
                };
                out.nodes.push(node);
            }
            Instruction::CmpXchg {
                ptr,
                expected,
                replacement,
                ty,
                success_ordering,
                failure_ordering,
                returns_pair,
            } => {
                self.check_arith_type(*ty)?;
                let node = Node::CmpXchg {
                    dst: self.alloc_slot(),
                    ptr: self.src(ptr)?,
                    expected: self.src(expected)?,
                    replacement: self.src(replacement)?,
                    ty: *ty,
                    success: *success_ordering,
                    failure: *failure_ordering,
                    returns_pair: *returns_pair,
                };
                out.nodes.push(node);
            }
            Instruction::Fence { ordering } => {
                out.nodes.push(Node::Fence {
                    ordering: *ordering,
                });
            }
            Instruction::LandingPad { .. } => {
                out.nodes.push(Node::LandingPad {
                    dst: self.alloc_slot(),
                });
            }
            Instruction::VaArg { ty, list } => {
                let node = Node::VaArg {
                    dst: self.alloc_slot(),
                    ty: *ty,
                    list: self.src(list)?,
                };
                out.nodes.push(node);
            }
            Instruction::Call { callee, sig, args } => {
                self.translate_call(callee, *sig, args, out)?;
            }
            // Terminators are handled by translate_terminator.
            other => {
                return Err(EngineError::UnsupportedInstruction(format!(
                    "{other:?} outside terminator position"
                )));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Calls & Intrinsics
    // =========================================================================

    fn translate_call(
        &mut self,
        callee: &Callee,
        sig: TypeId,
        args: &[Operand],
        out: &mut NodeBlock,
    ) -> Result<(), EngineError> {
        let (ret, params, _) = self
            .module
            .types
            .signature(sig)
            .ok_or_else(|| EngineError::UnsupportedInstruction("call without signature".into()))?;
        let params = params.to_vec();
        let has_result = !matches!(self.module.types.get(ret), Type::Void);

        match callee {
            Callee::InlineAsm {
                asm,
                constraints,
                side_effects,
            } => {
                let dst = if has_result {
                    Some(self.alloc_slot())
                } else {
                    None
                };
                let srcs = args
                    .iter()
                    .map(|a| self.src(a))
                    .collect::<Result<Vec<_>, _>>()?;
                crate::asm::translate_inline_asm(
                    self,
                    asm,
                    constraints,
                    *side_effects,
                    &srcs,
                    dst,
                    out,
                )?;
            }
            Callee::Direct(fid) => {
                let name = self.module.functions[*fid as usize].name.clone();
                if let Some(op) = intrinsic_by_name(&name) {
                    self.lower_intrinsic(op, &name, &params, args, has_result, out)?;
                } else if name.starts_with("llvm.") {
                    if is_ignorable_intrinsic(&name) {
                        // No value, no effect; nothing to emit.
                    } else {
                        return Err(EngineError::UnsupportedInstruction(name.to_string()));
                    }
                } else {
                    let dst = if has_result {
                        Some(self.alloc_slot())
                    } else {
                        None
                    };
                    let srcs = args
                        .iter()
                        .map(|a| self.src(a))
                        .collect::<Result<Vec<_>, _>>()?;
                    out.nodes.push(Node::Call {
                        dst,
                        callee: CalleeNode::Direct(*fid),
                        sig,
                        args: srcs,
                    });
                }
            }
            Callee::Indirect(op) => {
                let dst = if has_result {
                    Some(self.alloc_slot())
                } else {
                    None
                };
                let target = self.src(op)?;
                let srcs = args
                    .iter()
                    .map(|a| self.src(a))
                    .collect::<Result<Vec<_>, _>>()?;
                out.nodes.push(Node::Call {
                    dst,
                    callee: CalleeNode::Indirect(target),
                    sig,
                    args: srcs,
                });
            }
        }
        Ok(())
    }

    fn lower_intrinsic(
        &mut self,
        op: IntrinsicOp,
        name: &str,
        params: &[TypeId],
        args: &[Operand],
        has_result: bool,
        out: &mut NodeBlock,
    ) -> Result<(), EngineError> {
        let dst = if has_result {
            Some(self.alloc_slot())
        } else {
            None
        };
        let mut srcs: SmallVec<[Src; 4]> = SmallVec::new();
        for a in args {
            srcs.push(self.src(a)?);
        }
        // Width-sensitive intrinsics key off their first parameter type.
        let ty = params.first().copied().unwrap_or_else(|| TypeId::new(0));
        if matches!(
            op,
            IntrinsicOp::SAddOverflow
                | IntrinsicOp::UAddOverflow
                | IntrinsicOp::SSubOverflow
                | IntrinsicOp::USubOverflow
                | IntrinsicOp::SMulOverflow
                | IntrinsicOp::UMulOverflow
                | IntrinsicOp::Ctlz
                | IntrinsicOp::Cttz
                | IntrinsicOp::Ctpop
                | IntrinsicOp::Bswap
        ) && self
            .module
            .types
            .int_bits(ty)
            .map_or(true, |b| !matches!(b, 8 | 16 | 32 | 64))
        {
            return Err(EngineError::UnsupportedInstruction(name.to_string()));
        }
        out.nodes.push(Node::Intrinsic { dst, op, args: srcs });
        Ok(())
    }

    // =========================================================================
    // Terminators
    // =========================================================================

    fn translate_terminator(&mut self, inst: &Instruction) -> Result<Terminator, EngineError> {
        Ok(match inst {
            Instruction::Ret { value } => Terminator::Ret {
                value: match value {
                    Some(v) => Some(self.src(v)?),
                    None => None,
                },
            },
            Instruction::Br { dest } => Terminator::Br { dest: *dest },
            Instruction::CondBr {
                cond,
                on_true,
                on_false,
            } => Terminator::CondBr {
                cond: self.src(cond)?,
                on_true: *on_true,
                on_false: *on_false,
            },
            Instruction::Switch {
                cond,
                default,
                cases,
            } => Terminator::Switch {
                cond: self.src(cond)?,
                default: *default,
                cases: cases.clone(),
            },
            Instruction::Invoke {
                callee,
                sig,
                args,
                normal,
                unwind,
            } => {
                let (ret, _, _) = self.module.types.signature(*sig).ok_or_else(|| {
                    EngineError::UnsupportedInstruction("invoke without signature".into())
                })?;
                let has_result = !matches!(self.module.types.get(ret), Type::Void);
                let dst = if has_result {
                    Some(self.alloc_slot())
                } else {
                    None
                };
                let callee = match callee {
                    Callee::Direct(fid) => {
                        let name = &self.module.functions[*fid as usize].name;
                        if name.starts_with("llvm.") {
                            return Err(EngineError::UnsupportedInstruction(format!(
                                "invoke of intrinsic {name}"
                            )));
                        }
                        CalleeNode::Direct(*fid)
                    }
                    Callee::Indirect(op) => CalleeNode::Indirect(self.src(op)?),
                    Callee::InlineAsm { asm, .. } => {
                        return Err(EngineError::UnsupportedAssembly(format!(
                            "invoke of inline assembly `{asm}`"
                        )));
                    }
                };
                let srcs = args
                    .iter()
                    .map(|a| self.src(a))
                    .collect::<Result<Vec<_>, _>>()?;
                Terminator::Invoke {
                    dst,
                    callee,
                    sig: *sig,
                    args: srcs,
                    normal: *normal,
                    unwind: *unwind,
                }
            }
            Instruction::Unreachable => Terminator::Unreachable,
            Instruction::Resume { value } => Terminator::Resume {
                value: self.src(value)?,
            },
            other => {
                return Err(EngineError::UnsupportedInstruction(format!(
                    "{other:?} as terminator"
                )));
            }
        })
    }

    // =========================================================================
    // Address Computation
    // =========================================================================

    /// Fold a GEP's indices into byte-offset steps. Constant runs collapse
    /// into a single `Fixed` step; dynamic indices become `Scaled` steps
    /// with the element stride from the data layout.
    fn fold_gep(
        &self,
        src_ty: TypeId,
        indices: &[Operand],
    ) -> Result<SmallVec<[GepStep; 4]>, EngineError> {
        let types = &self.module.types;
        let layout = &self.module.layout;
        let mut steps: SmallVec<[GepStep; 4]> = SmallVec::new();
        let mut pending: i64 = 0;
        let mut cur = src_ty;

        for (k, index) in indices.iter().enumerate() {
            let src = self.src(index)?;
            let const_index = match &src {
                Src::Imm(v) => v.as_i64(),
                Src::Slot(_) => None,
            };

            if k == 0 {
                let stride = layout.size_of(types, cur);
                match const_index {
                    Some(i) => pending = pending.wrapping_add(i.wrapping_mul(stride as i64)),
                    None => {
                        flush_fixed(&mut steps, &mut pending);
                        steps.push(GepStep::Scaled { index: src, stride });
                    }
                }
                continue;
            }

            match types.get(cur) {
                Type::Struct { fields, .. } => {
                    let field = const_index.ok_or_else(|| {
                        EngineError::UnsupportedInstruction("dynamic struct index".into())
                    })? as usize;
                    if field >= fields.len() {
                        return Err(EngineError::UnsupportedInstruction(
                            "struct index out of range".into(),
                        ));
                    }
                    pending =
                        pending.wrapping_add(layout.field_offset(types, cur, field) as i64);
                    cur = fields[field];
                }
                Type::Array { elem, .. } | Type::Vector { elem, .. } => {
                    let elem = *elem;
                    let stride = layout.size_of(types, elem);
                    match const_index {
                        Some(i) => {
                            pending = pending.wrapping_add(i.wrapping_mul(stride as i64));
                        }
                        None => {
                            flush_fixed(&mut steps, &mut pending);
                            steps.push(GepStep::Scaled { index: src, stride });
                        }
                    }
                    cur = elem;
                }
                _ => {
                    return Err(EngineError::UnsupportedInstruction(
                        "getelementptr into a scalar".into(),
                    ));
                }
            }
        }
        flush_fixed(&mut steps, &mut pending);
        Ok(steps)
    }

    /// Resolve a shuffle mask operand into lane indices.
    fn shuffle_mask(&self, mask: &Operand) -> Result<Vec<i64>, EngineError> {
        let value = match self.src(mask)? {
            Src::Imm(v) => v,
            Src::Slot(_) => {
                return Err(EngineError::UnsupportedInstruction(
                    "dynamic shuffle mask".into(),
                ));
            }
        };
        match value {
            Value::Vector(lanes) => lanes
                .iter()
                .map(|lane| {
                    lane.as_i64().ok_or_else(|| {
                        EngineError::UnsupportedInstruction("non-integer shuffle mask".into())
                    })
                })
                .collect(),
            _ => Err(EngineError::UnsupportedInstruction(
                "shuffle mask is not a vector".into(),
            )),
        }
    }

    // =========================================================================
    // Type Validation
    // =========================================================================

    /// Arithmetic and cast results must be evaluable scalars (or vectors
    /// of them): the storage-width integers, single or double floats,
    /// pointers. Exotic widths would silently evaluate with the wrong wrap
    /// point, so they are rejected here instead.
    fn check_arith_type(&self, ty: TypeId) -> Result<(), EngineError> {
        match self.module.types.get(ty) {
            Type::Int { bits } if !matches!(bits, 1 | 8 | 16 | 32 | 64) => Err(
                EngineError::UnsupportedInstruction(format!("i{bits} arithmetic")),
            ),
            Type::Float(FloatKind::Half | FloatKind::X86Fp80 | FloatKind::Fp128) => Err(
                EngineError::UnsupportedInstruction("extended-precision arithmetic".into()),
            ),
            Type::Vector { elem, .. } => self.check_arith_type(*elem),
            _ => Ok(()),
        }
    }

    /// Memory access types additionally allow aggregates, whose fields are
    /// checked recursively.
    fn check_access_type(&self, ty: TypeId) -> Result<(), EngineError> {
        match self.module.types.get(ty) {
            Type::Struct { fields, .. } => {
                for f in fields {
                    self.check_access_type(*f)?;
                }
                Ok(())
            }
            Type::Array { elem, .. } => self.check_access_type(*elem),
            _ => self.check_arith_type(ty),
        }
    }
}

fn flush_fixed(steps: &mut SmallVec<[GepStep; 4]>, pending: &mut i64) {
    if *pending != 0 {
        steps.push(GepStep::Fixed(*pending));
        *pending = 0;
    }
}

// =============================================================================
// Intrinsic Name Table
// =============================================================================

/// Map an `llvm.*` symbol to its lowered operation. Overloaded intrinsics
/// carry type suffixes, so matching is by prefix.
fn intrinsic_by_name(name: &str) -> Option<IntrinsicOp> {
    const TABLE: &[(&str, IntrinsicOp)] = &[
        ("llvm.memcpy.", IntrinsicOp::MemCpy),
        ("llvm.memmove.", IntrinsicOp::MemMove),
        ("llvm.memset.", IntrinsicOp::MemSet),
        ("llvm.sqrt.", IntrinsicOp::Sqrt),
        ("llvm.fabs.", IntrinsicOp::Fabs),
        ("llvm.minnum.", IntrinsicOp::FMin),
        ("llvm.maxnum.", IntrinsicOp::FMax),
        ("llvm.ctlz.", IntrinsicOp::Ctlz),
        ("llvm.cttz.", IntrinsicOp::Cttz),
        ("llvm.ctpop.", IntrinsicOp::Ctpop),
        ("llvm.bswap.", IntrinsicOp::Bswap),
        ("llvm.sadd.with.overflow.", IntrinsicOp::SAddOverflow),
        ("llvm.uadd.with.overflow.", IntrinsicOp::UAddOverflow),
        ("llvm.ssub.with.overflow.", IntrinsicOp::SSubOverflow),
        ("llvm.usub.with.overflow.", IntrinsicOp::USubOverflow),
        ("llvm.smul.with.overflow.", IntrinsicOp::SMulOverflow),
        ("llvm.umul.with.overflow.", IntrinsicOp::UMulOverflow),
        ("llvm.expect.", IntrinsicOp::Expect),
        ("llvm.stacksave", IntrinsicOp::StackSave),
        ("llvm.stackrestore", IntrinsicOp::StackRestore),
        ("llvm.va_start", IntrinsicOp::VaStart),
        ("llvm.va_end", IntrinsicOp::VaEnd),
        ("llvm.va_copy", IntrinsicOp::VaCopy),
        ("llvm.trap", IntrinsicOp::Trap),
        ("llvm.debugtrap", IntrinsicOp::Trap),
    ];
    TABLE
        .iter()
        .find(|(prefix, _)| {
            name.starts_with(prefix)
                // Exact-name intrinsics must not prefix-match relatives
                // (llvm.trap vs llvm.traprelative would be distinct).
                && (prefix.ends_with('.') || name.len() == prefix.len())
        })
        .map(|(_, op)| *op)
}

/// Intrinsics with no observable semantics in this engine.
fn is_ignorable_intrinsic(name: &str) -> bool {
    name.starts_with("llvm.dbg.")
        || name.starts_with("llvm.lifetime.")
        || name.starts_with("llvm.invariant.")
        || name.starts_with("llvm.prefetch")
        || name.starts_with("llvm.assume")
        || name.starts_with("llvm.donothing")
        || name.starts_with("llvm.experimental.noalias")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intrinsic_table() {
        assert_eq!(
            intrinsic_by_name("llvm.memcpy.p0i8.p0i8.i64"),
            Some(IntrinsicOp::MemCpy)
        );
        assert_eq!(
            intrinsic_by_name("llvm.sadd.with.overflow.i32"),
            Some(IntrinsicOp::SAddOverflow)
        );
        assert_eq!(intrinsic_by_name("llvm.trap"), Some(IntrinsicOp::Trap));
        assert_eq!(intrinsic_by_name("llvm.frobnicate.i8"), None);
        assert_eq!(intrinsic_by_name("printf"), None);
    }

    #[test]
    fn test_ignorable_intrinsics() {
        assert!(is_ignorable_intrinsic("llvm.dbg.value"));
        assert!(is_ignorable_intrinsic("llvm.lifetime.start.p0i8"));
        assert!(is_ignorable_intrinsic("llvm.assume"));
        assert!(!is_ignorable_intrinsic("llvm.memcpy.p0i8.p0i8.i32"));
    }
}
