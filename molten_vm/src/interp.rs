//! The node interpreter.
//!
//! One [`crate::frame::Frame`] per call. Evaluation begins at a function's
//! entry block, runs each node in order, then follows the terminator; phi
//! merges at the new block's head resolve against the actually-executed
//! predecessor with a parallel copy (all reads before any write).
//!
//! Interpretation of one guest thread is strictly sequential: there are no
//! suspension points inside node evaluation. Cancellation and trap unwinds
//! both release every live frame's stack allocations in reverse creation
//! order on the way out.

use crate::context::Context;
use crate::frame::Frame;
use crate::ops;
use molten_core::error::MemoryErrorKind;
use molten_core::{EngineError, Trap, TrapFrame};
use molten_ir::{AllocId, Pointer, Value};
use molten_memory::AllocationKind;
use molten_nodes::{CalleeNode, GepStep, IntrinsicOp, Node, NodeGraph, Src, Terminator};
use tracing::trace;

/// Base of the opaque tokens `stacksave` hands out.
const STACK_TOKEN_BASE: u64 = 1 << 57;

// =============================================================================
// Control Signals
// =============================================================================

/// Everything that can leave a guest call other than a normal return.
#[derive(Debug, Clone, PartialEq)]
pub enum VmError {
    /// Hard trap: terminates the guest call chain; never caught by
    /// landing pads.
    Trap(Trap),
    /// Guest-level unwind carrying the landing-pad token; caught by the
    /// nearest invoke.
    Unwind(Value),
    /// Guest requested process exit.
    Exit(i32),
}

impl From<EngineError> for VmError {
    fn from(error: EngineError) -> Self {
        VmError::Trap(Trap::new(error))
    }
}

impl From<Trap> for VmError {
    fn from(trap: Trap) -> Self {
        VmError::Trap(trap)
    }
}

pub type VmResult<T> = Result<T, VmError>;

// =============================================================================
// Interpreter
// =============================================================================

/// One guest thread's evaluation engine over a shared [`Context`].
pub struct Interpreter<'ctx> {
    pub ctx: &'ctx Context,
    depth: usize,
}

impl<'ctx> Interpreter<'ctx> {
    pub fn new(ctx: &'ctx Context) -> Self {
        Interpreter { ctx, depth: 0 }
    }

    /// Call module function `index` with `args`. Declarations route
    /// through the foreign-function bridge.
    pub fn call_function(&mut self, index: u32, args: Vec<Value>) -> VmResult<Option<Value>> {
        match self.ctx.graphs.get(index as usize) {
            Some(Some(graph)) => {
                let graph = graph.clone();
                self.run_graph(&graph, args)
            }
            Some(None) => {
                let (name, ty) = {
                    let function = &self.ctx.module.functions[index as usize];
                    (function.name.clone(), function.ty)
                };
                crate::ffi::call_external(self, &name, ty, &args)
            }
            None => Err(EngineError::UnresolvedSymbol(format!("function #{index}")).into()),
        }
    }

    /// Call a function by symbol name (host-embedding entry point).
    pub fn call_by_name(&mut self, name: &str, args: Vec<Value>) -> VmResult<Option<Value>> {
        let (index, _) = self
            .ctx
            .module
            .function_by_name(name)
            .ok_or_else(|| VmError::from(EngineError::UnresolvedSymbol(name.to_string())))?;
        self.call_function(index, args)
    }

    fn run_graph(&mut self, graph: &NodeGraph, args: Vec<Value>) -> VmResult<Option<Value>> {
        if self.depth >= self.ctx.config.stack_limit {
            return Err(EngineError::StackOverflow {
                limit: self.ctx.config.stack_limit,
            }
            .into());
        }
        self.depth += 1;
        trace!(function = %graph.name, depth = self.depth, "enter");
        let mut frame = Frame::new(graph.slot_count, args);
        let result = self.run_blocks(graph, &mut frame);
        // Guaranteed release on every exit path: return, trap, unwind,
        // cancellation.
        frame.release_all(&self.ctx.mem);
        self.depth -= 1;
        result
    }

    // =========================================================================
    // Block Stepping
    // =========================================================================

    fn run_blocks(&mut self, graph: &NodeGraph, frame: &mut Frame) -> VmResult<Option<Value>> {
        let mut cur: u32 = 0;
        let mut prev: Option<u32> = None;

        loop {
            // Cancellation is delivered at block boundaries only.
            if self.ctx.is_cancelled() {
                return Err(self.annotate(EngineError::Cancelled.into(), graph, cur, None));
            }
            let block = &graph.blocks[cur as usize];

            // Parallel-copy phi resolution: read every incoming value for
            // the edge taken before writing any slot.
            if let Some(pred) = prev {
                let copies: Vec<(u32, Value)> = graph
                    .phi_sources(cur, pred)
                    .map(|(phi, src)| (phi.dst, self.value_of(frame, src)))
                    .collect();
                for (dst, value) in copies {
                    frame.set(dst, value);
                }
            }

            for (i, node) in block.nodes.iter().enumerate() {
                self.eval_node(node, frame)
                    .map_err(|e| self.annotate(e, graph, cur, Some(i as u32)))?;
            }

            let next = match &block.term {
                Terminator::Ret { value } => {
                    return Ok(value.as_ref().map(|v| self.value_of(frame, v)));
                }
                Terminator::Br { dest } => *dest,
                Terminator::CondBr {
                    cond,
                    on_true,
                    on_false,
                } => {
                    let taken = !self.value_of(frame, cond).is_zero();
                    if taken {
                        *on_true
                    } else {
                        *on_false
                    }
                }
                Terminator::Switch {
                    cond,
                    default,
                    cases,
                } => {
                    let scrutinee = self
                        .value_of(frame, cond)
                        .as_u64()
                        .ok_or_else(|| {
                            self.annotate(
                                EngineError::Memory(MemoryErrorKind::TypeMismatch).into(),
                                graph,
                                cur,
                                None,
                            )
                        })?;
                    cases
                        .iter()
                        .find(|(value, _)| *value == scrutinee)
                        .map(|(_, dest)| *dest)
                        .unwrap_or(*default)
                }
                Terminator::Invoke {
                    dst,
                    callee,
                    sig,
                    args,
                    normal,
                    unwind,
                } => {
                    match self.eval_call(callee, *sig, args, frame) {
                        Ok(result) => {
                            if let Some(dst) = dst {
                                frame.set(*dst, result.unwrap_or(Value::I64(0)));
                            }
                            *normal
                        }
                        // Only guest-level unwinds reach the landing pad;
                        // hard traps terminate the call chain.
                        Err(VmError::Unwind(token)) => {
                            frame.pending_unwind = Some(token);
                            *unwind
                        }
                        Err(other) => {
                            return Err(self.annotate(other, graph, cur, None));
                        }
                    }
                }
                Terminator::Resume { value } => {
                    let token = self.value_of(frame, value);
                    return Err(VmError::Unwind(token));
                }
                Terminator::Unreachable => {
                    return Err(self.annotate(
                        EngineError::UnreachableExecuted.into(),
                        graph,
                        cur,
                        None,
                    ));
                }
            };
            prev = Some(cur);
            cur = next;
        }
    }

    /// Attach this frame's identity to a propagating trap.
    fn annotate(&self, err: VmError, graph: &NodeGraph, block: u32, node: Option<u32>) -> VmError {
        match err {
            VmError::Trap(mut trap) => {
                trap.push_frame(TrapFrame {
                    function: graph.name.to_string(),
                    block,
                    node,
                });
                VmError::Trap(trap)
            }
            other => other,
        }
    }

    // =========================================================================
    // Node Evaluation
    // =========================================================================

    #[inline]
    fn value_of(&self, frame: &Frame, src: &Src) -> Value {
        match src {
            Src::Slot(slot) => frame.get(*slot).clone(),
            Src::Imm(value) => value.clone(),
        }
    }

    fn pointer_of(&self, frame: &Frame, src: &Src) -> Result<Pointer, EngineError> {
        self.value_of(frame, src)
            .as_ptr()
            .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))
    }

    fn eval_node(&mut self, node: &Node, frame: &mut Frame) -> VmResult<()> {
        let ctx = self.ctx;
        let types = &ctx.module.types;
        let layout = &ctx.module.layout;
        match node {
            Node::Move { dst, src } => {
                let value = self.value_of(frame, src);
                frame.set(*dst, value);
            }
            Node::Binary { dst, op, ty, lhs, rhs } => {
                let a = self.value_of(frame, lhs);
                let b = self.value_of(frame, rhs);
                frame.set(*dst, ops::arithmetic::binary(types, *ty, *op, &a, &b)?);
            }
            Node::ICmp { dst, pred, lhs, rhs } => {
                let a = self.value_of(frame, lhs);
                let b = self.value_of(frame, rhs);
                frame.set(*dst, ops::arithmetic::icmp(&ctx.mem, *pred, &a, &b)?);
            }
            Node::FCmp { dst, pred, lhs, rhs } => {
                let a = self.value_of(frame, lhs);
                let b = self.value_of(frame, rhs);
                frame.set(*dst, ops::arithmetic::fcmp(*pred, &a, &b)?);
            }
            Node::Cast { dst, op, to, src } => {
                let v = self.value_of(frame, src);
                frame.set(*dst, ops::cast::cast(types, &ctx.mem, *op, *to, &v)?);
            }
            Node::Select {
                dst,
                cond,
                on_true,
                on_false,
            } => {
                let c = self.value_of(frame, cond);
                let t = self.value_of(frame, on_true);
                let f = self.value_of(frame, on_false);
                let result = match c {
                    Value::Vector(lanes) => {
                        // Lane-wise select.
                        let (ts, fs) = match (t, f) {
                            (Value::Vector(ts), Value::Vector(fs)) => (ts, fs),
                            _ => {
                                return Err(EngineError::Memory(MemoryErrorKind::TypeMismatch)
                                    .into())
                            }
                        };
                        if ts.len() != lanes.len() || fs.len() != lanes.len() {
                            return Err(
                                EngineError::Memory(MemoryErrorKind::TypeMismatch).into()
                            );
                        }
                        let mut out = Vec::with_capacity(lanes.len());
                        for (i, lane) in lanes.iter().enumerate() {
                            let pick_true = !lane.is_zero();
                            out.push(if pick_true { ts[i].clone() } else { fs[i].clone() });
                        }
                        Value::Vector(out)
                    }
                    scalar => {
                        if !scalar.is_zero() {
                            t
                        } else {
                            f
                        }
                    }
                };
                frame.set(*dst, result);
            }
            Node::Alloca {
                dst,
                elem_size,
                count,
                align,
            } => {
                let n = self
                    .value_of(frame, count)
                    .as_u64()
                    .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
                let size = elem_size.checked_mul(n).ok_or(EngineError::Memory(
                    MemoryErrorKind::OutOfBounds {
                        offset: 0,
                        len: u64::MAX,
                        size: 0,
                    },
                ))?;
                let id = ctx.mem.allocate(AllocationKind::Stack, size, *align)?;
                frame.push_alloca(id);
                frame.set(*dst, Value::Ptr(Pointer::base(id)));
            }
            Node::Load {
                dst,
                ptr,
                ty,
                align,
                ordering,
            } => {
                let p = self.pointer_of(frame, ptr)?;
                let value = match ordering {
                    Some(ord) => ctx.mem.atomic_load(types, layout, p, *ty, *align, *ord)?,
                    None => ctx.mem.load(types, layout, p, *ty, *align)?,
                };
                frame.set(*dst, value);
            }
            Node::Store {
                ptr,
                value,
                ty,
                align,
                ordering,
            } => {
                let p = self.pointer_of(frame, ptr)?;
                let v = self.value_of(frame, value);
                match ordering {
                    Some(ord) => ctx.mem.atomic_store(types, layout, p, *ty, &v, *align, *ord)?,
                    None => ctx.mem.store(types, layout, p, *ty, &v, *align)?,
                }
            }
            Node::Gep { dst, base, steps } => {
                let p = self.pointer_of(frame, base)?;
                let mut offset: i64 = 0;
                for step in steps {
                    match step {
                        GepStep::Fixed(bytes) => offset = offset.wrapping_add(*bytes),
                        GepStep::Scaled { index, stride } => {
                            let idx = self
                                .value_of(frame, index)
                                .as_i64()
                                .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
                            offset = offset.wrapping_add(idx.wrapping_mul(*stride as i64));
                        }
                    }
                }
                // A new pointer into the same allocation; only dereference
                // checks bounds.
                frame.set(*dst, Value::Ptr(p.offset_by(offset)));
            }
            Node::ExtractValue { dst, agg, indices } => {
                let v = self.value_of(frame, agg);
                frame.set(*dst, ops::aggregate::extract_value(&v, indices)?);
            }
            Node::InsertValue {
                dst,
                agg,
                elem,
                indices,
            } => {
                let v = self.value_of(frame, agg);
                let e = self.value_of(frame, elem);
                frame.set(*dst, ops::aggregate::insert_value(&v, &e, indices)?);
            }
            Node::ExtractElement { dst, vec, index } => {
                let v = self.value_of(frame, vec);
                let i = self.value_of(frame, index);
                frame.set(*dst, ops::aggregate::extract_element(&v, &i)?);
            }
            Node::InsertElement {
                dst,
                vec,
                elem,
                index,
            } => {
                let v = self.value_of(frame, vec);
                let e = self.value_of(frame, elem);
                let i = self.value_of(frame, index);
                frame.set(*dst, ops::aggregate::insert_element(&v, &e, &i)?);
            }
            Node::ShuffleVector { dst, a, b, mask } => {
                let x = self.value_of(frame, a);
                let y = self.value_of(frame, b);
                frame.set(*dst, ops::aggregate::shuffle(&x, &y, mask)?);
            }
            Node::Call {
                dst,
                callee,
                sig,
                args,
            } => {
                let result = self.eval_call(callee, *sig, args, frame)?;
                if let Some(dst) = dst {
                    frame.set(*dst, result.unwrap_or(Value::I64(0)));
                }
            }
            Node::Intrinsic { dst, op, args } => {
                let result = self.eval_intrinsic(*op, args, frame)?;
                if let (Some(dst), Some(value)) = (dst, result) {
                    frame.set(*dst, value);
                }
            }
            Node::AtomicRmw {
                dst,
                op,
                ptr,
                value,
                ty,
                ordering,
            } => {
                let p = self.pointer_of(frame, ptr)?;
                let v = self.value_of(frame, value);
                let old = ctx
                    .mem
                    .atomic_rmw(types, layout, *op, p, *ty, &v, *ordering)?;
                frame.set(*dst, old);
            }
            Node::CmpXchg {
                dst,
                ptr,
                expected,
                replacement,
                ty,
                success,
                failure,
                returns_pair,
            } => {
                let p = self.pointer_of(frame, ptr)?;
                let exp = self.value_of(frame, expected);
                let rep = self.value_of(frame, replacement);
                let (old, swapped) = ctx
                    .mem
                    .atomic_cmpxchg(types, layout, p, *ty, &exp, &rep, *success, *failure)?;
                let result = if *returns_pair {
                    Value::Aggregate(vec![old, Value::I1(swapped)])
                } else {
                    old
                };
                frame.set(*dst, result);
            }
            Node::Fence { ordering } => ctx.mem.fence(*ordering),
            Node::LandingPad { dst } => {
                let token = frame
                    .pending_unwind
                    .take()
                    .unwrap_or(Value::Aggregate(vec![
                        Value::Ptr(Pointer::NULL),
                        Value::I32(0),
                    ]));
                frame.set(*dst, token);
            }
            Node::VaArg { dst, ty, list } => {
                // Recognized but stubbed: yields the zero of its type.
                let _ = self.value_of(frame, list);
                frame.set(*dst, Value::zero_of(types, *ty));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn eval_call(
        &mut self,
        callee: &CalleeNode,
        _sig: molten_ir::TypeId,
        args: &[Src],
        frame: &Frame,
    ) -> VmResult<Option<Value>> {
        let values: Vec<Value> = args.iter().map(|a| self.value_of(frame, a)).collect();
        let index = match callee {
            CalleeNode::Direct(index) => *index,
            CalleeNode::Indirect(target) => {
                let ptr = self.pointer_of(frame, target)?;
                self.ctx.function_at(ptr).ok_or_else(|| {
                    VmError::from(EngineError::UnresolvedSymbol(format!(
                        "indirect call target {ptr}"
                    )))
                })?
            }
        };
        self.call_function(index, values)
    }

    // =========================================================================
    // Intrinsics
    // =========================================================================

    fn eval_intrinsic(
        &mut self,
        op: IntrinsicOp,
        args: &[Src],
        frame: &mut Frame,
    ) -> VmResult<Option<Value>> {
        let ctx = self.ctx;
        let values: Vec<Value> = args.iter().map(|a| self.value_of(frame, a)).collect();
        let ptr_arg = |i: usize| -> Result<Pointer, EngineError> {
            values
                .get(i)
                .and_then(|v| v.as_ptr())
                .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))
        };
        let int_arg = |i: usize| -> Result<u64, EngineError> {
            values
                .get(i)
                .and_then(|v| v.as_u64())
                .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))
        };

        match op {
            IntrinsicOp::MemCpy | IntrinsicOp::MemMove => {
                ctx.mem.copy_bytes(ptr_arg(0)?, ptr_arg(1)?, int_arg(2)?)?;
                Ok(None)
            }
            IntrinsicOp::MemSet => {
                ctx.mem
                    .fill_bytes(ptr_arg(0)?, int_arg(1)? as u8, int_arg(2)?)?;
                Ok(None)
            }
            IntrinsicOp::Sqrt | IntrinsicOp::Fabs => {
                let v = values
                    .first()
                    .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
                let f = v
                    .as_f64()
                    .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
                let r = match op {
                    IntrinsicOp::Sqrt => f.sqrt(),
                    _ => f.abs(),
                };
                Ok(Some(match v {
                    Value::F32(_) => Value::F32(r as f32),
                    _ => Value::F64(r),
                }))
            }
            IntrinsicOp::FMin | IntrinsicOp::FMax => {
                let a = values
                    .first()
                    .and_then(|v| v.as_f64())
                    .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
                let b = values
                    .get(1)
                    .and_then(|v| v.as_f64())
                    .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
                let r = if op == IntrinsicOp::FMin {
                    a.min(b)
                } else {
                    a.max(b)
                };
                Ok(Some(match values.first() {
                    Some(Value::F32(_)) => Value::F32(r as f32),
                    _ => Value::F64(r),
                }))
            }
            IntrinsicOp::Ctlz | IntrinsicOp::Cttz | IntrinsicOp::Ctpop | IntrinsicOp::Bswap => {
                let v = values
                    .first()
                    .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
                let bits = v
                    .int_width()
                    .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
                let raw = v.as_u64().unwrap_or(0);
                let result = match op {
                    IntrinsicOp::Ctlz => {
                        u64::from(raw.leading_zeros().saturating_sub(64 - bits))
                    }
                    IntrinsicOp::Cttz => {
                        u64::from(raw.trailing_zeros().min(bits))
                    }
                    IntrinsicOp::Ctpop => u64::from(raw.count_ones()),
                    _ => raw.swap_bytes() >> (64 - bits),
                };
                Ok(Some(Value::int(bits, result)))
            }
            IntrinsicOp::SAddOverflow
            | IntrinsicOp::UAddOverflow
            | IntrinsicOp::SSubOverflow
            | IntrinsicOp::USubOverflow
            | IntrinsicOp::SMulOverflow
            | IntrinsicOp::UMulOverflow => {
                let a = values
                    .first()
                    .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
                let b = values
                    .get(1)
                    .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
                Ok(Some(overflow_intrinsic(op, a, b)?))
            }
            IntrinsicOp::Expect => Ok(values.first().cloned()),
            IntrinsicOp::StackSave => Ok(Some(Value::Ptr(Pointer {
                alloc: AllocId::NULL,
                offset: STACK_TOKEN_BASE + frame.alloca_mark() as u64,
            }))),
            IntrinsicOp::StackRestore => {
                let token = ptr_arg(0)?;
                let mark = token.offset.saturating_sub(STACK_TOKEN_BASE) as usize;
                frame.release_to_mark(&ctx.mem, mark);
                Ok(None)
            }
            IntrinsicOp::VaStart | IntrinsicOp::VaEnd | IntrinsicOp::VaCopy => Ok(None),
            IntrinsicOp::Trap => Err(EngineError::GuestAbort.into()),
        }
    }
}

/// The `*.with.overflow` family: wrapped result plus overflow flag.
fn overflow_intrinsic(op: IntrinsicOp, a: &Value, b: &Value) -> Result<Value, EngineError> {
    let bits = a
        .int_width()
        .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?;
    let (raw, overflowed) = match op {
        IntrinsicOp::UAddOverflow | IntrinsicOp::USubOverflow | IntrinsicOp::UMulOverflow => {
            let x = a.as_u64().unwrap_or(0) as u128;
            let y = b
                .as_u64()
                .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?
                as u128;
            let wide = match op {
                IntrinsicOp::UAddOverflow => x + y,
                IntrinsicOp::USubOverflow => x.wrapping_sub(y),
                _ => x * y,
            };
            let max = if bits >= 64 {
                u128::from(u64::MAX)
            } else {
                (1u128 << bits) - 1
            };
            (wide as u64, wide > max)
        }
        _ => {
            let x = a.as_i64().unwrap_or(0) as i128;
            let y = b
                .as_i64()
                .ok_or(EngineError::Memory(MemoryErrorKind::TypeMismatch))?
                as i128;
            let wide = match op {
                IntrinsicOp::SAddOverflow => x + y,
                IntrinsicOp::SSubOverflow => x - y,
                _ => x * y,
            };
            let min = -(1i128 << (bits - 1));
            let max = (1i128 << (bits - 1)) - 1;
            (wide as u64, wide < min || wide > max)
        }
    };
    Ok(Value::Aggregate(vec![
        Value::int(bits, raw),
        Value::I1(overflowed),
    ]))
}

// =============================================================================
// Tests
// =============================================================================
