//! The executable node representation.
//!
//! A closed tagged enum, one variant per opcode the interpreter evaluates.
//! Nodes read operands from SSA slots or carry immediate values resolved at
//! translation time (constants, global addresses); each value-producing
//! node writes exactly one slot. The interpreter never sees an opcode this
//! enum does not name; exhaustiveness is enforced when the graph is built.

use molten_ir::types::TypeId;
use molten_ir::{AtomicOrdering, BinOp, CastOp, FCmpPred, ICmpPred, RmwOp, Value};
use smallvec::SmallVec;
use std::sync::Arc;

// =============================================================================
// Operand Sources
// =============================================================================

/// Where a node operand comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Src {
    /// An SSA slot of the current frame.
    Slot(u32),
    /// A value resolved at translation time.
    Imm(Value),
}

/// One step of a folded address computation.
#[derive(Debug, Clone, PartialEq)]
pub enum GepStep {
    /// Constant byte offset (struct fields and constant indices, folded).
    Fixed(i64),
    /// `sext(index) * stride` bytes.
    Scaled {
        /// Dynamic element index.
        index: Src,
        /// Byte stride of one element.
        stride: u64,
    },
}

/// What a call node invokes.
#[derive(Debug, Clone, PartialEq)]
pub enum CalleeNode {
    /// A module function, by index.
    Direct(u32),
    /// A computed function pointer.
    Indirect(Src),
}

/// Intrinsics the translator recognizes and lowers to dedicated nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrinsicOp {
    MemCpy,
    MemMove,
    MemSet,
    Sqrt,
    Fabs,
    /// `llvm.minnum` / `llvm.maxnum` style float min/max.
    FMin,
    FMax,
    Ctlz,
    Cttz,
    Ctpop,
    Bswap,
    /// The `*.with.overflow` family: yields `{ result, overflowed }` and is
    /// the only arithmetic that can raise `ArithmeticOverflow`, when the
    /// guest then branches into a trap intrinsic.
    SAddOverflow,
    UAddOverflow,
    SSubOverflow,
    USubOverflow,
    SMulOverflow,
    UMulOverflow,
    /// `llvm.expect`: identity on its first operand.
    Expect,
    StackSave,
    StackRestore,
    VaStart,
    VaEnd,
    VaCopy,
    /// `llvm.trap` / `llvm.debugtrap`: a deliberate guest abort.
    Trap,
}

// =============================================================================
// Nodes
// =============================================================================

/// One executable node. `dst` fields name the SSA slot the node defines.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Copy a value into a slot (inline-assembly plumbing).
    Move { dst: u32, src: Src },
    /// Integer or floating binary operation. Integer ops wrap at the
    /// width of `ty`; division checks for zero.
    Binary {
        dst: u32,
        op: BinOp,
        ty: TypeId,
        lhs: Src,
        rhs: Src,
    },
    /// Integer comparison (scalar or lane-wise).
    ICmp {
        dst: u32,
        pred: ICmpPred,
        lhs: Src,
        rhs: Src,
    },
    /// Floating comparison (scalar or lane-wise).
    FCmp {
        dst: u32,
        pred: FCmpPred,
        lhs: Src,
        rhs: Src,
    },
    /// Conversion to `to`.
    Cast {
        dst: u32,
        op: CastOp,
        to: TypeId,
        src: Src,
    },
    Select {
        dst: u32,
        cond: Src,
        on_true: Src,
        on_false: Src,
    },
    /// Stack allocation: `count * elem_size` bytes in the current frame.
    Alloca {
        dst: u32,
        elem_size: u64,
        count: Src,
        align: u64,
    },
    Load {
        dst: u32,
        ptr: Src,
        ty: TypeId,
        align: u64,
        ordering: Option<AtomicOrdering>,
    },
    Store {
        ptr: Src,
        value: Src,
        ty: TypeId,
        align: u64,
        ordering: Option<AtomicOrdering>,
    },
    /// Folded address computation: base plus each step, staying within the
    /// base pointer's allocation.
    Gep {
        dst: u32,
        base: Src,
        steps: SmallVec<[GepStep; 4]>,
    },
    ExtractValue {
        dst: u32,
        agg: Src,
        indices: SmallVec<[u32; 2]>,
    },
    InsertValue {
        dst: u32,
        agg: Src,
        elem: Src,
        indices: SmallVec<[u32; 2]>,
    },
    ExtractElement {
        dst: u32,
        vec: Src,
        index: Src,
    },
    InsertElement {
        dst: u32,
        vec: Src,
        elem: Src,
        index: Src,
    },
    /// Lane shuffle with a translation-time mask; -1 marks an undef lane.
    ShuffleVector {
        dst: u32,
        a: Src,
        b: Src,
        mask: Vec<i64>,
    },
    Call {
        dst: Option<u32>,
        callee: CalleeNode,
        sig: TypeId,
        args: Vec<Src>,
    },
    /// Recognized intrinsic, evaluated without a guest frame. Width-
    /// sensitive operations take their width from their runtime operands.
    Intrinsic {
        dst: Option<u32>,
        op: IntrinsicOp,
        args: SmallVec<[Src; 4]>,
    },
    AtomicRmw {
        dst: u32,
        op: RmwOp,
        ptr: Src,
        value: Src,
        ty: TypeId,
        ordering: AtomicOrdering,
    },
    CmpXchg {
        dst: u32,
        ptr: Src,
        expected: Src,
        replacement: Src,
        ty: TypeId,
        success: AtomicOrdering,
        failure: AtomicOrdering,
        returns_pair: bool,
    },
    Fence { ordering: AtomicOrdering },
    /// Produces the in-flight unwind token as `{ i8*, i32 }`.
    LandingPad { dst: u32 },
    /// Variadic argument read.
    VaArg { dst: u32, ty: TypeId, list: Src },
}

// =============================================================================
// Terminators
// =============================================================================

/// Block terminators. Exactly one per block.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Ret { value: Option<Src> },
    Br { dest: u32 },
    CondBr {
        cond: Src,
        on_true: u32,
        on_false: u32,
    },
    Switch {
        cond: Src,
        default: u32,
        cases: Vec<(u64, u32)>,
    },
    /// Call with an exception edge. A guest unwind reaching this call
    /// transfers to `unwind`; normal returns continue at `normal`.
    Invoke {
        dst: Option<u32>,
        callee: CalleeNode,
        sig: TypeId,
        args: Vec<Src>,
        normal: u32,
        unwind: u32,
    },
    /// Re-raise the unwind token.
    Resume { value: Src },
    Unreachable,
}

// =============================================================================
// Blocks & Graphs
// =============================================================================

/// Phi merge at a block head: per predecessor, the incoming source.
#[derive(Debug, Clone, PartialEq)]
pub struct PhiNode {
    /// Slot the phi defines.
    pub dst: u32,
    pub ty: TypeId,
    /// `(predecessor block, incoming source)` pairs.
    pub incoming: SmallVec<[(u32, Src); 2]>,
}

/// One translated basic block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeBlock {
    /// Phi merges, resolved on entry against the actually-executed
    /// predecessor; all reads happen before any write (parallel copy).
    pub phis: Vec<PhiNode>,
    pub nodes: Vec<Node>,
    pub term: Terminator,
}

impl Default for Terminator {
    fn default() -> Self {
        Terminator::Unreachable
    }
}

/// The executable form of one function.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeGraph {
    /// Module function index.
    pub func_index: u32,
    /// Symbol name, for diagnostics.
    pub name: Arc<str>,
    /// Number of parameters (slots `0..nargs`).
    pub nargs: u32,
    /// Total slot count: arguments, one per value instruction, plus any
    /// inline-assembly scratch slots.
    pub slot_count: u32,
    /// Return type.
    pub ret_ty: TypeId,
    pub blocks: Vec<NodeBlock>,
}

impl NodeGraph {
    /// Phi sources along the CFG edge `pred → block`, in phi order.
    pub fn phi_sources(&self, block: u32, pred: u32) -> impl Iterator<Item = (&PhiNode, &Src)> {
        self.blocks[block as usize].phis.iter().filter_map(move |phi| {
            phi.incoming
                .iter()
                .find(|(p, _)| *p == pred)
                .map(|(_, src)| (phi, src))
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phi_sources_select_by_predecessor() {
        let phi = PhiNode {
            dst: 3,
            ty: TypeId::new(0),
            incoming: SmallVec::from_vec(vec![
                (0, Src::Imm(Value::I32(10))),
                (1, Src::Imm(Value::I32(20))),
            ]),
        };
        let graph = NodeGraph {
            func_index: 0,
            name: "f".into(),
            nargs: 0,
            slot_count: 4,
            ret_ty: TypeId::new(0),
            blocks: vec![
                NodeBlock::default(),
                NodeBlock::default(),
                NodeBlock {
                    phis: vec![phi],
                    nodes: Vec::new(),
                    term: Terminator::Unreachable,
                },
            ],
        };
        let from_a: Vec<_> = graph.phi_sources(2, 0).collect();
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_a[0].1, &Src::Imm(Value::I32(10)));
        let from_b: Vec<_> = graph.phi_sources(2, 1).collect();
        assert_eq!(from_b[0].1, &Src::Imm(Value::I32(20)));
    }
}
