//! Decoded IR instructions.
//!
//! The bitcode reader lowers each function-body record into one of these
//! variants with operand references already resolved against the module and
//! function value lists. The translator is the only consumer.
//!
//! Wire-code decoders (`from_code`) follow the container's numbering; an
//! out-of-range code yields `None` and surfaces as a malformed-record error
//! in the reader.

use crate::constant::ConstId;
use crate::types::TypeId;
use smallvec::SmallVec;
use std::sync::Arc;

// =============================================================================
// Operands
// =============================================================================

/// A reference to a value an instruction consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// Function-local value: argument `i` for `i < nargs`, otherwise the
    /// result of the `(i - nargs)`-th value-producing instruction.
    Local(u32),
    /// Entry in the module constant pool.
    Const(ConstId),
    /// Address of the `i`-th module global variable.
    Global(u32),
    /// Address of the `i`-th module function.
    Func(u32),
}

/// What a call-like instruction invokes.
#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    /// A module function, by index.
    Direct(u32),
    /// A computed function pointer.
    Indirect(Operand),
    /// An embedded inline-assembly fragment.
    InlineAsm {
        /// The assembly template text.
        asm: Arc<str>,
        /// The operand constraint string.
        constraints: Arc<str>,
        /// True if the fragment was marked side-effecting.
        side_effects: bool,
    },
}

// =============================================================================
// Opcode Enums
// =============================================================================

/// Integer and floating binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
}

impl BinOp {
    /// Decode the container's binop code. Floating variants share codes
    /// with their integer counterparts; the operand type disambiguates.
    pub fn from_code(code: u64) -> Option<BinOp> {
        Some(match code {
            0 => BinOp::Add,
            1 => BinOp::Sub,
            2 => BinOp::Mul,
            3 => BinOp::UDiv,
            4 => BinOp::SDiv,
            5 => BinOp::URem,
            6 => BinOp::SRem,
            7 => BinOp::Shl,
            8 => BinOp::LShr,
            9 => BinOp::AShr,
            10 => BinOp::And,
            11 => BinOp::Or,
            12 => BinOp::Xor,
            _ => return None,
        })
    }

    /// Mnemonic for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::UDiv => "udiv",
            BinOp::SDiv => "sdiv",
            BinOp::URem => "urem",
            BinOp::SRem => "srem",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
            BinOp::AShr => "ashr",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
        }
    }
}

/// Conversion operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpToUi,
    FpToSi,
    UiToFp,
    SiToFp,
    FpTrunc,
    FpExt,
    PtrToInt,
    IntToPtr,
    BitCast,
    AddrSpaceCast,
}

impl CastOp {
    /// Decode the container's cast code.
    pub fn from_code(code: u64) -> Option<CastOp> {
        Some(match code {
            0 => CastOp::Trunc,
            1 => CastOp::ZExt,
            2 => CastOp::SExt,
            3 => CastOp::FpToUi,
            4 => CastOp::FpToSi,
            5 => CastOp::UiToFp,
            6 => CastOp::SiToFp,
            7 => CastOp::FpTrunc,
            8 => CastOp::FpExt,
            9 => CastOp::PtrToInt,
            10 => CastOp::IntToPtr,
            11 => CastOp::BitCast,
            12 => CastOp::AddrSpaceCast,
            _ => return None,
        })
    }

    /// Mnemonic for diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            CastOp::Trunc => "trunc",
            CastOp::ZExt => "zext",
            CastOp::SExt => "sext",
            CastOp::FpToUi => "fptoui",
            CastOp::FpToSi => "fptosi",
            CastOp::UiToFp => "uitofp",
            CastOp::SiToFp => "sitofp",
            CastOp::FpTrunc => "fptrunc",
            CastOp::FpExt => "fpext",
            CastOp::PtrToInt => "ptrtoint",
            CastOp::IntToPtr => "inttoptr",
            CastOp::BitCast => "bitcast",
            CastOp::AddrSpaceCast => "addrspacecast",
        }
    }
}

/// Integer comparison predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ICmpPred {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

impl ICmpPred {
    /// Decode the container's predicate code (integer predicates start
    /// at 32).
    pub fn from_code(code: u64) -> Option<ICmpPred> {
        Some(match code {
            32 => ICmpPred::Eq,
            33 => ICmpPred::Ne,
            34 => ICmpPred::Ugt,
            35 => ICmpPred::Uge,
            36 => ICmpPred::Ult,
            37 => ICmpPred::Ule,
            38 => ICmpPred::Sgt,
            39 => ICmpPred::Sge,
            40 => ICmpPred::Slt,
            41 => ICmpPred::Sle,
            _ => return None,
        })
    }
}

/// Floating comparison predicates (ordered and unordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FCmpPred {
    False,
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Uno,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    True,
}

impl FCmpPred {
    /// Decode the container's predicate code (float predicates are 0–15).
    pub fn from_code(code: u64) -> Option<FCmpPred> {
        Some(match code {
            0 => FCmpPred::False,
            1 => FCmpPred::Oeq,
            2 => FCmpPred::Ogt,
            3 => FCmpPred::Oge,
            4 => FCmpPred::Olt,
            5 => FCmpPred::Ole,
            6 => FCmpPred::One,
            7 => FCmpPred::Ord,
            8 => FCmpPred::Uno,
            9 => FCmpPred::Ueq,
            10 => FCmpPred::Ugt,
            11 => FCmpPred::Uge,
            12 => FCmpPred::Ult,
            13 => FCmpPred::Ule,
            14 => FCmpPred::Une,
            15 => FCmpPred::True,
            _ => return None,
        })
    }
}

/// Atomic read-modify-write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmwOp {
    Xchg,
    Add,
    Sub,
    And,
    Nand,
    Or,
    Xor,
    Max,
    Min,
    UMax,
    UMin,
}

impl RmwOp {
    /// Decode the container's atomicrmw code.
    pub fn from_code(code: u64) -> Option<RmwOp> {
        Some(match code {
            0 => RmwOp::Xchg,
            1 => RmwOp::Add,
            2 => RmwOp::Sub,
            3 => RmwOp::And,
            4 => RmwOp::Nand,
            5 => RmwOp::Or,
            6 => RmwOp::Xor,
            7 => RmwOp::Max,
            8 => RmwOp::Min,
            9 => RmwOp::UMax,
            10 => RmwOp::UMin,
            _ => return None,
        })
    }
}

/// Atomic memory orderings, weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AtomicOrdering {
    Unordered,
    Relaxed,
    Acquire,
    Release,
    AcqRel,
    SeqCst,
}

impl AtomicOrdering {
    /// Decode the container's ordering code. Code 0 means "not atomic"
    /// and yields `None`.
    pub fn from_code(code: u64) -> Option<AtomicOrdering> {
        Some(match code {
            1 => AtomicOrdering::Unordered,
            2 => AtomicOrdering::Relaxed,
            3 => AtomicOrdering::Acquire,
            4 => AtomicOrdering::Release,
            5 => AtomicOrdering::AcqRel,
            6 => AtomicOrdering::SeqCst,
            _ => return None,
        })
    }
}

// =============================================================================
// Instruction
// =============================================================================

/// One decoded instruction. Value-producing variants carry the type of the
/// value they define.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Integer or floating binary operation.
    Binary {
        op: BinOp,
        ty: TypeId,
        lhs: Operand,
        rhs: Operand,
    },
    /// Conversion between types.
    Cast {
        op: CastOp,
        to: TypeId,
        value: Operand,
    },
    /// Integer comparison (scalar or lane-wise).
    ICmp {
        pred: ICmpPred,
        lhs: Operand,
        rhs: Operand,
    },
    /// Floating comparison (scalar or lane-wise).
    FCmp {
        pred: FCmpPred,
        lhs: Operand,
        rhs: Operand,
    },
    /// Ternary select.
    Select {
        ty: TypeId,
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
    },
    /// Stack allocation of `count` elements of `elem_ty`.
    Alloca {
        elem_ty: TypeId,
        count: Operand,
        align: u32,
    },
    /// Memory read producing `ty`.
    Load {
        ty: TypeId,
        ptr: Operand,
        align: u32,
        ordering: Option<AtomicOrdering>,
    },
    /// Memory write of a value of type `ty`.
    Store {
        ptr: Operand,
        value: Operand,
        ty: TypeId,
        align: u32,
        ordering: Option<AtomicOrdering>,
    },
    /// Typed address computation over `src_ty`.
    Gep {
        src_ty: TypeId,
        ptr: Operand,
        indices: SmallVec<[Operand; 4]>,
        inbounds: bool,
    },
    /// SSA merge: per-predecessor incoming values.
    Phi {
        ty: TypeId,
        /// `(predecessor block index, incoming operand)` pairs.
        incoming: SmallVec<[(u32, Operand); 2]>,
    },
    /// Direct, indirect or inline-assembly call.
    Call {
        callee: Callee,
        /// Function type of the callee.
        sig: TypeId,
        args: SmallVec<[Operand; 6]>,
    },
    /// Field extraction from an aggregate value.
    ExtractValue {
        agg: Operand,
        indices: SmallVec<[u32; 2]>,
    },
    /// Field insertion into an aggregate value.
    InsertValue {
        agg: Operand,
        elem: Operand,
        indices: SmallVec<[u32; 2]>,
    },
    /// Vector lane read.
    ExtractElement { vec: Operand, index: Operand },
    /// Vector lane write.
    InsertElement {
        vec: Operand,
        elem: Operand,
        index: Operand,
    },
    /// Vector shuffle with a constant mask.
    ShuffleVector {
        a: Operand,
        b: Operand,
        mask: Operand,
    },
    /// Atomic read-modify-write on a value of type `ty`.
    AtomicRmw {
        op: RmwOp,
        ptr: Operand,
        value: Operand,
        ty: TypeId,
        ordering: AtomicOrdering,
    },
    /// Atomic compare-exchange on a value of type `ty`. `returns_pair`
    /// distinguishes the encoding that yields `{ old, success }` from the
    /// legacy scalar-result form.
    CmpXchg {
        ptr: Operand,
        expected: Operand,
        replacement: Operand,
        ty: TypeId,
        success_ordering: AtomicOrdering,
        failure_ordering: AtomicOrdering,
        returns_pair: bool,
    },
    /// Memory fence.
    Fence { ordering: AtomicOrdering },
    /// Landing pad of an exception edge; produces the in-flight unwind
    /// token as `{ i8*, i32 }`.
    LandingPad { ty: TypeId },
    /// Re-raise the unwind token produced by a landing pad.
    Resume { value: Operand },
    /// Variadic-argument read (recognized, evaluated as a trap-free stub).
    VaArg { ty: TypeId, list: Operand },

    // -- Terminators ---------------------------------------------------------
    /// Return, optionally with a value.
    Ret { value: Option<Operand> },
    /// Unconditional branch.
    Br { dest: u32 },
    /// Two-way conditional branch.
    CondBr {
        cond: Operand,
        on_true: u32,
        on_false: u32,
    },
    /// Multi-way integer switch.
    Switch {
        cond: Operand,
        default: u32,
        /// `(case value, destination block)` pairs.
        cases: Vec<(u64, u32)>,
    },
    /// Call with an exception edge; a terminator that also defines a value.
    Invoke {
        callee: Callee,
        sig: TypeId,
        args: SmallVec<[Operand; 6]>,
        normal: u32,
        unwind: u32,
    },
    /// Trap if executed.
    Unreachable,
}

impl Instruction {
    /// True for block terminators.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Ret { .. }
                | Instruction::Br { .. }
                | Instruction::CondBr { .. }
                | Instruction::Switch { .. }
                | Instruction::Invoke { .. }
                | Instruction::Unreachable
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
