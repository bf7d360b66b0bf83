//! The module constant pool.
//!
//! Constants are load-time data: they reference globals and functions by
//! index, not by address, because addresses do not exist until the linker
//! has allocated the module image. The evaluator that turns a [`Constant`]
//! into a runtime value lives with the translator, which runs post-link.

use crate::ids::Id;
use crate::instruction::{BinOp, CastOp};
use crate::types::TypeId;
use std::sync::Arc;

/// Index into [`crate::module::Module::constants`].
pub type ConstId = Id<Constant>;

/// One entry of the constant pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Zero/null of any type (also `zeroinitializer`).
    Null(TypeId),
    /// Undefined value; materialized as zero of its type.
    Undef(TypeId),
    /// Integer literal, stored as a raw 64-bit pattern.
    Int { ty: TypeId, value: u64 },
    /// Floating literal, stored as raw bits of its width.
    Float { ty: TypeId, bits: u64 },
    /// Struct/array/vector literal.
    Aggregate { ty: TypeId, elems: Vec<ConstId> },
    /// Byte-array literal (string and data records).
    Data { ty: TypeId, bytes: Vec<u8> },
    /// Address of the `i`-th module global variable.
    GlobalAddr(u32),
    /// Address of the `i`-th module function.
    FuncAddr(u32),
    /// Constant address computation.
    Gep {
        src_ty: TypeId,
        base: ConstId,
        indices: Vec<ConstId>,
        inbounds: bool,
    },
    /// Constant conversion.
    Cast {
        op: CastOp,
        to: TypeId,
        value: ConstId,
    },
    /// Constant integer binary operation.
    Binary {
        op: BinOp,
        ty: TypeId,
        lhs: ConstId,
        rhs: ConstId,
    },
    /// Inline-assembly fragment used as a callee.
    InlineAsm {
        asm: Arc<str>,
        constraints: Arc<str>,
        side_effects: bool,
    },
}

impl Constant {
    /// The type this constant evaluates to, where it is recorded directly.
    /// `GlobalAddr`/`FuncAddr` types live on the referenced module entity.
    pub fn recorded_type(&self) -> Option<TypeId> {
        match self {
            Constant::Null(ty)
            | Constant::Undef(ty)
            | Constant::Int { ty, .. }
            | Constant::Float { ty, .. }
            | Constant::Aggregate { ty, .. }
            | Constant::Data { ty, .. }
            | Constant::Cast { to: ty, .. }
            | Constant::Binary { ty, .. } => Some(*ty),
            Constant::GlobalAddr(_)
            | Constant::FuncAddr(_)
            | Constant::Gep { .. }
            | Constant::InlineAsm { .. } => None,
        }
    }
}
