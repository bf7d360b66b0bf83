//! The typed SSA value system and module model shared by every stage of the
//! engine: the bitcode reader produces a [`module::Module`], the translator
//! consumes it, and the memory manager and interpreter exchange
//! [`value::Value`]s typed by the interned [`types::TypeTable`].

pub mod constant;
pub mod ids;
pub mod instruction;
pub mod layout;
pub mod module;
pub mod types;
pub mod value;

pub use constant::{ConstId, Constant};
pub use ids::Id;
pub use instruction::{
    AtomicOrdering, BinOp, Callee, CastOp, FCmpPred, ICmpPred, Instruction, Operand, RmwOp,
};
pub use layout::DataLayout;
pub use module::{Block, Function, GlobalVariable, Module};
pub use types::{FloatKind, Type, TypeId, TypeTable};
pub use value::{AllocId, Pointer, Value};
