//! The loaded-module model.
//!
//! A [`Module`] owns the full set of functions, globals, declared types and
//! the constant pool for one loaded bitcode file. It is immutable after the
//! reader returns it; the linker and translator only read.

use crate::constant::Constant;
use crate::instruction::Instruction;
use crate::layout::DataLayout;
use crate::types::{TypeId, TypeTable};
use rustc_hash::FxHashMap;
use std::sync::Arc;

// =============================================================================
// Globals
// =============================================================================

/// One module-level global variable.
#[derive(Debug, Clone)]
pub struct GlobalVariable {
    /// Symbol name. Empty until the value symbol table names it.
    pub name: Arc<str>,
    /// Type of the variable's contents (the pointee of its address).
    pub value_ty: TypeId,
    /// Initializer, as a constant-pool index. `None` for external
    /// declarations resolved at link time.
    pub init: Option<crate::constant::ConstId>,
    /// True for `const` data.
    pub is_const: bool,
    /// Requested alignment in bytes; 0 means "natural for the type".
    pub align: u32,
}

impl GlobalVariable {
    /// True if this global must be resolved against another image.
    #[inline]
    pub fn is_external(&self) -> bool {
        self.init.is_none()
    }
}

// =============================================================================
// Functions
// =============================================================================

/// A straight-line instruction sequence ending in exactly one terminator.
#[derive(Debug, Clone, Default)]
pub struct Block {
    /// Instructions in textual order; the last one is the terminator.
    pub insts: Vec<Instruction>,
}

/// One function: declaration or definition.
#[derive(Debug, Clone)]
pub struct Function {
    /// Symbol name.
    pub name: Arc<str>,
    /// Function type (see [`TypeTable::signature`]).
    pub ty: TypeId,
    /// Basic blocks forming the CFG. Empty for declarations.
    pub blocks: Vec<Block>,
    /// True for declarations (bodies provided natively or by another image).
    pub is_declaration: bool,
}

impl Function {
    /// Parameter types, via the type table.
    pub fn param_types<'t>(&self, types: &'t TypeTable) -> &'t [TypeId] {
        types
            .signature(self.ty)
            .map(|(_, params, _)| params)
            .unwrap_or(&[])
    }

    /// Return type, via the type table.
    pub fn return_type(&self, types: &TypeTable) -> Option<TypeId> {
        types.signature(self.ty).map(|(ret, _, _)| ret)
    }
}

// =============================================================================
// Module
// =============================================================================

/// Everything decoded from one bitcode file.
#[derive(Debug, Default)]
pub struct Module {
    /// Interned types, container indices preserved.
    pub types: TypeTable,
    /// The fixed data layout (see [`DataLayout`]).
    pub layout: DataLayout,
    /// Target triple string from the container, informational.
    pub triple: String,
    /// Data-layout string from the container, informational.
    pub layout_string: String,
    /// The constant pool.
    pub constants: Vec<Constant>,
    /// Global variables in container order.
    pub globals: Vec<GlobalVariable>,
    /// Functions in container order (declarations and definitions).
    pub functions: Vec<Function>,
    /// Name → function index.
    pub function_names: FxHashMap<Arc<str>, u32>,
    /// Name → global index.
    pub global_names: FxHashMap<Arc<str>, u32>,
}

impl Module {
    /// Look up a function by symbol name.
    pub fn function_by_name(&self, name: &str) -> Option<(u32, &Function)> {
        let idx = *self.function_names.get(name)?;
        Some((idx, &self.functions[idx as usize]))
    }

    /// Look up a global by symbol name.
    pub fn global_by_name(&self, name: &str) -> Option<(u32, &GlobalVariable)> {
        let idx = *self.global_names.get(name)?;
        Some((idx, &self.globals[idx as usize]))
    }

    /// Rebuild the name indexes after the reader has applied the value
    /// symbol table.
    pub fn index_names(&mut self) {
        self.function_names = self
            .functions
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.name.is_empty())
            .map(|(i, f)| (f.name.clone(), i as u32))
            .collect();
        self.global_names = self
            .globals
            .iter()
            .enumerate()
            .filter(|(_, g)| !g.name.is_empty())
            .map(|(i, g)| (g.name.clone(), i as u32))
            .collect();
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    #[test]
    fn test_name_indexing() {
        let mut module = Module::default();
        let void = module.types.intern(Type::Void);
        let fnty = module.types.intern(Type::Function {
            ret: void,
            params: Vec::new(),
            vararg: false,
        });
        module.functions.push(Function {
            name: "main".into(),
            ty: fnty,
            blocks: Vec::new(),
            is_declaration: false,
        });
        module.functions.push(Function {
            name: "".into(),
            ty: fnty,
            blocks: Vec::new(),
            is_declaration: true,
        });
        module.index_names();

        let (idx, f) = module.function_by_name("main").unwrap();
        assert_eq!(idx, 0);
        assert!(!f.is_declaration);
        // Unnamed functions are not indexed.
        assert_eq!(module.function_names.len(), 1);
    }

    #[test]
    fn test_function_signature_helpers() {
        let mut module = Module::default();
        let i32t = module.types.int(32);
        let i8t = module.types.int(8);
        let argv = module.types.pointer_to(i8t);
        let fnty = module.types.intern(Type::Function {
            ret: i32t,
            params: vec![i32t, argv],
            vararg: false,
        });
        let f = Function {
            name: "main".into(),
            ty: fnty,
            blocks: Vec::new(),
            is_declaration: false,
        };
        assert_eq!(f.param_types(&module.types), &[i32t, argv]);
        assert_eq!(f.return_type(&module.types), Some(i32t));
    }

    #[test]
    fn test_external_global() {
        let g = GlobalVariable {
            name: "errno".into(),
            value_ty: TypeId::new(0),
            init: None,
            is_const: false,
            align: 4,
        };
        assert!(g.is_external());
    }
}
