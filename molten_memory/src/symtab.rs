//! The global symbol table.
//!
//! One table per loaded image, shared read-mostly across every guest
//! thread. Mutation happens only during load/link; after that, lookups are
//! concurrent and lock-free from the callers' perspective.

use dashmap::DashMap;
use molten_ir::Pointer;
use std::sync::Arc;

/// What a symbol name resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// A data symbol: the base pointer of its allocation.
    Data(Pointer),
    /// A guest function, by module function index.
    Function(u32),
}

/// Name → symbol mapping for one linked image.
#[derive(Debug, Default)]
pub struct GlobalSymbolTable {
    map: DashMap<Arc<str>, Symbol>,
}

impl GlobalSymbolTable {
    pub fn new() -> Self {
        GlobalSymbolTable::default()
    }

    /// Define `name`. The first definition wins, matching link-once
    /// semantics for duplicate symbols across aliases.
    pub fn define(&self, name: Arc<str>, symbol: Symbol) {
        self.map.entry(name).or_insert(symbol);
    }

    /// Look up a symbol by name.
    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.map.get(name).map(|entry| *entry.value())
    }

    /// Number of defined symbols.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True if no symbols are defined.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use molten_ir::AllocId;

    #[test]
    fn test_define_and_lookup() {
        let table = GlobalSymbolTable::new();
        let ptr = Pointer::base(AllocId::from_raw(3));
        table.define("counter".into(), Symbol::Data(ptr));
        table.define("main".into(), Symbol::Function(0));
        assert_eq!(table.lookup("counter"), Some(Symbol::Data(ptr)));
        assert_eq!(table.lookup("main"), Some(Symbol::Function(0)));
        assert_eq!(table.lookup("missing"), None);
    }

    #[test]
    fn test_first_definition_wins() {
        let table = GlobalSymbolTable::new();
        table.define("dup".into(), Symbol::Function(1));
        table.define("dup".into(), Symbol::Function(2));
        assert_eq!(table.lookup("dup"), Some(Symbol::Function(1)));
    }
}
