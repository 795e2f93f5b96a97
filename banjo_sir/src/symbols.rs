//! Symbols and symbol tables
//!
//! A symbol table maps names to resolved symbols and chains to its parent
//! table; lookup walks the chain outwards. Tables are stored in the unit
//! arena and referenced by `TableId` so scopes can be shared and nested
//! without back pointers.

use crate::{DeclId, ModuleId, StmtId};
use hashbrown::HashMap;

/// A resolved reference to any declarable entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    Module(ModuleId),
    Func(DeclId),
    NativeFunc(DeclId),
    ExternFunc(DeclId),
    Const(DeclId),
    Struct(DeclId),
    Field(DeclId),
    Var(DeclId),
    NativeVar(DeclId),
    Enum(DeclId),
    EnumVariant(DeclId),
    Union(DeclId),
    UnionCase(DeclId),
    Proto(DeclId),
    TypeAlias(DeclId),
    GenericParam { owner: DeclId, index: u32 },
    /// A local introduced by a `var` statement
    Local(StmtId),
    /// A function parameter
    Param { func: DeclId, index: u32 },
    /// Multiple function candidates; resolved post-application
    OverloadSet(Vec<DeclId>),
}

impl Symbol {
    /// The declaration this symbol points at, if it is decl-backed.
    pub fn decl(&self) -> Option<DeclId> {
        match self {
            Symbol::Func(id)
            | Symbol::NativeFunc(id)
            | Symbol::ExternFunc(id)
            | Symbol::Const(id)
            | Symbol::Struct(id)
            | Symbol::Field(id)
            | Symbol::Var(id)
            | Symbol::NativeVar(id)
            | Symbol::Enum(id)
            | Symbol::EnumVariant(id)
            | Symbol::Union(id)
            | Symbol::UnionCase(id)
            | Symbol::Proto(id)
            | Symbol::TypeAlias(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Symbol::Func(_) | Symbol::NativeFunc(_) | Symbol::ExternFunc(_) | Symbol::OverloadSet(_)
        )
    }
}

/// A scope's name-to-symbol mapping, chained by parent
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    pub parent: Option<crate::TableId>,
    symbols: HashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new(parent: Option<crate::TableId>) -> Self {
        Self { parent, symbols: HashMap::new() }
    }

    /// Insert a name, returning the previous symbol if the name was taken.
    pub fn insert(&mut self, name: impl Into<String>, symbol: Symbol) -> Option<Symbol> {
        self.symbols.insert(name.into(), symbol)
    }

    /// Look up a name in this table only; chain walking lives on the arena.
    pub fn get_local(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.symbols.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_reports_previous() {
        let mut table = SymbolTable::new(None);
        assert!(table.insert("x", Symbol::Local(StmtId(0))).is_none());
        let previous = table.insert("x", Symbol::Local(StmtId(1)));
        assert_eq!(previous, Some(Symbol::Local(StmtId(0))));
    }
}
