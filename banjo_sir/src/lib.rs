//! Semantic intermediate representation (SIR) for the Banjo compiler
//!
//! The SIR is a named, typed tree of declarations, statements and
//! expressions produced from the raw AST by the external frontend and
//! consumed by the semantic analyzer. All nodes live in arenas owned by the
//! [`Unit`] and reference each other through typed indices, so the cyclic
//! references between modules and self-referential types need no back
//! pointers.

pub mod build;
pub mod ids;
pub mod layout;
pub mod mangle;
pub mod nodes;
pub mod symbols;
pub mod types;
pub mod unit;

pub use ids::{BlockId, DeclBlockId, DeclId, ExprId, ModuleId, StmtId, TableId};
pub use nodes::*;
pub use symbols::{Symbol, SymbolTable};
pub use types::{FuncType, Primitive, PseudoKind, Type};
pub use unit::{Arena, Module, ModulePath, Unit};
