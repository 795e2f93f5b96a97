//! Semantic analysis for the Banjo compiler
//!
//! Turns a raw SIR unit into a fully-typed one: every expression gets a
//! concrete type, every name resolves to a symbol, every generic call site
//! is bound to a monomorphic specialization, and every violation is
//! reported. Downstream stages must not run if any report is fatal.

pub mod calls;
pub mod collect;
pub mod consteval;
pub mod decls;
pub mod escape;
pub mod exprs;
pub mod finalize;
pub mod generics;
pub mod meta;
pub mod mutability;
pub mod stdlib;
pub mod stmts;

use banjo_common::Reports;
use banjo_sir::{DeclId, TableId, Type, Unit};
use hashbrown::HashMap;

/// Analysis outcome for a single statement or expression. The error case
/// carries no payload: the report has already been filed, the marker only
/// lets callers suppress cascading diagnostics.
pub type AResult<T> = Result<T, ()>;

/// Maximum recursion depth for generic specialization.
pub const MAX_SPECIALIZATION_DEPTH: u32 = 64;

/// Handles to the built-in `std` module declarations.
#[derive(Debug, Clone)]
pub struct StdRefs {
    pub module: banjo_sir::ModuleId,
    pub table: TableId,
    pub optional: DeclId,
    pub result: DeclId,
    pub string: DeclId,
    pub string_slice: DeclId,
    pub array: DeclId,
    pub map: DeclId,
}

/// The lexical context a statement or expression is analyzed in.
#[derive(Debug, Clone)]
pub struct Scope {
    pub table: TableId,
    pub func: DeclId,
    pub struct_ctx: Option<DeclId>,
    pub loop_depth: u32,
}

impl Scope {
    pub fn with_table(&self, table: TableId) -> Scope {
        Scope { table, ..self.clone() }
    }

    pub fn in_loop(&self, table: TableId) -> Scope {
        Scope {
            table,
            loop_depth: self.loop_depth + 1,
            ..self.clone()
        }
    }
}

pub struct SemanticAnalyzer<'a> {
    pub unit: &'a mut Unit,
    pub reports: &'a mut Reports,
    pub std_refs: StdRefs,
    /// Cache of specializations keyed by (definition, argument tuple)
    pub specializations: HashMap<(DeclId, Vec<Type>), DeclId>,
    pub spec_depth: u32,
    /// Counter for compiler-introduced hidden locals
    pub next_hidden: u32,
    /// Case-view structs synthesized for union cases
    pub union_case_views: HashMap<DeclId, DeclId>,
}

impl<'a> SemanticAnalyzer<'a> {
    pub fn new(unit: &'a mut Unit, reports: &'a mut Reports) -> Self {
        let std_refs = stdlib::install(unit);
        Self {
            unit,
            reports,
            std_refs,
            specializations: HashMap::new(),
            spec_depth: 0,
            next_hidden: 0,
            union_case_views: HashMap::new(),
        }
    }

    /// Run all analysis phases over the unit.
    pub fn analyze(&mut self) {
        log::debug!("sema: collecting symbols");
        self.collect_unit();

        log::debug!("sema: resolving use declarations");
        self.resolve_uses();

        log::debug!("sema: expanding meta declarations");
        self.expand_meta_decls();

        log::debug!("sema: analyzing declaration headers");
        self.analyze_decl_headers();

        log::debug!("sema: analyzing declaration bodies");
        self.analyze_decl_bodies();

        log::debug!("sema: finalizing constants");
        self.finalize_consts();
    }

    pub fn hidden_name(&mut self, prefix: &str) -> String {
        let name = format!("__{}{}", prefix, self.next_hidden);
        self.next_hidden += 1;
        name
    }
}

/// Convenience entry point mirroring the driver's usage.
pub fn analyze(unit: &mut Unit, reports: &mut Reports) {
    SemanticAnalyzer::new(unit, reports).analyze();
}
