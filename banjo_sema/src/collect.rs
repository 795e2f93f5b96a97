//! Symbol collection and use-declaration resolution
//!
//! The first analysis phases: walk every declaration block, insert names
//! into the block's symbol table (diagnosing shadowing), then re-bind
//! imported symbols by following use-declaration paths through the module
//! tree.

use crate::SemanticAnalyzer;
use banjo_common::Span;
use banjo_sir::{Decl, DeclBlockId, DeclId, ModuleId, Symbol, TableId, UseTarget};

impl SemanticAnalyzer<'_> {
    pub fn collect_unit(&mut self) {
        for module in self.unit.module_ids().collect::<Vec<_>>() {
            let block = self.unit.module(module).block;
            self.collect_decl_block(block);
        }

        // Make every top-level module visible by name from every other
        // module, so use declarations can resolve their first segment.
        for module in self.unit.module_ids().collect::<Vec<_>>() {
            let name = self.unit.module(module).path.first().cloned();
            let Some(name) = name else { continue };

            for other in self.unit.module_ids().collect::<Vec<_>>() {
                if other == module {
                    continue;
                }
                let table = self.unit.arena.decl_block(self.unit.module(other).block).table;
                if !self.unit.arena.table(table).contains(&name) {
                    self.unit.arena.table_mut(table).insert(name.clone(), Symbol::Module(module));
                }
            }
        }
    }

    pub fn collect_decl_block(&mut self, block: DeclBlockId) {
        let table = self.unit.arena.decl_block(block).table;
        let decls = self.unit.arena.decl_block(block).decls.clone();

        for decl in decls {
            self.collect_decl(table, decl);
        }
    }

    fn collect_decl(&mut self, table: TableId, decl: DeclId) {
        let (name, span, symbol) = match self.unit.arena.decl(decl) {
            Decl::FuncDef(def) => (def.ident.name.clone(), def.ident.span, Symbol::Func(decl)),
            Decl::FuncDecl(def) => (def.ident.name.clone(), def.ident.span, Symbol::ExternFunc(decl)),
            Decl::NativeFuncDecl(def) => {
                (def.ident.name.clone(), def.ident.span, Symbol::NativeFunc(decl))
            }
            Decl::ConstDef(def) => (def.ident.name.clone(), def.ident.span, Symbol::Const(decl)),
            Decl::StructDef(def) => (def.ident.name.clone(), def.ident.span, Symbol::Struct(decl)),
            Decl::VarDecl(def) => (def.ident.name.clone(), def.ident.span, Symbol::Var(decl)),
            Decl::NativeVarDecl(def) => {
                (def.ident.name.clone(), def.ident.span, Symbol::NativeVar(decl))
            }
            Decl::EnumDef(def) => (def.ident.name.clone(), def.ident.span, Symbol::Enum(decl)),
            Decl::UnionDef(def) => (def.ident.name.clone(), def.ident.span, Symbol::Union(decl)),
            Decl::ProtoDef(def) => (def.ident.name.clone(), def.ident.span, Symbol::Proto(decl)),
            Decl::TypeAlias(def) => (def.ident.name.clone(), def.ident.span, Symbol::TypeAlias(decl)),
            // Use declarations and meta blocks bind nothing here; fields,
            // variants and cases are collected by their parent below.
            Decl::UseDecl(_) | Decl::MetaIf(_) | Decl::Error => return,
            Decl::StructField(_) | Decl::EnumVariant(_) | Decl::UnionCase(_) => return,
        };

        self.insert_symbol(table, &name, span, symbol);

        match self.unit.arena.decl(decl) {
            Decl::StructDef(def) => {
                let inner_table = self.unit.arena.decl_block(def.block).table;
                let inner_block = def.block;
                let fields = def.fields.clone();

                self.unit.arena.table_mut(inner_table).insert("Self", Symbol::Struct(decl));

                for field in fields {
                    if let Decl::StructField(f) = self.unit.arena.decl(field) {
                        let name = f.ident.name.clone();
                        let span = f.ident.span;
                        self.insert_symbol(inner_table, &name, span, Symbol::Field(field));
                    }
                }

                self.collect_decl_block(inner_block);
            }
            Decl::EnumDef(def) => {
                let inner_table = self.unit.arena.decl_block(def.block).table;
                let inner_block = def.block;
                let variants = def.variants.clone();

                for variant in variants {
                    if let Decl::EnumVariant(v) = self.unit.arena.decl(variant) {
                        let name = v.ident.name.clone();
                        let span = v.ident.span;
                        self.insert_symbol(inner_table, &name, span, Symbol::EnumVariant(variant));
                    }
                }

                self.collect_decl_block(inner_block);
            }
            Decl::UnionDef(def) => {
                let inner_table = self.unit.arena.decl_block(def.block).table;
                let inner_block = def.block;
                let cases = def.cases.clone();

                for case in cases {
                    if let Decl::UnionCase(c) = self.unit.arena.decl(case) {
                        let name = c.ident.name.clone();
                        let span = c.ident.span;
                        self.insert_symbol(inner_table, &name, span, Symbol::UnionCase(case));
                    }
                }

                self.collect_decl_block(inner_block);
            }
            _ => {}
        }
    }

    /// Insert a symbol, merging function overloads and diagnosing other
    /// redefinitions with a note pointing at the prior definition.
    pub fn insert_symbol(&mut self, table: TableId, name: &str, span: Span, symbol: Symbol) {
        let previous = self.unit.arena.table(table).get_local(name).cloned();

        match previous {
            None => {
                self.unit.arena.table_mut(table).insert(name, symbol);
            }
            Some(Symbol::Func(existing)) if matches!(symbol, Symbol::Func(_)) => {
                let Symbol::Func(new_decl) = symbol else { unreachable!() };
                self.unit
                    .arena
                    .table_mut(table)
                    .insert(name, Symbol::OverloadSet(vec![existing, new_decl]));
            }
            Some(Symbol::OverloadSet(mut set)) if matches!(symbol, Symbol::Func(_)) => {
                let Symbol::Func(new_decl) = symbol else { unreachable!() };
                set.push(new_decl);
                self.unit.arena.table_mut(table).insert(name, Symbol::OverloadSet(set));
            }
            Some(previous) => {
                let mut report =
                    banjo_common::Report::error(format!("redefinition of '{}'", name), span);
                if let Some(prev_span) = self.symbol_span(&previous) {
                    report = report.with_note("previously defined here", prev_span);
                }
                self.reports.add(report);
            }
        }
    }

    pub fn symbol_span(&self, symbol: &Symbol) -> Option<Span> {
        symbol
            .decl()
            .and_then(|decl| self.unit.arena.decl(decl).ident().map(|i| i.span))
    }

    // -- use resolution -----------------------------------------------------

    pub fn resolve_uses(&mut self) {
        for module in self.unit.module_ids().collect::<Vec<_>>() {
            let block = self.unit.module(module).block;
            let table = self.unit.arena.decl_block(block).table;
            let decls = self.unit.arena.decl_block(block).decls.clone();

            for decl in decls {
                if let Decl::UseDecl(use_decl) = self.unit.arena.decl(decl) {
                    let target = use_decl.target.clone();
                    let span = use_decl.span;
                    self.resolve_use_target(table, None, &target, span);
                }
            }
        }
    }

    /// Walk a use path. `context` is the module the path has descended
    /// into, or `None` at the leftmost segment.
    fn resolve_use_target(
        &mut self,
        table: TableId,
        context: Option<ModuleId>,
        target: &UseTarget,
        span: Span,
    ) {
        match target {
            UseTarget::Ident(ident) => {
                let Some(symbol) = self.lookup_use_segment(context, &ident.name) else {
                    self.reports
                        .error(format!("undefined symbol '{}'", ident.name), ident.span);
                    return;
                };
                self.insert_symbol(table, &ident.name, ident.span, symbol);
            }
            UseTarget::Dot { lhs, rhs } => {
                let Some(next) = self.descend_use_module(context, lhs) else {
                    self.reports.error("use path does not name a module", span);
                    return;
                };
                self.resolve_use_target(table, Some(next), rhs, span);
            }
            UseTarget::List(targets) => {
                for target in targets {
                    self.resolve_use_target(table, context, target, span);
                }
            }
            UseTarget::Rebind { target, local } => {
                let symbol = match &**target {
                    UseTarget::Ident(ident) => self.lookup_use_segment(context, &ident.name),
                    _ => None,
                };

                match symbol {
                    Some(symbol) => self.insert_symbol(table, &local.name, local.span, symbol),
                    None => self.reports.error("undefined symbol in use rebind", local.span),
                }
            }
        }
    }

    fn lookup_use_segment(&self, context: Option<ModuleId>, name: &str) -> Option<Symbol> {
        match context {
            Some(module) => {
                let block = self.unit.module(module).block;
                let table = self.unit.arena.decl_block(block).table;
                self.unit.arena.table(table).get_local(name).cloned()
            }
            None => {
                // The first segment names a top-level module.
                self.unit.find_module(&[name.to_string()]).map(Symbol::Module)
            }
        }
    }

    fn descend_use_module(&self, context: Option<ModuleId>, target: &UseTarget) -> Option<ModuleId> {
        match target {
            UseTarget::Ident(ident) => match self.lookup_use_segment(context, &ident.name) {
                Some(Symbol::Module(module)) => Some(module),
                _ => None,
            },
            UseTarget::Dot { lhs, rhs } => {
                let next = self.descend_use_module(context, lhs)?;
                self.descend_use_module(Some(next), rhs)
            }
            _ => None,
        }
    }
}
