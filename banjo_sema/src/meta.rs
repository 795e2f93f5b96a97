//! Meta expansion and meta intrinsics
//!
//! `meta if` and `meta for` run at compile time: their conditions and
//! ranges are const-evaluated and the statements or declarations of the
//! selected branches replace the meta node. Meta expressions
//! (`meta(T).size` and friends) evaluate to constants through a closed
//! intrinsic set: size, count, fields, variants, is_struct, is_enum,
//! has_method.

use crate::consteval::ConstValue;
use crate::{AResult, Scope, SemanticAnalyzer};
use banjo_sir::{layout, Decl, ExprId, ExprKind, MetaForStmt, MetaIfStmt, Stmt, StmtId, TableId};

impl SemanticAnalyzer<'_> {
    // -- declaration level --------------------------------------------------

    pub fn expand_meta_decls(&mut self) {
        for module in self.unit.module_ids().collect::<Vec<_>>() {
            let block = self.unit.module(module).block;
            let table = self.unit.arena.decl_block(block).table;
            let decls = self.unit.arena.decl_block(block).decls.clone();

            for decl in decls {
                if let Decl::MetaIf(meta) = self.unit.arena.decl(decl).clone() {
                    let Ok(condition) = self.const_eval(table, meta.condition) else {
                        continue;
                    };

                    let chosen = if condition.is_truthy() {
                        Some(meta.then_block)
                    } else {
                        meta.else_block
                    };

                    if let Decl::MetaIf(meta) = self.unit.arena.decl_mut(decl) {
                        meta.expanded = chosen;
                    }

                    // Bind the selected declarations in the enclosing scope.
                    if let Some(chosen) = chosen {
                        let inner = self.unit.arena.decl_block(chosen).decls.clone();
                        for inner_decl in inner {
                            self.collect_expanded_decl(table, inner_decl);
                        }
                    }
                }
            }
        }
    }

    fn collect_expanded_decl(&mut self, table: TableId, decl: banjo_sir::DeclId) {
        if let Some(ident) = self.unit.arena.decl(decl).ident() {
            let name = ident.name.clone();
            let span = ident.span;
            let symbol = match self.unit.arena.decl(decl) {
                Decl::FuncDef(_) => banjo_sir::Symbol::Func(decl),
                Decl::FuncDecl(_) => banjo_sir::Symbol::ExternFunc(decl),
                Decl::NativeFuncDecl(_) => banjo_sir::Symbol::NativeFunc(decl),
                Decl::ConstDef(_) => banjo_sir::Symbol::Const(decl),
                Decl::StructDef(_) => banjo_sir::Symbol::Struct(decl),
                Decl::VarDecl(_) => banjo_sir::Symbol::Var(decl),
                Decl::EnumDef(_) => banjo_sir::Symbol::Enum(decl),
                Decl::UnionDef(_) => banjo_sir::Symbol::Union(decl),
                Decl::TypeAlias(_) => banjo_sir::Symbol::TypeAlias(decl),
                _ => return,
            };
            self.insert_symbol(table, &name, span, symbol);
        }
    }

    // -- statement level ----------------------------------------------------

    pub(crate) fn expand_meta_if_stmt(
        &mut self,
        stmt: StmtId,
        meta: MetaIfStmt,
        scope: &Scope,
    ) -> AResult<()> {
        let condition = self.const_eval(scope.table, meta.condition)?;

        let chosen = if condition.is_truthy() {
            Some(meta.then_block)
        } else {
            meta.else_block
        };

        let stmts = match chosen {
            Some(block) => {
                let inner = self.unit.arena.alloc_stmt(Stmt::Block(block));
                vec![inner]
            }
            None => Vec::new(),
        };

        *self.unit.arena.stmt_mut(stmt) =
            Stmt::ExpandedMeta(banjo_sir::ExpandedMetaStmt { stmts: stmts.clone() });

        for inner in stmts {
            self.analyze_stmt(inner, scope)?;
        }
        Ok(())
    }

    pub(crate) fn expand_meta_for_stmt(
        &mut self,
        stmt: StmtId,
        meta: MetaForStmt,
        scope: &Scope,
    ) -> AResult<()> {
        let span = meta.span;

        // The range must be a constant: either `a..b` or an array literal.
        let values: Vec<ConstValue> = match self.unit.arena.expr(meta.range).kind.clone() {
            ExprKind::Range { start, end } => {
                let start = self.const_eval(scope.table, start)?;
                let end = self.const_eval(scope.table, end)?;
                let (Some(start), Some(end)) = (start.as_int(), end.as_int()) else {
                    self.reports.error("meta for range must be integral", span);
                    return Err(());
                };
                (start..end).map(ConstValue::Int).collect()
            }
            _ => {
                let value = self.const_eval(scope.table, meta.range)?;
                match value {
                    ConstValue::Array(values) | ConstValue::Tuple(values) => values,
                    _ => {
                        self.reports
                            .error("meta for requires a constant range or array", span);
                        return Err(());
                    }
                }
            }
        };

        // Clone the body once per iteration with the loop variable bound to
        // the iteration's constant.
        let mut expanded = Vec::with_capacity(values.len());

        for value in values {
            let body = self.clone_block_identity(meta.block, Some(scope.table));
            let table = self.unit.arena.block(body).table;
            self.bind_meta_const(table, &meta.ident, value, span);
            expanded.push(self.unit.arena.alloc_stmt(Stmt::Block(body)));
        }

        *self.unit.arena.stmt_mut(stmt) =
            Stmt::ExpandedMeta(banjo_sir::ExpandedMetaStmt { stmts: expanded.clone() });

        for inner in expanded {
            self.analyze_stmt(inner, scope)?;
        }
        Ok(())
    }

    fn bind_meta_const(
        &mut self,
        table: TableId,
        ident: &banjo_sir::Ident,
        value: ConstValue,
        span: banjo_common::Span,
    ) {
        let (kind, ty) = match value {
            ConstValue::Int(v) => (
                ExprKind::IntLiteral(v),
                banjo_sir::Type::Pseudo(banjo_sir::PseudoKind::IntLiteral),
            ),
            ConstValue::Bool(v) => (
                ExprKind::BoolLiteral(v),
                banjo_sir::Type::Primitive(banjo_sir::Primitive::Bool),
            ),
            ConstValue::Fp(v) => (
                ExprKind::FpLiteral(v),
                banjo_sir::Type::Pseudo(banjo_sir::PseudoKind::FpLiteral),
            ),
            ConstValue::Str(v) => (
                ExprKind::StringLiteral(v),
                banjo_sir::Type::Pseudo(banjo_sir::PseudoKind::StringLiteral),
            ),
            _ => return,
        };

        let value_expr = self
            .unit
            .arena
            .alloc_expr(banjo_sir::Expr::new(kind, ty, span));

        let const_decl = self.unit.arena.alloc_decl(Decl::ConstDef(banjo_sir::ConstDef {
            ident: ident.clone(),
            type_expr: None,
            ty: banjo_sir::Type::Error,
            value: value_expr,
            span,
        }));

        self.unit
            .arena
            .table_mut(table)
            .insert(ident.name.clone(), banjo_sir::Symbol::Const(const_decl));
    }

    fn clone_block_identity(
        &mut self,
        block: banjo_sir::BlockId,
        parent: Option<TableId>,
    ) -> banjo_sir::BlockId {
        let old = self.unit.arena.block(block).clone();
        let table = self.unit.arena.alloc_table(banjo_sir::SymbolTable::new(parent));

        let stmts = old
            .stmts
            .iter()
            .map(|stmt| self.clone_stmt_into(*stmt, table))
            .collect();

        self.unit.arena.alloc_block(banjo_sir::Block {
            stmts,
            table,
            span: old.span,
        })
    }

    // -- meta intrinsics ----------------------------------------------------

    /// Evaluate a meta expression: `meta(T).field` or
    /// `meta(T).has_method("name")`.
    pub fn const_eval_meta(&mut self, table: TableId, expr: ExprId) -> AResult<ConstValue> {
        let kind = self.unit.arena.expr(expr).kind.clone();
        let span = self.unit.arena.expr(expr).span;

        match kind {
            ExprKind::MetaField { base, field } => {
                let target_ty = self.meta_target_type(table, base)?;
                self.meta_intrinsic(&target_ty, &field.name, &[], span)
            }
            ExprKind::MetaCall { callee, args } => {
                let ExprKind::MetaField { base, field } = self.unit.arena.expr(callee).kind.clone()
                else {
                    self.reports.error("malformed meta call", span);
                    return Err(());
                };

                let target_ty = self.meta_target_type(table, base)?;

                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.const_eval(table, arg)?);
                }

                self.meta_intrinsic(&target_ty, &field.name, &arg_values, span)
            }
            ExprKind::MetaAccess { .. } => {
                self.reports
                    .error("meta access must be followed by a field or call", span);
                Err(())
            }
            _ => Err(()),
        }
    }

    fn meta_target_type(&mut self, table: TableId, base: ExprId) -> AResult<banjo_sir::Type> {
        let ExprKind::MetaAccess { target } = self.unit.arena.expr(base).kind.clone() else {
            let span = self.unit.arena.expr(base).span;
            self.reports.error("expected a meta access", span);
            return Err(());
        };

        self.resolve_type_expr(target, table, None)
    }

    fn meta_intrinsic(
        &mut self,
        ty: &banjo_sir::Type,
        name: &str,
        args: &[ConstValue],
        span: banjo_common::Span,
    ) -> AResult<ConstValue> {
        match name {
            "size" => Ok(ConstValue::Int(layout::size_of(self.unit, ty) as i128)),
            "count" | "fields" => match ty {
                banjo_sir::Type::Struct(decl) => match self.unit.arena.decl(*decl) {
                    Decl::StructDef(def) => Ok(ConstValue::Int(def.fields.len() as i128)),
                    _ => Err(()),
                },
                banjo_sir::Type::Tuple(fields) => Ok(ConstValue::Int(fields.len() as i128)),
                _ => {
                    self.reports.error("type has no countable fields", span);
                    Err(())
                }
            },
            "variants" => match ty {
                banjo_sir::Type::Enum(decl) => match self.unit.arena.decl(*decl) {
                    Decl::EnumDef(def) => Ok(ConstValue::Int(def.variants.len() as i128)),
                    _ => Err(()),
                },
                banjo_sir::Type::Union(decl) => match self.unit.arena.decl(*decl) {
                    Decl::UnionDef(def) => Ok(ConstValue::Int(def.cases.len() as i128)),
                    _ => Err(()),
                },
                _ => {
                    self.reports.error("type has no variants", span);
                    Err(())
                }
            },
            "is_struct" => Ok(ConstValue::Bool(matches!(ty, banjo_sir::Type::Struct(_)))),
            "is_enum" => Ok(ConstValue::Bool(matches!(ty, banjo_sir::Type::Enum(_)))),
            "has_method" => {
                let Some(ConstValue::Str(method)) = args.first() else {
                    self.reports
                        .error("has_method expects a string argument", span);
                    return Err(());
                };

                let has = match ty {
                    banjo_sir::Type::Struct(decl) => self.struct_member(*decl, method).is_some(),
                    _ => false,
                };
                Ok(ConstValue::Bool(has))
            }
            _ => {
                self.reports
                    .error(format!("unknown meta intrinsic '{}'", name), span);
                Err(())
            }
        }
    }
}
