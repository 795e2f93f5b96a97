//! Statement analysis
//!
//! The statement analyzer tracks a scope (current function, surrounding
//! struct, loop depth, symbol table) and visits each statement, rewriting
//! sugared forms in place: compound assignments become plain assignments,
//! for statements become loops, try statements become discriminant
//! dispatches through hidden locals.

use crate::{AResult, Scope, SemanticAnalyzer};
use banjo_common::Span;
use banjo_sir::{
    Block, BlockId, Decl, Expr, ExprId, ExprKind, Ident, LoopStmt, Stmt, StmtId, Symbol, Type,
    UnaryOp, VarStmt,
};

impl SemanticAnalyzer<'_> {
    /// Analyze every statement of a block in a child scope. Analysis of
    /// the block aborts on the first fatal error.
    pub fn analyze_block(&mut self, block: BlockId, scope: &Scope) -> AResult<()> {
        let table = self.unit.arena.block(block).table;
        let scope = scope.with_table(table);
        let stmts = self.unit.arena.block(block).stmts.clone();

        for stmt in stmts {
            self.analyze_stmt(stmt, &scope)?;
        }
        Ok(())
    }

    fn analyze_loop_block(&mut self, block: BlockId, scope: &Scope) -> AResult<()> {
        let table = self.unit.arena.block(block).table;
        let scope = scope.in_loop(table);
        let stmts = self.unit.arena.block(block).stmts.clone();

        for stmt in stmts {
            self.analyze_stmt(stmt, &scope)?;
        }
        Ok(())
    }

    pub fn analyze_stmt(&mut self, stmt: StmtId, scope: &Scope) -> AResult<()> {
        match self.unit.arena.stmt(stmt).clone() {
            Stmt::Var(var) => self.analyze_var_stmt(stmt, var, scope),
            Stmt::Assign(assign) => {
                let lhs_ty = self.analyze_expr(assign.lhs, scope, None)?;
                self.analyze_expr(assign.rhs, scope, Some(&lhs_ty))?;
                self.check_mutable(assign.lhs, assign.span)
            }
            Stmt::CompAssign(comp) => {
                // Rewrite into `lhs = lhs op rhs` and analyze the result.
                let lhs_copy = self.unit.arena.expr(comp.lhs).clone();
                let lhs_inner = self.unit.arena.alloc_expr(lhs_copy);
                let binary = self.unit.arena.alloc_expr(Expr::new(
                    ExprKind::Binary { op: comp.op, lhs: lhs_inner, rhs: comp.rhs },
                    Type::Error,
                    comp.span,
                ));

                *self.unit.arena.stmt_mut(stmt) = Stmt::Assign(banjo_sir::AssignStmt {
                    lhs: comp.lhs,
                    rhs: binary,
                    span: comp.span,
                });
                self.analyze_stmt(stmt, scope)
            }
            Stmt::Return(ret) => self.analyze_return_stmt(stmt, ret, scope),
            Stmt::If(if_stmt) => {
                let bool_ty = Type::Primitive(banjo_sir::Primitive::Bool);
                for branch in &if_stmt.branches {
                    self.analyze_expr(branch.condition, scope, Some(&bool_ty))?;
                    self.analyze_block(branch.block, scope)?;
                }
                if let Some(else_block) = if_stmt.else_block {
                    self.analyze_block(else_block, scope)?;
                }
                Ok(())
            }
            Stmt::Switch(switch) => self.analyze_switch_stmt(stmt, switch, scope),
            Stmt::Try(try_stmt) => self.analyze_try_stmt(stmt, try_stmt, scope),
            Stmt::While(while_stmt) => {
                let bool_ty = Type::Primitive(banjo_sir::Primitive::Bool);
                self.analyze_expr(while_stmt.condition, scope, Some(&bool_ty))?;
                self.analyze_loop_block(while_stmt.block, scope)
            }
            Stmt::For(for_stmt) => self.analyze_for_stmt(stmt, for_stmt, scope),
            Stmt::Loop(loop_stmt) => {
                if let Some(condition) = loop_stmt.condition {
                    let bool_ty = Type::Primitive(banjo_sir::Primitive::Bool);
                    self.analyze_expr(condition, scope, Some(&bool_ty))?;
                }
                self.analyze_loop_block(loop_stmt.block, scope)?;
                if let Some(latch) = loop_stmt.latch {
                    self.analyze_loop_block(latch, scope)?;
                }
                Ok(())
            }
            Stmt::Continue(span) => {
                if scope.loop_depth == 0 {
                    self.reports.error("continue outside of a loop", span);
                    return Err(());
                }
                Ok(())
            }
            Stmt::Break(span) => {
                if scope.loop_depth == 0 {
                    self.reports.error("break outside of a loop", span);
                    return Err(());
                }
                Ok(())
            }
            Stmt::Block(block) => self.analyze_block(block, scope),
            Stmt::Expr(expr) => {
                self.analyze_expr(expr, scope, None)?;
                Ok(())
            }
            Stmt::MetaIf(meta) => self.expand_meta_if_stmt(stmt, meta, scope),
            Stmt::MetaFor(meta) => self.expand_meta_for_stmt(stmt, meta, scope),
            Stmt::ExpandedMeta(expanded) => {
                for inner in expanded.stmts {
                    self.analyze_stmt(inner, scope)?;
                }
                Ok(())
            }
            Stmt::Error => Ok(()),
        }
    }

    fn analyze_var_stmt(&mut self, stmt: StmtId, var: VarStmt, scope: &Scope) -> AResult<()> {
        let ty = match var.type_expr {
            Some(type_expr) => {
                let expected = self.resolve_type_expr(type_expr, scope.table, None)?;
                self.analyze_expr(var.value, scope, Some(&expected))?;
                expected
            }
            None => self.analyze_expr(var.value, scope, None)?,
        };

        if let Stmt::Var(var) = self.unit.arena.stmt_mut(stmt) {
            var.ty = ty;
        }

        let name = var.ident.name.clone();
        self.insert_symbol(scope.table, &name, var.ident.span, Symbol::Local(stmt));
        Ok(())
    }

    fn analyze_return_stmt(
        &mut self,
        _stmt: StmtId,
        ret: banjo_sir::ReturnStmt,
        scope: &Scope,
    ) -> AResult<()> {
        let return_type = match self.unit.arena.decl(scope.func) {
            Decl::FuncDef(def) => (*def.ty.return_type).clone(),
            _ => Type::Primitive(banjo_sir::Primitive::Void),
        };

        match (ret.value, return_type.is_void()) {
            (Some(value), false) => {
                self.analyze_expr(value, scope, Some(&return_type))?;
                self.check_return_escape(value, ret.span);
                Ok(())
            }
            (None, true) => Ok(()),
            (Some(_), true) => {
                self.reports
                    .error("cannot return a value from a void function", ret.span);
                Err(())
            }
            (None, false) => {
                self.reports.error("missing return value", ret.span);
                Err(())
            }
        }
    }

    fn analyze_switch_stmt(
        &mut self,
        stmt: StmtId,
        switch: banjo_sir::SwitchStmt,
        scope: &Scope,
    ) -> AResult<()> {
        let value_ty = self.analyze_expr(switch.value, scope, None)?;

        let Type::Union(union_decl) = value_ty else {
            self.reports
                .error("switch value must have a union type", switch.span);
            return Err(());
        };

        let mut cases = switch.cases.clone();

        for case in &mut cases {
            // The case type names one of the union's cases.
            let case_decl = self.resolve_union_case(case.type_expr, union_decl, scope)?;
            let view = self.union_case_view(case_decl);
            case.ty = Type::Struct(view);

            // Bind the case-typed local in the case block.
            let binding = self.unit.arena.alloc_stmt(Stmt::Var(VarStmt {
                ident: case.ident.clone(),
                type_expr: None,
                value: switch.value,
                ty: Type::Struct(view),
                span: case.ident.span,
            }));

            let case_table = self.unit.arena.block(case.block).table;
            let name = case.ident.name.clone();
            self.insert_symbol(case_table, &name, case.ident.span, Symbol::Local(binding));

            self.analyze_block(case.block, scope)?;
        }

        if let Stmt::Switch(switch) = self.unit.arena.stmt_mut(stmt) {
            switch.cases = cases;
        }
        Ok(())
    }

    fn resolve_union_case(
        &mut self,
        type_expr: ExprId,
        union_decl: banjo_sir::DeclId,
        scope: &Scope,
    ) -> AResult<banjo_sir::DeclId> {
        let kind = self.unit.arena.expr(type_expr).kind.clone();
        let span = self.unit.arena.expr(type_expr).span;

        let name = match kind {
            ExprKind::Ident(ident) => ident.name,
            ExprKind::Dot { rhs, .. } => rhs.name,
            _ => {
                self.reports.error("expected a union case name", span);
                return Err(());
            }
        };

        let Decl::UnionDef(def) = self.unit.arena.decl(union_decl) else {
            return Err(());
        };

        let case = def.cases.iter().copied().find(|c| {
            matches!(self.unit.arena.decl(*c), Decl::UnionCase(case) if case.ident.name == name)
        });

        let _ = scope;
        match case {
            Some(case) => Ok(case),
            None => {
                self.reports
                    .error(format!("union has no case '{}'", name), span);
                Err(())
            }
        }
    }

    /// A hidden struct definition mirroring a union case's payload, used
    /// as the type of switch bindings.
    pub fn union_case_view(&mut self, case: banjo_sir::DeclId) -> banjo_sir::DeclId {
        if let Some(view) = self.union_case_views.get(&case) {
            return *view;
        }

        let Decl::UnionCase(case_def) = self.unit.arena.decl(case).clone() else {
            panic!("not a union case");
        };

        let table = self.unit.arena.alloc_table(banjo_sir::SymbolTable::new(None));
        let block = self.unit.arena.alloc_decl_block(banjo_sir::DeclBlock {
            decls: Vec::new(),
            table,
            span: case_def.span,
        });

        let view = self.unit.arena.alloc_decl(Decl::StructDef(banjo_sir::StructDef {
            ident: case_def.ident.clone(),
            generic_params: Vec::new(),
            fields: Vec::new(),
            block,
            layout: banjo_sir::StructLayout::Default,
            impls: Vec::new(),
            specialization_of: None,
            specialization_args: Vec::new(),
            span: case_def.span,
        }));

        let mut fields = Vec::with_capacity(case_def.fields.len());
        for (index, field) in case_def.fields.iter().enumerate() {
            let type_expr = field.type_expr;
            let field_decl = self.unit.arena.alloc_decl(Decl::StructField(banjo_sir::StructField {
                ident: field.ident.clone(),
                type_expr,
                ty: field.ty.clone(),
                index: index as u32,
                span: field.ident.span,
            }));
            fields.push(field_decl);

            let name = field.ident.name.clone();
            let span = field.ident.span;
            self.insert_symbol(table, &name, span, Symbol::Field(field_decl));
        }

        if let Decl::StructDef(def) = self.unit.arena.decl_mut(view) {
            def.fields = fields;
        }

        self.union_case_views.insert(case, view);
        view
    }

    fn analyze_try_stmt(
        &mut self,
        stmt: StmtId,
        try_stmt: banjo_sir::TryStmt,
        scope: &Scope,
    ) -> AResult<()> {
        let expr_ty = self.analyze_expr(try_stmt.expr, scope, None)?;
        let span = try_stmt.span;

        let (discriminant, has_error_branch) =
            if let Some((_, _)) = self.result_value_types(&expr_ty) {
                ("successful", true)
            } else if self.optional_value_type(&expr_ty).is_some() {
                ("has_value", false)
            } else {
                self.reports.error(
                    "try expression must have a Result or Optional type",
                    span,
                );
                return Err(());
            };

        if try_stmt.except_block.is_some() && !has_error_branch {
            self.reports
                .error("except branch requires a Result-typed expression", span);
            return Err(());
        }

        // var __tryN = <expr>
        let hidden = self.hidden_name("try");
        let hidden_var = self.unit.arena.alloc_stmt(Stmt::Var(VarStmt {
            ident: Ident::new(hidden.clone(), span),
            type_expr: None,
            value: try_stmt.expr,
            ty: Type::Error,
            span,
        }));

        // if __tryN.successful { var v = __tryN.unwrap(); ... }
        let condition = self.hidden_method_field(&hidden, discriminant, span);

        let unwrap_call = self.hidden_method_call(&hidden, "unwrap", span);
        let bind_value = self.unit.arena.alloc_stmt(Stmt::Var(VarStmt {
            ident: try_stmt.ident.clone(),
            type_expr: None,
            value: unwrap_call,
            ty: Type::Error,
            span,
        }));
        self.unit
            .arena
            .block_mut(try_stmt.success_block)
            .stmts
            .insert(0, bind_value);

        // except branch binds the unwrapped error.
        if let (Some(except_block), Some(except_ident)) =
            (try_stmt.except_block, try_stmt.except_ident.clone())
        {
            let unwrap_error = self.hidden_method_call(&hidden, "unwrap_error", span);
            let bind_error = self.unit.arena.alloc_stmt(Stmt::Var(VarStmt {
                ident: except_ident,
                type_expr: None,
                value: unwrap_error,
                ty: Type::Error,
                span,
            }));
            self.unit.arena.block_mut(except_block).stmts.insert(0, bind_error);
        }

        let else_block = try_stmt.except_block.or(try_stmt.else_block);

        let if_stmt = self.unit.arena.alloc_stmt(Stmt::If(banjo_sir::IfStmt {
            branches: vec![banjo_sir::IfBranch {
                condition,
                block: try_stmt.success_block,
            }],
            else_block,
            span,
        }));

        // Wrap in a block so the hidden local has its own scope.
        let wrapper_table = self
            .unit
            .arena
            .alloc_table(banjo_sir::SymbolTable::new(Some(scope.table)));
        let wrapper = self.unit.arena.alloc_block(Block {
            stmts: vec![hidden_var, if_stmt],
            table: wrapper_table,
            span,
        });

        // The branch blocks must see the hidden local.
        self.reparent_block(try_stmt.success_block, wrapper_table);
        if let Some(block) = else_block {
            self.reparent_block(block, wrapper_table);
        }

        let lowered = self.unit.arena.alloc_stmt(Stmt::Block(wrapper));
        if let Stmt::Try(try_stmt) = self.unit.arena.stmt_mut(stmt) {
            try_stmt.lowered = Some(lowered);
        }

        self.analyze_stmt(lowered, scope)
    }

    fn analyze_for_stmt(
        &mut self,
        stmt: StmtId,
        for_stmt: banjo_sir::ForStmt,
        scope: &Scope,
    ) -> AResult<()> {
        let span = for_stmt.span;
        let range_kind = self.unit.arena.expr(for_stmt.range).kind.clone();

        let lowered = match range_kind {
            ExprKind::Range { start, end } => {
                // var i = start; loop (i < end) { body } latch { i = i + 1 }
                let bind = self.unit.arena.alloc_stmt(Stmt::Var(VarStmt {
                    ident: for_stmt.ident.clone(),
                    type_expr: None,
                    value: start,
                    ty: Type::Error,
                    span,
                }));

                let cond_lhs = self.ident_expr(&for_stmt.ident.name, span);
                let condition = self.unit.arena.alloc_expr(Expr::new(
                    ExprKind::Binary { op: banjo_sir::BinaryOp::Lt, lhs: cond_lhs, rhs: end },
                    Type::Error,
                    span,
                ));

                let latch_table = self
                    .unit
                    .arena
                    .alloc_table(banjo_sir::SymbolTable::new(None));
                let inc_lhs = self.ident_expr(&for_stmt.ident.name, span);
                let inc_lhs2 = self.ident_expr(&for_stmt.ident.name, span);
                let one = self.unit.arena.alloc_expr(Expr::new(
                    ExprKind::IntLiteral(1),
                    Type::Pseudo(banjo_sir::PseudoKind::IntLiteral),
                    span,
                ));
                let inc = self.unit.arena.alloc_expr(Expr::new(
                    ExprKind::Binary { op: banjo_sir::BinaryOp::Add, lhs: inc_lhs2, rhs: one },
                    Type::Error,
                    span,
                ));
                let assign = self.unit.arena.alloc_stmt(Stmt::Assign(banjo_sir::AssignStmt {
                    lhs: inc_lhs,
                    rhs: inc,
                    span,
                }));
                let latch = self.unit.arena.alloc_block(Block {
                    stmts: vec![assign],
                    table: latch_table,
                    span,
                });

                let loop_stmt = self.unit.arena.alloc_stmt(Stmt::Loop(LoopStmt {
                    condition: Some(condition),
                    block: for_stmt.block,
                    latch: Some(latch),
                    span,
                }));

                self.wrap_loop(stmt, vec![bind, loop_stmt], &[for_stmt.block, latch], scope, span)?
            }
            _ => {
                // var __it = iterable.iter(); loop { var __next = __it.next();
                // if !__next.has_value { break } var x = __next.unwrap(); body }
                let iter_method = if for_stmt.by_ref { "iter_ref" } else { "iter" };
                let iter_name = self.hidden_name("iter");
                let next_name = self.hidden_name("next");

                let iter_callee = self.unit.arena.alloc_expr(Expr::new(
                    ExprKind::Dot {
                        lhs: for_stmt.range,
                        rhs: Ident::new(iter_method, span),
                    },
                    Type::Error,
                    span,
                ));
                let iter_call = self.unit.arena.alloc_expr(Expr::new(
                    ExprKind::Call { callee: iter_callee, args: Vec::new() },
                    Type::Error,
                    span,
                ));
                let bind_iter = self.unit.arena.alloc_stmt(Stmt::Var(VarStmt {
                    ident: Ident::new(iter_name.clone(), span),
                    type_expr: None,
                    value: iter_call,
                    ty: Type::Error,
                    span,
                }));

                // Body prelude.
                let next_call = self.hidden_method_call(&iter_name, "next", span);
                let bind_next = self.unit.arena.alloc_stmt(Stmt::Var(VarStmt {
                    ident: Ident::new(next_name.clone(), span),
                    type_expr: None,
                    value: next_call,
                    ty: Type::Error,
                    span,
                }));

                let has_value = self.hidden_method_field(&next_name, "has_value", span);
                let not_has_value = self.unit.arena.alloc_expr(Expr::new(
                    ExprKind::Unary { op: UnaryOp::Not, value: has_value },
                    Type::Error,
                    span,
                ));
                let break_table = self
                    .unit
                    .arena
                    .alloc_table(banjo_sir::SymbolTable::new(None));
                let break_stmt = self.unit.arena.alloc_stmt(Stmt::Break(span));
                let break_block = self.unit.arena.alloc_block(Block {
                    stmts: vec![break_stmt],
                    table: break_table,
                    span,
                });
                let guard = self.unit.arena.alloc_stmt(Stmt::If(banjo_sir::IfStmt {
                    branches: vec![banjo_sir::IfBranch {
                        condition: not_has_value,
                        block: break_block,
                    }],
                    else_block: None,
                    span,
                }));

                let unwrap_call = self.hidden_method_call(&next_name, "unwrap", span);
                let bind_value = self.unit.arena.alloc_stmt(Stmt::Var(VarStmt {
                    ident: for_stmt.ident.clone(),
                    type_expr: None,
                    value: unwrap_call,
                    ty: Type::Error,
                    span,
                }));

                // Prepend the prelude to the loop body.
                {
                    let body = self.unit.arena.block_mut(for_stmt.block);
                    body.stmts.insert(0, bind_next);
                    body.stmts.insert(1, guard);
                    body.stmts.insert(2, bind_value);
                }

                let loop_stmt = self.unit.arena.alloc_stmt(Stmt::Loop(LoopStmt {
                    condition: None,
                    block: for_stmt.block,
                    latch: None,
                    span,
                }));

                self.wrap_loop(stmt, vec![bind_iter, loop_stmt], &[for_stmt.block], scope, span)?
            }
        };

        self.analyze_stmt(lowered, scope)
    }

    /// Wrap rewritten loop statements in a scoping block, reparenting the
    /// loop's blocks so they see the wrapper's bindings.
    fn wrap_loop(
        &mut self,
        stmt: StmtId,
        stmts: Vec<StmtId>,
        inner_blocks: &[BlockId],
        scope: &Scope,
        span: Span,
    ) -> AResult<StmtId> {
        let wrapper_table = self
            .unit
            .arena
            .alloc_table(banjo_sir::SymbolTable::new(Some(scope.table)));

        for block in inner_blocks {
            self.reparent_block(*block, wrapper_table);
        }

        let wrapper = self.unit.arena.alloc_block(Block {
            stmts,
            table: wrapper_table,
            span,
        });

        let lowered = self.unit.arena.alloc_stmt(Stmt::Block(wrapper));
        if let Stmt::For(for_stmt) = self.unit.arena.stmt_mut(stmt) {
            for_stmt.lowered = Some(lowered);
        }
        Ok(lowered)
    }

    fn reparent_block(&mut self, block: BlockId, parent: banjo_sir::TableId) {
        let table = self.unit.arena.block(block).table;
        self.unit.arena.table_mut(table).parent = Some(parent);
    }

    fn ident_expr(&mut self, name: &str, span: Span) -> ExprId {
        self.unit.arena.alloc_expr(Expr::new(
            ExprKind::Ident(Ident::new(name, span)),
            Type::Error,
            span,
        ))
    }

    /// `<hidden>.<method>()`
    fn hidden_method_call(&mut self, hidden: &str, method: &str, span: Span) -> ExprId {
        let receiver = self.ident_expr(hidden, span);
        let callee = self.unit.arena.alloc_expr(Expr::new(
            ExprKind::Dot { lhs: receiver, rhs: Ident::new(method, span) },
            Type::Error,
            span,
        ));
        self.unit.arena.alloc_expr(Expr::new(
            ExprKind::Call { callee, args: Vec::new() },
            Type::Error,
            span,
        ))
    }

    /// `<hidden>.<field>`
    fn hidden_method_field(&mut self, hidden: &str, field: &str, span: Span) -> ExprId {
        let receiver = self.ident_expr(hidden, span);
        self.unit.arena.alloc_expr(Expr::new(
            ExprKind::Dot { lhs: receiver, rhs: Ident::new(field, span) },
            Type::Error,
            span,
        ))
    }
}
