//! Generics specialization
//!
//! Specializations are monomorphic clones of generic definitions, cached
//! by (definition, argument tuple). Cloning copies the whole body into
//! fresh arena nodes with generic parameters substituted in every stored
//! type; the clone is then analyzed like any other definition. Generic
//! argument inference unifies parameter types against argument types.

use crate::{AResult, SemanticAnalyzer, MAX_SPECIALIZATION_DEPTH};
use banjo_common::Span;
use banjo_sir::{
    Block, BlockId, Decl, DeclBlock, DeclBlockId, DeclId, Expr, ExprId, ExprKind, Stmt, StmtId,
    Symbol, SymbolTable, TableId, Type,
};

/// Substitution context threaded through a clone
struct CloneCtx {
    owner: DeclId,
    args: Vec<Type>,
    /// Rebinds `Self` (and method lookups) from the generic struct to its
    /// specialization
    self_rebind: Option<(DeclId, DeclId)>,
}

impl CloneCtx {
    fn substitute(&self, ty: &Type) -> Type {
        let ty = ty.substitute(self.owner, &self.args);
        match (&ty, self.self_rebind) {
            (Type::Struct(decl), Some((old, new))) if *decl == old => Type::Struct(new),
            _ => ty,
        }
    }
}

impl SemanticAnalyzer<'_> {
    /// Turn a type whose generic applications have concrete arguments into
    /// a fully specialized type.
    pub fn normalize_type(&mut self, ty: Type, span: Span) -> AResult<Type> {
        match ty {
            Type::GenericInstance { def, args } => {
                let mut concrete = Vec::with_capacity(args.len());
                for arg in args {
                    concrete.push(self.normalize_type(arg, span)?);
                }

                if concrete.iter().any(|a| matches!(a, Type::GenericParam { .. })) {
                    // Still generic; leave for a later substitution.
                    return Ok(Type::GenericInstance { def, args: concrete });
                }

                let spec = self.specialize_struct(def, concrete, span)?;
                Ok(Type::Struct(spec))
            }
            Type::Pointer(base) => {
                Ok(Type::Pointer(Box::new(self.normalize_type(*base, span)?)))
            }
            Type::Reference { mutable, base } => Ok(Type::Reference {
                mutable,
                base: Box::new(self.normalize_type(*base, span)?),
            }),
            Type::StaticArray { element, length } => Ok(Type::StaticArray {
                element: Box::new(self.normalize_type(*element, span)?),
                length,
            }),
            Type::Tuple(fields) => {
                let mut normalized = Vec::with_capacity(fields.len());
                for field in fields {
                    normalized.push(self.normalize_type(field, span)?);
                }
                Ok(Type::Tuple(normalized))
            }
            Type::Func(mut func) => {
                for param in &mut func.params {
                    *param = self.normalize_type(param.clone(), span)?;
                }
                *func.return_type = self.normalize_type((*func.return_type).clone(), span)?;
                Ok(Type::Func(func))
            }
            other => Ok(other),
        }
    }

    /// Find or create the specialization of a generic struct.
    pub fn specialize_struct(
        &mut self,
        decl: DeclId,
        args: Vec<Type>,
        span: Span,
    ) -> AResult<DeclId> {
        let key = (decl, args.clone());
        if let Some(existing) = self.specializations.get(&key) {
            return Ok(*existing);
        }

        let Decl::StructDef(def) = self.unit.arena.decl(decl) else {
            self.reports.error("type arguments applied to a non-generic type", span);
            return Err(());
        };

        if def.generic_params.len() != args.len() {
            self.reports.error(
                format!(
                    "expected {} type arguments, found {}",
                    def.generic_params.len(),
                    args.len()
                ),
                span,
            );
            return Err(());
        }

        if self.spec_depth >= MAX_SPECIALIZATION_DEPTH {
            self.reports.error("generic specialization recursion limit reached", span);
            return Err(());
        }
        self.spec_depth += 1;

        let def = def.clone();
        let parent_table = self.unit.arena.decl_block(def.block).table;
        let parent = self.unit.arena.table(parent_table).parent;

        // Allocate the specialized struct up front so the cache can break
        // recursive references from method signatures back to this type.
        let new_table = self.unit.arena.alloc_table(SymbolTable::new(parent));
        let new_block = self.unit.arena.alloc_decl_block(DeclBlock {
            decls: Vec::new(),
            table: new_table,
            span: def.span,
        });

        let new_decl = self.unit.arena.alloc_decl(Decl::StructDef(banjo_sir::StructDef {
            ident: def.ident.clone(),
            generic_params: Vec::new(),
            fields: Vec::new(),
            block: new_block,
            layout: def.layout,
            impls: def.impls.clone(),
            specialization_of: Some(decl),
            specialization_args: args.clone(),
            span: def.span,
        }));

        self.specializations.insert(key, new_decl);
        self.unit.arena.table_mut(new_table).insert("Self", Symbol::Struct(new_decl));

        // Register the specialization in its defining module so stages
        // walking declarations reach its methods.
        if let Some(owner_block) = self.owner_block(decl) {
            self.unit.arena.decl_block_mut(owner_block).decls.push(new_decl);
        }

        let ctx = CloneCtx {
            owner: decl,
            args: args.clone(),
            self_rebind: Some((decl, new_decl)),
        };

        // Clone the fields with substituted types.
        let mut new_fields = Vec::with_capacity(def.fields.len());
        for field in &def.fields {
            if let Decl::StructField(field_def) = self.unit.arena.decl(*field) {
                let mut field_def = field_def.clone();
                field_def.ty = ctx.substitute(&field_def.ty);
                let name = field_def.ident.name.clone();
                let field_span = field_def.ident.span;
                let new_field = self.unit.arena.alloc_decl(Decl::StructField(field_def));
                new_fields.push(new_field);
                self.insert_symbol(new_table, &name, field_span, Symbol::Field(new_field));
            }
        }

        if let Decl::StructDef(def) = self.unit.arena.decl_mut(new_decl) {
            def.fields = new_fields;
        }

        // Clone the member declarations (methods and native methods).
        let member_decls = self.unit.arena.decl_block(def.block).decls.clone();
        for member in member_decls {
            let cloned = self.clone_decl(member, &ctx, new_table);
            if let Some(cloned) = cloned {
                self.unit.arena.decl_block_mut(new_block).decls.push(cloned);
                if let Some(ident) = self.unit.arena.decl(cloned).ident() {
                    let name = ident.name.clone();
                    let ident_span = ident.span;
                    let symbol = match self.unit.arena.decl(cloned) {
                        Decl::FuncDef(_) => Symbol::Func(cloned),
                        Decl::NativeFuncDecl(_) => Symbol::NativeFunc(cloned),
                        Decl::FuncDecl(_) => Symbol::ExternFunc(cloned),
                        _ => continue,
                    };
                    self.insert_symbol(new_table, &name, ident_span, symbol);
                }
            }
        }

        // Normalize field types, then analyze the cloned method bodies.
        let fields = match self.unit.arena.decl(new_decl) {
            Decl::StructDef(def) => def.fields.clone(),
            _ => Vec::new(),
        };
        for field in fields {
            let ty = match self.unit.arena.decl(field) {
                Decl::StructField(f) => f.ty.clone(),
                _ => continue,
            };
            let ty = self.normalize_type(ty, span)?;
            if let Decl::StructField(f) = self.unit.arena.decl_mut(field) {
                f.ty = ty;
            }
        }

        let members = self.unit.arena.decl_block(new_block).decls.clone();
        for member in &members {
            self.normalize_func_signature(*member, span)?;
        }
        for member in &members {
            self.analyze_decl_header(*member, new_table, Some(new_decl));
        }
        for member in &members {
            self.analyze_decl_body(*member, new_table, Some(new_decl));
        }

        self.spec_depth -= 1;
        Ok(new_decl)
    }

    /// Find or create the specialization of a generic function.
    pub fn specialize_func(&mut self, decl: DeclId, args: Vec<Type>, span: Span) -> AResult<DeclId> {
        let key = (decl, args.clone());
        if let Some(existing) = self.specializations.get(&key) {
            return Ok(*existing);
        }

        let Decl::FuncDef(def) = self.unit.arena.decl(decl) else {
            return Err(());
        };

        if def.generic_params.len() != args.len() {
            self.reports.error(
                format!(
                    "expected {} type arguments, found {}",
                    def.generic_params.len(),
                    args.len()
                ),
                span,
            );
            return Err(());
        }

        if self.spec_depth >= MAX_SPECIALIZATION_DEPTH {
            self.reports.error("generic specialization recursion limit reached", span);
            return Err(());
        }
        self.spec_depth += 1;

        let def = def.clone();
        let ctx = CloneCtx { owner: decl, args: args.clone(), self_rebind: None };

        let body_parent = {
            let table = self.unit.arena.block(def.block).table;
            self.unit.arena.table(table).parent
        };
        let new_body = self.clone_block(def.block, &ctx, body_parent);

        let mut new_def = def.clone();
        new_def.generic_params = Vec::new();
        new_def.block = new_body;
        new_def.specialization_of = Some(decl);
        new_def.specialization_args = args.clone();
        for param in &mut new_def.params {
            param.ty = ctx.substitute(&param.ty);
        }
        new_def.ty = banjo_sir::FuncType {
            params: new_def.params.iter().map(|p| p.ty.clone()).collect(),
            return_type: Box::new(ctx.substitute(&new_def.ty.return_type)),
            variadic: new_def.ty.variadic,
        };

        let new_decl = self.unit.arena.alloc_decl(Decl::FuncDef(new_def));
        self.specializations.insert(key, new_decl);
        self.normalize_func_signature(new_decl, span)?;

        // Register the specialization in its defining block so downstream
        // stages walking declarations reach it.
        if let Some(owner_block) = self.owner_block(decl) {
            self.unit.arena.decl_block_mut(owner_block).decls.push(new_decl);
        }

        let scope_table = body_parent.unwrap_or(self.std_refs.table);
        self.analyze_decl_header(new_decl, scope_table, None);
        self.analyze_decl_body(new_decl, scope_table, None);

        self.spec_depth -= 1;
        Ok(new_decl)
    }

    /// Normalize every type in a function-like declaration's signature.
    fn normalize_func_signature(&mut self, decl: DeclId, span: Span) -> AResult<()> {
        let (mut params, mut ty) = match self.unit.arena.decl(decl) {
            Decl::FuncDef(def) => (def.params.clone(), def.ty.clone()),
            Decl::NativeFuncDecl(def) => (def.params.clone(), def.ty.clone()),
            Decl::FuncDecl(def) => (def.params.clone(), def.ty.clone()),
            _ => return Ok(()),
        };

        for param in &mut params {
            param.ty = self.normalize_type(param.ty.clone(), span)?;
        }
        ty.params = params.iter().map(|p| p.ty.clone()).collect();
        *ty.return_type = self.normalize_type((*ty.return_type).clone(), span)?;

        match self.unit.arena.decl_mut(decl) {
            Decl::FuncDef(def) => {
                def.params = params;
                def.ty = ty;
            }
            Decl::NativeFuncDecl(def) => {
                def.params = params;
                def.ty = ty;
            }
            Decl::FuncDecl(def) => {
                def.params = params;
                def.ty = ty;
            }
            _ => {}
        }
        Ok(())
    }

    fn owner_block(&self, decl: DeclId) -> Option<DeclBlockId> {
        for module in &self.unit.mods {
            if self.unit.arena.decl_block(module.block).decls.contains(&decl) {
                return Some(module.block);
            }
        }
        None
    }

    /// Infer generic arguments by unifying parameter types with argument
    /// types. Returns `None` if any parameter stays unbound.
    pub fn infer_generic_args(
        &self,
        owner: DeclId,
        num_generics: usize,
        param_types: &[Type],
        arg_types: &[Type],
    ) -> Option<Vec<Type>> {
        let mut bindings: Vec<Option<Type>> = vec![None; num_generics];

        for (param, arg) in param_types.iter().zip(arg_types) {
            self.unify(owner, param, arg, &mut bindings);
        }

        bindings.into_iter().collect()
    }

    /// Structural unification of a parameter type pattern against a
    /// concrete argument type, binding generic parameters of `owner`.
    fn unify(&self, owner: DeclId, pattern: &Type, actual: &Type, bindings: &mut [Option<Type>]) {
        match (pattern, actual) {
            (Type::GenericParam { owner: param_owner, index }, _) if *param_owner == owner => {
                let slot = &mut bindings[*index as usize];
                if slot.is_none() {
                    *slot = Some(actual.clone());
                }
            }
            (Type::Pointer(p), Type::Pointer(a)) => self.unify(owner, p, a, bindings),
            (Type::Reference { base: p, .. }, Type::Reference { base: a, .. }) => {
                self.unify(owner, p, a, bindings)
            }
            (Type::StaticArray { element: p, .. }, Type::StaticArray { element: a, .. }) => {
                self.unify(owner, p, a, bindings)
            }
            (Type::Tuple(patterns), Type::Tuple(actuals)) => {
                for (p, a) in patterns.iter().zip(actuals) {
                    self.unify(owner, p, a, bindings);
                }
            }
            (Type::Func(p), Type::Func(a)) => {
                for (p, a) in p.params.iter().zip(&a.params) {
                    self.unify(owner, p, a, bindings);
                }
                self.unify(owner, &p.return_type, &a.return_type, bindings);
            }
            (Type::GenericInstance { def, args }, Type::Struct(actual_decl)) => {
                // Match the specialization's recorded arguments.
                if let Decl::StructDef(actual_def) = self.unit.arena.decl(*actual_decl) {
                    if actual_def.specialization_of == Some(*def) {
                        for (p, a) in args.iter().zip(&actual_def.specialization_args) {
                            self.unify(owner, p, a, bindings);
                        }
                    }
                }
            }
            _ => {}
        }
    }

    // -- node cloning -------------------------------------------------------

    fn clone_decl(&mut self, decl: DeclId, ctx: &CloneCtx, _table: TableId) -> Option<DeclId> {
        match self.unit.arena.decl(decl).clone() {
            Decl::FuncDef(mut def) => {
                for param in &mut def.params {
                    param.ty = ctx.substitute(&param.ty);
                }
                def.ty = banjo_sir::FuncType {
                    params: def.params.iter().map(|p| p.ty.clone()).collect(),
                    return_type: Box::new(ctx.substitute(&def.ty.return_type)),
                    variadic: def.ty.variadic,
                };

                let body_parent = {
                    let table = self.unit.arena.block(def.block).table;
                    self.unit.arena.table(table).parent
                };
                def.block = self.clone_block(def.block, ctx, body_parent);
                // The owning specialization's name segment already carries
                // the argument suffix.
                def.specialization_of = Some(decl);
                Some(self.unit.arena.alloc_decl(Decl::FuncDef(def)))
            }
            Decl::NativeFuncDecl(mut def) => {
                for param in &mut def.params {
                    param.ty = ctx.substitute(&param.ty);
                }
                def.ty = banjo_sir::FuncType {
                    params: def.params.iter().map(|p| p.ty.clone()).collect(),
                    return_type: Box::new(ctx.substitute(&def.ty.return_type)),
                    variadic: def.ty.variadic,
                };
                Some(self.unit.arena.alloc_decl(Decl::NativeFuncDecl(def)))
            }
            Decl::FuncDecl(mut def) => {
                for param in &mut def.params {
                    param.ty = ctx.substitute(&param.ty);
                }
                Some(self.unit.arena.alloc_decl(Decl::FuncDecl(def)))
            }
            Decl::ConstDef(mut def) => {
                def.ty = ctx.substitute(&def.ty);
                def.value = self.clone_expr(def.value, ctx);
                Some(self.unit.arena.alloc_decl(Decl::ConstDef(def)))
            }
            // Fields are cloned by the struct specializer itself; nested
            // type definitions inside generic structs are not supported.
            _ => None,
        }
    }

    fn clone_block(&mut self, block: BlockId, ctx: &CloneCtx, parent: Option<TableId>) -> BlockId {
        let old = self.unit.arena.block(block).clone();
        let table = self.unit.arena.alloc_table(SymbolTable::new(parent));

        let stmts = old
            .stmts
            .iter()
            .map(|stmt| self.clone_stmt(*stmt, ctx, table))
            .collect();

        self.unit.arena.alloc_block(Block { stmts, table, span: old.span })
    }

    fn clone_stmt(&mut self, stmt: StmtId, ctx: &CloneCtx, table: TableId) -> StmtId {
        let old = self.unit.arena.stmt(stmt).clone();

        let new = match old {
            Stmt::Var(mut s) => {
                s.type_expr = s.type_expr.map(|e| self.clone_expr(e, ctx));
                s.value = self.clone_expr(s.value, ctx);
                s.ty = ctx.substitute(&s.ty);
                Stmt::Var(s)
            }
            Stmt::Assign(mut s) => {
                s.lhs = self.clone_expr(s.lhs, ctx);
                s.rhs = self.clone_expr(s.rhs, ctx);
                Stmt::Assign(s)
            }
            Stmt::CompAssign(mut s) => {
                s.lhs = self.clone_expr(s.lhs, ctx);
                s.rhs = self.clone_expr(s.rhs, ctx);
                Stmt::CompAssign(s)
            }
            Stmt::Return(mut s) => {
                s.value = s.value.map(|e| self.clone_expr(e, ctx));
                Stmt::Return(s)
            }
            Stmt::If(mut s) => {
                for branch in &mut s.branches {
                    branch.condition = self.clone_expr(branch.condition, ctx);
                    branch.block = self.clone_block(branch.block, ctx, Some(table));
                }
                s.else_block = s.else_block.map(|b| self.clone_block(b, ctx, Some(table)));
                Stmt::If(s)
            }
            Stmt::Switch(mut s) => {
                s.value = self.clone_expr(s.value, ctx);
                for case in &mut s.cases {
                    case.type_expr = self.clone_expr(case.type_expr, ctx);
                    case.ty = ctx.substitute(&case.ty);
                    case.block = self.clone_block(case.block, ctx, Some(table));
                }
                Stmt::Switch(s)
            }
            Stmt::Try(mut s) => {
                s.expr = self.clone_expr(s.expr, ctx);
                s.success_block = self.clone_block(s.success_block, ctx, Some(table));
                s.except_block = s.except_block.map(|b| self.clone_block(b, ctx, Some(table)));
                s.else_block = s.else_block.map(|b| self.clone_block(b, ctx, Some(table)));
                s.lowered = None;
                Stmt::Try(s)
            }
            Stmt::While(mut s) => {
                s.condition = self.clone_expr(s.condition, ctx);
                s.block = self.clone_block(s.block, ctx, Some(table));
                Stmt::While(s)
            }
            Stmt::For(mut s) => {
                s.range = self.clone_expr(s.range, ctx);
                s.block = self.clone_block(s.block, ctx, Some(table));
                s.lowered = None;
                Stmt::For(s)
            }
            Stmt::Loop(mut s) => {
                s.condition = s.condition.map(|e| self.clone_expr(e, ctx));
                s.block = self.clone_block(s.block, ctx, Some(table));
                s.latch = s.latch.map(|b| self.clone_block(b, ctx, Some(table)));
                Stmt::Loop(s)
            }
            Stmt::Continue(span) => Stmt::Continue(span),
            Stmt::Break(span) => Stmt::Break(span),
            Stmt::Block(block) => Stmt::Block(self.clone_block(block, ctx, Some(table))),
            Stmt::Expr(expr) => Stmt::Expr(self.clone_expr(expr, ctx)),
            Stmt::MetaIf(mut s) => {
                s.condition = self.clone_expr(s.condition, ctx);
                s.then_block = self.clone_block(s.then_block, ctx, Some(table));
                s.else_block = s.else_block.map(|b| self.clone_block(b, ctx, Some(table)));
                Stmt::MetaIf(s)
            }
            Stmt::MetaFor(mut s) => {
                s.range = self.clone_expr(s.range, ctx);
                s.block = self.clone_block(s.block, ctx, Some(table));
                Stmt::MetaFor(s)
            }
            Stmt::ExpandedMeta(mut s) => {
                s.stmts = s.stmts.iter().map(|st| self.clone_stmt(*st, ctx, table)).collect();
                Stmt::ExpandedMeta(s)
            }
            Stmt::Error => Stmt::Error,
        };

        self.unit.arena.alloc_stmt(new)
    }

    pub(crate) fn clone_expr_subst(
        &mut self,
        expr: ExprId,
        owner: DeclId,
        args: &[Type],
    ) -> ExprId {
        let ctx = CloneCtx { owner, args: args.to_vec(), self_rebind: None };
        self.clone_expr(expr, &ctx)
    }

    pub(crate) fn clone_stmt_into(&mut self, stmt: StmtId, table: TableId) -> StmtId {
        // Identity substitution: used by meta-for expansion.
        let ctx = CloneCtx { owner: DeclId(u32::MAX), args: Vec::new(), self_rebind: None };
        self.clone_stmt(stmt, &ctx, table)
    }

    fn clone_expr(&mut self, expr: ExprId, ctx: &CloneCtx) -> ExprId {
        let old = self.unit.arena.expr(expr).clone();
        let ty = ctx.substitute(&old.ty);

        let kind = match old.kind {
            ExprKind::ArrayLiteral(elements) => ExprKind::ArrayLiteral(
                elements.iter().map(|e| self.clone_expr(*e, ctx)).collect(),
            ),
            ExprKind::StructLiteral { type_expr, entries } => ExprKind::StructLiteral {
                type_expr: type_expr.map(|e| self.clone_expr(e, ctx)),
                entries: entries
                    .into_iter()
                    .map(|mut entry| {
                        entry.value = self.clone_expr(entry.value, ctx);
                        entry.field_index = None;
                        entry
                    })
                    .collect(),
            },
            ExprKind::MapLiteral(entries) => ExprKind::MapLiteral(
                entries
                    .iter()
                    .map(|(k, v)| (self.clone_expr(*k, ctx), self.clone_expr(*v, ctx)))
                    .collect(),
            ),
            ExprKind::Tuple(fields) => {
                ExprKind::Tuple(fields.iter().map(|e| self.clone_expr(*e, ctx)).collect())
            }
            ExprKind::Closure { params, return_type_expr, block } => {
                let body_parent = {
                    let table = self.unit.arena.block(block).table;
                    self.unit.arena.table(table).parent
                };
                ExprKind::Closure {
                    params: params
                        .into_iter()
                        .map(|mut p| {
                            p.ty = ctx.substitute(&p.ty);
                            p.type_expr = self.clone_expr(p.type_expr, ctx);
                            p
                        })
                        .collect(),
                    return_type_expr: return_type_expr.map(|e| self.clone_expr(e, ctx)),
                    block: self.clone_block(block, ctx, body_parent),
                }
            }
            ExprKind::Binary { op, lhs, rhs } => ExprKind::Binary {
                op,
                lhs: self.clone_expr(lhs, ctx),
                rhs: self.clone_expr(rhs, ctx),
            },
            ExprKind::Unary { op, value } => ExprKind::Unary {
                op,
                value: self.clone_expr(value, ctx),
            },
            ExprKind::Cast { value, target } => ExprKind::Cast {
                value: self.clone_expr(value, ctx),
                target: self.clone_expr(target, ctx),
            },
            ExprKind::Coercion { value } => ExprKind::Coercion {
                value: self.clone_expr(value, ctx),
            },
            ExprKind::Index { base, index } => ExprKind::Index {
                base: self.clone_expr(base, ctx),
                index: self.clone_expr(index, ctx),
            },
            ExprKind::Call { callee, args } => ExprKind::Call {
                callee: self.clone_expr(callee, ctx),
                args: args.iter().map(|a| self.clone_expr(*a, ctx)).collect(),
            },
            ExprKind::Field { base, field, index } => ExprKind::Field {
                base: self.clone_expr(base, ctx),
                field,
                index,
            },
            ExprKind::TupleField { base, index } => ExprKind::TupleField {
                base: self.clone_expr(base, ctx),
                index,
            },
            ExprKind::Range { start, end } => ExprKind::Range {
                start: self.clone_expr(start, ctx),
                end: self.clone_expr(end, ctx),
            },
            ExprKind::Dot { lhs, rhs } => ExprKind::Dot {
                lhs: self.clone_expr(lhs, ctx),
                rhs,
            },
            ExprKind::Star(base) => ExprKind::Star(self.clone_expr(base, ctx)),
            ExprKind::Bracket { base, args } => ExprKind::Bracket {
                base: self.clone_expr(base, ctx),
                args: args.iter().map(|a| self.clone_expr(*a, ctx)).collect(),
            },
            ExprKind::MetaAccess { target } => ExprKind::MetaAccess {
                target: self.clone_expr(target, ctx),
            },
            ExprKind::MetaField { base, field } => ExprKind::MetaField {
                base: self.clone_expr(base, ctx),
                field,
            },
            ExprKind::MetaCall { callee, args } => ExprKind::MetaCall {
                callee: self.clone_expr(callee, ctx),
                args: args.iter().map(|a| self.clone_expr(*a, ctx)).collect(),
            },
            ExprKind::PointerType(base) => ExprKind::PointerType(self.clone_expr(base, ctx)),
            ExprKind::ReferenceType { mutable, base } => ExprKind::ReferenceType {
                mutable,
                base: self.clone_expr(base, ctx),
            },
            ExprKind::StaticArrayType { element, length } => ExprKind::StaticArrayType {
                element: self.clone_expr(element, ctx),
                length: self.clone_expr(length, ctx),
            },
            ExprKind::FuncTypeExpr { params, return_type } => ExprKind::FuncTypeExpr {
                params: params.iter().map(|p| self.clone_expr(*p, ctx)).collect(),
                return_type: return_type.map(|r| self.clone_expr(r, ctx)),
            },
            ExprKind::OptionalType(base) => ExprKind::OptionalType(self.clone_expr(base, ctx)),
            ExprKind::ResultType { value, error } => ExprKind::ResultType {
                value: self.clone_expr(value, ctx),
                error: self.clone_expr(error, ctx),
            },
            ExprKind::ArrayType(base) => ExprKind::ArrayType(self.clone_expr(base, ctx)),
            ExprKind::ClosureTypeExpr { params, return_type } => ExprKind::ClosureTypeExpr {
                params: params.iter().map(|p| self.clone_expr(*p, ctx)).collect(),
                return_type: return_type.map(|r| self.clone_expr(r, ctx)),
            },
            ExprKind::TupleType(fields) => ExprKind::TupleType(
                fields.iter().map(|f| self.clone_expr(*f, ctx)).collect(),
            ),
            // Leaf kinds carry no child expressions.
            other => other,
        };

        self.unit.arena.alloc_expr(Expr::new(kind, ty, old.span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banjo_common::Reports;
    use banjo_sir::Unit;

    #[test]
    fn test_unify_binds_through_pointers() {
        let mut unit = Unit::new();
        let mut reports = Reports::new();
        let analyzer = SemanticAnalyzer::new(&mut unit, &mut reports);

        let owner = DeclId(3);
        let pattern = Type::GenericParam { owner, index: 0 }.pointer_to();
        let actual = Type::Primitive(banjo_sir::Primitive::I64).pointer_to();

        let mut bindings = vec![None];
        analyzer.unify(owner, &pattern, &actual, &mut bindings);
        assert_eq!(bindings[0], Some(Type::Primitive(banjo_sir::Primitive::I64)));
    }
}
