//! Declaration header and body analysis
//!
//! Headers first: parameter, return, field and constant types are resolved
//! across the whole unit so bodies can reference declarations in any
//! order. Bodies second: every non-generic function body runs through the
//! statement analyzer. Constants are finalized last.

use crate::{AResult, Scope, SemanticAnalyzer};
use banjo_sir::{Decl, DeclBlockId, DeclId, ExprId, ExprKind, FuncType, Symbol, TableId, Type};

impl SemanticAnalyzer<'_> {
    pub fn analyze_decl_headers(&mut self) {
        for module in self.unit.module_ids().collect::<Vec<_>>() {
            let block = self.unit.module(module).block;
            self.analyze_block_headers(block, None);
        }
    }

    fn analyze_block_headers(&mut self, block: DeclBlockId, struct_ctx: Option<DeclId>) {
        let table = self.unit.arena.decl_block(block).table;
        let decls = self.unit.arena.decl_block(block).decls.clone();

        for decl in decls {
            self.analyze_decl_header(decl, table, struct_ctx);
        }
    }

    pub fn analyze_decl_header(&mut self, decl: DeclId, table: TableId, struct_ctx: Option<DeclId>) {
        match self.unit.arena.decl(decl).clone() {
            Decl::FuncDef(def) => {
                // Specializations arrive with fully substituted
                // signatures; re-resolving their type expressions would
                // look the generic parameters up in the wrong scope.
                if def.specialization_of.is_some() {
                    return;
                }

                let generic_owner = if def.is_generic() {
                    Some(decl)
                } else {
                    // Methods of generic structs resolve their struct's
                    // generic parameters.
                    struct_ctx.filter(|s| self.is_generic_struct(*s))
                };

                let mut params = def.params.clone();
                let mut failed = false;

                for param in &mut params {
                    if param.ty == Type::Error {
                        match self.resolve_type_expr(param.type_expr, table, generic_owner) {
                            Ok(ty) => param.ty = ty,
                            Err(()) => failed = true,
                        }
                    }
                }

                let return_type = match def.return_type_expr {
                    Some(expr) => match self.resolve_type_expr(expr, table, generic_owner) {
                        Ok(ty) => ty,
                        Err(()) => {
                            failed = true;
                            Type::Error
                        }
                    },
                    None => {
                        if *def.ty.return_type != Type::Primitive(banjo_sir::Primitive::Void) {
                            // Pre-resolved by the builder (std methods).
                            (*def.ty.return_type).clone()
                        } else {
                            Type::Primitive(banjo_sir::Primitive::Void)
                        }
                    }
                };

                if failed {
                    return;
                }

                let ty = FuncType {
                    params: params.iter().map(|p| p.ty.clone()).collect(),
                    return_type: Box::new(return_type),
                    variadic: def.ty.variadic,
                };

                if let Decl::FuncDef(def) = self.unit.arena.decl_mut(decl) {
                    def.params = params;
                    def.ty = ty;
                }
            }
            Decl::FuncDecl(def) => {
                let mut params = def.params.clone();
                for param in &mut params {
                    if param.ty == Type::Error {
                        if let Ok(ty) = self.resolve_type_expr(param.type_expr, table, None) {
                            param.ty = ty;
                        }
                    }
                }

                let return_type = match def.return_type_expr {
                    Some(expr) => self.resolve_type_expr(expr, table, None).unwrap_or(Type::Error),
                    None => (*def.ty.return_type).clone(),
                };

                let ty = FuncType {
                    params: params.iter().map(|p| p.ty.clone()).collect(),
                    return_type: Box::new(return_type),
                    variadic: def.ty.variadic,
                };

                if let Decl::FuncDecl(def) = self.unit.arena.decl_mut(decl) {
                    def.params = params;
                    def.ty = ty;
                }
            }
            Decl::NativeFuncDecl(def) => {
                let mut params = def.params.clone();
                for param in &mut params {
                    if param.ty == Type::Error {
                        if let Ok(ty) = self.resolve_type_expr(param.type_expr, table, None) {
                            param.ty = ty;
                        }
                    }
                }

                let return_type = match def.return_type_expr {
                    Some(expr) => self.resolve_type_expr(expr, table, None).unwrap_or(Type::Error),
                    None => (*def.ty.return_type).clone(),
                };

                let ty = FuncType {
                    params: params.iter().map(|p| p.ty.clone()).collect(),
                    return_type: Box::new(return_type),
                    variadic: def.ty.variadic,
                };

                if let Decl::NativeFuncDecl(def) = self.unit.arena.decl_mut(decl) {
                    def.params = params;
                    def.ty = ty;
                }
            }
            Decl::ConstDef(def) => {
                if let Some(type_expr) = def.type_expr {
                    if let Ok(ty) = self.resolve_type_expr(type_expr, table, None) {
                        if let Decl::ConstDef(def) = self.unit.arena.decl_mut(decl) {
                            def.ty = ty;
                        }
                    }
                }
            }
            Decl::StructDef(def) => {
                let generic_owner = if def.is_generic() { Some(decl) } else { None };
                let block_table = self.unit.arena.decl_block(def.block).table;

                for field in def.fields.clone() {
                    let (type_expr, needs_resolution) = match self.unit.arena.decl(field) {
                        Decl::StructField(f) => (f.type_expr, f.ty == Type::Error),
                        _ => continue,
                    };

                    if needs_resolution {
                        if let Ok(ty) = self.resolve_type_expr(type_expr, block_table, generic_owner)
                        {
                            if let Decl::StructField(f) = self.unit.arena.decl_mut(field) {
                                f.ty = ty;
                            }
                        }
                    }
                }

                self.analyze_block_headers(def.block, Some(decl));
            }
            Decl::VarDecl(def) => {
                if let Ok(ty) = self.resolve_type_expr(def.type_expr, table, None) {
                    if let Decl::VarDecl(def) = self.unit.arena.decl_mut(decl) {
                        def.ty = ty;
                    }
                }
            }
            Decl::NativeVarDecl(def) => {
                if let Ok(ty) = self.resolve_type_expr(def.type_expr, table, None) {
                    if let Decl::NativeVarDecl(def) = self.unit.arena.decl_mut(decl) {
                        def.ty = ty;
                    }
                }
            }
            Decl::EnumDef(def) => {
                self.analyze_block_headers(def.block, struct_ctx);
            }
            Decl::UnionDef(def) => {
                for case in def.cases.clone() {
                    let fields = match self.unit.arena.decl(case) {
                        Decl::UnionCase(c) => c.fields.clone(),
                        _ => continue,
                    };

                    let mut resolved = fields.clone();
                    for field in &mut resolved {
                        if field.ty == Type::Error {
                            if let Ok(ty) = self.resolve_type_expr(field.type_expr, table, None) {
                                field.ty = ty;
                            }
                        }
                    }

                    if let Decl::UnionCase(c) = self.unit.arena.decl_mut(case) {
                        c.fields = resolved;
                    }
                }

                self.analyze_block_headers(def.block, struct_ctx);
            }
            Decl::TypeAlias(def) => {
                if let Ok(ty) = self.resolve_type_expr(def.type_expr, table, None) {
                    if let Decl::TypeAlias(def) = self.unit.arena.decl_mut(decl) {
                        def.ty = ty;
                    }
                }
            }
            Decl::ProtoDef(def) => {
                for func_decl in def.func_decls {
                    self.analyze_decl_header(func_decl, table, struct_ctx);
                }
            }
            Decl::MetaIf(def) => {
                // Expanded declarations resolve in the enclosing scope.
                if let Some(chosen) = def.expanded {
                    let decls = self.unit.arena.decl_block(chosen).decls.clone();
                    for inner in decls {
                        self.analyze_decl_header(inner, table, struct_ctx);
                    }
                }
            }
            _ => {}
        }
    }

    pub fn analyze_decl_bodies(&mut self) {
        for module in self.unit.module_ids().collect::<Vec<_>>() {
            let block = self.unit.module(module).block;
            self.analyze_block_bodies(block, None);
        }
    }

    fn analyze_block_bodies(&mut self, block: DeclBlockId, struct_ctx: Option<DeclId>) {
        let table = self.unit.arena.decl_block(block).table;
        let decls = self.unit.arena.decl_block(block).decls.clone();

        for decl in decls {
            self.analyze_decl_body(decl, table, struct_ctx);
        }
    }

    pub fn analyze_decl_body(&mut self, decl: DeclId, table: TableId, struct_ctx: Option<DeclId>) {
        match self.unit.arena.decl(decl).clone() {
            Decl::FuncDef(def) => {
                if def.is_generic() {
                    return;
                }
                if let Some(struct_decl) = struct_ctx {
                    if self.is_generic_struct(struct_decl) {
                        return;
                    }
                }

                let body_table = self.unit.arena.block(def.block).table;

                // Materialize parameters in the body scope.
                for (index, param) in def.params.iter().enumerate() {
                    let name = param.ident.name.clone();
                    self.unit
                        .arena
                        .table_mut(body_table)
                        .insert(name, Symbol::Param { func: decl, index: index as u32 });
                }

                let scope = Scope {
                    table: body_table,
                    func: decl,
                    struct_ctx,
                    loop_depth: 0,
                };

                // One fatal error aborts this body; siblings continue.
                let _ = self.analyze_block(def.block, &scope);
            }
            Decl::ConstDef(def) => {
                let expected = if def.ty == Type::Error { None } else { Some(def.ty.clone()) };
                let scope = Scope {
                    table,
                    func: decl,
                    struct_ctx,
                    loop_depth: 0,
                };

                if let Ok(ty) = self.analyze_expr(def.value, &scope, expected.as_ref()) {
                    if let Decl::ConstDef(def) = self.unit.arena.decl_mut(decl) {
                        if def.ty == Type::Error {
                            def.ty = ty;
                        }
                    }
                }
            }
            Decl::VarDecl(def) => {
                if let Some(value) = def.value {
                    let scope = Scope {
                        table,
                        func: decl,
                        struct_ctx,
                        loop_depth: 0,
                    };
                    let expected = def.ty.clone();
                    let _ = self.analyze_expr(value, &scope, Some(&expected));
                }
            }
            Decl::StructDef(def) => {
                if def.is_generic() {
                    return;
                }
                self.analyze_block_bodies(def.block, Some(decl));
            }
            Decl::EnumDef(def) => {
                self.analyze_block_bodies(def.block, struct_ctx);
            }
            Decl::UnionDef(def) => {
                self.analyze_block_bodies(def.block, struct_ctx);
            }
            Decl::MetaIf(def) => {
                if let Some(chosen) = def.expanded {
                    let decls = self.unit.arena.decl_block(chosen).decls.clone();
                    for inner in decls {
                        self.analyze_decl_body(inner, table, struct_ctx);
                    }
                }
            }
            _ => {}
        }
    }

    /// Assign enum variant values: explicit expressions are const-evaluated,
    /// the rest count up from the previous variant.
    pub fn finalize_consts(&mut self) {
        for module in self.unit.module_ids().collect::<Vec<_>>() {
            let block = self.unit.module(module).block;
            let decls = self.unit.arena.decl_block(block).decls.clone();
            let table = self.unit.arena.decl_block(block).table;

            for decl in decls {
                if let Decl::EnumDef(def) = self.unit.arena.decl(decl) {
                    let variants = def.variants.clone();
                    let mut next_value: i128 = 0;

                    for variant in variants {
                        let value_expr = match self.unit.arena.decl(variant) {
                            Decl::EnumVariant(v) => v.value_expr,
                            _ => continue,
                        };

                        let value = match value_expr {
                            Some(expr) => match self.const_eval(table, expr) {
                                Ok(value) => value.as_int().unwrap_or(next_value),
                                Err(()) => next_value,
                            },
                            None => next_value,
                        };

                        if let Decl::EnumVariant(v) = self.unit.arena.decl_mut(variant) {
                            v.value = value;
                        }
                        next_value = value + 1;
                    }
                }
            }
        }
    }

    pub fn is_generic_struct(&self, decl: DeclId) -> bool {
        matches!(self.unit.arena.decl(decl), Decl::StructDef(def) if def.is_generic())
    }

    // -- type expression resolution -----------------------------------------

    /// Resolve a type expression to a concrete type. `generic_owner` makes
    /// the owner's generic parameters nameable.
    pub fn resolve_type_expr(
        &mut self,
        expr: ExprId,
        table: TableId,
        generic_owner: Option<DeclId>,
    ) -> AResult<Type> {
        let kind = self.unit.arena.expr(expr).kind.clone();
        let span = self.unit.arena.expr(expr).span;

        let ty = match kind {
            ExprKind::PrimitiveType(primitive) => Type::Primitive(primitive),
            ExprKind::PointerType(base) | ExprKind::Star(base) => {
                self.resolve_type_expr(base, table, generic_owner)?.pointer_to()
            }
            ExprKind::ReferenceType { mutable, base } => self
                .resolve_type_expr(base, table, generic_owner)?
                .reference_to(mutable),
            ExprKind::StaticArrayType { element, length } => {
                let element = self.resolve_type_expr(element, table, generic_owner)?;
                let length = self.const_eval(table, length)?;
                let Some(length) = length.as_int() else {
                    self.reports.error("array length must be an integer constant", span);
                    return Err(());
                };
                Type::StaticArray { element: Box::new(element), length: length as u64 }
            }
            ExprKind::FuncTypeExpr { params, return_type } => {
                let mut param_types = Vec::with_capacity(params.len());
                for param in params {
                    param_types.push(self.resolve_type_expr(param, table, generic_owner)?);
                }
                let return_type = match return_type {
                    Some(expr) => self.resolve_type_expr(expr, table, generic_owner)?,
                    None => Type::Primitive(banjo_sir::Primitive::Void),
                };
                Type::Func(FuncType::new(param_types, return_type))
            }
            ExprKind::ClosureTypeExpr { params, return_type } => {
                let mut param_types = Vec::with_capacity(params.len());
                for param in params {
                    param_types.push(self.resolve_type_expr(param, table, generic_owner)?);
                }
                let return_type = match return_type {
                    Some(expr) => self.resolve_type_expr(expr, table, generic_owner)?,
                    None => Type::Primitive(banjo_sir::Primitive::Void),
                };
                Type::Closure(FuncType::new(param_types, return_type))
            }
            ExprKind::TupleType(fields) => {
                let mut field_types = Vec::with_capacity(fields.len());
                for field in fields {
                    field_types.push(self.resolve_type_expr(field, table, generic_owner)?);
                }
                Type::Tuple(field_types)
            }
            ExprKind::OptionalType(base) => {
                let base = self.resolve_type_expr(base, table, generic_owner)?;
                let instance = Type::GenericInstance {
                    def: self.std_refs.optional,
                    args: vec![base],
                };
                self.normalize_type(instance, span)?
            }
            ExprKind::ResultType { value, error } => {
                let value = self.resolve_type_expr(value, table, generic_owner)?;
                let error = self.resolve_type_expr(error, table, generic_owner)?;
                let instance = Type::GenericInstance {
                    def: self.std_refs.result,
                    args: vec![value, error],
                };
                self.normalize_type(instance, span)?
            }
            ExprKind::ArrayType(element) => {
                let element = self.resolve_type_expr(element, table, generic_owner)?;
                let instance = Type::GenericInstance {
                    def: self.std_refs.array,
                    args: vec![element],
                };
                self.normalize_type(instance, span)?
            }
            ExprKind::Ident(ident) => {
                if let Some(owner) = generic_owner {
                    if let Some(index) = self.generic_param_index(owner, &ident.name) {
                        return Ok(Type::GenericParam { owner, index });
                    }
                }

                let Some(symbol) = self.unit.arena.lookup(table, &ident.name) else {
                    self.reports
                        .error(format!("undefined type '{}'", ident.name), ident.span);
                    return Err(());
                };
                self.symbol_to_type(symbol, span)?
            }
            ExprKind::Symbol(symbol) => self.symbol_to_type(symbol, span)?,
            ExprKind::Dot { lhs, rhs } => {
                let lhs_ty = self.resolve_module_of(lhs, table)?;
                let block = self.unit.module(lhs_ty).block;
                let module_table = self.unit.arena.decl_block(block).table;
                let Some(symbol) = self.unit.arena.table(module_table).get_local(&rhs.name).cloned()
                else {
                    self.reports.error(format!("undefined type '{}'", rhs.name), rhs.span);
                    return Err(());
                };
                self.symbol_to_type(symbol, span)?
            }
            ExprKind::Bracket { base, args } => {
                let base_kind = self.unit.arena.expr(base).kind.clone();
                let symbol = match base_kind {
                    ExprKind::Ident(ident) => self.unit.arena.lookup(table, &ident.name),
                    ExprKind::Symbol(symbol) => Some(symbol),
                    _ => None,
                };

                let Some(Symbol::Struct(def)) = symbol else {
                    self.reports.error("type arguments applied to a non-generic type", span);
                    return Err(());
                };

                let mut arg_types = Vec::with_capacity(args.len());
                for arg in args {
                    arg_types.push(self.resolve_type_expr(arg, table, generic_owner)?);
                }

                let instance = Type::GenericInstance { def, args: arg_types };
                self.normalize_type(instance, span)?
            }
            ExprKind::Error => Type::Error,
            _ => {
                self.reports.error("expected a type expression", span);
                return Err(());
            }
        };

        Ok(ty)
    }

    fn symbol_to_type(&mut self, symbol: Symbol, span: banjo_common::Span) -> AResult<Type> {
        match symbol {
            Symbol::Struct(decl) => {
                if self.is_generic_struct(decl) {
                    self.reports
                        .error("missing type arguments for generic struct", span);
                    Err(())
                } else {
                    Ok(Type::Struct(decl))
                }
            }
            Symbol::Enum(decl) => Ok(Type::Enum(decl)),
            Symbol::Union(decl) => Ok(Type::Union(decl)),
            Symbol::Proto(decl) => Ok(Type::Proto(decl)),
            Symbol::TypeAlias(decl) => match self.unit.arena.decl(decl) {
                Decl::TypeAlias(def) => Ok(def.ty.clone()),
                _ => Err(()),
            },
            Symbol::GenericParam { owner, index } => Ok(Type::GenericParam { owner, index }),
            _ => {
                self.reports.error("symbol does not name a type", span);
                Err(())
            }
        }
    }

    fn resolve_module_of(&mut self, expr: ExprId, table: TableId) -> AResult<banjo_sir::ModuleId> {
        let kind = self.unit.arena.expr(expr).kind.clone();
        let span = self.unit.arena.expr(expr).span;

        match kind {
            ExprKind::Ident(ident) => match self.unit.arena.lookup(table, &ident.name) {
                Some(Symbol::Module(module)) => Ok(module),
                _ => {
                    self.reports.error("path does not name a module", ident.span);
                    Err(())
                }
            },
            _ => {
                self.reports.error("path does not name a module", span);
                Err(())
            }
        }
    }

    pub fn generic_param_index(&self, owner: DeclId, name: &str) -> Option<u32> {
        let params = match self.unit.arena.decl(owner) {
            Decl::FuncDef(def) => &def.generic_params,
            Decl::StructDef(def) => &def.generic_params,
            _ => return None,
        };

        params
            .iter()
            .position(|p| p.ident.name == name)
            .map(|index| index as u32)
    }
}
