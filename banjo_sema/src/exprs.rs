//! Expression analysis and finalization
//!
//! Two phases per expression: bottom-up typing with no expected type
//! (literals keep pseudo types), then finalization against the expected
//! type, which applies the coercion table or picks defaults (int -> i32,
//! float -> f32, null -> addr, string -> std.String).

use crate::{AResult, Scope, SemanticAnalyzer};
use banjo_common::Span;
use banjo_sir::{
    mangle::type_name, BinaryOp, Decl, DeclId, Expr, ExprId, ExprKind, Ident, Primitive,
    PseudoKind, StructLayout, Symbol, Type, UnaryOp,
};

impl SemanticAnalyzer<'_> {
    /// Analyze and finalize an expression.
    pub fn analyze_expr(
        &mut self,
        expr: ExprId,
        scope: &Scope,
        expected: Option<&Type>,
    ) -> AResult<Type> {
        self.analyze_expr_inner(expr, scope)?;
        self.finalize_expr(expr, scope, expected)
    }

    /// Re-apply finalization to an already-analyzed expression, inserting
    /// coercions against a new expected type.
    pub fn coerce_expr(&mut self, expr: ExprId, scope: &Scope, expected: &Type) -> AResult<Type> {
        self.finalize_expr(expr, scope, Some(expected))
    }

    // -- phase 1: bottom-up typing ------------------------------------------

    pub fn analyze_expr_inner(&mut self, expr: ExprId, scope: &Scope) -> AResult<()> {
        let kind = self.unit.arena.expr(expr).kind.clone();
        let span = self.unit.arena.expr(expr).span;

        let ty = match kind {
            ExprKind::IntLiteral(_) => Type::Pseudo(PseudoKind::IntLiteral),
            ExprKind::FpLiteral(_) => Type::Pseudo(PseudoKind::FpLiteral),
            ExprKind::BoolLiteral(_) => Type::Primitive(Primitive::Bool),
            ExprKind::CharLiteral(_) => Type::Primitive(Primitive::U8),
            ExprKind::NullLiteral => Type::Pseudo(PseudoKind::NullLiteral),
            ExprKind::NoneLiteral => Type::Pseudo(PseudoKind::NoneLiteral),
            ExprKind::UndefinedLiteral => Type::Pseudo(PseudoKind::UndefinedLiteral),
            ExprKind::StringLiteral(_) => Type::Pseudo(PseudoKind::StringLiteral),
            ExprKind::ArrayLiteral(elements) => {
                for element in &elements {
                    self.analyze_expr_inner(*element, scope)?;
                }
                Type::Pseudo(PseudoKind::ArrayLiteral)
            }
            ExprKind::MapLiteral(entries) => {
                for (key, value) in &entries {
                    self.analyze_expr_inner(*key, scope)?;
                    self.analyze_expr_inner(*value, scope)?;
                }
                Type::Pseudo(PseudoKind::MapLiteral)
            }
            ExprKind::Tuple(fields) => {
                let mut types = Vec::with_capacity(fields.len());
                for field in &fields {
                    types.push(self.analyze_expr(*field, scope, None)?);
                }
                Type::Tuple(types)
            }
            ExprKind::StructLiteral { type_expr: Some(type_expr), .. } => {
                let ty = self.resolve_type_expr(type_expr, scope.table, None)?;
                let Some(decl) = ty.as_struct() else {
                    self.reports.error("struct literal type is not a struct", span);
                    return Err(());
                };
                self.analyze_struct_literal(expr, decl, scope)?;
                Type::Struct(decl)
            }
            // Without a named type, the expected type resolves the literal
            // during finalization.
            ExprKind::StructLiteral { type_expr: None, .. } => Type::Pseudo(PseudoKind::UndefinedLiteral),
            ExprKind::Ident(ident) => {
                let Some(symbol) = self.unit.arena.lookup(scope.table, &ident.name) else {
                    self.reports
                        .error(format!("undefined symbol '{}'", ident.name), ident.span);
                    return Err(());
                };
                let ty = self.symbol_value_type(&symbol, span)?;
                self.unit.arena.expr_mut(expr).kind = ExprKind::Symbol(symbol);
                ty
            }
            ExprKind::Symbol(symbol) => self.symbol_value_type(&symbol, span)?,
            ExprKind::Binary { op, lhs, rhs } => self.analyze_binary(op, lhs, rhs, scope, span)?,
            ExprKind::Unary { op, value } => self.analyze_unary(expr, op, value, scope, span)?,
            ExprKind::Star(value) => {
                // In value position a star is a dereference.
                self.unit.arena.expr_mut(expr).kind = ExprKind::Unary {
                    op: UnaryOp::Deref,
                    value,
                };
                self.analyze_unary(expr, UnaryOp::Deref, value, scope, span)?
            }
            ExprKind::Cast { value, target } => {
                self.analyze_expr(value, scope, None)?;
                self.resolve_type_expr(target, scope.table, None)?
            }
            ExprKind::Coercion { value } => {
                // Already inserted by a previous pass; keep its type.
                let _ = value;
                self.unit.arena.expr(expr).ty.clone()
            }
            ExprKind::Index { base, index } => {
                let base_ty = self.analyze_expr(base, scope, None)?;
                self.analyze_expr(index, scope, Some(&Type::Primitive(Primitive::U64)))?;
                self.index_element_type(&base_ty, span)?
            }
            ExprKind::Call { callee, args } => self.analyze_call(expr, callee, args, scope, span)?,
            ExprKind::Field { base, field, .. } => {
                self.analyze_expr(base, scope, None)?;
                match self.unit.arena.decl(field) {
                    Decl::StructField(f) => f.ty.clone(),
                    _ => Type::Error,
                }
            }
            ExprKind::TupleField { base, index } => {
                let base_ty = self.analyze_expr(base, scope, None)?;
                match base_ty {
                    Type::Tuple(fields) => {
                        fields.get(index as usize).cloned().unwrap_or(Type::Error)
                    }
                    _ => Type::Error,
                }
            }
            ExprKind::Dot { lhs, rhs } => self.analyze_dot(expr, lhs, &rhs, scope, span)?,
            ExprKind::Range { start, end } => {
                self.analyze_expr(start, scope, None)?;
                self.analyze_expr(end, scope, None)?;
                self.reports
                    .error("range expression outside of a for statement", span);
                return Err(());
            }
            ExprKind::Bracket { base, args } => {
                // Generic function specialization used as a value.
                let func = self.resolve_bracket_func(base, &args, scope, span)?;
                let ty = self.symbol_value_type(&Symbol::Func(func), span)?;
                self.unit.arena.expr_mut(expr).kind = ExprKind::Symbol(Symbol::Func(func));
                ty
            }
            ExprKind::MetaAccess { .. } | ExprKind::MetaField { .. } | ExprKind::MetaCall { .. } => {
                let value = self.const_eval_meta(scope.table, expr)?;
                self.replace_with_const(expr, value)
            }
            ExprKind::Closure { .. } => {
                self.reports
                    .error("closure literals are not supported in this context", span);
                return Err(());
            }
            ExprKind::Error => Type::Error,
            // Type expressions in value position.
            _ => {
                self.reports.error("expected a value expression", span);
                return Err(());
            }
        };

        self.unit.arena.expr_mut(expr).ty = ty;
        Ok(())
    }

    fn analyze_binary(
        &mut self,
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
        scope: &Scope,
        span: Span,
    ) -> AResult<Type> {
        if op.is_logical() {
            let bool_ty = Type::Primitive(Primitive::Bool);
            self.analyze_expr(lhs, scope, Some(&bool_ty))?;
            self.analyze_expr(rhs, scope, Some(&bool_ty))?;
            return Ok(bool_ty);
        }

        self.analyze_expr_inner(lhs, scope)?;
        self.analyze_expr_inner(rhs, scope)?;

        let lhs_ty = self.unit.arena.expr(lhs).ty.clone();
        let rhs_ty = self.unit.arena.expr(rhs).ty.clone();

        let operand_ty = if !lhs_ty.is_pseudo() {
            let ty = self.finalize_expr(lhs, scope, None)?;
            self.finalize_expr(rhs, scope, Some(&ty))?;
            ty
        } else if !rhs_ty.is_pseudo() {
            let ty = self.finalize_expr(rhs, scope, None)?;
            self.finalize_expr(lhs, scope, Some(&ty))?;
            ty
        } else {
            let ty = self.finalize_expr(lhs, scope, None)?;
            self.finalize_expr(rhs, scope, Some(&ty))?;
            ty
        };

        if op.is_comparison() {
            return Ok(Type::Primitive(Primitive::Bool));
        }

        if !operand_ty.is_integer() && !operand_ty.is_fp() && !operand_ty.is_addr_like() {
            self.reports.error(
                format!(
                    "binary operator cannot be applied to '{}'",
                    type_name(self.unit, &operand_ty)
                ),
                span,
            );
            return Err(());
        }

        Ok(operand_ty)
    }

    fn analyze_unary(
        &mut self,
        _expr: ExprId,
        op: UnaryOp,
        value: ExprId,
        scope: &Scope,
        span: Span,
    ) -> AResult<Type> {
        match op {
            UnaryOp::Neg => {
                let ty = self.analyze_expr(value, scope, None)?;
                if !ty.is_integer() && !ty.is_fp() {
                    self.reports.error("cannot negate a non-numeric value", span);
                    return Err(());
                }
                Ok(ty)
            }
            UnaryOp::Not => {
                let bool_ty = Type::Primitive(Primitive::Bool);
                self.analyze_expr(value, scope, Some(&bool_ty))?;
                Ok(bool_ty)
            }
            UnaryOp::BitNot => {
                let ty = self.analyze_expr(value, scope, None)?;
                if !ty.is_integer() {
                    self.reports.error("bitwise not requires an integer", span);
                    return Err(());
                }
                Ok(ty)
            }
            UnaryOp::Addr => {
                let ty = self.analyze_expr(value, scope, None)?;
                Ok(ty.pointer_to())
            }
            UnaryOp::Ref => {
                let ty = self.analyze_expr(value, scope, None)?;
                Ok(ty.reference_to(true))
            }
            UnaryOp::Deref => {
                let ty = self.analyze_expr(value, scope, None)?;
                match ty {
                    Type::Pointer(base) => Ok(*base),
                    Type::Reference { base, .. } => Ok(*base),
                    Type::Primitive(Primitive::Addr) => Ok(Type::Primitive(Primitive::U8)),
                    other => {
                        self.reports.error(
                            format!("cannot dereference '{}'", type_name(self.unit, &other)),
                            span,
                        );
                        Err(())
                    }
                }
            }
        }
    }

    fn analyze_dot(
        &mut self,
        expr: ExprId,
        lhs: ExprId,
        rhs: &Ident,
        scope: &Scope,
        span: Span,
    ) -> AResult<Type> {
        // Static paths first: module members, enum variants, struct members.
        if let Some(symbol) = self.resolve_static_path(lhs, scope) {
            match symbol {
                Symbol::Module(module) => {
                    let block = self.unit.module(module).block;
                    let table = self.unit.arena.decl_block(block).table;
                    let Some(member) = self.unit.arena.table(table).get_local(&rhs.name).cloned()
                    else {
                        self.reports
                            .error(format!("undefined symbol '{}'", rhs.name), rhs.span);
                        return Err(());
                    };
                    let ty = self.symbol_value_type(&member, span)?;
                    self.unit.arena.expr_mut(expr).kind = ExprKind::Symbol(member);
                    return Ok(ty);
                }
                Symbol::Enum(decl) => {
                    let Some(variant) = self.find_enum_variant(decl, &rhs.name) else {
                        self.reports
                            .error(format!("enum has no variant '{}'", rhs.name), rhs.span);
                        return Err(());
                    };
                    self.unit.arena.expr_mut(expr).kind =
                        ExprKind::Symbol(Symbol::EnumVariant(variant));
                    return Ok(Type::Enum(decl));
                }
                Symbol::Struct(decl) => {
                    let Some(member) = self.struct_member(decl, &rhs.name) else {
                        self.reports
                            .error(format!("struct has no member '{}'", rhs.name), rhs.span);
                        return Err(());
                    };
                    let ty = self.symbol_value_type(&member, span)?;
                    self.unit.arena.expr_mut(expr).kind = ExprKind::Symbol(member);
                    return Ok(ty);
                }
                _ => {}
            }
        }

        // Value path: field access with auto-deref through pointers and
        // references.
        let base_ty = self.analyze_expr(lhs, scope, None)?;
        let (struct_decl, base) = self.deref_to_struct(lhs, base_ty.clone(), scope)?;

        if let Some(decl) = struct_decl {
            if let Some((field, index, field_ty)) = self.find_struct_field(decl, &rhs.name) {
                self.unit.arena.expr_mut(expr).kind = ExprKind::Field { base, field, index };
                return Ok(field_ty);
            }

            self.reports.error(
                format!(
                    "no field '{}' on '{}'",
                    rhs.name,
                    type_name(self.unit, &Type::Struct(decl))
                ),
                rhs.span,
            );
            return Err(());
        }

        if let Type::Tuple(fields) = &base_ty {
            if let Ok(index) = rhs.name.parse::<u32>() {
                let Some(field_ty) = fields.get(index as usize).cloned() else {
                    self.reports.error("tuple field index out of range", rhs.span);
                    return Err(());
                };
                self.unit.arena.expr_mut(expr).kind = ExprKind::TupleField { base, index };
                return Ok(field_ty);
            }
        }

        self.reports.error(
            format!(
                "type '{}' has no member '{}'",
                type_name(self.unit, &base_ty),
                rhs.name
            ),
            span,
        );
        Err(())
    }

    /// Resolve `lhs` as a static path element (module / type name) without
    /// treating it as a value.
    pub(crate) fn resolve_static_path(&mut self, expr: ExprId, scope: &Scope) -> Option<Symbol> {
        let kind = self.unit.arena.expr(expr).kind.clone();
        match kind {
            ExprKind::Ident(ident) => {
                let symbol = self.unit.arena.lookup(scope.table, &ident.name)?;
                match symbol {
                    Symbol::Module(_)
                    | Symbol::Enum(_)
                    | Symbol::Union(_)
                    | Symbol::Struct(_)
                    | Symbol::Proto(_) => Some(symbol),
                    _ => None,
                }
            }
            ExprKind::Symbol(symbol) => match symbol {
                Symbol::Module(_)
                | Symbol::Enum(_)
                | Symbol::Union(_)
                | Symbol::Struct(_)
                | Symbol::Proto(_) => Some(symbol),
                _ => None,
            },
            ExprKind::Dot { lhs, rhs } => {
                let Symbol::Module(module) = self.resolve_static_path(lhs, scope)? else {
                    return None;
                };
                let block = self.unit.module(module).block;
                let table = self.unit.arena.decl_block(block).table;
                let symbol = self.unit.arena.table(table).get_local(&rhs.name).cloned()?;
                match symbol {
                    Symbol::Module(_)
                    | Symbol::Enum(_)
                    | Symbol::Union(_)
                    | Symbol::Struct(_)
                    | Symbol::Proto(_) => Some(symbol),
                    _ => None,
                }
            }
            ExprKind::Bracket { base, args } => {
                // A specialized generic struct used as a static path.
                let base_symbol = self.resolve_static_path(base, scope)?;
                let Symbol::Struct(def) = base_symbol else { return None };

                let mut arg_types = Vec::with_capacity(args.len());
                for arg in &args {
                    arg_types.push(self.resolve_type_expr(*arg, scope.table, None).ok()?);
                }

                let span = self.unit.arena.expr(expr).span;
                let spec = self.specialize_struct(def, arg_types, span).ok()?;
                Some(Symbol::Struct(spec))
            }
            _ => None,
        }
    }

    /// Auto-deref a struct-valued base: pointers and references to structs
    /// are wrapped in a deref so field access sees the struct itself.
    fn deref_to_struct(
        &mut self,
        base: ExprId,
        base_ty: Type,
        _scope: &Scope,
    ) -> AResult<(Option<DeclId>, ExprId)> {
        match base_ty {
            Type::Struct(decl) => Ok((Some(decl), base)),
            Type::Pointer(inner) | Type::Reference { base: inner, .. } => {
                if let Type::Struct(decl) = *inner {
                    let old = self.unit.arena.expr(base).clone();
                    let inner_id = self.unit.arena.alloc_expr(old);
                    let deref = Expr::new(
                        ExprKind::Unary { op: UnaryOp::Deref, value: inner_id },
                        Type::Struct(decl),
                        self.unit.arena.expr(base).span,
                    );
                    *self.unit.arena.expr_mut(base) = deref;
                    Ok((Some(decl), base))
                } else {
                    Ok((None, base))
                }
            }
            _ => Ok((None, base)),
        }
    }

    pub(crate) fn find_struct_field(
        &self,
        decl: DeclId,
        name: &str,
    ) -> Option<(DeclId, u32, Type)> {
        let Decl::StructDef(def) = self.unit.arena.decl(decl) else {
            return None;
        };

        for field in &def.fields {
            if let Decl::StructField(f) = self.unit.arena.decl(*field) {
                if f.ident.name == name {
                    return Some((*field, f.index, f.ty.clone()));
                }
            }
        }
        None
    }

    pub(crate) fn struct_member(&self, decl: DeclId, name: &str) -> Option<Symbol> {
        let Decl::StructDef(def) = self.unit.arena.decl(decl) else {
            return None;
        };
        let table = self.unit.arena.decl_block(def.block).table;
        self.unit.arena.table(table).get_local(name).cloned()
    }

    fn index_element_type(&mut self, base_ty: &Type, span: Span) -> AResult<Type> {
        match base_ty {
            Type::StaticArray { element, .. } => Ok((**element).clone()),
            Type::Pointer(base) => Ok((**base).clone()),
            Type::Struct(decl) => {
                // std.Array specializations index their element type.
                if let Decl::StructDef(def) = self.unit.arena.decl(*decl) {
                    if def.specialization_of == Some(self.std_refs.array) {
                        return Ok(def.specialization_args[0].clone());
                    }
                }
                self.reports.error("type cannot be indexed", span);
                Err(())
            }
            _ => {
                self.reports.error("type cannot be indexed", span);
                Err(())
            }
        }
    }

    pub(crate) fn symbol_value_type(&mut self, symbol: &Symbol, span: Span) -> AResult<Type> {
        match symbol {
            Symbol::Local(stmt) => match self.unit.arena.stmt(*stmt) {
                banjo_sir::Stmt::Var(var) => Ok(var.ty.clone()),
                _ => Err(()),
            },
            Symbol::Param { func, index } => {
                let params = match self.unit.arena.decl(*func) {
                    Decl::FuncDef(def) => &def.params,
                    Decl::FuncDecl(def) => &def.params,
                    Decl::NativeFuncDecl(def) => &def.params,
                    _ => return Err(()),
                };
                Ok(params
                    .get(*index as usize)
                    .map(|p| p.ty.clone())
                    .unwrap_or(Type::Error))
            }
            Symbol::Const(decl) => {
                let ty = match self.unit.arena.decl(*decl) {
                    Decl::ConstDef(def) => def.ty.clone(),
                    _ => return Err(()),
                };
                Ok(ty)
            }
            Symbol::Var(decl) => match self.unit.arena.decl(*decl) {
                Decl::VarDecl(def) => Ok(def.ty.clone()),
                _ => Err(()),
            },
            Symbol::NativeVar(decl) => match self.unit.arena.decl(*decl) {
                Decl::NativeVarDecl(def) => Ok(def.ty.clone()),
                _ => Err(()),
            },
            Symbol::Func(decl) => match self.unit.arena.decl(*decl) {
                Decl::FuncDef(def) => {
                    if def.is_generic() {
                        self.reports.error(
                            "cannot infer type arguments of a generic function",
                            span,
                        );
                        Err(())
                    } else {
                        Ok(Type::Func(def.ty.clone()))
                    }
                }
                _ => Err(()),
            },
            Symbol::NativeFunc(decl) => match self.unit.arena.decl(*decl) {
                Decl::NativeFuncDecl(def) => Ok(Type::Func(def.ty.clone())),
                _ => Err(()),
            },
            Symbol::ExternFunc(decl) => match self.unit.arena.decl(*decl) {
                Decl::FuncDecl(def) => Ok(Type::Func(def.ty.clone())),
                _ => Err(()),
            },
            Symbol::EnumVariant(decl) => {
                let parent = self.enum_of_variant(*decl);
                match parent {
                    Some(parent) => Ok(Type::Enum(parent)),
                    None => Err(()),
                }
            }
            Symbol::OverloadSet(_) => {
                self.reports
                    .error("overloaded function requires a call to resolve", span);
                Err(())
            }
            _ => {
                self.reports.error("expected a value, found a type", span);
                Err(())
            }
        }
    }

    pub(crate) fn enum_of_variant(&self, variant: DeclId) -> Option<DeclId> {
        for index in 0..self.unit.arena.num_decls() {
            let decl = DeclId(index as u32);
            if let Decl::EnumDef(def) = self.unit.arena.decl(decl) {
                if def.variants.contains(&variant) {
                    return Some(decl);
                }
            }
        }
        None
    }

    fn replace_with_const(&mut self, expr: ExprId, value: crate::consteval::ConstValue) -> Type {
        use crate::consteval::ConstValue;

        match value {
            ConstValue::Int(v) => {
                self.unit.arena.expr_mut(expr).kind = ExprKind::IntLiteral(v);
                Type::Pseudo(PseudoKind::IntLiteral)
            }
            ConstValue::Bool(v) => {
                self.unit.arena.expr_mut(expr).kind = ExprKind::BoolLiteral(v);
                Type::Primitive(Primitive::Bool)
            }
            ConstValue::Fp(v) => {
                self.unit.arena.expr_mut(expr).kind = ExprKind::FpLiteral(v);
                Type::Pseudo(PseudoKind::FpLiteral)
            }
            ConstValue::Str(v) => {
                self.unit.arena.expr_mut(expr).kind = ExprKind::StringLiteral(v);
                Type::Pseudo(PseudoKind::StringLiteral)
            }
            _ => Type::Error,
        }
    }

    // -- struct literals ----------------------------------------------------

    pub(crate) fn analyze_struct_literal(
        &mut self,
        expr: ExprId,
        decl: DeclId,
        scope: &Scope,
    ) -> AResult<()> {
        let ExprKind::StructLiteral { entries, type_expr } = self.unit.arena.expr(expr).kind.clone()
        else {
            return Err(());
        };
        let span = self.unit.arena.expr(expr).span;

        let layout = match self.unit.arena.decl(decl) {
            Decl::StructDef(def) => def.layout,
            _ => return Err(()),
        };

        let num_fields = match self.unit.arena.decl(decl) {
            Decl::StructDef(def) => def.fields.len(),
            _ => 0,
        };

        let mut seen = vec![false; num_fields];
        let mut resolved_entries = entries.clone();

        for entry in &mut resolved_entries {
            let Some((_, index, field_ty)) = self.find_struct_field(decl, &entry.ident.name) else {
                self.reports.error(
                    format!("struct has no field '{}'", entry.ident.name),
                    entry.ident.span,
                );
                return Err(());
            };

            if seen[index as usize] {
                self.reports.error(
                    format!("duplicate field '{}' in struct literal", entry.ident.name),
                    entry.ident.span,
                );
                return Err(());
            }
            seen[index as usize] = true;
            entry.field_index = Some(index);

            self.analyze_expr(entry.value, scope, Some(&field_ty))?;
        }

        match layout {
            StructLayout::Overlapping => {
                if resolved_entries.len() != 1 {
                    self.reports.error(
                        "overlapping struct literal requires exactly one field",
                        span,
                    );
                    return Err(());
                }
            }
            StructLayout::Default => {
                if let Some(missing) = seen.iter().position(|s| !s) {
                    let name = self.field_name(decl, missing as u32);
                    self.reports
                        .error(format!("missing field '{}' in struct literal", name), span);
                    return Err(());
                }
            }
        }

        self.unit.arena.expr_mut(expr).kind = ExprKind::StructLiteral {
            type_expr,
            entries: resolved_entries,
        };
        self.unit.arena.expr_mut(expr).ty = Type::Struct(decl);
        Ok(())
    }

    fn field_name(&self, decl: DeclId, index: u32) -> String {
        let Decl::StructDef(def) = self.unit.arena.decl(decl) else {
            return String::new();
        };
        def.fields
            .get(index as usize)
            .and_then(|f| match self.unit.arena.decl(*f) {
                Decl::StructField(field) => Some(field.ident.name.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }
}
