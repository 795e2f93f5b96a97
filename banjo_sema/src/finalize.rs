//! Expression finalization and the coercion table
//!
//! Finalization runs after bottom-up typing. With no expected type it
//! picks defaults for pseudo-typed literals; with an expected type it
//! applies the coercion table, rewriting the expression in place (type
//! rewrites, `CoercionExpr` wrappers, or calls into std constructors).

use crate::{AResult, Scope, SemanticAnalyzer};
use banjo_common::Span;
use banjo_sir::{
    mangle::type_name, Decl, DeclId, Expr, ExprId, ExprKind, Primitive, PseudoKind, Symbol, Type,
    UnaryOp,
};

impl SemanticAnalyzer<'_> {
    pub fn finalize_expr(
        &mut self,
        expr: ExprId,
        scope: &Scope,
        expected: Option<&Type>,
    ) -> AResult<Type> {
        let ty = self.unit.arena.expr(expr).ty.clone();
        let span = self.unit.arena.expr(expr).span;

        let Some(expected) = expected else {
            return self.finalize_default(expr, scope, ty, span);
        };

        // Already the right type.
        if &ty == expected {
            return Ok(ty);
        }

        match (&ty, expected) {
            // Pseudo-typed literals adopt compatible expected types.
            (Type::Pseudo(PseudoKind::IntLiteral), e)
                if e.is_integer() || e.is_primitive(Primitive::Addr) =>
            {
                self.unit.arena.expr_mut(expr).ty = e.clone();
                Ok(e.clone())
            }
            (Type::Pseudo(PseudoKind::IntLiteral), e) if e.is_fp() => {
                // An integer literal in float position becomes a float
                // literal.
                if let ExprKind::IntLiteral(value) = self.unit.arena.expr(expr).kind.clone() {
                    self.unit.arena.expr_mut(expr).kind = ExprKind::FpLiteral(value as f64);
                }
                self.unit.arena.expr_mut(expr).ty = e.clone();
                Ok(e.clone())
            }
            (Type::Pseudo(PseudoKind::FpLiteral), e) if e.is_fp() => {
                self.unit.arena.expr_mut(expr).ty = e.clone();
                Ok(e.clone())
            }
            (Type::Pseudo(PseudoKind::NullLiteral), e) if e.is_addr_like() => {
                self.unit.arena.expr_mut(expr).ty = e.clone();
                Ok(e.clone())
            }
            (Type::Pseudo(PseudoKind::UndefinedLiteral), e) => {
                // Undefined adopts any type; struct literals without a named
                // type resolve against the expected struct.
                if let ExprKind::StructLiteral { .. } = self.unit.arena.expr(expr).kind {
                    let Some(decl) = e.as_struct() else {
                        return self.type_mismatch(&ty, e, span);
                    };
                    self.analyze_struct_literal(expr, decl, scope)?;
                    return Ok(e.clone());
                }
                self.unit.arena.expr_mut(expr).ty = e.clone();
                Ok(e.clone())
            }
            (Type::Pseudo(PseudoKind::NoneLiteral), e) => {
                let Some(optional) = self.optional_value_type(e) else {
                    return self.type_mismatch(&ty, e, span);
                };
                let _ = optional;
                self.rewrite_to_std_call(expr, e, "new_none", Vec::new(), span)?;
                Ok(e.clone())
            }
            (Type::Pseudo(PseudoKind::StringLiteral), e) => {
                self.finalize_string_literal(expr, e, span)
            }
            (Type::Pseudo(PseudoKind::ArrayLiteral), e) => {
                self.finalize_array_literal(expr, e, scope, span)
            }
            (Type::Pseudo(PseudoKind::MapLiteral), e) => {
                self.finalize_map_literal(expr, e, scope, span)
            }
            // Tuples coerce field by field.
            (Type::Tuple(fields), Type::Tuple(expected_fields))
                if fields.len() == expected_fields.len() =>
            {
                let ExprKind::Tuple(elements) = self.unit.arena.expr(expr).kind.clone() else {
                    return self.type_mismatch(&ty, expected, span);
                };
                let expected_fields = expected_fields.clone();
                for (element, field_ty) in elements.iter().zip(&expected_fields) {
                    self.coerce_expr(*element, scope, field_ty)?;
                }
                self.unit.arena.expr_mut(expr).ty = expected.clone();
                Ok(expected.clone())
            }
            // Address-like values coerce to the addr primitive.
            (s, Type::Primitive(Primitive::Addr)) if s.is_addr_like() => {
                self.wrap_in_coercion(expr, expected.clone());
                Ok(expected.clone())
            }
            // Any value coerces to a reference of its own type.
            (s, Type::Reference { mutable, base }) if **base == *s => {
                if *mutable {
                    self.check_mutable(expr, span)?;
                }
                self.wrap_in_unary(expr, UnaryOp::Ref, expected.clone());
                Ok(expected.clone())
            }
            // Pointer-to-struct coerces to a pointer to an implemented
            // protocol.
            (Type::Pointer(inner), Type::Pointer(proto_inner)) => {
                let (Type::Struct(struct_decl), Type::Proto(proto_decl)) =
                    (&**inner, &**proto_inner)
                else {
                    return self.type_mismatch(&ty, expected, span);
                };

                if self.struct_implements(*struct_decl, *proto_decl) {
                    self.wrap_in_coercion(expr, expected.clone());
                    Ok(expected.clone())
                } else {
                    self.type_mismatch(&ty, expected, span)
                }
            }
            // A struct instance coerces to a union with a matching case.
            (Type::Struct(struct_decl), Type::Union(union_decl)) => {
                if self.union_case_for_struct(*union_decl, *struct_decl).is_some() {
                    self.wrap_in_coercion(expr, expected.clone());
                    Ok(expected.clone())
                } else {
                    self.type_mismatch(&ty, expected, span)
                }
            }
            // Values wrap into Optional / Result specializations.
            (s, e) => {
                if let Some(value_ty) = self.optional_value_type(e) {
                    if value_ty == *s {
                        self.rewrite_to_std_call(expr, e, "new_some", vec![expr], span)?;
                        return Ok(e.clone());
                    }
                }

                if let Some((value_ty, error_ty)) = self.result_value_types(e) {
                    if value_ty == *s {
                        self.rewrite_to_std_call(expr, e, "new_success", vec![expr], span)?;
                        return Ok(e.clone());
                    }
                    if error_ty == *s {
                        self.rewrite_to_std_call(expr, e, "new_failure", vec![expr], span)?;
                        return Ok(e.clone());
                    }
                }

                self.type_mismatch(&ty, expected, span)
            }
        }
    }

    fn finalize_default(
        &mut self,
        expr: ExprId,
        scope: &Scope,
        ty: Type,
        span: Span,
    ) -> AResult<Type> {
        match ty {
            Type::Pseudo(PseudoKind::IntLiteral) => {
                let ty = Type::Primitive(Primitive::I32);
                self.unit.arena.expr_mut(expr).ty = ty.clone();
                Ok(ty)
            }
            Type::Pseudo(PseudoKind::FpLiteral) => {
                let ty = Type::Primitive(Primitive::F32);
                self.unit.arena.expr_mut(expr).ty = ty.clone();
                Ok(ty)
            }
            Type::Pseudo(PseudoKind::NullLiteral) => {
                let ty = Type::Primitive(Primitive::Addr);
                self.unit.arena.expr_mut(expr).ty = ty.clone();
                Ok(ty)
            }
            Type::Pseudo(PseudoKind::StringLiteral) => {
                let string_ty = Type::Struct(self.std_refs.string);
                self.finalize_string_literal(expr, &string_ty, span)
            }
            Type::Pseudo(PseudoKind::ArrayLiteral) => {
                let ExprKind::ArrayLiteral(elements) = self.unit.arena.expr(expr).kind.clone()
                else {
                    return Err(());
                };

                let Some(first) = elements.first() else {
                    self.reports
                        .error("cannot infer the element type of an empty array", span);
                    return Err(());
                };

                let element_ty = self.finalize_expr(*first, scope, None)?;
                let array_ty = Type::GenericInstance {
                    def: self.std_refs.array,
                    args: vec![element_ty],
                };
                let array_ty = self.normalize_type(array_ty, span)?;
                self.finalize_array_literal(expr, &array_ty.clone(), scope, span)
            }
            Type::Pseudo(PseudoKind::MapLiteral) => {
                let ExprKind::MapLiteral(entries) = self.unit.arena.expr(expr).kind.clone() else {
                    return Err(());
                };

                let Some((first_key, first_value)) = entries.first() else {
                    self.reports
                        .error("cannot infer the entry types of an empty map", span);
                    return Err(());
                };

                let key_ty = self.finalize_expr(*first_key, scope, None)?;
                let value_ty = self.finalize_expr(*first_value, scope, None)?;
                let map_ty = Type::GenericInstance {
                    def: self.std_refs.map,
                    args: vec![key_ty, value_ty],
                };
                let map_ty = self.normalize_type(map_ty, span)?;
                self.finalize_map_literal(expr, &map_ty.clone(), scope, span)
            }
            Type::Pseudo(_) => {
                self.reports.error("cannot infer the type of this expression", span);
                Err(())
            }
            concrete => Ok(concrete),
        }
    }

    fn finalize_string_literal(&mut self, expr: ExprId, expected: &Type, span: Span) -> AResult<Type> {
        // Keep as a C string for u8 pointers.
        if let Type::Pointer(inner) = expected {
            if inner.is_primitive(Primitive::U8) {
                self.unit.arena.expr_mut(expr).ty = expected.clone();
                return Ok(expected.clone());
            }
        }

        if let Type::Primitive(Primitive::Addr) = expected {
            self.unit.arena.expr_mut(expr).ty = expected.clone();
            return Ok(expected.clone());
        }

        let Some(decl) = expected.as_struct() else {
            return self.type_mismatch(&Type::Pseudo(PseudoKind::StringLiteral), expected, span);
        };

        let method = if decl == self.std_refs.string {
            "from_cstr"
        } else if decl == self.std_refs.string_slice {
            "of_cstring"
        } else {
            return self.type_mismatch(&Type::Pseudo(PseudoKind::StringLiteral), expected, span);
        };

        // Clone the literal as the *u8 argument and call the constructor.
        let literal = self.unit.arena.expr(expr).clone();
        let u8_ptr = Type::Primitive(Primitive::U8).pointer_to();
        let arg = self
            .unit
            .arena
            .alloc_expr(Expr::new(literal.kind, u8_ptr, literal.span));

        self.rewrite_to_std_call(expr, expected, method, vec![arg], span)?;
        Ok(expected.clone())
    }

    fn finalize_array_literal(
        &mut self,
        expr: ExprId,
        expected: &Type,
        scope: &Scope,
        span: Span,
    ) -> AResult<Type> {
        let ExprKind::ArrayLiteral(elements) = self.unit.arena.expr(expr).kind.clone() else {
            return Err(());
        };

        // Static array target: check the length, coerce the elements.
        if let Type::StaticArray { element, length } = expected {
            if elements.len() as u64 != *length {
                self.reports.error(
                    format!(
                        "expected {} array elements, found {}",
                        length,
                        elements.len()
                    ),
                    span,
                );
                return Err(());
            }

            let element = (**element).clone();
            for elem in &elements {
                self.coerce_expr(*elem, scope, &element)?;
            }
            self.unit.arena.expr_mut(expr).ty = expected.clone();
            return Ok(expected.clone());
        }

        // std.Array target: lower to a static array and call from().
        let Some(decl) = expected.as_struct() else {
            return self.type_mismatch(&Type::Pseudo(PseudoKind::ArrayLiteral), expected, span);
        };

        let element_ty = match self.unit.arena.decl(decl) {
            Decl::StructDef(def) if def.specialization_of == Some(self.std_refs.array) => {
                def.specialization_args[0].clone()
            }
            _ => {
                return self.type_mismatch(&Type::Pseudo(PseudoKind::ArrayLiteral), expected, span)
            }
        };

        for elem in &elements {
            self.coerce_expr(*elem, scope, &element_ty)?;
        }

        let length = elements.len() as u64;
        let static_ty = Type::StaticArray {
            element: Box::new(element_ty),
            length,
        };

        let static_array = self.unit.arena.alloc_expr(Expr::new(
            ExprKind::ArrayLiteral(elements),
            static_ty.clone(),
            span,
        ));
        let data = self.unit.arena.alloc_expr(Expr::new(
            ExprKind::Unary { op: UnaryOp::Addr, value: static_array },
            Type::Primitive(Primitive::Addr),
            span,
        ));
        let len = self.unit.arena.alloc_expr(Expr::new(
            ExprKind::IntLiteral(length as i128),
            Type::Primitive(Primitive::U64),
            span,
        ));

        self.rewrite_to_std_call(expr, expected, "from", vec![data, len], span)?;
        Ok(expected.clone())
    }

    fn finalize_map_literal(
        &mut self,
        expr: ExprId,
        expected: &Type,
        scope: &Scope,
        span: Span,
    ) -> AResult<Type> {
        let ExprKind::MapLiteral(entries) = self.unit.arena.expr(expr).kind.clone() else {
            return Err(());
        };

        let Some(decl) = expected.as_struct() else {
            return self.type_mismatch(&Type::Pseudo(PseudoKind::MapLiteral), expected, span);
        };

        let (key_ty, value_ty) = match self.unit.arena.decl(decl) {
            Decl::StructDef(def) if def.specialization_of == Some(self.std_refs.map) => (
                def.specialization_args[0].clone(),
                def.specialization_args[1].clone(),
            ),
            _ => return self.type_mismatch(&Type::Pseudo(PseudoKind::MapLiteral), expected, span),
        };

        // Lower to a static array of (key, value) tuples plus Map.from().
        let entry_ty = Type::Tuple(vec![key_ty.clone(), value_ty.clone()]);
        let mut tuple_exprs = Vec::with_capacity(entries.len());

        for (key, value) in &entries {
            self.coerce_expr(*key, scope, &key_ty)?;
            self.coerce_expr(*value, scope, &value_ty)?;
            let tuple = self.unit.arena.alloc_expr(Expr::new(
                ExprKind::Tuple(vec![*key, *value]),
                entry_ty.clone(),
                span,
            ));
            tuple_exprs.push(tuple);
        }

        let length = tuple_exprs.len() as u64;
        let static_ty = Type::StaticArray {
            element: Box::new(entry_ty),
            length,
        };
        let static_array = self.unit.arena.alloc_expr(Expr::new(
            ExprKind::ArrayLiteral(tuple_exprs),
            static_ty,
            span,
        ));
        let data = self.unit.arena.alloc_expr(Expr::new(
            ExprKind::Unary { op: UnaryOp::Addr, value: static_array },
            Type::Primitive(Primitive::Addr),
            span,
        ));
        let len = self.unit.arena.alloc_expr(Expr::new(
            ExprKind::IntLiteral(length as i128),
            Type::Primitive(Primitive::U64),
            span,
        ));

        self.rewrite_to_std_call(expr, expected, "from", vec![data, len], span)?;
        Ok(expected.clone())
    }

    // -- helpers ------------------------------------------------------------

    /// If the type is a std.Optional specialization, its value type.
    pub(crate) fn optional_value_type(&self, ty: &Type) -> Option<Type> {
        let decl = ty.as_struct()?;
        match self.unit.arena.decl(decl) {
            Decl::StructDef(def) if def.specialization_of == Some(self.std_refs.optional) => {
                Some(def.specialization_args[0].clone())
            }
            _ => None,
        }
    }

    /// If the type is a std.Result specialization, its (value, error) types.
    pub(crate) fn result_value_types(&self, ty: &Type) -> Option<(Type, Type)> {
        let decl = ty.as_struct()?;
        match self.unit.arena.decl(decl) {
            Decl::StructDef(def) if def.specialization_of == Some(self.std_refs.result) => Some((
                def.specialization_args[0].clone(),
                def.specialization_args[1].clone(),
            )),
            _ => None,
        }
    }

    /// Replace `expr` with a call to a static method of the expected std
    /// specialization. When `expr` itself appears in `args`, its original
    /// node is first moved aside.
    pub(crate) fn rewrite_to_std_call(
        &mut self,
        expr: ExprId,
        expected: &Type,
        method: &str,
        args: Vec<ExprId>,
        span: Span,
    ) -> AResult<()> {
        let Some(decl) = expected.as_struct() else {
            return Err(());
        };

        let Some(symbol) = self.struct_member(decl, method) else {
            self.reports
                .error(format!("std type is missing method '{}'", method), span);
            return Err(());
        };

        let func_ty = match &symbol {
            Symbol::Func(d) => match self.unit.arena.decl(*d) {
                Decl::FuncDef(def) => def.ty.clone(),
                _ => return Err(()),
            },
            Symbol::NativeFunc(d) => match self.unit.arena.decl(*d) {
                Decl::NativeFuncDecl(def) => def.ty.clone(),
                _ => return Err(()),
            },
            _ => return Err(()),
        };

        // Move the original expression aside if it is one of the arguments.
        let args: Vec<ExprId> = args
            .into_iter()
            .map(|arg| {
                if arg == expr {
                    let old = self.unit.arena.expr(expr).clone();
                    self.unit.arena.alloc_expr(old)
                } else {
                    arg
                }
            })
            .collect();

        let callee = self.unit.arena.alloc_expr(Expr::new(
            ExprKind::Symbol(symbol),
            Type::Func(func_ty),
            span,
        ));

        *self.unit.arena.expr_mut(expr) = Expr::new(
            ExprKind::Call { callee, args },
            expected.clone(),
            span,
        );
        Ok(())
    }

    fn wrap_in_coercion(&mut self, expr: ExprId, ty: Type) {
        let old = self.unit.arena.expr(expr).clone();
        let span = old.span;
        let inner = self.unit.arena.alloc_expr(old);
        *self.unit.arena.expr_mut(expr) =
            Expr::new(ExprKind::Coercion { value: inner }, ty, span);
    }

    fn wrap_in_unary(&mut self, expr: ExprId, op: UnaryOp, ty: Type) {
        let old = self.unit.arena.expr(expr).clone();
        let span = old.span;
        let inner = self.unit.arena.alloc_expr(old);
        *self.unit.arena.expr_mut(expr) =
            Expr::new(ExprKind::Unary { op, value: inner }, ty, span);
    }

    fn struct_implements(&self, struct_decl: DeclId, proto_decl: DeclId) -> bool {
        match self.unit.arena.decl(struct_decl) {
            Decl::StructDef(def) => def.impls.contains(&proto_decl),
            _ => false,
        }
    }

    /// The case of a union whose single field has exactly this struct type.
    pub(crate) fn union_case_for_struct(
        &self,
        union_decl: DeclId,
        struct_decl: DeclId,
    ) -> Option<(DeclId, u32)> {
        let Decl::UnionDef(def) = self.unit.arena.decl(union_decl) else {
            return None;
        };

        for (index, case) in def.cases.iter().enumerate() {
            if let Decl::UnionCase(c) = self.unit.arena.decl(*case) {
                if c.fields.len() == 1 && c.fields[0].ty == Type::Struct(struct_decl) {
                    return Some((*case, index as u32));
                }
            }
        }
        None
    }

    pub(crate) fn type_mismatch(&mut self, actual: &Type, expected: &Type, span: Span) -> AResult<Type> {
        self.reports.error(
            format!(
                "type mismatch: expected '{}', found '{}'",
                type_name(self.unit, expected),
                type_name(self.unit, actual)
            ),
            span,
        );
        Err(())
    }
}
