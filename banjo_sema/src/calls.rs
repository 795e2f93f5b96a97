//! Call analysis: callee resolution, overload selection, generic
//! specialization and argument coercion

use crate::{AResult, Scope, SemanticAnalyzer};
use banjo_common::Span;
use banjo_sir::{Decl, DeclId, ExprId, ExprKind, FuncType, Symbol, Type, UnaryOp};

/// What a call ended up targeting
enum Callee {
    Direct(Symbol),
    /// Instance method: the symbol plus the receiver expression
    Method { symbol: Symbol, receiver: ExprId },
    /// Indirect call through a function value
    Indirect(FuncType),
}

impl SemanticAnalyzer<'_> {
    pub(crate) fn analyze_call(
        &mut self,
        expr: ExprId,
        callee: ExprId,
        args: Vec<ExprId>,
        scope: &Scope,
        span: Span,
    ) -> AResult<Type> {
        let resolved = self.resolve_callee(callee, &args, scope, span)?;

        match resolved {
            Callee::Direct(symbol) => {
                let symbol = self.disambiguate(symbol, &args, scope, span)?;
                let func_ty = self.callable_type(&symbol, span)?;
                self.check_call_args(&args, &func_ty, scope, span)?;

                self.unit.arena.expr_mut(callee).kind = ExprKind::Symbol(symbol);
                self.unit.arena.expr_mut(callee).ty = Type::Func(func_ty.clone());
                Ok((*func_ty.return_type).clone())
            }
            Callee::Method { symbol, receiver } => {
                let func_ty = self.callable_type(&symbol, span)?;

                // The receiver becomes the first argument; take its address
                // when the method expects a pointer.
                let receiver = self.adjust_receiver(receiver, &func_ty, scope)?;

                let mut full_args = vec![receiver];
                full_args.extend(args.iter().copied());
                self.check_call_args(&full_args, &func_ty, scope, span)?;

                self.unit.arena.expr_mut(callee).kind = ExprKind::Symbol(symbol);
                self.unit.arena.expr_mut(callee).ty = Type::Func(func_ty.clone());
                self.unit.arena.expr_mut(expr).kind = ExprKind::Call {
                    callee,
                    args: full_args,
                };
                Ok((*func_ty.return_type).clone())
            }
            Callee::Indirect(func_ty) => {
                self.check_call_args(&args, &func_ty, scope, span)?;
                Ok((*func_ty.return_type).clone())
            }
        }
    }

    fn resolve_callee(
        &mut self,
        callee: ExprId,
        args: &[ExprId],
        scope: &Scope,
        span: Span,
    ) -> AResult<Callee> {
        let kind = self.unit.arena.expr(callee).kind.clone();

        match kind {
            ExprKind::Ident(ident) => {
                let Some(symbol) = self.unit.arena.lookup(scope.table, &ident.name) else {
                    self.reports
                        .error(format!("undefined symbol '{}'", ident.name), ident.span);
                    return Err(());
                };

                match symbol {
                    Symbol::Func(decl) if self.is_generic_func(decl) => {
                        let spec = self.infer_and_specialize(decl, args, scope, span)?;
                        Ok(Callee::Direct(Symbol::Func(spec)))
                    }
                    s if s.is_callable() => Ok(Callee::Direct(s)),
                    Symbol::Local(_) | Symbol::Param { .. } | Symbol::Var(_) => {
                        let ty = self.symbol_value_type(&symbol, span)?;
                        self.unit.arena.expr_mut(callee).kind = ExprKind::Symbol(symbol);
                        self.unit.arena.expr_mut(callee).ty = ty.clone();
                        match ty {
                            Type::Func(func_ty) | Type::Closure(func_ty) => {
                                Ok(Callee::Indirect(func_ty))
                            }
                            _ => {
                                self.reports.error("called value is not a function", span);
                                Err(())
                            }
                        }
                    }
                    _ => {
                        self.reports.error("called symbol is not a function", span);
                        Err(())
                    }
                }
            }
            ExprKind::Symbol(symbol) if symbol.is_callable() => Ok(Callee::Direct(symbol)),
            ExprKind::Bracket { base, args: type_args } => {
                let func = self.resolve_bracket_func(base, &type_args, scope, span)?;
                Ok(Callee::Direct(Symbol::Func(func)))
            }
            ExprKind::Dot { lhs, rhs } => {
                // Static member call: Module.func(...), Struct.method(...).
                if let Some(symbol) = self.resolve_static_path(lhs, scope) {
                    match symbol {
                        Symbol::Module(module) => {
                            let block = self.unit.module(module).block;
                            let table = self.unit.arena.decl_block(block).table;
                            let member =
                                self.unit.arena.table(table).get_local(&rhs.name).cloned();
                            let Some(member) = member else {
                                self.reports
                                    .error(format!("undefined symbol '{}'", rhs.name), rhs.span);
                                return Err(());
                            };

                            if let Symbol::Func(decl) = member {
                                if self.is_generic_func(decl) {
                                    let spec =
                                        self.infer_and_specialize(decl, args, scope, span)?;
                                    return Ok(Callee::Direct(Symbol::Func(spec)));
                                }
                            }
                            return Ok(Callee::Direct(member));
                        }
                        Symbol::Struct(decl) => {
                            let Some(member) = self.struct_member(decl, &rhs.name) else {
                                self.reports.error(
                                    format!("struct has no member '{}'", rhs.name),
                                    rhs.span,
                                );
                                return Err(());
                            };

                            if self.is_instance_method(&member) {
                                self.reports.error(
                                    format!("method '{}' requires an instance", rhs.name),
                                    rhs.span,
                                );
                                return Err(());
                            }
                            return Ok(Callee::Direct(member));
                        }
                        _ => {}
                    }
                }

                // Instance method call through a value.
                let base_ty = self.analyze_expr(lhs, scope, None)?;
                let struct_decl = match &base_ty {
                    Type::Struct(decl) => Some(*decl),
                    Type::Pointer(inner) | Type::Reference { base: inner, .. } => {
                        inner.as_struct()
                    }
                    _ => None,
                };

                let Some(struct_decl) = struct_decl else {
                    self.reports.error(
                        format!("type has no method '{}'", rhs.name),
                        rhs.span,
                    );
                    return Err(());
                };

                let Some(member) = self.struct_member(struct_decl, &rhs.name) else {
                    self.reports.error(
                        format!("struct has no method '{}'", rhs.name),
                        rhs.span,
                    );
                    return Err(());
                };

                if !self.is_instance_method(&member) {
                    self.reports.error(
                        format!("'{}' is not an instance method", rhs.name),
                        rhs.span,
                    );
                    return Err(());
                }

                Ok(Callee::Method { symbol: member, receiver: lhs })
            }
            _ => {
                let ty = self.analyze_expr(callee, scope, None)?;
                match ty {
                    Type::Func(func_ty) | Type::Closure(func_ty) => Ok(Callee::Indirect(func_ty)),
                    _ => {
                        self.reports.error("called value is not a function", span);
                        Err(())
                    }
                }
            }
        }
    }

    /// Resolve `base[args]` into a specialized function declaration.
    pub(crate) fn resolve_bracket_func(
        &mut self,
        base: ExprId,
        type_args: &[ExprId],
        scope: &Scope,
        span: Span,
    ) -> AResult<DeclId> {
        let base_kind = self.unit.arena.expr(base).kind.clone();
        let symbol = match base_kind {
            ExprKind::Ident(ident) => self.unit.arena.lookup(scope.table, &ident.name),
            ExprKind::Symbol(symbol) => Some(symbol),
            _ => None,
        };

        let Some(Symbol::Func(decl)) = symbol else {
            self.reports
                .error("type arguments applied to a non-generic function", span);
            return Err(());
        };

        let mut arg_types = Vec::with_capacity(type_args.len());
        for arg in type_args {
            arg_types.push(self.resolve_type_expr(*arg, scope.table, None)?);
        }

        self.specialize_func(decl, arg_types, span)
    }

    fn infer_and_specialize(
        &mut self,
        decl: DeclId,
        args: &[ExprId],
        scope: &Scope,
        span: Span,
    ) -> AResult<DeclId> {
        let (num_generics, param_types) = match self.unit.arena.decl(decl) {
            Decl::FuncDef(def) => (def.generic_params.len(), def.ty.params.clone()),
            _ => return Err(()),
        };

        // Analyze arguments with default finalization to obtain concrete
        // types for unification.
        let mut arg_types = Vec::with_capacity(args.len());
        for arg in args {
            arg_types.push(self.analyze_expr(*arg, scope, None)?);
        }

        let Some(inferred) =
            self.infer_generic_args(decl, num_generics, &param_types, &arg_types)
        else {
            self.reports
                .error("cannot infer type arguments of a generic function", span);
            return Err(());
        };

        self.specialize_func(decl, inferred, span)
    }

    fn disambiguate(
        &mut self,
        symbol: Symbol,
        args: &[ExprId],
        scope: &Scope,
        span: Span,
    ) -> AResult<Symbol> {
        let Symbol::OverloadSet(candidates) = symbol else {
            return Ok(symbol);
        };

        let mut arg_types = Vec::with_capacity(args.len());
        for arg in args {
            arg_types.push(self.analyze_expr(*arg, scope, None)?);
        }

        for candidate in &candidates {
            let ty = match self.unit.arena.decl(*candidate) {
                Decl::FuncDef(def) => def.ty.clone(),
                _ => continue,
            };

            if ty.params.len() != arg_types.len() {
                continue;
            }

            let matches = ty.params.iter().zip(&arg_types).all(|(p, a)| p == a);
            if matches {
                return Ok(Symbol::Func(*candidate));
            }
        }

        self.reports
            .error("no overload matches the argument types", span);
        Err(())
    }

    fn callable_type(&mut self, symbol: &Symbol, span: Span) -> AResult<FuncType> {
        match symbol {
            Symbol::Func(decl) => match self.unit.arena.decl(*decl) {
                Decl::FuncDef(def) => Ok(def.ty.clone()),
                _ => Err(()),
            },
            Symbol::NativeFunc(decl) => match self.unit.arena.decl(*decl) {
                Decl::NativeFuncDecl(def) => Ok(def.ty.clone()),
                _ => Err(()),
            },
            Symbol::ExternFunc(decl) => match self.unit.arena.decl(*decl) {
                Decl::FuncDecl(def) => Ok(def.ty.clone()),
                _ => Err(()),
            },
            _ => {
                self.reports.error("called symbol is not a function", span);
                Err(())
            }
        }
    }

    fn is_generic_func(&self, decl: DeclId) -> bool {
        matches!(self.unit.arena.decl(decl), Decl::FuncDef(def) if def.is_generic())
    }

    fn is_instance_method(&self, symbol: &Symbol) -> bool {
        let decl = match symbol {
            Symbol::Func(decl) | Symbol::NativeFunc(decl) => *decl,
            _ => return false,
        };

        let first_param = match self.unit.arena.decl(decl) {
            Decl::FuncDef(def) => def.params.first(),
            Decl::NativeFuncDecl(def) => def.params.first(),
            _ => None,
        };

        first_param.map(|p| p.ident.name == "self").unwrap_or(false)
    }

    fn adjust_receiver(
        &mut self,
        receiver: ExprId,
        func_ty: &FuncType,
        scope: &Scope,
    ) -> AResult<ExprId> {
        let Some(self_ty) = func_ty.params.first() else {
            return Ok(receiver);
        };

        let receiver_ty = self.unit.arena.expr(receiver).ty.clone();

        match (self_ty, &receiver_ty) {
            // Method takes self by pointer, receiver is a value.
            (Type::Pointer(inner), ty) if **inner == *ty => {
                let span = self.unit.arena.expr(receiver).span;
                let addr = self.unit.arena.alloc_expr(banjo_sir::Expr::new(
                    ExprKind::Unary { op: UnaryOp::Addr, value: receiver },
                    ty.clone().pointer_to(),
                    span,
                ));
                Ok(addr)
            }
            // Method takes self by value, receiver is a pointer.
            (ty, Type::Pointer(inner)) if **inner == *ty => {
                let span = self.unit.arena.expr(receiver).span;
                let deref = self.unit.arena.alloc_expr(banjo_sir::Expr::new(
                    ExprKind::Unary { op: UnaryOp::Deref, value: receiver },
                    ty.clone(),
                    span,
                ));
                Ok(deref)
            }
            _ => {
                let _ = scope;
                Ok(receiver)
            }
        }
    }

    fn check_call_args(
        &mut self,
        args: &[ExprId],
        func_ty: &FuncType,
        scope: &Scope,
        span: Span,
    ) -> AResult<()> {
        let required = func_ty.params.len();

        if func_ty.variadic {
            if args.len() < required {
                self.reports.error(
                    format!("expected at least {} arguments, found {}", required, args.len()),
                    span,
                );
                return Err(());
            }
        } else if args.len() != required {
            self.reports.error(
                format!("expected {} arguments, found {}", required, args.len()),
                span,
            );
            return Err(());
        }

        for (index, arg) in args.iter().enumerate() {
            if index < required {
                let expected = func_ty.params[index].clone();
                self.analyze_expr(*arg, scope, Some(&expected))?;
            } else {
                // Variadic tail: default finalization with C promotion for
                // floats.
                let ty = self.analyze_expr(*arg, scope, None)?;
                if ty.is_primitive(banjo_sir::Primitive::F32) {
                    self.coerce_expr(*arg, scope, &Type::Primitive(banjo_sir::Primitive::F64))?;
                }
            }
        }

        Ok(())
    }
}
