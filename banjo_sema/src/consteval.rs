//! Compile-time expression evaluation
//!
//! A pure interpreter over the const subset of SIR: literals, references
//! to constants and enum variants, arithmetic with wrap-around semantics
//! per the integer type's width and signedness, tuple and array
//! construction and constant indexing, and meta intrinsics.

use crate::{AResult, SemanticAnalyzer};
use banjo_sir::{BinaryOp, Decl, ExprId, ExprKind, Primitive, Symbol, TableId, Type, UnaryOp};

/// The result of const evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Int(i128),
    Fp(f64),
    Bool(bool),
    Str(String),
    Tuple(Vec<ConstValue>),
    Array(Vec<ConstValue>),
}

impl ConstValue {
    pub fn as_int(&self) -> Option<i128> {
        match self {
            ConstValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConstValue::Bool(value) => Some(*value),
            ConstValue::Int(value) => Some(*value != 0),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        self.as_bool().unwrap_or(false)
    }
}

/// Wrap `value` to the two's-complement range of the primitive.
pub fn wrap_to(primitive: Primitive, value: i128) -> i128 {
    let bits = primitive.bit_width();
    if bits == 0 || bits >= 128 {
        return value;
    }

    let mask = (1i128 << bits) - 1;
    let wrapped = value & mask;

    if primitive.is_signed() && wrapped >= (1i128 << (bits - 1)) {
        wrapped - (1i128 << bits)
    } else {
        wrapped
    }
}

impl SemanticAnalyzer<'_> {
    /// Evaluate a const expression, reporting on failure.
    pub fn const_eval(&mut self, table: TableId, expr: ExprId) -> AResult<ConstValue> {
        let kind = self.unit.arena.expr(expr).kind.clone();
        let ty = self.unit.arena.expr(expr).ty.clone();
        let span = self.unit.arena.expr(expr).span;

        let value = match kind {
            ExprKind::IntLiteral(value) => ConstValue::Int(value),
            ExprKind::FpLiteral(value) => ConstValue::Fp(value),
            ExprKind::BoolLiteral(value) => ConstValue::Bool(value),
            ExprKind::CharLiteral(value) => ConstValue::Int(value as i128),
            ExprKind::StringLiteral(value) => ConstValue::Str(value),
            ExprKind::Tuple(fields) => {
                let mut values = Vec::with_capacity(fields.len());
                for field in fields {
                    values.push(self.const_eval(table, field)?);
                }
                ConstValue::Tuple(values)
            }
            ExprKind::ArrayLiteral(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(self.const_eval(table, element)?);
                }
                ConstValue::Array(values)
            }
            ExprKind::Index { base, index } => {
                let base = self.const_eval(table, base)?;
                let index = self.const_eval(table, index)?;
                let (ConstValue::Array(values), Some(index)) = (base, index.as_int()) else {
                    self.reports.error("expected a constant array index", span);
                    return Err(());
                };
                match values.get(index as usize) {
                    Some(value) => value.clone(),
                    None => {
                        self.reports.error("constant index out of bounds", span);
                        return Err(());
                    }
                }
            }
            ExprKind::TupleField { base, index } => {
                let base = self.const_eval(table, base)?;
                let ConstValue::Tuple(values) = base else {
                    self.reports.error("expected a constant tuple", span);
                    return Err(());
                };
                match values.get(index as usize) {
                    Some(value) => value.clone(),
                    None => {
                        self.reports.error("constant tuple field out of bounds", span);
                        return Err(());
                    }
                }
            }
            ExprKind::Unary { op, value } => {
                let value = self.const_eval(table, value)?;
                self.const_eval_unary(op, value, &ty, span)?
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.const_eval(table, lhs)?;
                let rhs = self.const_eval(table, rhs)?;
                self.const_eval_binary(op, lhs, rhs, &ty, span)?
            }
            ExprKind::Ident(ident) => {
                let Some(symbol) = self.unit.arena.lookup(table, &ident.name) else {
                    self.reports
                        .error(format!("undefined symbol '{}'", ident.name), ident.span);
                    return Err(());
                };
                self.const_eval_symbol(table, symbol, span)?
            }
            ExprKind::Symbol(symbol) => self.const_eval_symbol(table, symbol, span)?,
            ExprKind::Dot { lhs, rhs } => {
                // Enum variant access: Type.Variant
                let lhs_kind = self.unit.arena.expr(lhs).kind.clone();
                let symbol = match lhs_kind {
                    ExprKind::Ident(ident) => self.unit.arena.lookup(table, &ident.name),
                    ExprKind::Symbol(symbol) => Some(symbol),
                    _ => None,
                };

                match symbol {
                    Some(Symbol::Enum(decl)) => {
                        let variant = self.find_enum_variant(decl, &rhs.name);
                        match variant {
                            Some(variant) => {
                                self.const_eval_symbol(table, Symbol::EnumVariant(variant), span)?
                            }
                            None => {
                                self.reports.error(
                                    format!("enum has no variant '{}'", rhs.name),
                                    rhs.span,
                                );
                                return Err(());
                            }
                        }
                    }
                    Some(Symbol::Module(module)) => {
                        let block = self.unit.module(module).block;
                        let module_table = self.unit.arena.decl_block(block).table;
                        let Some(symbol) = self.unit.arena.table(module_table).get_local(&rhs.name).cloned()
                        else {
                            self.reports
                                .error(format!("undefined symbol '{}'", rhs.name), rhs.span);
                            return Err(());
                        };
                        self.const_eval_symbol(table, symbol, span)?
                    }
                    _ => {
                        self.reports.error("expression is not constant", span);
                        return Err(());
                    }
                }
            }
            ExprKind::MetaAccess { .. } | ExprKind::MetaField { .. } | ExprKind::MetaCall { .. } => {
                self.const_eval_meta(table, expr)?
            }
            ExprKind::Coercion { value } => self.const_eval(table, value)?,
            _ => {
                self.reports.error("expression is not constant", span);
                return Err(());
            }
        };

        Ok(value)
    }

    fn const_eval_symbol(
        &mut self,
        table: TableId,
        symbol: Symbol,
        span: banjo_common::Span,
    ) -> AResult<ConstValue> {
        match symbol {
            Symbol::Const(decl) => {
                let Decl::ConstDef(def) = self.unit.arena.decl(decl) else {
                    return Err(());
                };
                let value = def.value;
                self.const_eval(table, value)
            }
            Symbol::EnumVariant(decl) => {
                let Decl::EnumVariant(variant) = self.unit.arena.decl(decl) else {
                    return Err(());
                };

                if let Some(value_expr) = variant.value_expr {
                    self.const_eval(table, value_expr)
                } else {
                    Ok(ConstValue::Int(variant.value))
                }
            }
            _ => {
                self.reports.error("symbol is not a constant", span);
                Err(())
            }
        }
    }

    fn const_eval_unary(
        &mut self,
        op: UnaryOp,
        value: ConstValue,
        ty: &Type,
        span: banjo_common::Span,
    ) -> AResult<ConstValue> {
        let result = match (op, value) {
            (UnaryOp::Neg, ConstValue::Int(value)) => ConstValue::Int(self.wrap(ty, -value)),
            (UnaryOp::Neg, ConstValue::Fp(value)) => ConstValue::Fp(-value),
            (UnaryOp::Not, value) => ConstValue::Bool(!value.is_truthy()),
            (UnaryOp::BitNot, ConstValue::Int(value)) => ConstValue::Int(self.wrap(ty, !value)),
            _ => {
                self.reports.error("invalid constant unary operation", span);
                return Err(());
            }
        };
        Ok(result)
    }

    fn const_eval_binary(
        &mut self,
        op: BinaryOp,
        lhs: ConstValue,
        rhs: ConstValue,
        ty: &Type,
        span: banjo_common::Span,
    ) -> AResult<ConstValue> {
        if let (ConstValue::Int(a), ConstValue::Int(b)) = (&lhs, &rhs) {
            let (a, b) = (*a, *b);

            let result = match op {
                BinaryOp::Add => ConstValue::Int(self.wrap(ty, a.wrapping_add(b))),
                BinaryOp::Sub => ConstValue::Int(self.wrap(ty, a.wrapping_sub(b))),
                BinaryOp::Mul => ConstValue::Int(self.wrap(ty, a.wrapping_mul(b))),
                BinaryOp::Div => {
                    if b == 0 {
                        self.reports.error("division by zero in constant expression", span);
                        return Err(());
                    }
                    ConstValue::Int(self.wrap(ty, a.wrapping_div(b)))
                }
                BinaryOp::Mod => {
                    if b == 0 {
                        self.reports.error("division by zero in constant expression", span);
                        return Err(());
                    }
                    ConstValue::Int(self.wrap(ty, a.wrapping_rem(b)))
                }
                BinaryOp::BitAnd => ConstValue::Int(self.wrap(ty, a & b)),
                BinaryOp::BitOr => ConstValue::Int(self.wrap(ty, a | b)),
                BinaryOp::BitXor => ConstValue::Int(self.wrap(ty, a ^ b)),
                BinaryOp::Shl => ConstValue::Int(self.wrap(ty, a.wrapping_shl(b as u32))),
                BinaryOp::Shr => ConstValue::Int(self.wrap(ty, a.wrapping_shr(b as u32))),
                BinaryOp::Eq => ConstValue::Bool(a == b),
                BinaryOp::Ne => ConstValue::Bool(a != b),
                BinaryOp::Lt => ConstValue::Bool(a < b),
                BinaryOp::Le => ConstValue::Bool(a <= b),
                BinaryOp::Gt => ConstValue::Bool(a > b),
                BinaryOp::Ge => ConstValue::Bool(a >= b),
                BinaryOp::And => ConstValue::Bool(a != 0 && b != 0),
                BinaryOp::Or => ConstValue::Bool(a != 0 || b != 0),
            };
            return Ok(result);
        }

        if let (ConstValue::Bool(a), ConstValue::Bool(b)) = (&lhs, &rhs) {
            let result = match op {
                BinaryOp::And => ConstValue::Bool(*a && *b),
                BinaryOp::Or => ConstValue::Bool(*a || *b),
                BinaryOp::Eq => ConstValue::Bool(a == b),
                BinaryOp::Ne => ConstValue::Bool(a != b),
                _ => {
                    self.reports.error("invalid constant boolean operation", span);
                    return Err(());
                }
            };
            return Ok(result);
        }

        if let (ConstValue::Fp(a), ConstValue::Fp(b)) = (&lhs, &rhs) {
            let (a, b) = (*a, *b);
            let result = match op {
                BinaryOp::Add => ConstValue::Fp(a + b),
                BinaryOp::Sub => ConstValue::Fp(a - b),
                BinaryOp::Mul => ConstValue::Fp(a * b),
                BinaryOp::Div => ConstValue::Fp(a / b),
                BinaryOp::Eq => ConstValue::Bool(a == b),
                BinaryOp::Ne => ConstValue::Bool(a != b),
                BinaryOp::Lt => ConstValue::Bool(a < b),
                BinaryOp::Le => ConstValue::Bool(a <= b),
                BinaryOp::Gt => ConstValue::Bool(a > b),
                BinaryOp::Ge => ConstValue::Bool(a >= b),
                _ => {
                    self.reports.error("invalid constant float operation", span);
                    return Err(());
                }
            };
            return Ok(result);
        }

        self.reports.error("mismatched constant operand kinds", span);
        Err(())
    }

    fn wrap(&self, ty: &Type, value: i128) -> i128 {
        match ty {
            Type::Primitive(p) if p.is_integer() => wrap_to(*p, value),
            _ => value,
        }
    }

    pub fn find_enum_variant(&self, decl: banjo_sir::DeclId, name: &str) -> Option<banjo_sir::DeclId> {
        let Decl::EnumDef(def) = self.unit.arena.decl(decl) else {
            return None;
        };

        def.variants.iter().copied().find(|v| {
            matches!(self.unit.arena.decl(*v), Decl::EnumVariant(variant) if variant.ident.name == name)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_to_u8() {
        assert_eq!(wrap_to(Primitive::U8, 256), 0);
        assert_eq!(wrap_to(Primitive::U8, 257), 1);
        assert_eq!(wrap_to(Primitive::U8, -1), 255);
    }

    #[test]
    fn test_wrap_to_i8() {
        assert_eq!(wrap_to(Primitive::I8, 127), 127);
        assert_eq!(wrap_to(Primitive::I8, 128), -128);
        assert_eq!(wrap_to(Primitive::I8, -129), 127);
    }

    #[test]
    fn test_wrap_to_i64_boundary() {
        assert_eq!(wrap_to(Primitive::I64, i64::MAX as i128 + 1), i64::MIN as i128);
        assert_eq!(wrap_to(Primitive::U64, -1), u64::MAX as i128);
    }
}
