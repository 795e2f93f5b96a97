//! Mutability checking for assignment targets

use crate::{AResult, SemanticAnalyzer};
use banjo_common::Span;
use banjo_sir::{ExprId, ExprKind, Type, UnaryOp};

impl SemanticAnalyzer<'_> {
    /// Check that an l-value expression may be written through. A
    /// dereference of an immutable reference fails; index and field
    /// accesses recurse into their base.
    pub fn check_mutable(&mut self, expr: ExprId, span: Span) -> AResult<()> {
        if let Some(immut_span) = self.find_immutable_ref(expr) {
            self.reports.add(
                banjo_common::Report::error("cannot assign through an immutable reference", span)
                    .with_note("the reference is immutable", immut_span),
            );
            return Err(());
        }
        Ok(())
    }

    /// The span of the immutable reference an l-value writes through, if
    /// any.
    fn find_immutable_ref(&self, expr: ExprId) -> Option<Span> {
        match &self.unit.arena.expr(expr).kind {
            ExprKind::Unary { op: UnaryOp::Deref, value } => {
                let value_ty = &self.unit.arena.expr(*value).ty;
                match value_ty {
                    Type::Reference { mutable: false, .. } => {
                        Some(self.unit.arena.expr(*value).span)
                    }
                    _ => None,
                }
            }
            ExprKind::Index { base, .. } => self.find_immutable_ref(*base),
            ExprKind::Field { base, .. } => self.find_immutable_ref(*base),
            ExprKind::TupleField { base, .. } => self.find_immutable_ref(*base),
            _ => None,
        }
    }
}
