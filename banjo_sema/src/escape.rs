//! Pointer escape checking
//!
//! A return value that takes the address of a local (or carries such an
//! address inside a struct or tuple literal) would dangle once the frame
//! is gone; the check recurses through literal constituents.

use banjo_common::Span;
use banjo_sir::{ExprId, ExprKind, Symbol, UnaryOp};

use crate::SemanticAnalyzer;

impl SemanticAnalyzer<'_> {
    pub fn check_return_escape(&mut self, value: ExprId, return_span: Span) {
        match self.unit.arena.expr(value).kind.clone() {
            ExprKind::Unary { op: UnaryOp::Addr, value: target } => {
                if let Some(local_span) = self.local_symbol_span(target) {
                    self.reports.add(
                        banjo_common::Report::error("pointer to local escapes", return_span)
                            .with_note("the local is declared here", local_span),
                    );
                }
            }
            ExprKind::StructLiteral { entries, .. } => {
                for entry in entries {
                    self.check_return_escape(entry.value, return_span);
                }
            }
            ExprKind::Tuple(fields) => {
                for field in fields {
                    self.check_return_escape(field, return_span);
                }
            }
            ExprKind::Coercion { value } => self.check_return_escape(value, return_span),
            _ => {}
        }
    }

    fn local_symbol_span(&self, expr: ExprId) -> Option<Span> {
        match &self.unit.arena.expr(expr).kind {
            ExprKind::Symbol(Symbol::Local(stmt)) => match self.unit.arena.stmt(*stmt) {
                banjo_sir::Stmt::Var(var) => Some(var.ident.span),
                _ => None,
            },
            ExprKind::Symbol(Symbol::Param { .. }) => Some(self.unit.arena.expr(expr).span),
            _ => None,
        }
    }
}
