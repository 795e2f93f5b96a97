//! Programmatic SIR construction
//!
//! The frontend lowers its AST into SIR through this builder; tests use it
//! to assemble units directly. Nodes start out with pseudo or error types
//! and synthetic spans unless a span is supplied; the semantic analyzer
//! fills in the rest.

use crate::{
    Block, BlockId, Decl, DeclBlock, DeclBlockId, DeclId, Expr, ExprId, ExprKind, FuncDef,
    FuncType, GenericParam, Ident, Module, ModuleId, Param, Primitive, PseudoKind, StmtId,
    Stmt, SymbolTable, TableId, Type, Unit,
};
use banjo_common::Span;

/// Handle to a module under construction
#[derive(Debug, Clone, Copy)]
pub struct ModuleRef {
    pub id: ModuleId,
    pub block: DeclBlockId,
    pub table: TableId,
}

#[derive(Default)]
pub struct UnitBuilder {
    pub unit: Unit,
}

impl UnitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Unit {
        self.unit
    }

    pub fn create_module(&mut self, path: &[&str]) -> ModuleRef {
        let table = self.unit.arena.alloc_table(SymbolTable::new(None));
        let block = self.unit.arena.alloc_decl_block(DeclBlock {
            decls: Vec::new(),
            table,
            span: Span::synthetic(),
        });
        let id = self.unit.add_module(Module {
            path: path.iter().map(|s| s.to_string()).collect(),
            block,
        });
        ModuleRef { id, block, table }
    }

    // -- expressions --------------------------------------------------------

    pub fn expr(&mut self, kind: ExprKind, ty: Type) -> ExprId {
        self.unit.arena.alloc_expr(Expr::new(kind, ty, Span::synthetic()))
    }

    pub fn expr_at(&mut self, kind: ExprKind, ty: Type, span: Span) -> ExprId {
        self.unit.arena.alloc_expr(Expr::new(kind, ty, span))
    }

    pub fn int(&mut self, value: i128) -> ExprId {
        self.expr(ExprKind::IntLiteral(value), Type::Pseudo(PseudoKind::IntLiteral))
    }

    pub fn fp(&mut self, value: f64) -> ExprId {
        self.expr(ExprKind::FpLiteral(value), Type::Pseudo(PseudoKind::FpLiteral))
    }

    pub fn boolean(&mut self, value: bool) -> ExprId {
        self.expr(ExprKind::BoolLiteral(value), Type::Primitive(Primitive::Bool))
    }

    pub fn string(&mut self, value: impl Into<String>) -> ExprId {
        self.expr(
            ExprKind::StringLiteral(value.into()),
            Type::Pseudo(PseudoKind::StringLiteral),
        )
    }

    pub fn null(&mut self) -> ExprId {
        self.expr(ExprKind::NullLiteral, Type::Pseudo(PseudoKind::NullLiteral))
    }

    pub fn none(&mut self) -> ExprId {
        self.expr(ExprKind::NoneLiteral, Type::Pseudo(PseudoKind::NoneLiteral))
    }

    pub fn name(&mut self, name: impl Into<String>) -> ExprId {
        let ident = Ident::new(name, Span::synthetic());
        self.expr(ExprKind::Ident(ident), Type::Error)
    }

    pub fn dot(&mut self, lhs: ExprId, rhs: impl Into<String>) -> ExprId {
        let rhs = Ident::new(rhs, Span::synthetic());
        self.expr(ExprKind::Dot { lhs, rhs }, Type::Error)
    }

    pub fn binary(&mut self, op: crate::BinaryOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        self.expr(ExprKind::Binary { op, lhs, rhs }, Type::Error)
    }

    pub fn unary(&mut self, op: crate::UnaryOp, value: ExprId) -> ExprId {
        self.expr(ExprKind::Unary { op, value }, Type::Error)
    }

    pub fn call(&mut self, callee: ExprId, args: Vec<ExprId>) -> ExprId {
        self.expr(ExprKind::Call { callee, args }, Type::Error)
    }

    pub fn bracket(&mut self, base: ExprId, args: Vec<ExprId>) -> ExprId {
        self.expr(ExprKind::Bracket { base, args }, Type::Error)
    }

    pub fn range(&mut self, start: ExprId, end: ExprId) -> ExprId {
        self.expr(ExprKind::Range { start, end }, Type::Error)
    }

    // -- type expressions ---------------------------------------------------

    pub fn prim_type(&mut self, primitive: Primitive) -> ExprId {
        self.expr(ExprKind::PrimitiveType(primitive), Type::Error)
    }

    pub fn pointer_type(&mut self, base: ExprId) -> ExprId {
        self.expr(ExprKind::PointerType(base), Type::Error)
    }

    pub fn reference_type(&mut self, mutable: bool, base: ExprId) -> ExprId {
        self.expr(ExprKind::ReferenceType { mutable, base }, Type::Error)
    }

    pub fn static_array_type(&mut self, element: ExprId, length: ExprId) -> ExprId {
        self.expr(ExprKind::StaticArrayType { element, length }, Type::Error)
    }

    pub fn optional_type(&mut self, base: ExprId) -> ExprId {
        self.expr(ExprKind::OptionalType(base), Type::Error)
    }

    pub fn result_type(&mut self, value: ExprId, error: ExprId) -> ExprId {
        self.expr(ExprKind::ResultType { value, error }, Type::Error)
    }

    pub fn tuple_type(&mut self, fields: Vec<ExprId>) -> ExprId {
        self.expr(ExprKind::TupleType(fields), Type::Error)
    }

    // -- statements and blocks ----------------------------------------------

    pub fn stmt(&mut self, stmt: Stmt) -> StmtId {
        self.unit.arena.alloc_stmt(stmt)
    }

    /// Allocate an empty block whose scope chains to `parent`.
    pub fn begin_block(&mut self, parent: TableId) -> BlockId {
        let table = self.unit.arena.alloc_table(SymbolTable::new(Some(parent)));
        self.unit.arena.alloc_block(Block {
            stmts: Vec::new(),
            table,
            span: Span::synthetic(),
        })
    }

    pub fn push_stmt(&mut self, block: BlockId, stmt: StmtId) {
        self.unit.arena.block_mut(block).stmts.push(stmt);
    }

    pub fn var_stmt(&mut self, block: BlockId, name: &str, type_expr: Option<ExprId>, value: ExprId) -> StmtId {
        let stmt = self.stmt(Stmt::Var(crate::VarStmt {
            ident: Ident::new(name, Span::synthetic()),
            type_expr,
            value,
            ty: Type::Error,
            span: Span::synthetic(),
        }));
        self.push_stmt(block, stmt);
        stmt
    }

    pub fn return_stmt(&mut self, block: BlockId, value: Option<ExprId>) -> StmtId {
        let stmt = self.stmt(Stmt::Return(crate::ReturnStmt {
            value,
            span: Span::synthetic(),
        }));
        self.push_stmt(block, stmt);
        stmt
    }

    pub fn expr_stmt(&mut self, block: BlockId, expr: ExprId) -> StmtId {
        let stmt = self.stmt(Stmt::Expr(expr));
        self.push_stmt(block, stmt);
        stmt
    }

    // -- declarations -------------------------------------------------------

    pub fn push_decl(&mut self, block: DeclBlockId, decl: Decl) -> DeclId {
        let id = self.unit.arena.alloc_decl(decl);
        self.unit.arena.decl_block_mut(block).decls.push(id);
        id
    }

    /// Add a function definition with an already-built body block.
    pub fn add_func(
        &mut self,
        decl_block: DeclBlockId,
        name: &str,
        params: Vec<(&str, ExprId)>,
        return_type_expr: Option<ExprId>,
        body: BlockId,
    ) -> DeclId {
        self.add_generic_func(decl_block, name, Vec::new(), params, return_type_expr, body)
    }

    pub fn add_generic_func(
        &mut self,
        decl_block: DeclBlockId,
        name: &str,
        generic_params: Vec<&str>,
        params: Vec<(&str, ExprId)>,
        return_type_expr: Option<ExprId>,
        body: BlockId,
    ) -> DeclId {
        let func = FuncDef {
            ident: Ident::new(name, Span::synthetic()),
            generic_params: generic_params
                .into_iter()
                .map(|n| GenericParam { ident: Ident::new(n, Span::synthetic()) })
                .collect(),
            params: params
                .into_iter()
                .map(|(n, type_expr)| Param {
                    ident: Ident::new(n, Span::synthetic()),
                    type_expr,
                    ty: Type::Error,
                })
                .collect(),
            return_type_expr,
            ty: FuncType::new(Vec::new(), Type::Primitive(Primitive::Void)),
            block: body,
            exported: false,
            specialization_of: None,
            specialization_args: Vec::new(),
            span: Span::synthetic(),
        };
        self.push_decl(decl_block, Decl::FuncDef(func))
    }

    /// Add a function body block scoped to the module owning `decl_block`.
    pub fn func_body(&mut self, module: ModuleRef) -> BlockId {
        self.begin_block(module.table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_minimal_func() {
        let mut builder = UnitBuilder::new();
        let module = builder.create_module(&["main"]);
        let i32_type = builder.prim_type(Primitive::I32);
        let body = builder.func_body(module);
        let value = builder.int(42);
        builder.return_stmt(body, Some(value));
        let func = builder.add_func(module.block, "answer", vec![], Some(i32_type), body);

        let unit = builder.finish();
        assert_eq!(unit.mods.len(), 1);
        match unit.arena.decl(func) {
            Decl::FuncDef(def) => assert_eq!(def.ident.name, "answer"),
            other => panic!("expected function, got {:?}", other),
        }
    }
}
