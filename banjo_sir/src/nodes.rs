//! SIR node definitions
//!
//! Three mutually recursive sums: declarations, statements and expressions.
//! Every expression carries a type (pseudo until finalization) and every
//! node records the span of its originating AST node for diagnostics.

use crate::{BlockId, DeclBlockId, DeclId, ExprId, StmtId, TableId, Type};
use banjo_common::Span;

/// A source-position-tagged name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Self { name: name.into(), span }
    }
}

/// A statement block with its own scope
#[derive(Debug, Clone)]
pub struct Block {
    pub stmts: Vec<StmtId>,
    pub table: TableId,
    pub span: Span,
}

/// A declaration block with its own symbol table
#[derive(Debug, Clone)]
pub struct DeclBlock {
    pub decls: Vec<DeclId>,
    pub table: TableId,
    pub span: Span,
}

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericParam {
    pub ident: Ident,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub ident: Ident,
    pub type_expr: ExprId,
    /// Resolved during decl header analysis
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct FuncDef {
    pub ident: Ident,
    pub generic_params: Vec<GenericParam>,
    pub params: Vec<Param>,
    pub return_type_expr: Option<ExprId>,
    /// Resolved signature; concrete after header analysis
    pub ty: crate::FuncType,
    pub block: BlockId,
    pub exported: bool,
    /// For specializations: the generic definition this was cloned from
    pub specialization_of: Option<DeclId>,
    pub specialization_args: Vec<Type>,
    pub span: Span,
}

impl FuncDef {
    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty()
    }
}

/// An external function declaration (defined in another object)
#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub ident: Ident,
    pub params: Vec<Param>,
    pub return_type_expr: Option<ExprId>,
    pub ty: crate::FuncType,
    pub span: Span,
}

/// A native function binding a runtime symbol
#[derive(Debug, Clone)]
pub struct NativeFuncDecl {
    pub ident: Ident,
    pub params: Vec<Param>,
    pub return_type_expr: Option<ExprId>,
    pub ty: crate::FuncType,
    pub link_name: String,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ConstDef {
    pub ident: Ident,
    pub type_expr: Option<ExprId>,
    pub ty: Type,
    pub value: ExprId,
    pub span: Span,
}

/// Memory layout of a struct definition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructLayout {
    Default,
    /// All fields share offset zero; literals must initialize exactly one
    Overlapping,
}

#[derive(Debug, Clone)]
pub struct StructDef {
    pub ident: Ident,
    pub generic_params: Vec<GenericParam>,
    pub fields: Vec<DeclId>,
    pub block: DeclBlockId,
    pub layout: StructLayout,
    pub impls: Vec<DeclId>,
    pub specialization_of: Option<DeclId>,
    pub specialization_args: Vec<Type>,
    pub span: Span,
}

impl StructDef {
    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct StructField {
    pub ident: Ident,
    pub type_expr: ExprId,
    pub ty: Type,
    pub index: u32,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub ident: Ident,
    pub type_expr: ExprId,
    pub ty: Type,
    pub value: Option<ExprId>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct NativeVarDecl {
    pub ident: Ident,
    pub type_expr: ExprId,
    pub ty: Type,
    pub link_name: String,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct EnumDef {
    pub ident: Ident,
    pub variants: Vec<DeclId>,
    pub block: DeclBlockId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct EnumVariant {
    pub ident: Ident,
    pub value_expr: Option<ExprId>,
    /// Finalized during const evaluation
    pub value: i128,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct UnionDef {
    pub ident: Ident,
    pub cases: Vec<DeclId>,
    pub block: DeclBlockId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct UnionCaseField {
    pub ident: Ident,
    pub type_expr: ExprId,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct UnionCase {
    pub ident: Ident,
    pub fields: Vec<UnionCaseField>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ProtoDef {
    pub ident: Ident,
    pub func_decls: Vec<DeclId>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TypeAlias {
    pub ident: Ident,
    pub type_expr: ExprId,
    pub ty: Type,
    pub span: Span,
}

/// The path component tree of a use declaration
#[derive(Debug, Clone)]
pub enum UseTarget {
    Ident(Ident),
    Dot { lhs: Box<UseTarget>, rhs: Box<UseTarget> },
    List(Vec<UseTarget>),
    Rebind { target: Box<UseTarget>, local: Ident },
}

#[derive(Debug, Clone)]
pub struct UseDecl {
    pub target: UseTarget,
    pub span: Span,
}

/// A compile-time `meta if` at declaration level
#[derive(Debug, Clone)]
pub struct MetaIfDecl {
    pub condition: ExprId,
    pub then_block: DeclBlockId,
    pub else_block: Option<DeclBlockId>,
    /// Set once meta expansion selected a branch
    pub expanded: Option<DeclBlockId>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Decl {
    FuncDef(FuncDef),
    FuncDecl(FuncDecl),
    NativeFuncDecl(NativeFuncDecl),
    ConstDef(ConstDef),
    StructDef(StructDef),
    StructField(StructField),
    VarDecl(VarDecl),
    NativeVarDecl(NativeVarDecl),
    EnumDef(EnumDef),
    EnumVariant(EnumVariant),
    UnionDef(UnionDef),
    UnionCase(UnionCase),
    ProtoDef(ProtoDef),
    TypeAlias(TypeAlias),
    UseDecl(UseDecl),
    MetaIf(MetaIfDecl),
    Error,
}

impl Decl {
    pub fn ident(&self) -> Option<&Ident> {
        match self {
            Decl::FuncDef(d) => Some(&d.ident),
            Decl::FuncDecl(d) => Some(&d.ident),
            Decl::NativeFuncDecl(d) => Some(&d.ident),
            Decl::ConstDef(d) => Some(&d.ident),
            Decl::StructDef(d) => Some(&d.ident),
            Decl::StructField(d) => Some(&d.ident),
            Decl::VarDecl(d) => Some(&d.ident),
            Decl::NativeVarDecl(d) => Some(&d.ident),
            Decl::EnumDef(d) => Some(&d.ident),
            Decl::EnumVariant(d) => Some(&d.ident),
            Decl::UnionDef(d) => Some(&d.ident),
            Decl::UnionCase(d) => Some(&d.ident),
            Decl::ProtoDef(d) => Some(&d.ident),
            Decl::TypeAlias(d) => Some(&d.ident),
            Decl::UseDecl(_) | Decl::MetaIf(_) | Decl::Error => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct VarStmt {
    pub ident: Ident,
    pub type_expr: Option<ExprId>,
    pub value: ExprId,
    /// Resolved local type
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct AssignStmt {
    pub lhs: ExprId,
    pub rhs: ExprId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct CompAssignStmt {
    pub op: BinaryOp,
    pub lhs: ExprId,
    pub rhs: ExprId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ReturnStmt {
    pub value: Option<ExprId>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct IfBranch {
    pub condition: ExprId,
    pub block: BlockId,
}

#[derive(Debug, Clone)]
pub struct IfStmt {
    pub branches: Vec<IfBranch>,
    pub else_block: Option<BlockId>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub ident: Ident,
    pub type_expr: ExprId,
    pub ty: Type,
    pub block: BlockId,
}

#[derive(Debug, Clone)]
pub struct SwitchStmt {
    pub value: ExprId,
    pub cases: Vec<SwitchCase>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TryStmt {
    pub ident: Ident,
    pub expr: ExprId,
    pub success_block: BlockId,
    pub except_ident: Option<Ident>,
    pub except_block: Option<BlockId>,
    pub else_block: Option<BlockId>,
    /// Filled by the analyzer: the statements the try dispatches through
    pub lowered: Option<StmtId>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct WhileStmt {
    pub condition: ExprId,
    pub block: BlockId,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ForStmt {
    pub ident: Ident,
    pub by_ref: bool,
    pub range: ExprId,
    pub block: BlockId,
    /// Filled by the analyzer: the loop the for was rewritten into
    pub lowered: Option<StmtId>,
    pub span: Span,
}

/// A generic loop: optional condition checked at the head, optional latch
/// block run between iterations
#[derive(Debug, Clone)]
pub struct LoopStmt {
    pub condition: Option<ExprId>,
    pub block: BlockId,
    pub latch: Option<BlockId>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct MetaIfStmt {
    pub condition: ExprId,
    pub then_block: BlockId,
    pub else_block: Option<BlockId>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct MetaForStmt {
    pub ident: Ident,
    pub range: ExprId,
    pub block: BlockId,
    pub span: Span,
}

/// The statements a meta statement expanded into
#[derive(Debug, Clone)]
pub struct ExpandedMetaStmt {
    pub stmts: Vec<StmtId>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Var(VarStmt),
    Assign(AssignStmt),
    CompAssign(CompAssignStmt),
    Return(ReturnStmt),
    If(IfStmt),
    Switch(SwitchStmt),
    Try(TryStmt),
    While(WhileStmt),
    For(ForStmt),
    Loop(LoopStmt),
    Continue(Span),
    Break(Span),
    Block(BlockId),
    Expr(ExprId),
    MetaIf(MetaIfStmt),
    MetaFor(MetaForStmt),
    ExpandedMeta(ExpandedMetaStmt),
    Error,
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
    /// Take the address of an l-value
    Addr,
    /// Create a reference
    Ref,
    /// Dereference a pointer or reference
    Deref,
}

#[derive(Debug, Clone)]
pub struct StructLiteralEntry {
    pub ident: Ident,
    pub value: ExprId,
    /// Resolved field index within the struct definition
    pub field_index: Option<u32>,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLiteral(i128),
    FpLiteral(f64),
    BoolLiteral(bool),
    CharLiteral(char),
    NullLiteral,
    NoneLiteral,
    UndefinedLiteral,
    ArrayLiteral(Vec<ExprId>),
    StringLiteral(String),
    StructLiteral {
        type_expr: Option<ExprId>,
        entries: Vec<StructLiteralEntry>,
    },
    MapLiteral(Vec<(ExprId, ExprId)>),
    Tuple(Vec<ExprId>),
    Closure {
        params: Vec<Param>,
        return_type_expr: Option<ExprId>,
        block: BlockId,
    },
    /// A resolved symbol reference
    Symbol(crate::Symbol),
    Binary {
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Unary {
        op: UnaryOp,
        value: ExprId,
    },
    Cast {
        value: ExprId,
        target: ExprId,
    },
    /// An implicit conversion inserted by the analyzer
    Coercion {
        value: ExprId,
    },
    Index {
        base: ExprId,
        index: ExprId,
    },
    Call {
        callee: ExprId,
        args: Vec<ExprId>,
    },
    /// A resolved field access
    Field {
        base: ExprId,
        field: DeclId,
        index: u32,
    },
    /// A resolved tuple element access
    TupleField {
        base: ExprId,
        index: u32,
    },
    Range {
        start: ExprId,
        end: ExprId,
    },
    /// An unresolved member access (`lhs.rhs`)
    Dot {
        lhs: ExprId,
        rhs: Ident,
    },
    /// An unresolved name
    Ident(Ident),
    /// `*expr` before the analyzer decides deref vs. pointer type
    Star(ExprId),
    /// `base[args]` before the analyzer decides index vs. specialization
    Bracket {
        base: ExprId,
        args: Vec<ExprId>,
    },
    MetaAccess {
        target: ExprId,
    },
    MetaField {
        base: ExprId,
        field: Ident,
    },
    MetaCall {
        callee: ExprId,
        args: Vec<ExprId>,
    },
    PrimitiveType(crate::Primitive),
    PointerType(ExprId),
    ReferenceType {
        mutable: bool,
        base: ExprId,
    },
    StaticArrayType {
        element: ExprId,
        length: ExprId,
    },
    FuncTypeExpr {
        params: Vec<ExprId>,
        return_type: Option<ExprId>,
    },
    OptionalType(ExprId),
    ResultType {
        value: ExprId,
        error: ExprId,
    },
    ArrayType(ExprId),
    ClosureTypeExpr {
        params: Vec<ExprId>,
        return_type: Option<ExprId>,
    },
    TupleType(Vec<ExprId>),
    Error,
}

/// An expression node: kind, type, and originating source span
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, ty: Type, span: Span) -> Self {
        Self { kind, ty, span }
    }
}
