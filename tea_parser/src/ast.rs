//! Abstract syntax tree for the tea language (§4.4).
//!
//! `Span`-carrying nodes, `Box`-owned children, no separate `NodeId`/arena.
//! The node set is the small grammar the source language actually has: no
//! generics, traits, structs, enums, or pattern matching, so `Item`/`Stmt`
//! stay a handful of variants rather than dozens.

use tea_common::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConv {
    CDecl,
    FastCall,
    StdCall,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signedness {
    Signed,
    Unsigned,
}

/// A type name as written in source: `[const] [signed|unsigned] name (*[const])* ([N])*`.
/// Each entry in `pointer_const` is one `*` level; the bool is whether that
/// level was followed by `const`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub is_const: bool,
    pub signedness: Option<Signedness>,
    pub name: String,
    pub pointer_const: Vec<bool>,
    pub array_dims: Vec<u32>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub ty: TypeExpr,
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    pub list: Vec<Param>,
    pub is_vararg: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// `using "path";`
    UsingImport { path: String, span: Span },
    /// `import [cc] func name(params) -> type;`
    FuncImport {
        cc: Option<CallingConv>,
        name: String,
        params: Params,
        return_type: TypeExpr,
        span: Span,
    },
    /// `public|private [cc] func name(params) -> type <block> end`
    Function {
        visibility: Visibility,
        cc: Option<CallingConv>,
        name: String,
        params: Params,
        return_type: TypeExpr,
        body: Block,
        span: Span,
    },
    /// `public|private var name: type [= expr];`
    VarDecl {
        visibility: Visibility,
        name: String,
        ty: Option<TypeExpr>,
        init: Option<Expr>,
        span: Span,
    },
}

impl Item {
    pub fn span(&self) -> Span {
        match self {
            Item::UsingImport { span, .. }
            | Item::FuncImport { span, .. }
            | Item::Function { span, .. }
            | Item::VarDecl { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Return { value: Option<Expr>, span: Span },
    VarDecl { name: String, ty: Option<TypeExpr>, init: Option<Expr>, span: Span },
    If {
        cond: Expr,
        then_block: Block,
        elseifs: Vec<(Expr, Block)>,
        else_block: Option<Block>,
        span: Span,
    },
    While { cond: Expr, body: Block, span: Span },
    For {
        init: Box<Stmt>,
        cond: Expr,
        step: Expr,
        body: Block,
        span: Span,
    },
    Break { span: Span },
    Continue { span: Span },
    Expr { expr: Expr, span: Span },
    Assign { target: Expr, op: Option<AssignOp>, value: Expr, span: Span },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Return { span, .. }
            | Stmt::VarDecl { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. }
            | Stmt::For { span, .. }
            | Stmt::Break { span }
            | Stmt::Continue { span }
            | Stmt::Expr { span, .. }
            | Stmt::Assign { span, .. } => *span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    AddrOf,
    Deref,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64, Span),
    Float(String, Span),
    Double(String, Span),
    Str(String, Span),
    Char(u8, Span),
    /// `name` or `scope::name::…`, joined on `::` exactly as written.
    /// `true`, `false` and `null` are ordinary single-segment paths here —
    /// CodeGen (§4.6), not the parser, special-cases their spelling.
    Path(Vec<String>, Span),
    Unary { op: UnaryOp, expr: Box<Expr>, span: Span },
    Array { elements: Vec<Expr>, span: Span },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr>, span: Span },
    Call { callee: Box<Expr>, args: Vec<Expr>, span: Span },
    Index { base: Box<Expr>, index: Box<Expr>, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Int(_, s)
            | Expr::Float(_, s)
            | Expr::Double(_, s)
            | Expr::Str(_, s)
            | Expr::Char(_, s)
            | Expr::Path(_, s)
            | Expr::Unary { span: s, .. }
            | Expr::Array { span: s, .. }
            | Expr::Binary { span: s, .. }
            | Expr::Call { span: s, .. }
            | Expr::Index { span: s, .. } => *s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub items: Vec<Item>,
}
