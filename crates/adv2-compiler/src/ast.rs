//! Abstract syntax tree produced by the parser and consumed by the
//! semantic analyzer and code generator.
//!
//! Rather than the C sources' single tagged union with a common
//! `nodeType` field, each syntactic category gets its own enum whose
//! variants carry only the fields relevant to them. Nodes are owned by
//! plain `Box`/`Vec` — there is no separate arena, since `Program` owns the
//! whole tree for the lifetime of one compilation.

use crate::token::Span;

#[derive(Debug, Clone)]
pub struct Program {
    pub decls: Vec<Decl>,
}

#[derive(Debug, Clone)]
pub enum Decl {
    Const { name: String, value: Expr, span: Span },
    Global { bindings: Vec<(String, Option<Expr>)>, span: Span },
    ByteGlobal { name: String, size: Option<Expr>, init: ByteInit, span: Span },
    Function(FunctionDef),
    Object(ObjectDef),
    PropertyReserve { names: Vec<String>, span: Span },
}

#[derive(Debug, Clone)]
pub enum ByteInit {
    None,
    FromString(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub locals: Vec<LocalDecl>,
    pub body: Vec<Stmt>,
    pub span: Span,
    /// True for `method(...) { ... }` bodies, which receive two implicit
    /// leading parameters (`self`, a dummy slot) ahead of `params`.
    pub is_method: bool,
}

#[derive(Debug, Clone)]
pub struct LocalDecl {
    pub name: String,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct ObjectDef {
    pub class_name: Option<String>,
    pub name: String,
    pub members: Vec<ObjectMember>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ObjectMember {
    pub shared: bool,
    pub tag_name: String,
    pub value: MemberValue,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum MemberValue {
    Method(FunctionDef),
    Const(Expr),
}

/// A `for` loop's init clause: either a plain expression statement, or an
/// inline `var NAME = expr, ...` declaration. The latter is sugar — the
/// declared names are folded into the enclosing function's flat locals
/// table during semantic analysis, and their initializer code is emitted
/// right here rather than at the prologue.
#[derive(Debug, Clone)]
pub enum ForInit {
    Expr(Expr),
    VarDecl(Vec<LocalDecl>),
}

/// One element of a `print`/`println` argument list: either a value to
/// emit (string-typed traps through `PrintStr`, everything else through
/// `PrintInt`, decided at codegen time from the expression's syntactic
/// form) or an explicit `,` separator, which emits a tab.
#[derive(Debug, Clone)]
pub enum PrintItem {
    Value(Expr),
    Tab,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    If { cond: Expr, then_branch: Box<Stmt>, else_branch: Option<Box<Stmt>> },
    While { cond: Expr, body: Box<Stmt> },
    DoWhile { body: Box<Stmt>, cond: Expr },
    For { init: Option<ForInit>, cond: Option<Expr>, step: Option<Expr>, body: Box<Stmt> },
    Return(Option<Expr>, Span),
    Break(Span),
    Continue(Span),
    Block(Vec<Stmt>),
    Print { items: Vec<PrintItem>, newline: bool, span: Span },
    Try { body: Box<Stmt>, catch: Option<(String, Box<Stmt>)>, finally: Option<Box<Stmt>>, span: Span },
    Throw(Expr, Span),
    Asm { lines: Vec<(String, Span)>, span: Span },
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add, Sub, Mul, Div, Rem,
    BitAnd, BitOr, BitXor, Shl, Shr,
    Lt, Le, Eq, Ne, Ge, Gt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add, Sub, Mul, Div, Rem,
    BitAnd, BitOr, BitXor, Shl, Shr,
}

#[derive(Debug, Clone)]
pub enum Selector {
    Name(String),
    Expr(Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Number(i32, Span),
    Str(Vec<u8>, Span),
    /// Also how `nil` reaches the AST: it is seeded as a predefined global
    /// constant (value 0) during semantic analysis rather than a keyword,
    /// the same mechanism `def NAME = expr;` constants use.
    Ident(String, Span),
    Unary { op: UnOp, expr: Box<Expr>, span: Span },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr>, span: Span },
    /// Flattened N-ary `&&`/`||` chain, built by merging adjacent same-kind
    /// operators during parsing rather than nesting binary pairs.
    LogicalAnd(Vec<Expr>, Span),
    LogicalOr(Vec<Expr>, Span),
    Ternary { cond: Box<Expr>, then_expr: Box<Expr>, else_expr: Box<Expr>, span: Span },
    Assign { op: AssignOp, target: Box<Expr>, value: Box<Expr>, span: Span },
    PreIncDec { inc: bool, target: Box<Expr>, span: Span },
    PostIncDec { inc: bool, target: Box<Expr>, span: Span },
    Index { base: Box<Expr>, index: Box<Expr>, span: Span },
    Call { callee: Box<Expr>, args: Vec<Expr>, span: Span },
    /// `[ object selector args... ]`. `object: None` is `[super selector
    /// args...]` — dispatch starts in the current method's object's
    /// superclass rather than its own class. `selector` is itself a full
    /// expression (commonly an identifier) evaluated to the property tag
    /// dispatched on, not a fixed name.
    Send { object: Option<Box<Expr>>, selector: Box<Expr>, args: Vec<Expr>, span: Span },
    PropertyRef { object: Box<Expr>, tag: Selector, span: Span },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Number(_, s)
            | Expr::Str(_, s)
            | Expr::Ident(_, s)
            | Expr::Unary { span: s, .. }
            | Expr::Binary { span: s, .. }
            | Expr::LogicalAnd(_, s)
            | Expr::LogicalOr(_, s)
            | Expr::Ternary { span: s, .. }
            | Expr::Assign { span: s, .. }
            | Expr::PreIncDec { span: s, .. }
            | Expr::PostIncDec { span: s, .. }
            | Expr::Index { span: s, .. }
            | Expr::Call { span: s, .. }
            | Expr::Send { span: s, .. }
            | Expr::PropertyRef { span: s, .. } => *s,
        }
    }
}
