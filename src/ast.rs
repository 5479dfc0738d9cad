// Abstract syntax tree for the embedded scripting language (10.1). Parsed once per script
// (and once per `eval`/`inspect` expression) by parser.rs, walked by interp.rs.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    SetLit(Vec<Expr>),
    MapLit(Vec<(Expr, Expr)>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    BoolOp(BoolOp, Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone)]
pub enum AssignTarget {
    Name(String),
    Attr(Expr, String),
    Index(Expr, Expr),
}

// Every statement that can appear at a traced source line carries the 1-based line number
// it was parsed from; the tracing engine fires on these lines (4.5).
#[derive(Debug, Clone)]
pub struct Stmt {
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Expr(Expr),
    Assign(AssignTarget, Expr),
    If(Expr, Vec<Stmt>, Vec<Stmt>),
    While(Expr, Vec<Stmt>),
    For(String, Expr, Vec<Stmt>),
    FunctionDef(String, Vec<(String, Option<Expr>)>, Vec<Stmt>),
    Return(Option<Expr>),
    Raise(String, Option<Expr>),
    Try(Vec<Stmt>, Option<String>, Option<String>, Vec<Stmt>),
    Break,
    Continue,
    Pass,
}

pub type Program = Vec<Stmt>;
