use serde_json::Value;

/// An expression over a row, the execution context, and local bindings.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// A bare name: a local binding, else a field of the current row.
    Var(String),
    /// `{name}`: an execution parameter.
    Param(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Lambda(Vec<String>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Matches,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    /// Map a comparison operator token (`"=="`, `">="`, `"in"`...) to its op.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let op = match symbol {
            "==" | "=" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "in" => BinaryOp::In,
            "not in" => BinaryOp::NotIn,
            "=~" | "matches" => BinaryOp::Matches,
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Mod,
            "and" | "&&" => BinaryOp::And,
            "or" | "||" => BinaryOp::Or,
            _ => return None,
        };
        Some(op)
    }
}

impl Expr {
    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(name.into())
    }

    pub fn param(name: impl Into<String>) -> Self {
        Expr::Param(name.into())
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn not(inner: Expr) -> Self {
        Expr::Unary(UnaryOp::Not, Box::new(inner))
    }

    /// A dotted field path such as `a.b.c`.
    pub fn path(path: &str) -> Self {
        let mut parts = path.split('.');
        let head = parts.next().unwrap_or_default();
        parts.fold(Expr::var(head), |acc, part| {
            Expr::Member(Box::new(acc), part.to_string())
        })
    }
}
