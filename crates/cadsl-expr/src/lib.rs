//! Expression and script language used for inline conditions, computed
//! fields, and inline code steps.
//!
//! ```text
//! score > {min_score} and name =~ '^test_'
//! {'name': name, 'loc': end_line - line}
//! big = filter(rows, r => r.count > 10); result = {'n': len(big)}
//! ```

pub mod ast;
pub mod builtins;
pub mod eval;
pub mod parser;
pub mod script;

pub use ast::{BinaryOp, Expr, UnaryOp};
pub use eval::{eval, eval_row, values_equal, Scope};
pub use parser::parse_expr;
pub use script::{Script, Statement};
