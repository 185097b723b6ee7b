//! Inline scripts: a sequence of `name = expr` statements.
//!
//! Statements are separated by newlines or `;` outside brackets and string
//! literals. `#` starts a comment that runs to the end of the line.

use winnow::ascii::multispace0;
use winnow::combinator::not;
use winnow::token::one_of;
use winnow::Parser;

use cadsl_types::{CadslError, Fault, Result};

use crate::ast::Expr;
use crate::eval::{eval, Scope};
use crate::parser::{identifier, parse_expr};

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Variable assigned by the statement; `None` for a bare expression.
    pub target: Option<String>,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Script {
    statements: Vec<Statement>,
}

impl Script {
    pub fn parse(src: &str) -> Result<Self> {
        let mut statements = Vec::new();
        for (offset, text) in split_statements(src) {
            statements.push(parse_statement(&text).map_err(|e| shift(e, offset))?);
        }
        tracing::trace!(statements = statements.len(), "Parsed inline script");
        Ok(Self { statements })
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Run every statement in order, writing assignments into `scope`.
    pub fn run(&self, scope: &mut Scope<'_>) -> std::result::Result<(), Fault> {
        for stmt in &self.statements {
            let value = eval(&stmt.expr, scope)?;
            if let Some(target) = &stmt.target {
                scope.set(target.clone(), value);
            }
        }
        Ok(())
    }
}

fn shift(err: CadslError, base: usize) -> CadslError {
    match err {
        CadslError::ExprParse { offset, message } => CadslError::ExprParse {
            offset: offset + base,
            message,
        },
        other => other,
    }
}

fn parse_statement(text: &str) -> Result<Statement> {
    let mut rest = text;
    let target = (
        identifier,
        multispace0,
        '=',
        not(one_of(['=', '~', '>'])),
    )
        .map(|(name, _, _, _)| name.to_string())
        .parse_next(&mut rest)
        .ok();
    match target {
        Some(name) => {
            let consumed = text.len() - rest.len();
            let expr = parse_expr(rest).map_err(|e| shift(e, consumed))?;
            Ok(Statement {
                target: Some(name),
                expr,
            })
        }
        None => Ok(Statement {
            target: None,
            expr: parse_expr(text)?,
        }),
    }
}

/// Blank out `#` comments, keeping byte offsets and newlines intact.
fn strip_comments(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut in_comment = false;
    for c in src.chars() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
                out.push('\n');
            } else {
                out.extend(std::iter::repeat(' ').take(c.len_utf8()));
            }
            continue;
        }
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
        } else if c == '"' || c == '\'' {
            quote = Some(c);
        } else if c == '#' {
            in_comment = true;
            out.push(' ');
            continue;
        }
        out.push(c);
    }
    out
}

fn push_segment(clean: &str, from: usize, to: usize, out: &mut Vec<(usize, String)>) {
    let piece = &clean[from..to];
    let trimmed = piece.trim_start();
    let offset = from + piece.len() - trimmed.len();
    let trimmed = trimmed.trim_end();
    if !trimmed.is_empty() {
        out.push((offset, trimmed.to_string()));
    }
}

/// Split source into `(byte offset, statement text)` pairs, skipping blanks
/// and comments.
fn split_statements(src: &str) -> Vec<(usize, String)> {
    let clean = strip_comments(src);
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0usize;

    for (i, c) in clean.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            '\n' | ';' if depth == 0 => {
                push_segment(&clean, start, i, &mut out);
                start = i + 1;
            }
            _ => {}
        }
    }
    push_segment(&clean, start, clean.len(), &mut out);
    out
}
