use serde_json::{Number, Value};
use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{alt, delimited, not, opt, preceded, separated, terminated};
use winnow::error::{ContextError, ErrMode};
use winnow::token::{literal, one_of, take_while};
use winnow::{ModalResult, Parser};

use cadsl_types::{CadslError, Result};

use crate::ast::{BinaryOp, Expr, UnaryOp};

const KEYWORDS: &[&str] = &["and", "or", "not", "in", "matches"];

fn backtrack() -> ErrMode<ContextError> {
    ErrMode::Backtrack(ContextError::new())
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ws<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    multispace0.parse_next(input)
}

/// [A-Za-z_][A-Za-z0-9_]*
pub(crate) fn identifier<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., is_ident_char),
    )
        .take()
        .parse_next(input)
}

/// An identifier, optionally carrying the `?` query-variable marker.
fn field_name<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (opt('?'), identifier).take().parse_next(input)
}

/// A keyword that is not the prefix of a longer identifier.
fn keyword<'i>(kw: &'static str) -> impl Parser<&'i str, &'i str, ErrMode<ContextError>> {
    terminated(literal(kw), not(one_of(is_ident_char)))
}

fn quoted_string(input: &mut &str) -> ModalResult<String> {
    let quote = alt(('"', '\'')).parse_next(input)?;
    let mut s = String::new();
    loop {
        let c = winnow::token::any.parse_next(input)?;
        match c {
            c if c == quote => break,
            '\\' => {
                let esc = winnow::token::any.parse_next(input)?;
                match esc {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    'r' => s.push('\r'),
                    '\\' => s.push('\\'),
                    '"' => s.push('"'),
                    '\'' => s.push('\''),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            other => s.push(other),
        }
    }
    Ok(s)
}

fn number(input: &mut &str) -> ModalResult<Value> {
    let text = (digit1, opt(('.', digit1))).take().parse_next(input)?;
    if text.contains('.') {
        let f: f64 = text.parse().map_err(|_| backtrack())?;
        Number::from_f64(f).map(Value::Number).ok_or_else(backtrack)
    } else {
        let i: i64 = text.parse().map_err(|_| backtrack())?;
        Ok(Value::from(i))
    }
}

fn param_ref(input: &mut &str) -> ModalResult<Expr> {
    let name = delimited(('{', ws), identifier, (ws, '}')).parse_next(input)?;
    Ok(Expr::Param(name.to_string()))
}

fn object_key(input: &mut &str) -> ModalResult<String> {
    alt((quoted_string, identifier.map(String::from))).parse_next(input)
}

fn object_entry(input: &mut &str) -> ModalResult<(String, Expr)> {
    let key = object_key.parse_next(input)?;
    let _ = (ws, ':').parse_next(input)?;
    let value = expr.parse_next(input)?;
    Ok((key, value))
}

fn object_lit(input: &mut &str) -> ModalResult<Expr> {
    let _ = ('{', ws).parse_next(input)?;
    let entries: Vec<(String, Expr)> =
        separated(0.., object_entry, (ws, ',', ws)).parse_next(input)?;
    let _ = (ws, opt(','), ws, '}').parse_next(input)?;
    Ok(Expr::Object(entries))
}

fn arguments(input: &mut &str) -> ModalResult<Vec<Expr>> {
    let _ = ('(', ws).parse_next(input)?;
    let args: Vec<Expr> = separated(0.., expr, (ws, ',')).parse_next(input)?;
    let _ = (ws, opt(','), ws, ')').parse_next(input)?;
    Ok(args)
}

fn list_lit(input: &mut &str) -> ModalResult<Expr> {
    let _ = ('[', ws).parse_next(input)?;
    let items: Vec<Expr> = separated(0.., expr, (ws, ',')).parse_next(input)?;
    let _ = (ws, opt(','), ws, ']').parse_next(input)?;
    Ok(Expr::List(items))
}

fn paren_expr(input: &mut &str) -> ModalResult<Expr> {
    delimited('(', expr, (ws, ')')).parse_next(input)
}

fn name_or_call(input: &mut &str) -> ModalResult<Expr> {
    let name = field_name.parse_next(input)?;
    match name {
        "true" | "True" => return Ok(Expr::Literal(Value::Bool(true))),
        "false" | "False" => return Ok(Expr::Literal(Value::Bool(false))),
        "null" | "None" => return Ok(Expr::Literal(Value::Null)),
        kw if KEYWORDS.contains(&kw) => return Err(backtrack()),
        _ => {}
    }
    if !name.starts_with('?') {
        if let Some(args) = opt(preceded(ws, arguments)).parse_next(input)? {
            return Ok(Expr::Call(name.to_string(), args));
        }
    }
    Ok(Expr::Var(name.to_string()))
}

fn primary(input: &mut &str) -> ModalResult<Expr> {
    let _ = ws.parse_next(input)?;
    alt((
        quoted_string.map(|s| Expr::Literal(Value::String(s))),
        number.map(Expr::Literal),
        param_ref,
        object_lit,
        list_lit,
        paren_expr,
        name_or_call,
    ))
    .parse_next(input)
}

enum Suffix {
    Member(String, Option<Vec<Expr>>),
    Index(Expr),
}

fn suffix(input: &mut &str) -> ModalResult<Suffix> {
    alt((
        (preceded(('.', ws), field_name), opt(preceded(ws, arguments)))
            .map(|(name, args)| Suffix::Member(name.to_string(), args)),
        delimited('[', expr, (ws, ']')).map(Suffix::Index),
    ))
    .parse_next(input)
}

fn postfix(input: &mut &str) -> ModalResult<Expr> {
    let mut base = primary.parse_next(input)?;
    while let Some(s) = opt(preceded(ws, suffix)).parse_next(input)? {
        base = match s {
            // `x.lower()` is sugar for `lower(x)`
            Suffix::Member(name, Some(mut args)) => {
                args.insert(0, base);
                Expr::Call(name, args)
            }
            Suffix::Member(name, None) => Expr::Member(Box::new(base), name),
            Suffix::Index(index) => Expr::Index(Box::new(base), Box::new(index)),
        };
    }
    Ok(base)
}

fn unary(input: &mut &str) -> ModalResult<Expr> {
    let _ = ws.parse_next(input)?;
    if opt('-').parse_next(input)?.is_some() {
        let inner = unary.parse_next(input)?;
        return Ok(match inner {
            Expr::Literal(Value::Number(n)) if n.is_i64() => {
                Expr::Literal(Value::from(-n.as_i64().unwrap_or_default()))
            }
            other => Expr::Unary(UnaryOp::Neg, Box::new(other)),
        });
    }
    postfix.parse_next(input)
}

fn term(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = unary.parse_next(input)?;
    while let Some(op) = opt(preceded(
        ws,
        alt((
            '*'.value(BinaryOp::Mul),
            '/'.value(BinaryOp::Div),
            '%'.value(BinaryOp::Mod),
        )),
    ))
    .parse_next(input)?
    {
        let rhs = unary.parse_next(input)?;
        lhs = Expr::binary(op, lhs, rhs);
    }
    Ok(lhs)
}

fn additive(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = term.parse_next(input)?;
    while let Some(op) = opt(preceded(
        ws,
        alt(('+'.value(BinaryOp::Add), '-'.value(BinaryOp::Sub))),
    ))
    .parse_next(input)?
    {
        let rhs = term.parse_next(input)?;
        lhs = Expr::binary(op, lhs, rhs);
    }
    Ok(lhs)
}

fn comparison_op(input: &mut &str) -> ModalResult<BinaryOp> {
    alt((
        "==".value(BinaryOp::Eq),
        "!=".value(BinaryOp::Ne),
        "<=".value(BinaryOp::Le),
        ">=".value(BinaryOp::Ge),
        "=~".value(BinaryOp::Matches),
        "<".value(BinaryOp::Lt),
        ">".value(BinaryOp::Gt),
        keyword("matches").value(BinaryOp::Matches),
        (keyword("not"), ws, keyword("in")).value(BinaryOp::NotIn),
        keyword("in").value(BinaryOp::In),
    ))
    .parse_next(input)
}

fn comparison(input: &mut &str) -> ModalResult<Expr> {
    let lhs = additive.parse_next(input)?;
    match opt(preceded(ws, comparison_op)).parse_next(input)? {
        Some(op) => {
            let rhs = additive.parse_next(input)?;
            Ok(Expr::binary(op, lhs, rhs))
        }
        None => Ok(lhs),
    }
}

fn not_expr(input: &mut &str) -> ModalResult<Expr> {
    let _ = ws.parse_next(input)?;
    let negated = opt(alt((keyword("not"), terminated("!", not('='))))).parse_next(input)?;
    if negated.is_some() {
        let inner = not_expr.parse_next(input)?;
        return Ok(Expr::not(inner));
    }
    comparison.parse_next(input)
}

fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = not_expr.parse_next(input)?;
    while opt(preceded(ws, alt((keyword("and"), "&&"))))
        .parse_next(input)?
        .is_some()
    {
        let rhs = not_expr.parse_next(input)?;
        lhs = Expr::binary(BinaryOp::And, lhs, rhs);
    }
    Ok(lhs)
}

fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = and_expr.parse_next(input)?;
    while opt(preceded(ws, alt((keyword("or"), "||"))))
        .parse_next(input)?
        .is_some()
    {
        let rhs = and_expr.parse_next(input)?;
        lhs = Expr::binary(BinaryOp::Or, lhs, rhs);
    }
    Ok(lhs)
}

fn lambda_params(input: &mut &str) -> ModalResult<Vec<String>> {
    alt((
        identifier.map(|p| vec![p.to_string()]),
        delimited(
            ('(', ws),
            separated(0.., identifier.map(String::from), (ws, ',', ws)),
            (ws, ')'),
        ),
    ))
    .parse_next(input)
}

fn lambda(input: &mut &str) -> ModalResult<Expr> {
    let params = lambda_params.parse_next(input)?;
    let _ = (ws, "=>").parse_next(input)?;
    let body = expr.parse_next(input)?;
    Ok(Expr::Lambda(params, Box::new(body)))
}

pub(crate) fn expr(input: &mut &str) -> ModalResult<Expr> {
    let _ = ws.parse_next(input)?;
    alt((lambda, or_expr)).parse_next(input)
}

fn parse_error(src: &str, remaining: &str) -> CadslError {
    let offset = src.len() - remaining.len();
    let snippet: String = remaining.chars().take(20).collect();
    let message = if snippet.is_empty() {
        "unexpected end of expression".to_string()
    } else {
        format!("unexpected input near '{snippet}'")
    };
    CadslError::ExprParse { offset, message }
}

/// Parse a complete expression. Trailing input is an error.
pub fn parse_expr(src: &str) -> Result<Expr> {
    let mut remaining = src;
    match terminated(expr, ws).parse_next(&mut remaining) {
        Ok(e) if remaining.is_empty() => Ok(e),
        Ok(_) | Err(_) => Err(parse_error(src, remaining)),
    }
}
