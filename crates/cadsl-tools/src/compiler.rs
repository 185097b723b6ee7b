//! Condition and expression compilation.
//!
//! The transformer hands every condition, computed expression, and key
//! expression sub-tree to an [`ExprCompiler`]. The result is a callable that
//! can be stored directly in a step descriptor.

use std::sync::Arc;

use serde_json::{Number, Value};

use cadsl_expr::{eval, eval_row, parse_expr, BinaryOp, Expr, Scope, UnaryOp};
use cadsl_pipeline::{Callable, FlatTransform, Guard, Predicate, Transform};
use cadsl_types::row::clean_key;
use cadsl_types::value::truthy;
use cadsl_types::{CadslError, Context, Result};

use crate::tree::{Node, Token, Tree};

/// Compiles condition and expression sub-trees into step callables.
pub trait ExprCompiler: Send + Sync {
    fn predicate(&self, node: &Node) -> Result<Predicate>;

    fn transform(&self, node: &Node) -> Result<Transform>;

    /// A filter `when` guard, evaluated against the context only.
    fn guard(&self, node: &Node) -> Result<Guard>;

    /// An expansion for `flat_map`: arrays spread, null drops the element,
    /// anything else is kept as a single item.
    fn flat_transform(&self, node: &Node) -> Result<FlatTransform> {
        let transform = self.transform(node)?;
        Ok(Callable::contextual(move |row: &Value, ctx: &Context| {
            Ok(match transform.call(row, ctx)? {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => vec![other],
            })
        }))
    }
}

/// Lowers parse-tree nodes to [`Expr`] and evaluates them with `cadsl-expr`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeCompiler;

impl TreeCompiler {
    pub fn new() -> Self {
        Self
    }

    pub fn lower(&self, node: &Node) -> Result<Expr> {
        match node {
            Node::Token(token) => lower_token(token),
            Node::Tree(tree) => lower_tree(tree),
        }
    }
}

impl ExprCompiler for TreeCompiler {
    fn predicate(&self, node: &Node) -> Result<Predicate> {
        let expr = self.lower(node)?;
        Ok(Callable::contextual(move |row: &Value, ctx: &Context| {
            eval_row(&expr, row, ctx).map(|v| truthy(&v))
        }))
    }

    /// A lambda binds its first parameter to the row.
    fn transform(&self, node: &Node) -> Result<Transform> {
        let expr = self.lower(node)?;
        if let Expr::Lambda(params, body) = expr {
            let param = params.into_iter().next();
            return Ok(Callable::contextual(move |row: &Value, ctx: &Context| {
                let scope = Scope::for_row(row, ctx);
                let scope = match &param {
                    Some(name) => scope.bind(name.clone(), row.clone()),
                    None => scope,
                };
                eval(&body, &scope)
            }));
        }
        Ok(Callable::contextual(move |row: &Value, ctx: &Context| {
            eval_row(&expr, row, ctx)
        }))
    }

    fn guard(&self, node: &Node) -> Result<Guard> {
        let expr = self.lower(node)?;
        let guard: Guard = Arc::new(move |ctx: &Context| {
            let scope = Scope::new().with_context(ctx);
            match eval(&expr, &scope) {
                Ok(v) => truthy(&v),
                Err(e) => {
                    tracing::warn!(error = %e, "Filter guard failed, treating as false");
                    false
                }
            }
        });
        Ok(guard)
    }
}

// ---------------------------------------------------------------------------
// Lowering
// ---------------------------------------------------------------------------

fn unsupported(node: &str, message: impl Into<String>) -> CadslError {
    CadslError::Transform {
        node: node.to_string(),
        message: message.into(),
    }
}

/// Strip one pair of matching quotes (triple quotes first).
pub(crate) fn unquote(text: &str) -> &str {
    let text = text.trim();
    for q in ["\"\"\"", "'''", "\"", "'"] {
        if text.len() >= 2 * q.len() && text.starts_with(q) && text.ends_with(q) {
            return &text[q.len()..text.len() - q.len()];
        }
    }
    text
}

pub(crate) fn number(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::from(i));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// Keyword literals accepted as bare names.
pub(crate) fn keyword_literal(name: &str) -> Option<Value> {
    match name {
        "true" | "True" => Some(Value::Bool(true)),
        "false" | "False" => Some(Value::Bool(false)),
        "null" | "None" | "none" => Some(Value::Null),
        _ => None,
    }
}

/// Operator text when the token is one, else `None`.
fn operator(token: &Token) -> Option<&str> {
    let kind = token.kind.as_str();
    let is_op = kind.ends_with("OP")
        || matches!(kind, "AND" | "OR" | "NOT" | "IN" | "MATCHES" | "PLUS" | "MINUS" | "STAR" | "SLASH" | "PERCENT");
    is_op.then_some(token.value.trim())
}

fn is_operator(node: &Node) -> bool {
    node.as_token().and_then(operator).is_some()
}

fn lower_token(token: &Token) -> Result<Expr> {
    let value = token.value.as_str();
    match token.kind.as_str() {
        "NUMBER" | "INT" | "FLOAT" => number(value)
            .map(Expr::Literal)
            .ok_or_else(|| unsupported("NUMBER", format!("invalid number '{value}'"))),
        "STRING" | "ESCAPED_STRING" => Ok(Expr::literal(unquote(value))),
        "BOOL" | "BOOLEAN" => keyword_literal(value)
            .map(Expr::Literal)
            .ok_or_else(|| unsupported("BOOL", format!("invalid boolean '{value}'"))),
        "NAME" | "IDENT" | "CNAME" => Ok(match keyword_literal(value) {
            Some(lit) => Expr::Literal(lit),
            None if value.contains('.') => Expr::path(value),
            None => Expr::var(value),
        }),
        "VAR" => Ok(Expr::path(clean_key(value))),
        "PARAM" => {
            let name = value.trim().trim_start_matches('{').trim_end_matches('}');
            Ok(Expr::param(name.trim()))
        }
        "EXPR" | "CODE" => parse_expr(value.trim()),
        other => Err(unsupported(other, format!("unexpected token '{value}'"))),
    }
}

fn operands(tree: &Tree) -> Vec<&Node> {
    tree.children.iter().filter(|c| !is_operator(c)).collect()
}

fn single(tree: &Tree) -> Result<Expr> {
    match operands(tree).as_slice() {
        [only] => TreeCompiler.lower(only),
        _ => Err(unsupported(&tree.data, "expected exactly one operand")),
    }
}

/// Left fold over `a OP b OP c`; `default` applies between operands with no
/// explicit operator token.
fn fold_binary(tree: &Tree, default: Option<BinaryOp>) -> Result<Expr> {
    let mut acc: Option<Expr> = None;
    let mut pending: Option<BinaryOp> = None;
    for child in &tree.children {
        if let Some(symbol) = child.as_token().and_then(operator) {
            let op = BinaryOp::from_symbol(&symbol.to_ascii_lowercase())
                .ok_or_else(|| unsupported(&tree.data, format!("unknown operator '{symbol}'")))?;
            pending = Some(op);
            continue;
        }
        let rhs = TreeCompiler.lower(child)?;
        acc = Some(match acc {
            None => rhs,
            Some(lhs) => {
                let op = pending
                    .take()
                    .or(default)
                    .ok_or_else(|| unsupported(&tree.data, "missing operator"))?;
                Expr::binary(op, lhs, rhs)
            }
        });
    }
    acc.ok_or_else(|| unsupported(&tree.data, "empty expression"))
}

fn name_of(node: &Node) -> Option<&str> {
    node.as_token().map(|t| t.value.trim())
}

fn lower_tree(tree: &Tree) -> Result<Expr> {
    let data = tree.data.as_str();
    match data {
        "condition" | "expression" | "expr" | "paren" | "paren_expr" | "atom" | "value"
        | "primary" | "key_expr" | "group_key" | "unique_key" => single(tree),
        "or_expr" | "or_condition" => fold_binary(tree, Some(BinaryOp::Or)),
        "and_expr" | "and_condition" => fold_binary(tree, Some(BinaryOp::And)),
        "comparison" | "arith_expr" | "sum" | "term" | "product" => fold_binary(tree, None),
        "not_expr" | "not_condition" => Ok(Expr::not(single(tree)?)),
        "neg" | "neg_expr" => Ok(Expr::Unary(UnaryOp::Neg, Box::new(single(tree)?))),
        "field_access" | "member" => {
            let mut parts = tree.children.iter();
            let base = parts
                .next()
                .ok_or_else(|| unsupported(data, "missing base"))?;
            let mut expr = TreeCompiler.lower(base)?;
            for part in parts {
                let field = name_of(part)
                    .ok_or_else(|| unsupported(data, "field name must be a token"))?;
                expr = Expr::Member(Box::new(expr), field.to_string());
            }
            Ok(expr)
        }
        "index" => match tree.children.as_slice() {
            [base, idx] => Ok(Expr::Index(
                Box::new(TreeCompiler.lower(base)?),
                Box::new(TreeCompiler.lower(idx)?),
            )),
            _ => Err(unsupported(data, "expected base and index")),
        },
        "call" | "func_call" => {
            let (head, rest) = tree
                .children
                .split_first()
                .ok_or_else(|| unsupported(data, "missing function name"))?;
            let name = name_of(head).ok_or_else(|| unsupported(data, "function name must be a token"))?;
            let mut args = Vec::new();
            for arg in rest {
                match arg {
                    Node::Tree(t) if t.data == "args" || t.data == "arguments" => {
                        for inner in &t.children {
                            args.push(TreeCompiler.lower(inner)?);
                        }
                    }
                    other => args.push(TreeCompiler.lower(other)?),
                }
            }
            Ok(Expr::Call(name.to_string(), args))
        }
        "list" | "array" | "string_array" => tree
            .children
            .iter()
            .map(|c| TreeCompiler.lower(c))
            .collect::<Result<Vec<_>>>()
            .map(Expr::List),
        "object" | "dict" => {
            let mut fields = Vec::new();
            for pair in tree.subtrees() {
                match pair.children.as_slice() {
                    [key, value] => {
                        let key = name_of(key)
                            .map(unquote)
                            .ok_or_else(|| unsupported("pair", "key must be a token"))?;
                        fields.push((key.to_string(), TreeCompiler.lower(value)?));
                    }
                    _ => return Err(unsupported("pair", "expected key and value")),
                }
            }
            Ok(Expr::Object(fields))
        }
        "param_ref" => {
            let name = tree
                .first_token()
                .map(|t| t.value.trim().trim_start_matches('{').trim_end_matches('}'))
                .ok_or_else(|| unsupported(data, "missing parameter name"))?;
            Ok(Expr::param(name.trim()))
        }
        "lambda" | "lambda_expr" => {
            let (body, params) = tree
                .children
                .split_last()
                .ok_or_else(|| unsupported(data, "missing body"))?;
            let params = params
                .iter()
                .map(|p| name_of(p).map(str::to_string))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| unsupported(data, "parameters must be names"))?;
            Ok(Expr::Lambda(params, Box::new(TreeCompiler.lower(body)?)))
        }
        other => Err(unsupported(other, "unsupported expression node")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tok(kind: &str, value: &str) -> Node {
        Node::token(kind, value)
    }

    fn comparison(lhs: Node, op: &str, rhs: Node) -> Node {
        Node::tree("comparison", vec![lhs, tok("COMP_OP", op), rhs])
    }

    #[test]
    fn unquote_strips_one_layer() {
        assert_eq!(unquote("\"abc\""), "abc");
        assert_eq!(unquote("'abc'"), "abc");
        assert_eq!(unquote("\"\"\"doc\"\"\""), "doc");
        assert_eq!(unquote("plain"), "plain");
    }

    #[test]
    fn comparison_predicate() {
        let node = comparison(tok("NAME", "line_count"), ">", tok("NUMBER", "50"));
        let pred = TreeCompiler.predicate(&node).unwrap();
        let ctx = Context::detached();
        assert!(pred.call(&json!({"line_count": 51}), &ctx).unwrap());
        assert!(!pred.call(&json!({"line_count": 10}), &ctx).unwrap());
    }

    #[test]
    fn lambda_transform_binds_row() {
        let node = Node::tree(
            "lambda_expr",
            vec![
                tok("NAME", "r"),
                Node::tree("field_access", vec![tok("NAME", "r"), tok("NAME", "kind")]),
            ],
        );
        let key = TreeCompiler.transform(&node).unwrap();
        let ctx = Context::detached();
        assert_eq!(key.call(&json!({"kind": "class"}), &ctx).unwrap(), json!("class"));
        assert_eq!(key.call(&json!({"?kind": "method"}), &ctx).unwrap(), json!("method"));
    }

    #[test]
    fn var_tokens_resolve_prefixed_keys() {
        let node = comparison(tok("VAR", "?name"), "==", tok("STRING", "\"a\""));
        let pred = TreeCompiler.predicate(&node).unwrap();
        let ctx = Context::detached();
        assert!(pred.call(&json!({"?name": "a"}), &ctx).unwrap());
        assert!(pred.call(&json!({"name": "a"}), &ctx).unwrap());
    }

    #[test]
    fn and_or_fold() {
        let node = Node::tree(
            "or_expr",
            vec![
                Node::tree(
                    "and_expr",
                    vec![
                        comparison(tok("NAME", "a"), ">", tok("NUMBER", "1")),
                        comparison(tok("NAME", "b"), "<", tok("NUMBER", "5")),
                    ],
                ),
                comparison(tok("NAME", "c"), "==", tok("BOOL", "true")),
            ],
        );
        let pred = TreeCompiler.predicate(&node).unwrap();
        let ctx = Context::detached();
        assert!(pred.call(&json!({"a": 2, "b": 3, "c": false}), &ctx).unwrap());
        assert!(!pred.call(&json!({"a": 0, "b": 3, "c": false}), &ctx).unwrap());
        assert!(pred.call(&json!({"a": 0, "c": true}), &ctx).unwrap());
    }

    #[test]
    fn param_references_read_the_context() {
        let node = comparison(tok("NAME", "score"), ">=", tok("PARAM", "{min_score}"));
        let pred = TreeCompiler.predicate(&node).unwrap();
        let ctx = Context::detached().with_param("min_score", json!(0.5));
        assert!(pred.call(&json!({"score": 0.7}), &ctx).unwrap());
        assert!(!pred.call(&json!({"score": 0.2}), &ctx).unwrap());
    }

    #[test]
    fn object_transform() {
        let node = Node::tree(
            "object",
            vec![
                Node::tree("pair", vec![tok("STRING", "'name'"), tok("NAME", "name")]),
                Node::tree(
                    "pair",
                    vec![
                        tok("NAME", "size"),
                        Node::tree(
                            "arith_expr",
                            vec![tok("NAME", "end"), tok("OP", "-"), tok("NAME", "start")],
                        ),
                    ],
                ),
            ],
        );
        let f = TreeCompiler.transform(&node).unwrap();
        let out = f
            .call(&json!({"name": "m", "start": 10, "end": 25}), &Context::detached())
            .unwrap();
        assert_eq!(out, json!({"name": "m", "size": 15}));
    }

    #[test]
    fn textual_expression_tokens_are_parsed() {
        let f = TreeCompiler.transform(&tok("EXPR", "len(items)")).unwrap();
        let out = f.call(&json!({"items": [1, 2, 3]}), &Context::detached()).unwrap();
        assert_eq!(out, json!(3));
    }

    #[test]
    fn guard_reads_params_only() {
        let node = tok("PARAM", "{strict}");
        let guard = TreeCompiler.guard(&node).unwrap();
        assert!(guard(&Context::detached().with_param("strict", json!(true))));
        assert!(!guard(&Context::detached()));
    }

    #[test]
    fn flat_transform_spreads_arrays() {
        let f = TreeCompiler.flat_transform(&tok("NAME", "tags")).unwrap();
        let ctx = Context::detached();
        assert_eq!(f.call(&json!({"tags": ["a", "b"]}), &ctx).unwrap(), vec![json!("a"), json!("b")]);
        assert!(f.call(&json!({}), &ctx).unwrap().is_empty());
        assert_eq!(f.call(&json!({"tags": "x"}), &ctx).unwrap(), vec![json!("x")]);
    }

    #[test]
    fn unknown_nodes_are_transform_errors() {
        let err = TreeCompiler.lower(&Node::tree("yield_expr", vec![])).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Transform error in 'yield_expr': unsupported expression node"
        );
    }
}
