use std::cmp::Ordering;
use std::collections::HashMap;

use regex::Regex;
use serde_json::{Map, Number, Value};

use cadsl_types::value::{compare, display, truthy, type_name};
use cadsl_types::{Context, Fault, RawRow};

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::builtins;

/// Name bindings visible to an expression.
///
/// Lookup order for a bare name: local bindings (innermost first), then a
/// field of the current row, then `row` / `ctx` themselves, else null.
#[derive(Debug, Default)]
pub struct Scope<'a> {
    vars: HashMap<String, Value>,
    row: Option<&'a Value>,
    ctx: Option<&'a Context>,
    parent: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope over one row, with parameters from `ctx`.
    pub fn for_row(row: &'a Value, ctx: &'a Context) -> Self {
        Self {
            row: Some(row),
            ctx: Some(ctx),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, ctx: &'a Context) -> Self {
        self.ctx = Some(ctx);
        self
    }

    pub fn bind(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.insert(name.into(), value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn into_vars(self) -> HashMap<String, Value> {
        self.vars
    }

    fn child(&'a self) -> Scope<'a> {
        Scope {
            vars: HashMap::new(),
            row: self.row,
            ctx: self.ctx,
            parent: Some(self),
        }
    }

    fn lookup_local(&self, name: &str) -> Option<&Value> {
        match self.vars.get(name) {
            Some(v) => Some(v),
            None => self.parent.and_then(|p| p.lookup_local(name)),
        }
    }

    fn lookup(&self, name: &str) -> Value {
        if let Some(v) = self.lookup_local(name) {
            return v.clone();
        }
        if let Some(v) = self.row.and_then(RawRow::from_value).and_then(|r| r.resolve(name)) {
            return v.clone();
        }
        match name {
            "row" => self.row.cloned().unwrap_or(Value::Null),
            "ctx" => self.ctx.map(Context::to_json).unwrap_or(Value::Null),
            _ => Value::Null,
        }
    }

    fn param(&self, name: &str) -> Value {
        self.ctx
            .and_then(|c| c.get_param(name))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

/// Evaluate `expr` against one row.
pub fn eval_row(expr: &Expr, row: &Value, ctx: &Context) -> Result<Value, Fault> {
    eval(expr, &Scope::for_row(row, ctx))
}

pub fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<Value, Fault> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Var(name) => Ok(scope.lookup(name)),
        Expr::Param(name) => Ok(scope.param(name)),
        Expr::Unary(op, inner) => {
            let v = eval(inner, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&v))),
                UnaryOp::Neg => match Num::of(&v) {
                    Some(Num::Int(i)) => i
                        .checked_neg()
                        .map(Value::from)
                        .map_or_else(|| float(-(i as f64)), Ok),
                    Some(Num::Float(f)) => float(-f),
                    None => Err(Fault::new(format!(
                        "bad operand type for unary -: '{}'",
                        type_name(&v)
                    ))),
                },
            }
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            let l = eval(lhs, scope)?;
            if truthy(&l) {
                Ok(l)
            } else {
                eval(rhs, scope)
            }
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            let l = eval(lhs, scope)?;
            if truthy(&l) {
                eval(rhs, scope)
            } else {
                Ok(l)
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval(lhs, scope)?;
            let r = eval(rhs, scope)?;
            binary(*op, &l, &r)
        }
        Expr::Member(base, name) => {
            let b = eval(base, scope)?;
            member(&b, name)
        }
        Expr::Index(base, index) => {
            let b = eval(base, scope)?;
            let i = eval(index, scope)?;
            Ok(index_value(&b, &i))
        }
        Expr::List(items) => items
            .iter()
            .map(|e| eval(e, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Object(entries) => {
            let mut map = Map::new();
            for (k, e) in entries {
                map.insert(k.clone(), eval(e, scope)?);
            }
            Ok(Value::Object(map))
        }
        Expr::Lambda(..) => Err(Fault::new("lambda is only valid as a function argument")),
        Expr::Call(name, args) => call(name, args, scope),
    }
}

fn member(base: &Value, name: &str) -> Result<Value, Fault> {
    match base {
        Value::Null => Ok(Value::Null),
        Value::Object(map) => Ok(RawRow::new(map)
            .resolve(name)
            .cloned()
            .unwrap_or(Value::Null)),
        other => Err(Fault::new(format!(
            "cannot access field '{name}' on {}",
            type_name(other)
        ))),
    }
}

fn index_value(base: &Value, index: &Value) -> Value {
    match (base, index) {
        (Value::Array(items), Value::Number(n)) => n
            .as_i64()
            .and_then(|i| {
                let len = items.len() as i64;
                let i = if i < 0 { len + i } else { i };
                usize::try_from(i).ok()
            })
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null),
        (Value::Object(map), Value::String(key)) => RawRow::new(map)
            .resolve(key)
            .cloned()
            .unwrap_or(Value::Null),
        (Value::String(s), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| s.chars().nth(i as usize))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

// ---------------------------------------------------------------------------
// Numbers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub(crate) enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub(crate) fn of(v: &Value) -> Option<Num> {
        match v {
            Value::Number(n) => n
                .as_i64()
                .map(Num::Int)
                .or_else(|| n.as_f64().map(Num::Float)),
            _ => None,
        }
    }

    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

pub(crate) fn float(f: f64) -> Result<Value, Fault> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| Fault::new(format!("non-finite number: {f}")))
}

/// Equality with `1 == 1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (Num::of(a), Num::of(b)) {
        (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn arith(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, Fault> {
    let (x, y) = match (Num::of(l), Num::of(r)) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(Fault::new(format!(
                "unsupported operand types for {}: '{}' and '{}'",
                op_symbol(op),
                type_name(l),
                type_name(r)
            )))
        }
    };
    match (op, x, y) {
        (BinaryOp::Add, Num::Int(a), Num::Int(b)) => a
            .checked_add(b)
            .map(Value::from)
            .map_or_else(|| float(a as f64 + b as f64), Ok),
        (BinaryOp::Sub, Num::Int(a), Num::Int(b)) => a
            .checked_sub(b)
            .map(Value::from)
            .map_or_else(|| float(a as f64 - b as f64), Ok),
        (BinaryOp::Mul, Num::Int(a), Num::Int(b)) => a
            .checked_mul(b)
            .map(Value::from)
            .map_or_else(|| float(a as f64 * b as f64), Ok),
        (BinaryOp::Mod, Num::Int(_), Num::Int(0)) | (BinaryOp::Div, _, Num::Int(0)) => {
            Err(Fault::new("division by zero"))
        }
        (BinaryOp::Mod, Num::Int(a), Num::Int(b)) => Ok(Value::from(a.rem_euclid(b))),
        (BinaryOp::Add, a, b) => float(a.as_f64() + b.as_f64()),
        (BinaryOp::Sub, a, b) => float(a.as_f64() - b.as_f64()),
        (BinaryOp::Mul, a, b) => float(a.as_f64() * b.as_f64()),
        (BinaryOp::Div, a, b) => {
            if b.as_f64() == 0.0 {
                return Err(Fault::new("division by zero"));
            }
            float(a.as_f64() / b.as_f64())
        }
        (BinaryOp::Mod, a, b) => {
            if b.as_f64() == 0.0 {
                return Err(Fault::new("division by zero"));
            }
            float(a.as_f64().rem_euclid(b.as_f64()))
        }
        _ => Err(Fault::new(format!("'{}' is not arithmetic", op_symbol(op)))),
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Or => "or",
        BinaryOp::And => "and",
        BinaryOp::Eq => "==",
        BinaryOp::Ne => "!=",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::In => "in",
        BinaryOp::NotIn => "not in",
        BinaryOp::Matches => "matches",
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, Fault> {
    match (container, item) {
        (Value::Array(items), _) => Ok(items.iter().any(|v| values_equal(v, item))),
        (Value::String(s), Value::String(sub)) => Ok(s.contains(sub.as_str())),
        (Value::Object(map), Value::String(key)) => Ok(map.contains_key(key)),
        (Value::Null, _) => Ok(false),
        (c, i) => Err(Fault::new(format!(
            "'in' requires a container, got '{}' in '{}'",
            type_name(i),
            type_name(c)
        ))),
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, Fault> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(l, r))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(l, r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = compare(l, r).ok_or_else(|| {
                Fault::new(format!(
                    "'{}' not supported between '{}' and '{}'",
                    op_symbol(op),
                    type_name(l),
                    type_name(r)
                ))
            })?;
            let result = match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::In => contains(r, l).map(Value::Bool),
        BinaryOp::NotIn => contains(r, l).map(|b| Value::Bool(!b)),
        BinaryOp::Matches => {
            if l.is_null() {
                return Ok(Value::Bool(false));
            }
            let pattern = display(r);
            let re = Regex::new(&pattern)
                .map_err(|e| Fault::new(format!("invalid pattern '{pattern}': {e}")))?;
            Ok(Value::Bool(re.is_match(&display(l))))
        }
        BinaryOp::Add => match (l, r) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            (Value::Array(a), Value::Array(b)) => {
                Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
            }
            _ => arith(op, l, r),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => arith(op, l, r),
        BinaryOp::Or | BinaryOp::And => unreachable_logical(op),
    }
}

fn unreachable_logical(op: BinaryOp) -> Result<Value, Fault> {
    Err(Fault::new(format!(
        "'{}' must be evaluated with short-circuiting",
        op_symbol(op)
    )))
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

/// Apply a one- or two-parameter lambda literal to argument values.
fn apply(lambda: &Expr, args: &[Value], scope: &Scope<'_>) -> Result<Value, Fault> {
    let Expr::Lambda(params, body) = lambda else {
        return Err(Fault::new("expected a lambda such as `x => x.field`"));
    };
    let mut inner = scope.child();
    for (p, v) in params.iter().zip(args.iter()) {
        inner.set(p.clone(), v.clone());
    }
    eval(body, &inner)
}

fn list_arg(name: &str, v: Value) -> Result<Vec<Value>, Fault> {
    match v {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(Fault::new(format!(
            "{name}() expects a list, got '{}'",
            type_name(&other)
        ))),
    }
}

fn call(name: &str, args: &[Expr], scope: &Scope<'_>) -> Result<Value, Fault> {
    match (name, args) {
        ("if", [cond, then, otherwise]) => {
            if truthy(&eval(cond, scope)?) {
                eval(then, scope)
            } else {
                eval(otherwise, scope)
            }
        }
        ("map", [items, f]) => {
            let items = list_arg(name, eval(items, scope)?)?;
            items
                .iter()
                .map(|v| apply(f, std::slice::from_ref(v), scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        ("filter", [items, f]) => {
            let items = list_arg(name, eval(items, scope)?)?;
            let mut kept = Vec::new();
            for v in items {
                if truthy(&apply(f, std::slice::from_ref(&v), scope)?) {
                    kept.push(v);
                }
            }
            Ok(Value::Array(kept))
        }
        ("any", [items, f]) | ("all", [items, f]) | ("count", [items, f]) => {
            let items = list_arg(name, eval(items, scope)?)?;
            let mut hits = 0usize;
            for v in &items {
                if truthy(&apply(f, std::slice::from_ref(v), scope)?) {
                    hits += 1;
                }
            }
            Ok(match name {
                "any" => Value::Bool(hits > 0),
                "all" => Value::Bool(hits == items.len()),
                _ => Value::from(hits),
            })
        }
        ("sort_by", [items, f]) | ("sort_by", [items, f, _]) => {
            let descending = match args.get(2) {
                Some(e) => truthy(&eval(e, scope)?),
                None => false,
            };
            let items = list_arg(name, eval(items, scope)?)?;
            let mut keyed = Vec::with_capacity(items.len());
            for v in items {
                let k = apply(f, std::slice::from_ref(&v), scope)?;
                keyed.push((k, v));
            }
            let mut failure = None;
            keyed.sort_by(|(a, _), (b, _)| {
                let ord = compare(a, b).unwrap_or_else(|| {
                    failure.get_or_insert_with(|| {
                        format!(
                            "sort_by() keys are not comparable: '{}' and '{}'",
                            type_name(a),
                            type_name(b)
                        )
                    });
                    Ordering::Equal
                });
                if descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
            if let Some(msg) = failure {
                return Err(Fault::new(msg));
            }
            Ok(Value::Array(keyed.into_iter().map(|(_, v)| v).collect()))
        }
        ("group_by", [items, f]) => {
            let items = list_arg(name, eval(items, scope)?)?;
            let mut groups = Map::new();
            for v in items {
                let key = match apply(f, std::slice::from_ref(&v), scope)? {
                    Value::Null => String::new(),
                    k => display(&k),
                };
                if let Value::Array(bucket) = groups
                    .entry(key)
                    .or_insert_with(|| Value::Array(Vec::new()))
                {
                    bucket.push(v);
                }
            }
            Ok(Value::Object(groups))
        }
        _ => {
            let values = args
                .iter()
                .map(|e| eval(e, scope))
                .collect::<Result<Vec<_>, _>>()?;
            builtins::call(name, values)
        }
    }
}
