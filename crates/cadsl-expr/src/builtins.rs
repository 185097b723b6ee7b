//! Eager built-in functions. Lambda-taking forms live in the evaluator.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde_json::Value;

use cadsl_types::value::{canonical_key, compare, display, truthy, type_name};
use cadsl_types::Fault;

use crate::eval::{float, values_equal, Num};

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), Fault> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(Fault::new(format!(
            "{name}() takes {expected} argument(s), got {}",
            args.len()
        )))
    }
}

fn text<'a>(name: &str, v: &'a Value) -> Result<&'a str, Fault> {
    v.as_str().ok_or_else(|| {
        Fault::new(format!(
            "{name}() expects a string, got '{}'",
            type_name(v)
        ))
    })
}

fn list<'a>(name: &str, v: &'a Value) -> Result<&'a [Value], Fault> {
    match v {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(&[]),
        other => Err(Fault::new(format!(
            "{name}() expects a list, got '{}'",
            type_name(other)
        ))),
    }
}

fn extreme(name: &str, args: &[Value], want: Ordering) -> Result<Value, Fault> {
    let items: &[Value] = if args.len() == 1 {
        list(name, &args[0])?
    } else {
        args
    };
    let mut best: Option<&Value> = None;
    for v in items {
        best = match best {
            None => Some(v),
            Some(b) => {
                let ord = compare(v, b).ok_or_else(|| {
                    Fault::new(format!(
                        "{name}() values are not comparable: '{}' and '{}'",
                        type_name(v),
                        type_name(b)
                    ))
                })?;
                Some(if ord == want { v } else { b })
            }
        };
    }
    Ok(best.cloned().unwrap_or(Value::Null))
}

/// Sum numbers, staying integral while every input is an integer.
pub fn sum(items: &[Value]) -> Result<Value, Fault> {
    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut integral = true;
    for v in items {
        match Num::of(v) {
            Some(Num::Int(i)) if integral => match int_total.checked_add(i) {
                Some(t) => int_total = t,
                None => {
                    integral = false;
                    float_total = int_total as f64 + i as f64;
                }
            },
            Some(n) => {
                if integral {
                    integral = false;
                    float_total = int_total as f64;
                }
                float_total += n.as_f64();
            }
            None => {
                return Err(Fault::new(format!(
                    "sum() expects numbers, got '{}'",
                    type_name(v)
                )))
            }
        }
    }
    if integral {
        Ok(Value::from(int_total))
    } else {
        float(float_total)
    }
}

pub fn call(name: &str, args: Vec<Value>) -> Result<Value, Fault> {
    match name {
        "len" => {
            arity(name, &args, 1)?;
            let n = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                other => {
                    return Err(Fault::new(format!(
                        "object of type '{}' has no len()",
                        type_name(other)
                    )))
                }
            };
            Ok(Value::from(n))
        }
        "lower" | "upper" | "strip" => {
            arity(name, &args, 1)?;
            let s = text(name, &args[0])?;
            Ok(Value::String(match name {
                "lower" => s.to_lowercase(),
                "upper" => s.to_uppercase(),
                _ => s.trim().to_string(),
            }))
        }
        "str" => {
            arity(name, &args, 1)?;
            Ok(Value::String(display(&args[0])))
        }
        "int" => {
            arity(name, &args, 1)?;
            match &args[0] {
                Value::Bool(b) => Ok(Value::from(*b as i64)),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| Fault::new(format!("invalid literal for int(): '{s}'"))),
                v => match Num::of(v) {
                    Some(Num::Int(i)) => Ok(Value::from(i)),
                    Some(Num::Float(f)) => Ok(Value::from(f.trunc() as i64)),
                    None => Err(Fault::new(format!(
                        "int() argument must be a string or a number, not '{}'",
                        type_name(v)
                    ))),
                },
            }
        }
        "float" => {
            arity(name, &args, 1)?;
            match &args[0] {
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| Fault::new(format!("could not convert string to float: '{s}'")))
                    .and_then(float),
                v => Num::of(v).map(|n| float(n.as_f64())).unwrap_or_else(|| {
                    Err(Fault::new(format!(
                        "float() argument must be a string or a number, not '{}'",
                        type_name(v)
                    )))
                }),
            }
        }
        "bool" => {
            arity(name, &args, 1)?;
            Ok(Value::Bool(truthy(&args[0])))
        }
        "type" => {
            arity(name, &args, 1)?;
            Ok(Value::String(type_name(&args[0]).to_string()))
        }
        "abs" => {
            arity(name, &args, 1)?;
            match Num::of(&args[0]) {
                Some(Num::Int(i)) => Ok(Value::from(i.saturating_abs())),
                Some(Num::Float(f)) => float(f.abs()),
                None => Err(Fault::new("abs() expects a number")),
            }
        }
        "round" => {
            let digits = match args.len() {
                1 => 0,
                2 => args[1].as_i64().unwrap_or(0) as i32,
                _ => return arity(name, &args, 1).map(|_| Value::Null),
            };
            match Num::of(&args[0]) {
                Some(Num::Int(i)) => Ok(Value::from(i)),
                Some(Num::Float(f)) if digits == 0 => Ok(Value::from(f.round() as i64)),
                Some(Num::Float(f)) => {
                    let scale = 10f64.powi(digits);
                    float((f * scale).round() / scale)
                }
                None => Err(Fault::new("round() expects a number")),
            }
        }
        "contains" => {
            arity(name, &args, 2)?;
            Ok(Value::Bool(match (&args[0], &args[1]) {
                (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
                (Value::Array(items), item) => items.iter().any(|v| values_equal(v, item)),
                (Value::Object(map), Value::String(key)) => map.contains_key(key),
                _ => false,
            }))
        }
        "starts_with" | "ends_with" => {
            arity(name, &args, 2)?;
            let s = text(name, &args[0])?;
            let affix = text(name, &args[1])?;
            Ok(Value::Bool(if name == "starts_with" {
                s.starts_with(affix)
            } else {
                s.ends_with(affix)
            }))
        }
        "replace" => {
            arity(name, &args, 3)?;
            let s = text(name, &args[0])?;
            let from = text(name, &args[1])?;
            let to = text(name, &args[2])?;
            Ok(Value::String(s.replace(from, to)))
        }
        "split" => {
            arity(name, &args, 2)?;
            let s = text(name, &args[0])?;
            let sep = text(name, &args[1])?;
            Ok(Value::Array(
                s.split(sep).map(|p| Value::String(p.to_string())).collect(),
            ))
        }
        "join" => {
            arity(name, &args, 2)?;
            let items = list(name, &args[0])?;
            let sep = text(name, &args[1])?;
            let parts: Vec<String> = items.iter().map(display).collect();
            Ok(Value::String(parts.join(sep)))
        }
        "keys" | "values" => {
            arity(name, &args, 1)?;
            let map = args[0].as_object().ok_or_else(|| {
                Fault::new(format!("{name}() expects a mapping"))
            })?;
            Ok(Value::Array(if name == "keys" {
                map.keys().map(|k| Value::String(k.clone())).collect()
            } else {
                map.values().cloned().collect()
            }))
        }
        "sum" => {
            arity(name, &args, 1)?;
            sum(list(name, &args[0])?)
        }
        "min" => extreme(name, &args, Ordering::Less),
        "max" => extreme(name, &args, Ordering::Greater),
        "sorted" => {
            arity(name, &args, 1)?;
            let mut items = list(name, &args[0])?.to_vec();
            let mut comparable = true;
            items.sort_by(|a, b| {
                compare(a, b).unwrap_or_else(|| {
                    comparable = false;
                    Ordering::Equal
                })
            });
            if !comparable {
                return Err(Fault::new("sorted() values are not comparable"));
            }
            Ok(Value::Array(items))
        }
        "reversed" => {
            arity(name, &args, 1)?;
            let mut items = list(name, &args[0])?.to_vec();
            items.reverse();
            Ok(Value::Array(items))
        }
        "unique" => {
            arity(name, &args, 1)?;
            let mut seen = HashSet::new();
            let items = list(name, &args[0])?
                .iter()
                .filter(|v| seen.insert(canonical_key(v)))
                .cloned()
                .collect();
            Ok(Value::Array(items))
        }
        "first" | "last" => {
            arity(name, &args, 1)?;
            let items = list(name, &args[0])?;
            let v = if name == "first" {
                items.first()
            } else {
                items.last()
            };
            Ok(v.cloned().unwrap_or(Value::Null))
        }
        "count" => {
            arity(name, &args, 1)?;
            Ok(Value::from(list(name, &args[0])?.len()))
        }
        "coalesce" => Ok(args
            .into_iter()
            .find(|v| !v.is_null())
            .unwrap_or(Value::Null)),
        _ => Err(Fault::new(format!("unknown function '{name}'"))),
    }
}
