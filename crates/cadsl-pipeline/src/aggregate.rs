//! Grouping and aggregation steps.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use cadsl_types::value::{compare, display, type_name};
use cadsl_types::{Context, Data, Fault, Origin, PipelineError, RawRow, StepResult};

use crate::callable::{AggregateFn, Callable, KeyFn};
use crate::step::{expect_list, Step};

/// Group name used when every row falls into a single group.
pub const ALL_GROUP: &str = "_all";

// ---------------------------------------------------------------------------
// Aggregate operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggOp::Count => "count",
            AggOp::Sum => "sum",
            AggOp::Avg => "avg",
            AggOp::Min => "min",
            AggOp::Max => "max",
        }
    }

    fn apply(&self, values: &[&Value]) -> Result<Value, Fault> {
        match self {
            AggOp::Count => Ok(Value::from(values.len())),
            AggOp::Sum => sum(values),
            AggOp::Avg => {
                if values.is_empty() {
                    return Ok(Value::from(0));
                }
                let total = sum(values)?.as_f64().unwrap_or(0.0);
                Number::from_f64(total / values.len() as f64)
                    .map(Value::Number)
                    .ok_or_else(|| Fault::new("average is not a finite number"))
            }
            AggOp::Min => extreme(values, std::cmp::Ordering::Less),
            AggOp::Max => extreme(values, std::cmp::Ordering::Greater),
        }
    }
}

impl FromStr for AggOp {
    type Err = Fault;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(AggOp::Count),
            "sum" => Ok(AggOp::Sum),
            "avg" => Ok(AggOp::Avg),
            "min" => Ok(AggOp::Min),
            "max" => Ok(AggOp::Max),
            other => Err(Fault::new(format!("unknown aggregate function '{other}'"))),
        }
    }
}

impl fmt::Display for AggOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn sum(values: &[&Value]) -> Result<Value, Fault> {
    let owned: Vec<Value> = values.iter().map(|v| (*v).clone()).collect();
    cadsl_expr::builtins::sum(&owned)
}

fn extreme(values: &[&Value], want: std::cmp::Ordering) -> Result<Value, Fault> {
    let mut best: Option<&Value> = None;
    for &v in values {
        best = match best {
            None => Some(v),
            Some(b) => {
                let ord = compare(v, b).ok_or_else(|| {
                    Fault::new(format!(
                        "'<' not supported between '{}' and '{}'",
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

/// `output = op(field)` over the non-null values of `field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateField {
    pub output: String,
    pub field: String,
    pub op: AggOp,
}

impl AggregateField {
    pub fn new(output: impl Into<String>, field: impl Into<String>, op: AggOp) -> Self {
        Self {
            output: output.into(),
            field: field.into(),
            op,
        }
    }
}

/// Reduce `rows` to `{"count": len, <output>: <op result>...}`.
pub fn aggregate_rows(rows: &[Value], fields: &[AggregateField]) -> Result<Value, Fault> {
    let mut out = Map::new();
    out.insert("count".into(), Value::from(rows.len()));
    for spec in fields {
        let values: Vec<&Value> = rows
            .iter()
            .filter_map(RawRow::from_value)
            .filter_map(|raw| raw.resolve(&spec.field))
            .filter(|v| !v.is_null())
            .collect();
        let result = spec.op.apply(&values)?;
        out.insert(spec.output.clone(), result);
    }
    Ok(Value::Object(out))
}

/// Wrap an aggregate specification as a per-group reduction.
pub fn aggregate_fn(fields: Vec<AggregateField>) -> AggregateFn {
    Callable::plain(move |rows: &[Value]| aggregate_rows(rows, &fields))
}

// ---------------------------------------------------------------------------
// AggregateStep
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateStep {
    fields: Vec<AggregateField>,
}

impl AggregateStep {
    pub fn new(fields: Vec<AggregateField>) -> Self {
        Self { fields }
    }
}

impl Step for AggregateStep {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn execute(&self, data: Data, _ctx: &Context) -> StepResult<Data> {
        data.map_primary(|v| {
            let rows = expect_list(v, Origin::Aggregate, "Aggregation failed")?;
            aggregate_rows(&rows, &self.fields)
                .map_err(|e| PipelineError::from_fault(Origin::Aggregate, "Aggregation failed", e))
        })
    }
}

// ---------------------------------------------------------------------------
// GroupByStep
// ---------------------------------------------------------------------------

pub enum GroupKey {
    /// Displayed value of a row field; rows without it share the `""` group.
    Field(String),
    /// Displayed result of a key function.
    Key(KeyFn),
    /// Everything in one [`ALL_GROUP`] group.
    All,
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Field(name) => f.debug_tuple("Field").field(name).finish(),
            GroupKey::Key(_) => f.write_str("Key(..)"),
            GroupKey::All => f.write_str("All"),
        }
    }
}

fn group_name(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(v) => display(v),
    }
}

/// Without an aggregate the output maps group name to rows. With one, it is
/// `{"items": {group: aggregate(rows)}}`.
#[derive(Debug)]
pub struct GroupByStep {
    key: GroupKey,
    aggregate: Option<AggregateFn>,
}

impl GroupByStep {
    pub fn new(key: GroupKey) -> Self {
        Self {
            key,
            aggregate: None,
        }
    }

    pub fn field(name: impl Into<String>) -> Self {
        Self::new(GroupKey::Field(name.into()))
    }

    pub fn with_aggregate(mut self, aggregate: AggregateFn) -> Self {
        self.aggregate = Some(aggregate);
        self
    }

    fn key_of(&self, row: &Value, ctx: &Context) -> Result<String, Fault> {
        Ok(match &self.key {
            GroupKey::Field(name) => {
                group_name(RawRow::from_value(row).and_then(|raw| raw.resolve(name)))
            }
            GroupKey::Key(f) => group_name(Some(&f.call(row, ctx)?)),
            GroupKey::All => ALL_GROUP.to_string(),
        })
    }
}

impl Step for GroupByStep {
    fn name(&self) -> &'static str {
        "group_by"
    }

    fn execute(&self, data: Data, ctx: &Context) -> StepResult<Data> {
        let wrap = |e: Fault| PipelineError::from_fault(Origin::GroupBy, "Group by failed", e);
        data.map_primary(|v| {
            let rows = expect_list(v, Origin::GroupBy, "Group by failed")?;
            let mut order: Vec<String> = Vec::new();
            let mut groups: HashMap<String, Vec<Value>> = HashMap::new();
            for row in rows {
                let key = self.key_of(&row, ctx).map_err(wrap)?;
                if !groups.contains_key(&key) {
                    order.push(key.clone());
                }
                groups.entry(key).or_default().push(row);
            }
            tracing::debug!(groups = order.len(), "Grouped rows");

            let mut out = Map::new();
            for key in order {
                let members = groups.remove(&key).unwrap_or_default();
                let value = match &self.aggregate {
                    Some(f) => f.call(&members, ctx).map_err(wrap)?,
                    None => Value::Array(members),
                };
                out.insert(key, value);
            }
            Ok(match self.aggregate {
                Some(_) => {
                    let mut wrapped = Map::new();
                    wrapped.insert("items".into(), Value::Object(out));
                    Value::Object(wrapped)
                }
                None => Value::Object(out),
            })
        })
    }
}
