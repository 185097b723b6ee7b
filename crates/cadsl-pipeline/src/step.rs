//! Step trait and the generic row-sequence steps.
//!
//! Every step receives the current [`Data`] and returns a new one. Steps work
//! on the primary value and carry a tap annotation through untouched, so a
//! `select` after a `tap` does not lose the tapped artifact.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use cadsl_types::value::{as_count, canonical_key, compare, display, type_name};
use cadsl_types::{clean_key, Context, Data, Origin, PipelineError, RawRow, StepResult};

use crate::callable::{FlatTransform, Guard, KeyFn, Predicate, TapFn, Transform};

// ---------------------------------------------------------------------------
// Step trait
// ---------------------------------------------------------------------------

pub trait Step: Send + Sync {
    /// The step type identifier (e.g. "filter", "order_by").
    fn name(&self) -> &'static str;

    fn execute(&self, data: Data, ctx: &Context) -> StepResult<Data>;

    /// Kleisli composition: run `self`, then `next` on its output.
    fn and_then<S>(self, next: S) -> ComposedStep
    where
        Self: Sized + 'static,
        S: Step + 'static,
    {
        ComposedStep::new(Arc::new(self), Arc::new(next))
    }
}

/// Unwrap a sequence, or fail with `"<prefix>: expected a list, got <type>"`.
pub(crate) fn expect_list(value: Value, origin: Origin, prefix: &str) -> StepResult<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(PipelineError::new(
            origin,
            format!("{prefix}: expected a list, got {}", type_name(&other)),
        )),
    }
}

fn fault(origin: Origin, prefix: &str) -> impl Fn(cadsl_types::Fault) -> PipelineError + '_ {
    move |e| PipelineError::from_fault(origin, prefix, e)
}

// ---------------------------------------------------------------------------
// FilterStep
// ---------------------------------------------------------------------------

pub struct FilterStep {
    predicate: Predicate,
    when: Option<Guard>,
}

impl FilterStep {
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate,
            when: None,
        }
    }

    /// Only filter when `guard(ctx)` holds; otherwise data passes through.
    pub fn when(mut self, guard: Guard) -> Self {
        self.when = Some(guard);
        self
    }
}

impl Step for FilterStep {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn execute(&self, data: Data, ctx: &Context) -> StepResult<Data> {
        if let Some(guard) = &self.when {
            if !guard(ctx) {
                tracing::debug!("Filter guard is false, passing data through");
                return Ok(data);
            }
        }
        data.map_primary(|v| {
            let rows = expect_list(v, Origin::Filter, "Filter failed")?;
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                let keep = self
                    .predicate
                    .call(&row, ctx)
                    .map_err(fault(Origin::Filter, "Filter failed"))?;
                if keep {
                    kept.push(row);
                }
            }
            Ok(Value::Array(kept))
        })
    }
}

// ---------------------------------------------------------------------------
// SelectStep
// ---------------------------------------------------------------------------

/// Project raw rows onto clean output names.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStep {
    /// `(output, source)` pairs in declaration order.
    fields: Vec<(String, String)>,
}

impl SelectStep {
    pub fn new<I, O, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = (O, S)>,
        O: Into<String>,
        S: Into<String>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|(o, s)| (o.into(), s.into()))
                .collect(),
        }
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Source name first (plain, then `?`-prefixed), then the output name as
    /// written. Fields found under neither are left out of the row.
    fn project(&self, raw: RawRow<'_>) -> Value {
        let mut out = Map::new();
        for (output, source) in &self.fields {
            if let Some(v) = raw.resolve(source).or_else(|| raw.resolve(output)) {
                out.insert(clean_key(output).to_string(), v.clone());
            }
        }
        Value::Object(out)
    }
}

impl Step for SelectStep {
    fn name(&self) -> &'static str {
        "select"
    }

    fn execute(&self, data: Data, _ctx: &Context) -> StepResult<Data> {
        data.map_primary(|v| {
            let rows = expect_list(v, Origin::Select, "Select failed")?;
            rows.iter()
                .map(|row| {
                    RawRow::from_value(row).map(|raw| self.project(raw)).ok_or_else(|| {
                        PipelineError::new(
                            Origin::Select,
                            format!("Select failed: expected a row mapping, got {}", type_name(row)),
                        )
                    })
                })
                .collect::<StepResult<Vec<_>>>()
                .map(Value::Array)
        })
    }
}

// ---------------------------------------------------------------------------
// MapStep / FlatMapStep
// ---------------------------------------------------------------------------

pub struct MapStep {
    transform: Transform,
}

impl MapStep {
    pub fn new(transform: Transform) -> Self {
        Self { transform }
    }
}

impl Step for MapStep {
    fn name(&self) -> &'static str {
        "map"
    }

    fn execute(&self, data: Data, ctx: &Context) -> StepResult<Data> {
        data.map_primary(|v| {
            let rows = expect_list(v, Origin::Map, "Map failed")?;
            rows.iter()
                .map(|row| {
                    self.transform
                        .call(row, ctx)
                        .map_err(fault(Origin::Map, "Map failed"))
                })
                .collect::<StepResult<Vec<_>>>()
                .map(Value::Array)
        })
    }
}

pub struct FlatMapStep {
    transform: FlatTransform,
}

impl FlatMapStep {
    pub fn new(transform: FlatTransform) -> Self {
        Self { transform }
    }
}

impl Step for FlatMapStep {
    fn name(&self) -> &'static str {
        "flat_map"
    }

    fn execute(&self, data: Data, ctx: &Context) -> StepResult<Data> {
        data.map_primary(|v| {
            let rows = expect_list(v, Origin::FlatMap, "FlatMap failed")?;
            let mut out = Vec::new();
            for row in &rows {
                let expanded = self
                    .transform
                    .call(row, ctx)
                    .map_err(fault(Origin::FlatMap, "FlatMap failed"))?;
                out.extend(expanded);
            }
            Ok(Value::Array(out))
        })
    }
}

// ---------------------------------------------------------------------------
// OrderByStep
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// `"-name"` sorts descending by `name`.
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(field) => Self::desc(field),
            None => Self::asc(spec),
        }
    }
}

/// Stable sort on one or more keys, first key primary. Rows without the field
/// sort as `""`.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByStep {
    keys: Vec<SortKey>,
}

impl OrderByStep {
    pub fn new(keys: Vec<SortKey>) -> Self {
        Self { keys }
    }

    pub fn by(field: impl Into<String>, descending: bool) -> Self {
        Self::new(vec![SortKey {
            field: field.into(),
            descending,
        }])
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    fn sort_values(&self, row: &Value) -> Vec<Value> {
        let empty = Value::String(String::new());
        self.keys
            .iter()
            .map(|key| {
                RawRow::from_value(row)
                    .and_then(|raw| raw.resolve(&key.field))
                    .unwrap_or(&empty)
                    .clone()
            })
            .collect()
    }
}

impl Step for OrderByStep {
    fn name(&self) -> &'static str {
        "order_by"
    }

    fn execute(&self, data: Data, _ctx: &Context) -> StepResult<Data> {
        data.map_primary(|v| {
            let rows = expect_list(v, Origin::OrderBy, "Sort failed")?;
            let mut keyed: Vec<(Vec<Value>, Value)> = rows
                .into_iter()
                .map(|row| (self.sort_values(&row), row))
                .collect();
            let mut failure: Option<String> = None;
            keyed.sort_by(|(a, _), (b, _)| {
                for (key, (x, y)) in self.keys.iter().zip(a.iter().zip(b.iter())) {
                    let ord = match compare(x, y) {
                        Some(ord) => ord,
                        None => {
                            failure.get_or_insert_with(|| {
                                format!(
                                    "'<' not supported between '{}' and '{}'",
                                    type_name(x),
                                    type_name(y)
                                )
                            });
                            Ordering::Equal
                        }
                    };
                    let ord = if key.descending { ord.reverse() } else { ord };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                Ordering::Equal
            });
            if let Some(msg) = failure {
                return Err(PipelineError::new(Origin::OrderBy, format!("Sort failed: {msg}")));
            }
            Ok(Value::Array(keyed.into_iter().map(|(_, row)| row).collect()))
        })
    }
}

// ---------------------------------------------------------------------------
// LimitStep / OffsetStep
// ---------------------------------------------------------------------------

/// A step size fixed at build time or read from a context parameter when the
/// step executes.
#[derive(Debug, Clone, PartialEq)]
pub enum Count {
    Fixed(usize),
    Param { name: String, default: usize },
}

impl Count {
    pub fn param(name: impl Into<String>, default: usize) -> Self {
        Count::Param {
            name: name.into(),
            default,
        }
    }

    pub fn resolve(&self, ctx: &Context) -> StepResult<usize> {
        match self {
            Count::Fixed(n) => Ok(*n),
            Count::Param { name, default } => match ctx.get_param(name) {
                None | Some(Value::Null) => Ok(*default),
                Some(v) => as_count(v).ok_or_else(|| {
                    PipelineError::new(
                        Origin::Param,
                        format!("Invalid value for parameter '{name}': {}", display(v)),
                    )
                }),
            },
        }
    }
}

impl From<usize> for Count {
    fn from(n: usize) -> Self {
        Count::Fixed(n)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitStep {
    count: Count,
}

impl LimitStep {
    pub fn new(count: impl Into<Count>) -> Self {
        Self {
            count: count.into(),
        }
    }
}

impl Step for LimitStep {
    fn name(&self) -> &'static str {
        "limit"
    }

    fn execute(&self, data: Data, ctx: &Context) -> StepResult<Data> {
        let n = self.count.resolve(ctx)?;
        data.map_primary(|v| {
            let mut rows = expect_list(v, Origin::Limit, "Limit failed")?;
            rows.truncate(n);
            Ok(Value::Array(rows))
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffsetStep {
    count: Count,
}

impl OffsetStep {
    pub fn new(count: impl Into<Count>) -> Self {
        Self {
            count: count.into(),
        }
    }
}

impl Step for OffsetStep {
    fn name(&self) -> &'static str {
        "offset"
    }

    fn execute(&self, data: Data, ctx: &Context) -> StepResult<Data> {
        let n = self.count.resolve(ctx)?;
        data.map_primary(|v| {
            let rows = expect_list(v, Origin::Offset, "Offset failed")?;
            Ok(Value::Array(rows.into_iter().skip(n).collect()))
        })
    }
}

// ---------------------------------------------------------------------------
// FlattenStep / UniqueStep
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlattenStep;

impl Step for FlattenStep {
    fn name(&self) -> &'static str {
        "flatten"
    }

    fn execute(&self, data: Data, _ctx: &Context) -> StepResult<Data> {
        data.map_primary(|v| {
            let outer = expect_list(v, Origin::Flatten, "Flatten failed")?;
            let mut out = Vec::new();
            for inner in outer {
                out.extend(expect_list(inner, Origin::Flatten, "Flatten failed")?);
            }
            Ok(Value::Array(out))
        })
    }
}

/// Drop repeated elements, keeping the first occurrence. Without a key the
/// whole element is compared through its canonical form.
#[derive(Default)]
pub struct UniqueStep {
    key: Option<KeyFn>,
}

impl UniqueStep {
    pub fn new() -> Self {
        Self { key: None }
    }

    pub fn by(key: KeyFn) -> Self {
        Self { key: Some(key) }
    }
}

impl Step for UniqueStep {
    fn name(&self) -> &'static str {
        "unique"
    }

    fn execute(&self, data: Data, ctx: &Context) -> StepResult<Data> {
        data.map_primary(|v| {
            let rows = expect_list(v, Origin::Unique, "Unique failed")?;
            let mut seen = HashSet::new();
            let mut out = Vec::new();
            for row in rows {
                let key = match &self.key {
                    Some(f) => {
                        let k = f.call(&row, ctx).map_err(fault(Origin::Unique, "Unique failed"))?;
                        canonical_key(&k)
                    }
                    None => canonical_key(&row),
                };
                if seen.insert(key) {
                    out.push(row);
                }
            }
            Ok(Value::Array(out))
        })
    }
}

// ---------------------------------------------------------------------------
// TapStep
// ---------------------------------------------------------------------------

/// Run an analysis over the current value. A non-null result on a sequence or
/// mapping becomes the data's annotation; the primary value is unchanged.
pub struct TapStep {
    f: TapFn,
}

impl TapStep {
    pub fn new(f: TapFn) -> Self {
        Self { f }
    }
}

impl Step for TapStep {
    fn name(&self) -> &'static str {
        "tap"
    }

    fn execute(&self, data: Data, ctx: &Context) -> StepResult<Data> {
        let produced = self
            .f
            .call(data.primary(), ctx)
            .map_err(fault(Origin::Tap, "Tap failed"))?;
        match produced {
            Some(annotation) if !annotation.is_null() => {
                if !matches!(data.primary(), Value::Array(_) | Value::Object(_)) {
                    return Ok(data);
                }
                Ok(Data::Tapped {
                    primary: data.into_primary(),
                    annotation,
                })
            }
            _ => Ok(data),
        }
    }
}

// ---------------------------------------------------------------------------
// ComposedStep
// ---------------------------------------------------------------------------

pub struct ComposedStep {
    first: Arc<dyn Step>,
    second: Arc<dyn Step>,
}

impl ComposedStep {
    pub fn new(first: Arc<dyn Step>, second: Arc<dyn Step>) -> Self {
        Self { first, second }
    }
}

impl Step for ComposedStep {
    fn name(&self) -> &'static str {
        "composed"
    }

    fn execute(&self, data: Data, ctx: &Context) -> StepResult<Data> {
        let mid = self.first.execute(data, ctx)?;
        self.second.execute(mid, ctx)
    }
}
