//! The pipeline monad: a source, an ordered list of steps, an optional output key.
//!
//! Builder methods take `&self` and return a new pipeline, so a partly built
//! pipeline can be reused as a template. Nothing runs until [`Pipeline::run`].

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use cadsl_types::{Context, Data, Fault, SearchRequest, StepResult};

use crate::aggregate::{AggregateField, AggregateStep, GroupByStep};
use crate::callable::{FlatTransform, Guard, KeyFn, Predicate, Renderer, TapFn, Transform};
use crate::python::PythonStep;
use crate::render::{RenderFormat, RenderStep};
use crate::source::{
    BoundSource, FnSource, LiteralValueSource, SemanticSearchSource, Source, StructuredQuerySource,
};
use crate::step::{
    Count, FilterStep, FlatMapStep, FlattenStep, LimitStep, MapStep, OffsetStep, OrderByStep,
    SelectStep, SortKey, Step, TapStep, UniqueStep,
};

#[derive(Clone)]
pub struct Pipeline {
    source: Arc<dyn Source>,
    steps: Vec<Arc<dyn Step>>,
    emit_key: Option<String>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps: Vec<&str> = self.steps.iter().map(|s| s.name()).collect();
        f.debug_struct("Pipeline")
            .field("source", &self.source.name())
            .field("steps", &steps)
            .field("emit_key", &self.emit_key)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl Pipeline {
    pub fn from_source(source: impl Source + 'static) -> Self {
        Self::from_shared_source(Arc::new(source))
    }

    pub fn from_shared_source(source: Arc<dyn Source>) -> Self {
        Self {
            source,
            steps: Vec::new(),
            emit_key: None,
        }
    }

    /// `pure`: a pipeline that yields `value`.
    pub fn pure(value: Value) -> Self {
        Self::from_source(LiteralValueSource::new(value))
    }

    pub fn value(value: Value) -> Self {
        Self::pure(value)
    }

    pub fn query(query: impl Into<String>) -> Self {
        Self::from_source(StructuredQuerySource::new(query))
    }

    pub fn semantic(request: SearchRequest) -> Self {
        let mut source = SemanticSearchSource::new(request.query, request.top_k);
        if let Some(types) = request.entity_types {
            source = source.with_entity_types(types);
        }
        Self::from_source(source)
    }

    pub fn from_fn(f: impl Fn(&Context) -> Result<Value, Fault> + Send + Sync + 'static) -> Self {
        Self::from_source(FnSource::new(f))
    }

    pub fn steps(&self) -> impl Iterator<Item = &dyn Step> {
        self.steps.iter().map(|s| s.as_ref())
    }

    pub fn emit_key(&self) -> Option<&str> {
        self.emit_key.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Monad operations
// ---------------------------------------------------------------------------

impl Pipeline {
    /// Run `self`, hand its value to `f`, and run the pipeline `f` returns.
    pub fn bind(&self, f: impl Fn(Value) -> Pipeline + Send + Sync + 'static) -> Pipeline {
        Self::from_source(BoundSource::new(self.clone(), Arc::new(f)))
    }

    pub fn fmap(&self, transform: Transform) -> Pipeline {
        self.map(transform)
    }

    /// Combine the values of two pipelines, running `self` first.
    pub fn ap(
        &self,
        other: &Pipeline,
        combine: impl Fn(Value, Value) -> Result<Value, Fault> + Send + Sync + 'static,
    ) -> Pipeline {
        let other = other.clone();
        let combine = Arc::new(combine);
        self.bind(move |left| {
            let combine = Arc::clone(&combine);
            other.bind(move |right| match combine(left.clone(), right) {
                Ok(v) => Pipeline::pure(v),
                Err(e) => Pipeline::from_fn(move |_| Err(e.clone())),
            })
        })
    }
}

// ---------------------------------------------------------------------------
// Fluent builders
// ---------------------------------------------------------------------------

impl Pipeline {
    /// Append a step (the `>>` of the step algebra).
    pub fn then(&self, step: impl Step + 'static) -> Pipeline {
        self.then_shared(Arc::new(step))
    }

    pub fn then_shared(&self, step: Arc<dyn Step>) -> Pipeline {
        let mut next = self.clone();
        next.steps.push(step);
        next
    }

    pub fn filter(&self, predicate: Predicate) -> Pipeline {
        self.then(FilterStep::new(predicate))
    }

    pub fn filter_when(&self, predicate: Predicate, when: Guard) -> Pipeline {
        self.then(FilterStep::new(predicate).when(when))
    }

    /// Select fields by name; each name is both output and source.
    pub fn select<I, S>(&self, fields: I) -> Pipeline
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pairs: Vec<(String, String)> = fields
            .into_iter()
            .map(|f| (f.as_ref().to_string(), f.as_ref().to_string()))
            .collect();
        self.then(SelectStep::new(pairs))
    }

    /// Select with explicit `(output, source)` pairs.
    pub fn select_fields(&self, fields: Vec<(String, String)>) -> Pipeline {
        self.then(SelectStep::new(fields))
    }

    pub fn map(&self, transform: Transform) -> Pipeline {
        self.then(MapStep::new(transform))
    }

    pub fn flat_map(&self, transform: FlatTransform) -> Pipeline {
        self.then(FlatMapStep::new(transform))
    }

    /// `"-field"` sorts descending.
    pub fn order_by(&self, field: &str) -> Pipeline {
        self.then(OrderByStep::new(vec![SortKey::parse(field)]))
    }

    pub fn order_by_keys(&self, keys: Vec<SortKey>) -> Pipeline {
        self.then(OrderByStep::new(keys))
    }

    pub fn limit(&self, count: usize) -> Pipeline {
        self.then(LimitStep::new(count))
    }

    pub fn limit_param(&self, name: &str, default: usize) -> Pipeline {
        self.then(LimitStep::new(Count::param(name, default)))
    }

    pub fn offset(&self, count: usize) -> Pipeline {
        self.then(OffsetStep::new(count))
    }

    pub fn offset_param(&self, name: &str, default: usize) -> Pipeline {
        self.then(OffsetStep::new(Count::param(name, default)))
    }

    pub fn group_by(&self, step: GroupByStep) -> Pipeline {
        self.then(step)
    }

    pub fn aggregate(&self, fields: Vec<AggregateField>) -> Pipeline {
        self.then(AggregateStep::new(fields))
    }

    pub fn flatten(&self) -> Pipeline {
        self.then(FlattenStep)
    }

    pub fn unique(&self, key: Option<KeyFn>) -> Pipeline {
        match key {
            Some(k) => self.then(UniqueStep::by(k)),
            None => self.then(UniqueStep::new()),
        }
    }

    pub fn tap(&self, f: TapFn) -> Pipeline {
        self.then(TapStep::new(f))
    }

    pub fn render(&self, format: RenderFormat, renderer: Option<Renderer>) -> Pipeline {
        let step = RenderStep::new(format);
        match renderer {
            Some(r) => self.then(step.with_renderer(r)),
            None => self.then(step),
        }
    }

    pub fn python(&self, code: &str) -> Pipeline {
        self.then(PythonStep::new(code))
    }

    /// Put the final value under `key` in the [`execute`](Self::execute) output.
    pub fn emit(&self, key: impl Into<String>) -> Pipeline {
        let mut next = self.clone();
        next.emit_key = Some(key.into());
        next
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

impl Pipeline {
    /// Run the source, then each step in order, stopping at the first error.
    pub fn run_data(&self, ctx: &Context) -> StepResult<Data> {
        tracing::debug!(source = self.source.name(), steps = self.steps.len(), "Running pipeline");
        let mut current = self.source.execute(ctx)?;
        for (index, step) in self.steps.iter().enumerate() {
            tracing::debug!(step = step.name(), index, "Executing step");
            current = step.execute(current, ctx).map_err(|e| {
                tracing::debug!(step = step.name(), index, error = %e, "Step failed");
                e
            })?;
        }
        Ok(current)
    }

    /// Like [`run_data`](Self::run_data), with a tap annotation folded into the value.
    pub fn run(&self, ctx: &Context) -> StepResult<Value> {
        self.run_data(ctx).map(Data::into_value)
    }

    /// Run and format the outcome as a result mapping. Never fails: errors
    /// become `{"success": false, "error": message}`.
    pub fn execute(&self, ctx: &Context) -> Value {
        let value = match self.run(ctx) {
            Ok(v) => v,
            Err(e) => {
                let mut out = Map::new();
                out.insert("success".into(), Value::Bool(false));
                out.insert("error".into(), Value::String(e.message));
                return Value::Object(out);
            }
        };

        let mut out = Map::new();
        out.insert("success".into(), Value::Bool(true));
        match (&self.emit_key, value) {
            (Some(key), value) => {
                if let Value::Array(items) = &value {
                    out.insert("count".into(), Value::from(items.len()));
                }
                out.insert(key.clone(), value);
            }
            (None, Value::Object(map)) => out.extend(map),
            (None, Value::Array(items)) => {
                out.insert("count".into(), Value::from(items.len()));
                out.insert("results".into(), Value::Array(items));
            }
            (None, other) => {
                out.insert("result".into(), other);
            }
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::Callable;
    use cadsl_types::{Origin, PipelineError};
    use serde_json::json;

    fn ctx() -> Context {
        Context::detached()
    }

    fn doubled(v: Value) -> Pipeline {
        let n = v.as_i64().unwrap_or(0);
        Pipeline::pure(json!(n * 2))
    }

    #[test]
    fn builders_do_not_mutate_the_template() {
        let base = Pipeline::pure(json!([3, 1, 2]));
        let limited = base.limit(1);
        assert_eq!(base.steps().count(), 0);
        assert_eq!(limited.steps().count(), 1);
        assert_eq!(base.run(&ctx()).unwrap(), json!([3, 1, 2]));
        assert_eq!(limited.run(&ctx()).unwrap(), json!([3]));
    }

    #[test]
    fn bind_runs_continuation_lazily() {
        let m = Pipeline::pure(json!(4)).bind(doubled);
        assert_eq!(m.run(&ctx()).unwrap(), json!(8));
    }

    #[test]
    fn bind_short_circuits_on_error() {
        let failing = Pipeline::from_fn(|_| Err(Fault::new("down")));
        let m = failing.bind(|_| panic!("continuation must not run"));
        let err = m.run(&ctx()).unwrap_err();
        assert_eq!(err.origin, Origin::Source);
    }

    #[test]
    fn ap_combines_values() {
        let left = Pipeline::pure(json!(2));
        let right = Pipeline::pure(json!(5));
        let sum = left.ap(&right, |a, b| {
            Ok(json!(a.as_i64().unwrap_or(0) + b.as_i64().unwrap_or(0)))
        });
        assert_eq!(sum.run(&ctx()).unwrap(), json!(7));
    }

    #[test]
    fn ap_failure_surfaces() {
        let p = Pipeline::pure(json!(1)).ap(&Pipeline::pure(json!(2)), |_, _| Err("clash".into()));
        let err = p.run(&ctx()).unwrap_err();
        assert_eq!(err.message, "Source failed: clash");
    }

    #[test]
    fn fmap_maps_rows() {
        let p = Pipeline::pure(json!([1, 2])).fmap(Callable::plain(|v: &Value| {
            Ok(json!(v.as_i64().unwrap_or(0) + 1))
        }));
        assert_eq!(p.run(&ctx()).unwrap(), json!([2, 3]));
    }

    #[test]
    fn execute_with_emit_key_adds_count() {
        let out = Pipeline::pure(json!([1, 2])).emit("items").execute(&ctx());
        assert_eq!(out, json!({"success": true, "items": [1, 2], "count": 2}));

        let out = Pipeline::pure(json!({"a": 1})).emit("summary").execute(&ctx());
        assert_eq!(out, json!({"success": true, "summary": {"a": 1}}));
    }

    #[test]
    fn execute_heuristic_keys() {
        assert_eq!(
            Pipeline::pure(json!({"total": 3})).execute(&ctx()),
            json!({"success": true, "total": 3})
        );
        assert_eq!(
            Pipeline::pure(json!(["x"])).execute(&ctx()),
            json!({"success": true, "results": ["x"], "count": 1})
        );
        assert_eq!(
            Pipeline::pure(json!("done")).execute(&ctx()),
            json!({"success": true, "result": "done"})
        );
    }

    #[test]
    fn execute_reports_failure() {
        let out = Pipeline::from_fn(|_| Err(Fault::new("gone"))).execute(&ctx());
        assert_eq!(out, json!({"success": false, "error": "Source failed: gone"}));
    }

    #[test]
    fn run_returns_first_error_unchanged() {
        let p = Pipeline::pure(json!([1]))
            .map(Callable::plain(|_: &Value| Err("first".into())))
            .map(Callable::plain(|_: &Value| Err("second".into())));
        assert_eq!(
            p.run(&ctx()).unwrap_err(),
            PipelineError {
                origin: Origin::Map,
                message: "Map failed: first".into(),
                cause: Some("first".into()),
            }
        );
    }

    #[test]
    fn tapped_sequence_materializes_for_execute() {
        let p = Pipeline::pure(json!([1, 2])).tap(Callable::plain(|_: &Value| Ok(Some(json!("g")))));
        assert_eq!(
            p.execute(&ctx()),
            json!({"success": true, "items": [1, 2], "_tap_result": "g"})
        );
    }

    #[test]
    fn order_by_prefix_means_descending() {
        let p = Pipeline::pure(json!([{"n": 1}, {"n": 3}, {"n": 2}])).order_by("-n");
        assert_eq!(p.run(&ctx()).unwrap(), json!([{"n": 3}, {"n": 2}, {"n": 1}]));
    }

    #[test]
    fn debug_lists_step_names() {
        let p = Pipeline::query("SELECT ?x").limit(3).emit("xs");
        let text = format!("{p:?}");
        assert!(text.contains("\"reql\""));
        assert!(text.contains("\"limit\""));
    }
}
