//! ToolSpec to Pipeline construction.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use cadsl_pipeline::substitute::{param_ref_name, resolve_param_ref};
use cadsl_pipeline::{
    aggregate_fn, graph_tap, render_json, render_markdown, render_mermaid, render_text,
    renderer_by_name, AggregateFn, DuplicateCandidatesSource, GroupByStep, GroupKey, Pipeline,
    RenderFormat, Renderer, SimilarClustersSource, SortKey, TapFn,
};
use cadsl_types::{CadslError, Context, Result, RuntimeConfig, SearchRequest};

use crate::spec::{
    CountSpec, FormatSpec, GroupAggregate, GroupKeySpec, SourceSpec, StepSpec, ToolSpec,
};

// ---------------------------------------------------------------------------
// FunctionRegistry
// ---------------------------------------------------------------------------

/// Named functions a tool can refer to: taps, group aggregates, renderers.
pub struct FunctionRegistry {
    taps: HashMap<String, TapFn>,
    aggregates: HashMap<String, AggregateFn>,
    renderers: HashMap<String, Renderer>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            taps: HashMap::new(),
            aggregates: HashMap::new(),
            renderers: HashMap::new(),
        }
    }

    /// The `graph` tap and the `json`, `text`, `markdown`, `mermaid` renderers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_tap("graph", graph_tap());
        registry.register_renderer("json", Arc::new(render_json));
        registry.register_renderer("text", Arc::new(render_text));
        registry.register_renderer("markdown", Arc::new(render_markdown));
        registry.register_renderer("mermaid", Arc::new(render_mermaid));
        registry
    }

    pub fn register_tap(&mut self, name: impl Into<String>, f: TapFn) {
        self.taps.insert(name.into(), f);
    }

    pub fn register_aggregate(&mut self, name: impl Into<String>, f: AggregateFn) {
        self.aggregates.insert(name.into(), f);
    }

    pub fn register_renderer(&mut self, name: impl Into<String>, f: Renderer) {
        self.renderers.insert(name.into(), f);
    }

    pub fn tap(&self, name: &str) -> Option<TapFn> {
        self.taps.get(name).cloned()
    }

    pub fn aggregate(&self, name: &str) -> Option<AggregateFn> {
        self.aggregates.get(name).cloned()
    }

    /// A registered renderer, else the built-in table (which falls back to text).
    pub fn renderer(&self, name: &str) -> Renderer {
        match self.renderers.get(name) {
            Some(r) => Arc::clone(r),
            None => renderer_by_name(name),
        }
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// ---------------------------------------------------------------------------
// PipelineBuilder
// ---------------------------------------------------------------------------

/// Folds a [`ToolSpec`] into a [`Pipeline`] through the fluent builder API.
#[derive(Clone)]
pub struct PipelineBuilder {
    config: RuntimeConfig,
    functions: Arc<FunctionRegistry>,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new(RuntimeConfig::default(), Arc::new(FunctionRegistry::with_builtins()))
    }
}

impl PipelineBuilder {
    pub fn new(config: RuntimeConfig, functions: Arc<FunctionRegistry>) -> Self {
        Self { config, functions }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Reject references to taps or aggregates that are not registered.
    pub fn check(&self, spec: &ToolSpec) -> Result<()> {
        for step in &spec.steps {
            match step {
                StepSpec::Tap { function } if self.functions.tap(function).is_none() => {
                    return Err(CadslError::UnknownFunction {
                        role: "tap".into(),
                        name: function.clone(),
                    });
                }
                StepSpec::GroupBy {
                    aggregate: Some(GroupAggregate::Named(name)),
                    ..
                } if self.functions.aggregate(name).is_none() => {
                    return Err(CadslError::UnknownFunction {
                        role: "aggregate".into(),
                        name: name.clone(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn build(&self, spec: &ToolSpec) -> Result<Pipeline> {
        let mut pipeline = self.source(&spec.source);
        for step in &spec.steps {
            pipeline = self.apply(pipeline, step)?;
        }
        if let Some(key) = &spec.emit {
            pipeline = pipeline.emit(key.clone());
        }
        Ok(pipeline)
    }

    /// A factory producing this spec's pipeline for each execution context.
    pub fn factory(&self, spec: Arc<ToolSpec>) -> Result<PipelineFactory> {
        self.check(&spec)?;
        Ok(PipelineFactory {
            spec,
            builder: self.clone(),
        })
    }

    fn source(&self, source: &SourceSpec) -> Pipeline {
        match source {
            SourceSpec::Reql { query } => Pipeline::query(query.clone()),
            SourceSpec::Rag {
                query,
                top_k,
                entity_types,
            } => Pipeline::semantic(SearchRequest {
                query: query.clone(),
                top_k: top_k.unwrap_or(self.config.default_top_k),
                entity_types: entity_types.clone(),
            }),
            SourceSpec::Value { value } => {
                let is_ref = value.as_str().and_then(param_ref_name).is_some();
                if is_ref {
                    let value = value.clone();
                    Pipeline::from_fn(move |ctx: &Context| Ok(resolve_param_ref(&value, ctx)))
                } else {
                    Pipeline::pure(value.clone())
                }
            }
            SourceSpec::Duplicates { request } => {
                Pipeline::from_source(DuplicateCandidatesSource::new(request.clone()))
            }
            SourceSpec::Clusters { request } => {
                Pipeline::from_source(SimilarClustersSource::new(request.clone()))
            }
        }
    }

    fn apply(&self, pipeline: Pipeline, step: &StepSpec) -> Result<Pipeline> {
        Ok(match step {
            StepSpec::Filter { predicate, when } => match when {
                Some(guard) => pipeline.filter_when(predicate.clone(), Arc::clone(guard)),
                None => pipeline.filter(predicate.clone()),
            },
            StepSpec::Select { fields } => pipeline.select_fields(fields.clone()),
            StepSpec::Map { transform } => pipeline.map(transform.clone()),
            StepSpec::FlatMap { transform } => pipeline.flat_map(transform.clone()),
            StepSpec::OrderBy { fields } => {
                pipeline.order_by_keys(fields.iter().map(|f| SortKey::parse(f)).collect())
            }
            StepSpec::Limit(count) => match count {
                CountSpec::Literal(n) => pipeline.limit(*n),
                CountSpec::Param(name) => pipeline.limit_param(name, self.config.default_limit),
            },
            StepSpec::Offset(count) => match count {
                CountSpec::Literal(n) => pipeline.offset(*n),
                CountSpec::Param(name) => pipeline.offset_param(name, self.config.default_offset),
            },
            StepSpec::GroupBy { key, aggregate } => {
                let key = match key {
                    GroupKeySpec::Field(name) => GroupKey::Field(name.clone()),
                    GroupKeySpec::Key(f) => GroupKey::Key(f.clone()),
                    GroupKeySpec::All => GroupKey::All,
                };
                let mut step = GroupByStep::new(key);
                match aggregate {
                    Some(GroupAggregate::Inline(fields)) => {
                        step = step.with_aggregate(aggregate_fn(fields.clone()));
                    }
                    Some(GroupAggregate::Named(name)) => {
                        let f = self.functions.aggregate(name).ok_or_else(|| {
                            CadslError::UnknownFunction {
                                role: "aggregate".into(),
                                name: name.clone(),
                            }
                        })?;
                        step = step.with_aggregate(f);
                    }
                    None => {}
                }
                pipeline.group_by(step)
            }
            StepSpec::Aggregate { fields } => pipeline.aggregate(fields.clone()),
            StepSpec::Unique { key } => pipeline.unique(key.clone()),
            StepSpec::Flatten => pipeline.flatten(),
            StepSpec::Tap { function } => {
                let f = self.functions.tap(function).ok_or_else(|| {
                    tracing::warn!(function = %function, "Unknown tap function");
                    CadslError::UnknownFunction {
                        role: "tap".into(),
                        name: function.clone(),
                    }
                })?;
                pipeline.tap(f)
            }
            StepSpec::Python { code } => pipeline.python(code),
            StepSpec::Render { format, renderer } => {
                let format = match format {
                    FormatSpec::Literal(text) => RenderFormat::Literal(text.clone()),
                    FormatSpec::Param(name) => RenderFormat::Param {
                        name: name.clone(),
                        default: self.config.default_render_format.clone(),
                    },
                };
                let renderer = renderer.as_deref().map(|name| self.functions.renderer(name));
                pipeline.render(format, renderer)
            }
        })
    }
}

// ---------------------------------------------------------------------------
// PipelineFactory
// ---------------------------------------------------------------------------

/// `factory(ctx) -> Pipeline` for one tool. Parameter-bound steps read the
/// context when the pipeline runs.
#[derive(Clone)]
pub struct PipelineFactory {
    spec: Arc<ToolSpec>,
    builder: PipelineBuilder,
}

impl PipelineFactory {
    pub fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    pub fn build(&self, ctx: &Context) -> Result<Pipeline> {
        tracing::debug!(
            tool = %self.spec.name,
            language = ctx.language(),
            params = ctx.params().len(),
            "Building pipeline"
        );
        self.builder.build(&self.spec)
    }

    /// Build and execute, folding build errors into the failure shape.
    pub fn execute(&self, ctx: &Context) -> Value {
        match self.build(ctx) {
            Ok(pipeline) => pipeline.execute(ctx),
            Err(e) => serde_json::json!({"success": false, "error": e.to_string()}),
        }
    }
}
