//! Pipeline sources: where the initial dataset comes from.

use std::sync::Arc;

use serde_json::Value;

use cadsl_types::{Context, Data, Fault, Origin, PipelineError, SearchRequest, StepResult};

use crate::callable::Transform;
use crate::pipeline::Pipeline;
use crate::substitute::{substitute_concepts, substitute_params};

/// Message reported when a source needs semantic search and none is attached.
pub const NO_SEMANTIC_SEARCH: &str =
    "RAG manager not available. Ensure RAG is enabled and initialized.";

pub trait Source: Send + Sync {
    /// Short identifier used in logs (e.g. "reql", "value").
    fn name(&self) -> &'static str;

    fn execute(&self, ctx: &Context) -> StepResult<Data>;
}

// ---------------------------------------------------------------------------
// StructuredQuerySource
// ---------------------------------------------------------------------------

/// A structured query against the knowledge store.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredQuerySource {
    query: String,
}

impl StructuredQuerySource {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Concept pass then parameter pass.
    pub fn substitute(&self, ctx: &Context) -> Result<String, Fault> {
        let with_concepts = substitute_concepts(&self.query, ctx)?;
        Ok(substitute_params(&with_concepts, ctx.params()))
    }
}

impl Source for StructuredQuerySource {
    fn name(&self) -> &'static str {
        "reql"
    }

    fn execute(&self, ctx: &Context) -> StepResult<Data> {
        let query = self.substitute(ctx).map_err(|e| {
            PipelineError::new(Origin::Reql, format!("Query failed: {e}: {}", self.query))
                .with_cause(&e)
        })?;
        tracing::debug!(query = %query, language = ctx.language(), "Executing structured query");
        let table = ctx.store().execute_query(&query).map_err(|e| {
            PipelineError::new(Origin::Reql, format!("Query failed: {e}: {query}")).with_cause(&e)
        })?;
        if table.row_count() == 0 {
            return Ok(Data::Plain(Value::Array(Vec::new())));
        }
        Ok(Data::Plain(Value::Array(table.into_rows())))
    }
}

// ---------------------------------------------------------------------------
// SemanticSearchSource
// ---------------------------------------------------------------------------

/// A semantic search over code entities. `query` may contain `{param}`
/// placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticSearchSource {
    query: String,
    top_k: usize,
    entity_types: Option<Vec<String>>,
}

impl SemanticSearchSource {
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            top_k,
            entity_types: None,
        }
    }

    pub fn with_entity_types(mut self, types: Vec<String>) -> Self {
        self.entity_types = Some(types);
        self
    }
}

impl Source for SemanticSearchSource {
    fn name(&self) -> &'static str {
        "rag"
    }

    fn execute(&self, ctx: &Context) -> StepResult<Data> {
        let search = ctx
            .semantic_search()
            .ok_or_else(|| PipelineError::new(Origin::Rag, NO_SEMANTIC_SEARCH))?;
        let request = SearchRequest {
            query: substitute_params(&self.query, ctx.params()),
            top_k: self.top_k,
            entity_types: self.entity_types.clone(),
        };
        tracing::debug!(query = %request.query, top_k = request.top_k, "Executing semantic search");
        let hits = search.search(&request).map_err(|e| {
            PipelineError::new(Origin::Rag, format!("Semantic search failed: {e}")).with_cause(&e)
        })?;
        Ok(Data::Plain(Value::Array(hits)))
    }
}

// ---------------------------------------------------------------------------
// LiteralValueSource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct LiteralValueSource {
    value: Value,
}

impl LiteralValueSource {
    pub fn new(value: Value) -> Self {
        Self { value }
    }
}

impl Source for LiteralValueSource {
    fn name(&self) -> &'static str {
        "value"
    }

    fn execute(&self, _ctx: &Context) -> StepResult<Data> {
        Ok(Data::Plain(self.value.clone()))
    }
}

// ---------------------------------------------------------------------------
// MappedSource: fmap over another source
// ---------------------------------------------------------------------------

pub struct MappedSource {
    inner: Arc<dyn Source>,
    transform: Transform,
}

impl MappedSource {
    pub fn new(inner: Arc<dyn Source>, transform: Transform) -> Self {
        Self { inner, transform }
    }
}

impl Source for MappedSource {
    fn name(&self) -> &'static str {
        "mapped"
    }

    fn execute(&self, ctx: &Context) -> StepResult<Data> {
        let data = self.inner.execute(ctx)?;
        data.map_primary(|v| {
            self.transform
                .call(&v, ctx)
                .map_err(|e| PipelineError::from_fault(Origin::Map, "Map failed", e))
        })
    }
}

// ---------------------------------------------------------------------------
// FnSource: custom callable source
// ---------------------------------------------------------------------------

type SourceFn = Arc<dyn Fn(&Context) -> Result<Value, Fault> + Send + Sync>;

pub struct FnSource {
    f: SourceFn,
}

impl FnSource {
    pub fn new(f: impl Fn(&Context) -> Result<Value, Fault> + Send + Sync + 'static) -> Self {
        Self { f: Arc::new(f) }
    }
}

impl Source for FnSource {
    fn name(&self) -> &'static str {
        "fn"
    }

    fn execute(&self, ctx: &Context) -> StepResult<Data> {
        (self.f)(ctx)
            .map(Data::Plain)
            .map_err(|e| PipelineError::from_fault(Origin::Source, "Source failed", e))
    }
}

// ---------------------------------------------------------------------------
// BoundSource: monadic bind
// ---------------------------------------------------------------------------

pub(crate) type Continuation = Arc<dyn Fn(Value) -> Pipeline + Send + Sync>;

/// Runs `upstream`, feeds its value to `continuation`, and runs the pipeline
/// that comes back. Nothing happens until the source is executed.
pub struct BoundSource {
    upstream: Pipeline,
    continuation: Continuation,
}

impl BoundSource {
    pub(crate) fn new(upstream: Pipeline, continuation: Continuation) -> Self {
        Self {
            upstream,
            continuation,
        }
    }
}

impl Source for BoundSource {
    fn name(&self) -> &'static str {
        "bind"
    }

    fn execute(&self, ctx: &Context) -> StepResult<Data> {
        let value = self.upstream.run(ctx)?;
        (self.continuation)(value).run_data(ctx)
    }
}
