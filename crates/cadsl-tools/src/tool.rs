//! Tool wrappers and the tool registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use cadsl_types::{CadslError, Context, Result};

use crate::builder::{PipelineBuilder, PipelineFactory};
use crate::spec::{ToolKind, ToolSpec};

/// Parameter a diagram tool reads its output format from.
pub const DIAGRAM_FORMAT_PARAM: &str = "format";
pub const DEFAULT_DIAGRAM_FORMAT: &str = "mermaid";
pub const DEFAULT_CATEGORY: &str = "general";
pub const DEFAULT_SEVERITY: &str = "medium";

/// An executable tool built from a [`ToolSpec`].
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    /// Run the tool for one context. Never fails; errors come back as
    /// `{"success": false, "error": ...}`.
    fn execute(&self, ctx: &Context) -> Value;
}

fn add_fields(mut result: Value, fields: &[(&str, Value)]) -> Value {
    if let Value::Object(map) = &mut result {
        for (key, value) in fields {
            map.insert((*key).to_string(), value.clone());
        }
    }
    result
}

pub struct Query {
    factory: PipelineFactory,
}

impl Query {
    pub fn new(factory: PipelineFactory) -> Self {
        Self { factory }
    }
}

impl Tool for Query {
    fn spec(&self) -> &ToolSpec {
        self.factory.spec()
    }

    fn execute(&self, ctx: &Context) -> Value {
        self.factory.execute(ctx)
    }
}

/// Adds `detector`, `category` and `severity` to every result.
pub struct Detector {
    factory: PipelineFactory,
}

impl Detector {
    pub fn new(factory: PipelineFactory) -> Self {
        Self { factory }
    }

    pub fn category(&self) -> &str {
        self.spec().meta_str("category").unwrap_or(DEFAULT_CATEGORY)
    }

    pub fn severity(&self) -> &str {
        self.spec().meta_str("severity").unwrap_or(DEFAULT_SEVERITY)
    }
}

impl Tool for Detector {
    fn spec(&self) -> &ToolSpec {
        self.factory.spec()
    }

    fn execute(&self, ctx: &Context) -> Value {
        add_fields(
            self.factory.execute(ctx),
            &[
                ("detector", json!(self.spec().name)),
                ("category", json!(self.category())),
                ("severity", json!(self.severity())),
            ],
        )
    }
}

/// Adds the requested diagram `format` to every result.
pub struct Diagram {
    factory: PipelineFactory,
}

impl Diagram {
    pub fn new(factory: PipelineFactory) -> Self {
        Self { factory }
    }
}

impl Tool for Diagram {
    fn spec(&self) -> &ToolSpec {
        self.factory.spec()
    }

    fn execute(&self, ctx: &Context) -> Value {
        let format = ctx
            .get_param(DIAGRAM_FORMAT_PARAM)
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_DIAGRAM_FORMAT)
            .to_string();
        add_fields(self.factory.execute(ctx), &[("format", json!(format))])
    }
}

// ---------------------------------------------------------------------------
// ToolRegistry
// ---------------------------------------------------------------------------

/// Registry that holds named tools and dispatches invocations to them.
pub struct ToolRegistry {
    builder: PipelineBuilder,
    tools: BTreeMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(builder: PipelineBuilder) -> Self {
        Self {
            builder,
            tools: BTreeMap::new(),
        }
    }

    /// Wrap `spec` by its kind and register it under its name, replacing any
    /// tool with the same name.
    pub fn register(&mut self, spec: ToolSpec) -> Result<()> {
        let factory = self.builder.factory(Arc::new(spec))?;
        let name = factory.spec().name.clone();
        let tool: Box<dyn Tool> = match factory.spec().kind {
            ToolKind::Query => Box::new(Query::new(factory)),
            ToolKind::Detector => Box::new(Detector::new(factory)),
            ToolKind::Diagram => Box::new(Diagram::new(factory)),
        };
        tracing::debug!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn register_all(&mut self, specs: impl IntoIterator<Item = ToolSpec>) -> Result<()> {
        for spec in specs {
            self.register(spec)?;
        }
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn summaries(&self) -> Vec<Value> {
        self.tools.values().map(|t| t.spec().summary()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate `args`, derive the execution context and run the tool.
    pub fn invoke(&self, name: &str, args: &Map<String, Value>, base: &Context) -> Value {
        match self.try_invoke(name, args, base) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = name, error = %e, "Tool invocation failed");
                json!({"success": false, "error": e.to_string()})
            }
        }
    }

    fn try_invoke(&self, name: &str, args: &Map<String, Value>, base: &Context) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| CadslError::UnknownTool(name.to_string()))?;
        let params = tool.spec().validate_args(args)?;
        let ctx = base.with_params(params);
        tracing::info!(tool = name, kind = %tool.spec().kind, "Executing tool");
        Ok(tool.execute(&ctx))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(PipelineBuilder::default())
    }
}
