//! Render step and the built-in renderers.

use std::sync::Arc;

use serde_json::{json, Value};

use cadsl_types::value::display;
use cadsl_types::{Context, Data, Fault, Origin, PipelineError, RawRow, StepResult};

use crate::callable::{Callable, Renderer, TapFn};
use crate::step::Step;
use crate::substitute::substitute_params;

// ---------------------------------------------------------------------------
// RenderFormat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RenderFormat {
    /// A format string; `{param}` placeholders are filled from the context.
    Literal(String),
    /// The value of a context parameter, or `default` when it is unset.
    Param { name: String, default: String },
}

impl RenderFormat {
    pub fn resolve(&self, ctx: &Context) -> String {
        match self {
            RenderFormat::Literal(text) => substitute_params(text, ctx.params()),
            RenderFormat::Param { name, default } => match ctx.get_param(name) {
                None | Some(Value::Null) => default.clone(),
                Some(v) => display(v),
            },
        }
    }
}

impl From<&str> for RenderFormat {
    fn from(text: &str) -> Self {
        RenderFormat::Literal(text.to_string())
    }
}

// ---------------------------------------------------------------------------
// RenderStep
// ---------------------------------------------------------------------------

/// Render the tap annotation when there is one, else the current value.
pub struct RenderStep {
    format: RenderFormat,
    renderer: Option<Renderer>,
}

impl RenderStep {
    pub fn new(format: impl Into<RenderFormat>) -> Self {
        Self {
            format: format.into(),
            renderer: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = Some(renderer);
        self
    }
}

impl Step for RenderStep {
    fn name(&self) -> &'static str {
        "render"
    }

    fn execute(&self, data: Data, ctx: &Context) -> StepResult<Data> {
        let format = self.format.resolve(ctx);
        tracing::debug!(format = %format, tapped = data.annotation().is_some(), "Rendering");
        let target = data.render_target();
        let rendered = match &self.renderer {
            Some(render) => render(target, &format),
            None => render_by_format(target, &format),
        }
        .map_err(|e| PipelineError::from_fault(Origin::Render, "Render failed", e))?;
        Ok(Data::Plain(rendered))
    }
}

// ---------------------------------------------------------------------------
// Renderers
// ---------------------------------------------------------------------------

pub fn render_json(value: &Value, _format: &str) -> Result<Value, Fault> {
    Ok(Value::String(serde_json::to_string_pretty(value)?))
}

pub fn render_text(value: &Value, _format: &str) -> Result<Value, Fault> {
    Ok(Value::String(match value {
        Value::Array(items) => items.iter().map(display).collect::<Vec<_>>().join("\n"),
        other => display(other),
    }))
}

pub fn render_markdown(value: &Value, _format: &str) -> Result<Value, Fault> {
    let lines: Vec<String> = match value {
        Value::Array(items) => items.iter().map(|v| format!("- {}", display(v))).collect(),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("- **{k}**: {}", display(v)))
            .collect(),
        other => vec![display(other)],
    };
    Ok(Value::String(lines.join("\n")))
}

fn node_id(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn node_name(node: &Value) -> String {
    match node {
        Value::Object(map) => map
            .get("id")
            .or_else(|| map.get("name"))
            .map(display)
            .unwrap_or_default(),
        other => display(other),
    }
}

fn edge_ends(edge: &Value) -> Option<(String, String)> {
    match edge {
        Value::Array(pair) if pair.len() == 2 => Some((display(&pair[0]), display(&pair[1]))),
        Value::Object(map) => Some((display(map.get("from")?), display(map.get("to")?))),
        _ => None,
    }
}

/// A `{nodes, edges}` graph as a top-down flowchart. Anything else renders as text.
pub fn render_mermaid(value: &Value, format: &str) -> Result<Value, Fault> {
    let (Some(nodes), Some(edges)) = (
        value.get("nodes").and_then(Value::as_array),
        value.get("edges").and_then(Value::as_array),
    ) else {
        return render_text(value, format);
    };
    let mut lines = vec!["graph TD".to_string()];
    for node in nodes {
        let name = node_name(node);
        lines.push(format!("    {}[\"{}\"]", node_id(&name), name.replace('"', "'")));
    }
    for edge in edges {
        if let Some((from, to)) = edge_ends(edge) {
            lines.push(format!("    {} --> {}", node_id(&from), node_id(&to)));
        }
    }
    Ok(Value::String(lines.join("\n")))
}

/// Pick a renderer from the resolved format name; unknown formats stringify.
pub fn render_by_format(value: &Value, format: &str) -> Result<Value, Fault> {
    match format {
        "json" => render_json(value, format),
        "markdown" => render_markdown(value, format),
        "mermaid" => render_mermaid(value, format),
        _ => render_text(value, format),
    }
}

/// Renderer table used when a render step names its renderer.
pub fn renderer_by_name(name: &str) -> Renderer {
    match name {
        "json" => Arc::new(render_json),
        "text" => Arc::new(render_text),
        "markdown" => Arc::new(render_markdown),
        "mermaid" => Arc::new(render_mermaid),
        other => {
            tracing::warn!(renderer = other, "Unknown renderer, falling back to text");
            Arc::new(render_text)
        }
    }
}

// ---------------------------------------------------------------------------
// Graph tap
// ---------------------------------------------------------------------------

/// Build `{nodes, edges}` from rows with `from` and `to` fields. Rows missing
/// either end are skipped; nodes are listed in first-seen order.
pub fn graph_from_rows(rows: &Value) -> Option<Value> {
    let rows = rows.as_array()?;
    let mut nodes: Vec<Value> = Vec::new();
    let mut edges: Vec<Value> = Vec::new();
    for row in rows {
        let Some(raw) = RawRow::from_value(row) else {
            continue;
        };
        let (Some(from), Some(to)) = (raw.resolve("from"), raw.resolve("to")) else {
            continue;
        };
        for end in [from, to] {
            if !nodes.contains(end) {
                nodes.push(end.clone());
            }
        }
        edges.push(json!({"from": from, "to": to}));
    }
    Some(json!({"nodes": nodes, "edges": edges}))
}

pub fn graph_tap() -> TapFn {
    Callable::plain(|rows: &Value| Ok(graph_from_rows(rows)))
}
