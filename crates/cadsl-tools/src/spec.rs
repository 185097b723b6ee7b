//! Declarative tool specifications.
//!
//! A [`ToolSpec`] is what the transformer extracts from one tool declaration.
//! It is never mutated after construction; the [`PipelineBuilder`] reads it to
//! produce a pipeline for each execution context.
//!
//! [`PipelineBuilder`]: crate::builder::PipelineBuilder

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};

use cadsl_expr::values_equal;
use cadsl_pipeline::{AggregateField, FlatTransform, Guard, KeyFn, Predicate, Transform};
use cadsl_types::value::{display, truthy, type_name};
use cadsl_types::{
    CadslError, ClusterRequest, DuplicateRequest, Origin, PipelineError, StepResult,
};

// ---------------------------------------------------------------------------
// ToolKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    #[default]
    Query,
    Detector,
    Diagram,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Query => "query",
            ToolKind::Detector => "detector",
            ToolKind::Diagram => "diagram",
        }
    }
}

impl FromStr for ToolKind {
    type Err = CadslError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query" => Ok(ToolKind::Query),
            "detector" => Ok(ToolKind::Detector),
            "diagram" => Ok(ToolKind::Diagram),
            other => Err(CadslError::Other(format!("Unknown tool kind '{other}'"))),
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ParamType / ParamSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ParamType {
    Int,
    Str,
    Float,
    Bool,
    /// `list`, or `list<T>` with element coercion.
    List(Option<Box<ParamType>>),
}

impl ParamType {
    /// Look a type name up in the closed type table. Accepts `list<T>`.
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        if let Some(inner) = name
            .strip_prefix("list<")
            .and_then(|rest| rest.strip_suffix('>'))
        {
            return Some(ParamType::List(Some(Box::new(ParamType::parse(inner)?))));
        }
        match name {
            "int" | "integer" => Some(ParamType::Int),
            "str" | "string" => Some(ParamType::Str),
            "float" | "number" => Some(ParamType::Float),
            "bool" | "boolean" => Some(ParamType::Bool),
            "list" | "array" => Some(ParamType::List(None)),
            _ => None,
        }
    }

    fn coerce(&self, value: &Value) -> Result<Value, String> {
        match self {
            ParamType::Bool => Ok(Value::Bool(match value {
                Value::String(s) => {
                    matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
                }
                other => truthy(other),
            })),
            ParamType::Int => match value {
                Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                    (Some(i), _) => Ok(Value::from(i)),
                    (None, Some(f)) if f.is_finite() => Ok(Value::from(f.trunc() as i64)),
                    _ => Err(format!("cannot convert {n} to int")),
                },
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| format!("invalid literal for int: '{s}'")),
                Value::Bool(b) => Ok(Value::from(i64::from(*b))),
                other => Err(format!("cannot convert {} to int", type_name(other))),
            },
            ParamType::Float => {
                let f = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                    _ => None,
                };
                f.and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("cannot convert '{}' to float", display(value)))
            }
            ParamType::Str => Ok(Value::String(display(value))),
            ParamType::List(inner) => {
                let items: Vec<Value> = match value {
                    Value::Array(items) => items.clone(),
                    Value::String(s) => s
                        .split(',')
                        .map(str::trim)
                        .filter(|part| !part.is_empty())
                        .map(|part| Value::String(part.to_string()))
                        .collect(),
                    other => vec![other.clone()],
                };
                match inner {
                    Some(ty) => items
                        .iter()
                        .map(|item| ty.coerce(item))
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Array),
                    None => Ok(Value::Array(items)),
                }
            }
        }
    }
}

impl From<ParamType> for String {
    fn from(ty: ParamType) -> Self {
        ty.to_string()
    }
}

impl TryFrom<String> for ParamType {
    type Error = String;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        ParamType::parse(&name).ok_or_else(|| format!("unknown parameter type '{name}'"))
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Int => f.write_str("int"),
            ParamType::Str => f.write_str("str"),
            ParamType::Float => f.write_str("float"),
            ParamType::Bool => f.write_str("bool"),
            ParamType::List(None) => f.write_str("list"),
            ParamType::List(Some(inner)) => write!(f, "list<{inner}>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    #[serde(default)]
    pub description: String,
    pub choices: Option<Vec<Value>>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            default: None,
            description: String::new(),
            choices: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_choices(mut self, choices: Vec<Value>) -> Self {
        self.choices = Some(choices);
        self
    }

    /// Check and coerce a supplied value.
    ///
    /// An absent (or null) value takes the default when there is one, even
    /// for a required parameter. Choices are checked before coercion.
    pub fn validate(&self, value: Option<&Value>) -> StepResult<Value> {
        let value = match value {
            None | Some(Value::Null) => {
                return match &self.default {
                    Some(default) if !default.is_null() => Ok(default.clone()),
                    _ if self.required => Err(PipelineError::new(
                        Origin::Param,
                        format!("Required parameter '{}' not provided", self.name),
                    )),
                    _ => Ok(Value::Null),
                };
            }
            Some(v) => v,
        };
        if let Some(choices) = &self.choices {
            if !choices.iter().any(|c| values_equal(c, value)) {
                return Err(PipelineError::new(
                    Origin::Param,
                    format!(
                        "Parameter '{}' must be one of {}",
                        self.name,
                        Value::Array(choices.clone())
                    ),
                ));
            }
        }
        self.ty.coerce(value).map_err(|e| {
            PipelineError::new(Origin::Param, format!("Invalid type for '{}': {e}", self.name))
        })
    }
}

// ---------------------------------------------------------------------------
// SourceSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    /// Structured query text, braces already stripped.
    Reql { query: String },
    /// Semantic search; `top_k` falls back to the configured default.
    Rag {
        query: String,
        top_k: Option<usize>,
        entity_types: Option<Vec<String>>,
    },
    Value { value: Value },
    Duplicates { request: DuplicateRequest },
    Clusters { request: ClusterRequest },
}

impl SourceSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceSpec::Reql { .. } => "reql",
            SourceSpec::Rag { .. } => "rag",
            SourceSpec::Value { .. } => "value",
            SourceSpec::Duplicates { .. } => "rag_duplicates",
            SourceSpec::Clusters { .. } => "rag_clusters",
        }
    }
}

// ---------------------------------------------------------------------------
// StepSpec
// ---------------------------------------------------------------------------

/// A step size: literal, or the name of a tool parameter read at run time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CountSpec {
    Literal(usize),
    Param(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatSpec {
    Literal(String),
    Param(String),
}

#[derive(Debug, Clone)]
pub enum GroupKeySpec {
    Field(String),
    Key(KeyFn),
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupAggregate {
    Inline(Vec<AggregateField>),
    /// A reduction registered under this name.
    Named(String),
}

/// One step descriptor. Conditions and expressions are already compiled to
/// callables; everything else is plain data.
#[derive(Clone)]
pub enum StepSpec {
    Filter {
        predicate: Predicate,
        when: Option<Guard>,
    },
    Select {
        /// `(output, source)` pairs.
        fields: Vec<(String, String)>,
    },
    Map {
        transform: Transform,
    },
    FlatMap {
        transform: FlatTransform,
    },
    OrderBy {
        /// Field names; a leading `-` marks a descending key.
        fields: Vec<String>,
    },
    Limit(CountSpec),
    Offset(CountSpec),
    GroupBy {
        key: GroupKeySpec,
        aggregate: Option<GroupAggregate>,
    },
    Aggregate {
        fields: Vec<AggregateField>,
    },
    Unique {
        key: Option<KeyFn>,
    },
    Flatten,
    Tap {
        function: String,
    },
    Python {
        code: String,
    },
    Render {
        format: FormatSpec,
        renderer: Option<String>,
    },
}

impl StepSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            StepSpec::Filter { .. } => "filter",
            StepSpec::Select { .. } => "select",
            StepSpec::Map { .. } => "map",
            StepSpec::FlatMap { .. } => "flat_map",
            StepSpec::OrderBy { .. } => "order_by",
            StepSpec::Limit(_) => "limit",
            StepSpec::Offset(_) => "offset",
            StepSpec::GroupBy { .. } => "group_by",
            StepSpec::Aggregate { .. } => "aggregate",
            StepSpec::Unique { .. } => "unique",
            StepSpec::Flatten => "flatten",
            StepSpec::Tap { .. } => "tap",
            StepSpec::Python { .. } => "python",
            StepSpec::Render { .. } => "render",
        }
    }

    /// A JSON summary of the descriptor; callables appear as `"<compiled>"`.
    pub fn describe(&self) -> Value {
        let count = |c: &CountSpec| match c {
            CountSpec::Literal(n) => json!(n),
            CountSpec::Param(name) => json!(format!("{{{name}}}")),
        };
        let detail = match self {
            StepSpec::Filter { when, .. } => {
                json!({"predicate": "<compiled>", "when": when.as_ref().map(|_| "<compiled>")})
            }
            StepSpec::Select { fields } => Value::Object(
                fields
                    .iter()
                    .map(|(o, s)| (o.clone(), Value::String(s.clone())))
                    .collect(),
            ),
            StepSpec::Map { .. } | StepSpec::FlatMap { .. } => json!("<compiled>"),
            StepSpec::OrderBy { fields } => json!(fields),
            StepSpec::Limit(c) | StepSpec::Offset(c) => count(c),
            StepSpec::GroupBy { key, aggregate } => {
                let key = match key {
                    GroupKeySpec::Field(f) => json!(f),
                    GroupKeySpec::Key(_) => json!("<compiled>"),
                    GroupKeySpec::All => json!(cadsl_pipeline::ALL_GROUP),
                };
                let aggregate = match aggregate {
                    Some(GroupAggregate::Inline(fields)) => json!(fields),
                    Some(GroupAggregate::Named(name)) => json!(name),
                    None => Value::Null,
                };
                json!({"key": key, "aggregate": aggregate})
            }
            StepSpec::Aggregate { fields } => json!(fields),
            StepSpec::Unique { key } => json!(key.as_ref().map(|_| "<compiled>")),
            StepSpec::Flatten => Value::Null,
            StepSpec::Tap { function } => json!(function),
            StepSpec::Python { code } => json!(code),
            StepSpec::Render { format, renderer } => {
                let format = match format {
                    FormatSpec::Literal(f) => json!(f),
                    FormatSpec::Param(name) => json!(format!("{{{name}}}")),
                };
                json!({"format": format, "renderer": renderer})
            }
        };
        json!({"type": self.kind(), "spec": detail})
    }
}

impl fmt::Debug for StepSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StepSpec({})", self.describe())
    }
}

// ---------------------------------------------------------------------------
// ToolSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub kind: ToolKind,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub metadata: Map<String, Value>,
    pub source: SourceSpec,
    pub steps: Vec<StepSpec>,
    pub emit: Option<String>,
}

impl ToolSpec {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Validate caller arguments against every declared parameter.
    ///
    /// Declared parameters are coerced (and defaulted); arguments that no
    /// parameter declares are passed through as given. Null results are
    /// left out.
    pub fn validate_args(&self, args: &Map<String, Value>) -> StepResult<HashMap<String, Value>> {
        let mut out = HashMap::new();
        for (name, value) in args {
            if self.param(name).is_none() && !value.is_null() {
                out.insert(name.clone(), value.clone());
            }
        }
        for spec in &self.params {
            let value = spec.validate(args.get(&spec.name))?;
            if !value.is_null() {
                out.insert(spec.name.clone(), value);
            }
        }
        Ok(out)
    }

    pub fn summary(&self) -> Value {
        json!({
            "name": self.name,
            "type": self.kind,
            "description": self.description,
            "params": self.params,
            "metadata": self.metadata,
            "source": self.source,
            "steps": self.steps.iter().map(StepSpec::describe).collect::<Vec<_>>(),
            "emit": self.emit,
        })
    }
}
