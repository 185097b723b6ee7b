//! Parse tree to [`ToolSpec`] transformation.
//!
//! The walk is purely structural: every tool definition becomes one
//! `ToolSpec` whose steps are declarative descriptors. The only callables
//! created here come from the [`ExprCompiler`].

use std::sync::Arc;

use serde_json::{Map, Value};

use cadsl_pipeline::{AggOp, AggregateField, ALL_GROUP};
use cadsl_types::row::clean_key;
use cadsl_types::{CadslError, ClusterRequest, DuplicateRequest, Result};

use crate::compiler::{keyword_literal, number, unquote, ExprCompiler, TreeCompiler};
use crate::spec::{
    CountSpec, FormatSpec, GroupAggregate, GroupKeySpec, ParamSpec, ParamType, SourceSpec,
    StepSpec, ToolKind, ToolSpec,
};
use crate::tree::{Node, Token, Tree};

/// Marker stored for a value source whose expression is not a single token.
pub const VALUE_PLACEHOLDER: &str = "<expr>";

/// Output key used by an `emit` step that names none.
pub const DEFAULT_EMIT_KEY: &str = "result";

/// Format of a render step that names none.
pub const DEFAULT_RENDER_FORMAT: &str = "text";

fn err(node: &str, message: impl Into<String>) -> CadslError {
    CadslError::Transform {
        node: node.to_string(),
        message: message.into(),
    }
}

/// Strip one layer of enclosing braces and surrounding whitespace.
pub(crate) fn strip_braces(text: &str) -> &str {
    let text = text.trim();
    text.strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .unwrap_or(text)
        .trim()
}

fn param_name(text: &str) -> &str {
    strip_braces(text)
}

fn token_text(node: &Node) -> Option<&str> {
    node.as_token().map(|t| t.value.as_str())
}

/// A literal written in the tool header: default values, choices, metadata.
fn literal(node: &Node) -> Result<Value> {
    match node {
        Node::Token(token) => Ok(token_literal(token)),
        Node::Tree(tree) => match tree.data.as_str() {
            "string_array" | "list" | "array" | "choices" | "value_list" | "capability_list" => tree
                .children
                .iter()
                .map(literal)
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            "param_ref" => Ok(Value::String(format!(
                "{{{}}}",
                tree.first_token().map(|t| param_name(&t.value)).unwrap_or_default()
            ))),
            "val_true" => Ok(Value::Bool(true)),
            "val_false" => Ok(Value::Bool(false)),
            "val_null" => Ok(Value::Null),
            _ => match tree.children.as_slice() {
                [only] => literal(only),
                _ => Err(err(&tree.data, "expected a literal value")),
            },
        },
    }
}

fn token_literal(token: &Token) -> Value {
    let text = token.value.trim();
    match token.kind.as_str() {
        "STRING" | "ESCAPED_STRING" | "DOCSTRING" => Value::String(unquote(text).to_string()),
        "NUMBER" | "INT" | "FLOAT" | "SIGNED_INT" | "SIGNED_FLOAT" => {
            number(text).unwrap_or_else(|| Value::String(text.to_string()))
        }
        "PARAM" => Value::String(format!("{{{}}}", param_name(text))),
        _ => keyword_literal(text).unwrap_or_else(|| Value::String(text.to_string())),
    }
}

fn as_usize(value: &Value, node: &str) -> Result<usize> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| err(node, format!("expected a non-negative integer, got {value}")))
}

fn as_bool(value: &Value, node: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| err(node, format!("expected a boolean, got {value}")))
}

fn as_strings(value: &Value, node: &str) -> Result<Vec<String>> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| err(node, format!("expected a string, got {v}")))
            })
            .collect(),
        Value::String(s) => Ok(vec![s.clone()]),
        other => Err(err(node, format!("expected a string list, got {other}"))),
    }
}

/// `key = value` pairs under a source node.
fn kwargs(tree: &Tree) -> Result<Vec<(String, Value)>> {
    let mut out = Vec::new();
    for item in tree.subtrees().filter(|t| t.data.ends_with("kwarg")) {
        match item.children.as_slice() {
            [key, value] => {
                let key = token_text(key).ok_or_else(|| err(&item.data, "key must be a name"))?;
                out.push((key.trim().to_string(), literal(value)?));
            }
            _ => return Err(err(&item.data, "expected key and value")),
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Transformer
// ---------------------------------------------------------------------------

/// Converts a parse tree of tool definitions into [`ToolSpec`]s.
#[derive(Clone)]
pub struct Transformer {
    compiler: Arc<dyn ExprCompiler>,
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new(Arc::new(TreeCompiler))
    }
}

impl Transformer {
    pub fn new(compiler: Arc<dyn ExprCompiler>) -> Self {
        Self { compiler }
    }

    /// Every tool definition in `tree`, in source order. `tree` may itself be
    /// a single tool definition.
    pub fn transform(&self, tree: &Tree) -> Result<Vec<ToolSpec>> {
        let mut defs = Vec::new();
        collect_tool_defs(tree, &mut defs);
        let specs = defs
            .into_iter()
            .map(|def| self.transform_tool(def))
            .collect::<Result<Vec<_>>>()?;
        tracing::debug!(tools = specs.len(), "Transformed parse tree");
        Ok(specs)
    }

    /// Header items may sit directly under the definition or inside a
    /// `tool_body` wrapper.
    pub fn transform_tool(&self, tree: &Tree) -> Result<ToolSpec> {
        let body: Vec<&Tree> = tree
            .subtrees()
            .flat_map(|t| match t.data.as_str() {
                "tool_body" => t.subtrees().collect(),
                _ => vec![t],
            })
            .collect();
        let find = |data: &str| body.iter().copied().find(|t| t.data == data);

        let kind = match find("tool_type") {
            Some(t) => tool_kind(t)?,
            None => body
                .iter()
                .find_map(|t| kind_tag(&t.data))
                .unwrap_or_default(),
        };
        let name = tree
            .token("NAME")
            .map(|t| t.value.trim().to_string())
            .ok_or_else(|| err(&tree.data, "missing tool name"))?;

        let metadata = match find("metadata") {
            Some(meta) => metadata(meta)?,
            None => Map::new(),
        };

        let description = find("docstring")
            .and_then(Tree::first_token)
            .or_else(|| tree.token("DOCSTRING"))
            .map(|t| unquote(&t.value).trim().to_string())
            .unwrap_or_default();

        let mut params = Vec::new();
        for def in body.iter().flat_map(|t| match t.data.as_str() {
            "param_def" => vec![*t],
            "params" => t.find_all("param_def").collect(),
            _ => Vec::new(),
        }) {
            params.push(param(def)?);
        }

        let pipelines: Vec<&Tree> = body.iter().copied().filter(|t| t.data == "pipeline").collect();
        let pipeline = match pipelines.as_slice() {
            [only] => *only,
            [] => return Err(err(&name, "tool has no pipeline")),
            _ => return Err(err(&name, "tool has more than one pipeline")),
        };
        let (source, steps, emit) = self.pipeline(pipeline)?;

        tracing::debug!(tool = %name, kind = %kind, steps = steps.len(), "Transformed tool");
        Ok(ToolSpec {
            name,
            kind,
            description,
            params,
            metadata,
            source,
            steps,
            emit,
        })
    }

    fn pipeline(&self, tree: &Tree) -> Result<(SourceSpec, Vec<StepSpec>, Option<String>)> {
        let mut source = None;
        let mut steps = Vec::new();
        let mut emit = None;
        for child in tree.subtrees() {
            if child.data == "source" || child.data.ends_with("_source") {
                if source.is_some() {
                    return Err(err("pipeline", "more than one source"));
                }
                source = Some(self.source(child)?);
                continue;
            }
            for step in step_nodes(child) {
                match self.step(step)? {
                    Extracted::Step(spec) => steps.push(spec),
                    Extracted::Emit(key) => emit = Some(key),
                }
            }
        }
        let source = source.ok_or_else(|| err("pipeline", "pipeline has no source"))?;
        Ok((source, steps, emit))
    }

    // -----------------------------------------------------------------------
    // Sources
    // -----------------------------------------------------------------------

    fn source(&self, tree: &Tree) -> Result<SourceSpec> {
        let node = if tree.data == "source" {
            tree.subtrees()
                .next()
                .ok_or_else(|| err("source", "empty source"))?
        } else {
            tree
        };
        match node.data.as_str() {
            "reql_source" => {
                let token = node
                    .first_token()
                    .or_else(|| node.single_token())
                    .ok_or_else(|| err("reql_source", "missing query text"))?;
                let query = if token.kind == "STRING" {
                    unquote(&token.value).trim().to_string()
                } else {
                    strip_braces(&token.value).to_string()
                };
                Ok(SourceSpec::Reql { query })
            }
            "rag_source" => rag_source(node.find("rag_args").unwrap_or(node)),
            "value_source" => {
                let value = match node.children.as_slice() {
                    [only] => value_literal(only)?,
                    _ => Value::String(VALUE_PLACEHOLDER.to_string()),
                };
                Ok(SourceSpec::Value { value })
            }
            "rag_duplicates_source" => {
                let mut request = DuplicateRequest::default();
                for (key, value) in kwargs(node)? {
                    match key.as_str() {
                        "similarity_threshold" | "threshold" => {
                            request.similarity_threshold = value
                                .as_f64()
                                .ok_or_else(|| err(&node.data, format!("invalid threshold {value}")))?;
                        }
                        "max_results" | "limit" => request.max_results = as_usize(&value, &node.data)?,
                        "exclude_same_file" => request.exclude_same_file = as_bool(&value, &node.data)?,
                        "exclude_same_class" => request.exclude_same_class = as_bool(&value, &node.data)?,
                        "entity_types" => request.entity_types = as_strings(&value, &node.data)?,
                        other => return Err(err(&node.data, format!("unknown argument '{other}'"))),
                    }
                }
                Ok(SourceSpec::Duplicates { request })
            }
            "rag_clusters_source" => {
                let mut request = ClusterRequest::default();
                for (key, value) in kwargs(node)? {
                    match key.as_str() {
                        "n_clusters" => request.n_clusters = as_usize(&value, &node.data)?,
                        "min_cluster_size" | "min_size" => {
                            request.min_cluster_size = as_usize(&value, &node.data)?
                        }
                        "exclude_same_file" => request.exclude_same_file = as_bool(&value, &node.data)?,
                        "exclude_same_class" => request.exclude_same_class = as_bool(&value, &node.data)?,
                        "entity_types" => request.entity_types = as_strings(&value, &node.data)?,
                        other => return Err(err(&node.data, format!("unknown argument '{other}'"))),
                    }
                }
                Ok(SourceSpec::Clusters { request })
            }
            other => Err(err(other, "unknown source type")),
        }
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    fn step(&self, tree: &Tree) -> Result<Extracted> {
        let kind = tree.data.strip_suffix("_step").unwrap_or(&tree.data);
        let spec = match kind {
            "filter" => self.filter(tree)?,
            "select" => StepSpec::Select {
                fields: select_fields(tree)?,
            },
            "map" => StepSpec::Map {
                transform: self.compiler.transform(expression(tree)?)?,
            },
            "flat_map" => StepSpec::FlatMap {
                transform: self.compiler.flat_transform(expression(tree)?)?,
            },
            "order_by" => StepSpec::OrderBy {
                fields: order_fields(tree)?,
            },
            "limit" => StepSpec::Limit(count(tree)?),
            "offset" => StepSpec::Offset(count(tree)?),
            "group_by" => self.group_by(tree)?,
            "aggregate" => StepSpec::Aggregate {
                fields: aggregate_fields(tree)?,
            },
            "unique" => StepSpec::Unique {
                key: match tree.children.first() {
                    Some(node) => Some(self.compiler.transform(node)?),
                    None => None,
                },
            },
            "flatten" => StepSpec::Flatten,
            "tap" => StepSpec::Tap {
                function: tree
                    .token("NAME")
                    .map(|t| t.value.trim().to_string())
                    .ok_or_else(|| err(&tree.data, "missing tap function name"))?,
            },
            "python" => {
                let token = tree
                    .first_token()
                    .ok_or_else(|| err(&tree.data, "missing code block"))?;
                StepSpec::Python {
                    code: strip_braces(&token.value).to_string(),
                }
            }
            "render" => render(tree)?,
            "emit" => {
                let key = tree
                    .first_token()
                    .map(|t| unquote(&t.value).trim().to_string())
                    .unwrap_or_else(|| DEFAULT_EMIT_KEY.to_string());
                return Ok(Extracted::Emit(key));
            }
            other => {
                return Err(CadslError::InvalidStep {
                    step: other.to_string(),
                    message: "unknown step type".into(),
                })
            }
        };
        Ok(Extracted::Step(spec))
    }

    fn filter(&self, tree: &Tree) -> Result<StepSpec> {
        let condition = tree
            .children
            .iter()
            .find(|c| c.as_tree().map_or(true, |t| t.data != "when_clause"))
            .ok_or_else(|| err(&tree.data, "missing condition"))?;
        let when = match tree.find("when_clause") {
            Some(clause) => {
                let node = clause
                    .children
                    .first()
                    .ok_or_else(|| err("when_clause", "missing condition"))?;
                Some(self.compiler.guard(node)?)
            }
            None => None,
        };
        Ok(StepSpec::Filter {
            predicate: self.compiler.predicate(condition)?,
            when,
        })
    }

    fn group_by(&self, tree: &Tree) -> Result<StepSpec> {
        let tree = tree.find("group_spec").unwrap_or(tree);
        let mut key = None;
        let mut aggregate = None;
        for child in &tree.children {
            match child {
                Node::Token(t) if t.value.trim() == ALL_GROUP => key = Some(GroupKeySpec::All),
                Node::Token(t) if matches!(t.kind.as_str(), "NAME" | "VAR" | "STRING") => {
                    key = Some(group_field(t));
                }
                Node::Tree(t) if t.data == "group_all" => key = Some(GroupKeySpec::All),
                Node::Tree(t) if t.data == "group_field" => {
                    let token = t
                        .first_token()
                        .ok_or_else(|| err("group_field", "missing field name"))?;
                    key = Some(group_field(token));
                }
                Node::Tree(t) if t.data == "group_lambda" => {
                    let lambda = t
                        .children
                        .first()
                        .ok_or_else(|| err("group_lambda", "missing key expression"))?;
                    key = Some(GroupKeySpec::Key(self.compiler.transform(lambda)?));
                }
                Node::Tree(t) if matches!(t.data.as_str(), "aggregate_spec" | "agg_inline") => {
                    aggregate = Some(GroupAggregate::Inline(aggregate_fields(t)?));
                }
                Node::Tree(t) if matches!(t.data.as_str(), "aggregate_ref" | "agg_func_ref") => {
                    let name = t
                        .token("NAME")
                        .map(|n| n.value.trim().to_string())
                        .ok_or_else(|| err(&t.data, "missing function name"))?;
                    aggregate = Some(GroupAggregate::Named(name));
                }
                other => key = Some(GroupKeySpec::Key(self.compiler.transform(other)?)),
            }
        }
        let key = key.ok_or_else(|| err(&tree.data, "group_by requires a key"))?;
        Ok(StepSpec::GroupBy { key, aggregate })
    }
}

enum Extracted {
    Step(StepSpec),
    Emit(String),
}

fn collect_tool_defs<'a>(tree: &'a Tree, out: &mut Vec<&'a Tree>) {
    if tree.data == "tool_def" {
        out.push(tree);
        return;
    }
    for child in tree.subtrees() {
        collect_tool_defs(child, out);
    }
}

/// Step nodes under a pipeline child, descending through `step` wrappers.
fn step_nodes(tree: &Tree) -> Vec<&Tree> {
    match tree.data.as_str() {
        "step" | "steps" | "step_chain" => tree.subtrees().flat_map(step_nodes).collect(),
        _ => vec![tree],
    }
}

fn tool_kind(tree: &Tree) -> Result<ToolKind> {
    let tag = match (tree.subtrees().next(), tree.first_token()) {
        (Some(inner), _) => inner.data.as_str(),
        (None, Some(token)) => token.value.trim(),
        (None, None) => return Ok(ToolKind::default()),
    };
    let tag = tag
        .strip_suffix("_type")
        .or_else(|| tag.strip_suffix("_tool"))
        .or_else(|| tag.strip_prefix("tool_"))
        .unwrap_or(tag);
    tag.parse()
        .map_err(|_| err("tool_type", format!("unknown tool type '{tag}'")))
}

/// `tool_query`, `tool_detector` and `tool_diagram` written directly under
/// the definition.
fn kind_tag(data: &str) -> Option<ToolKind> {
    match data {
        "tool_query" => Some(ToolKind::Query),
        "tool_detector" => Some(ToolKind::Detector),
        "tool_diagram" => Some(ToolKind::Diagram),
        _ => None,
    }
}

fn group_field(token: &Token) -> GroupKeySpec {
    match clean_key(unquote(&token.value)) {
        ALL_GROUP => GroupKeySpec::All,
        field => GroupKeySpec::Field(field.to_string()),
    }
}

fn metadata(tree: &Tree) -> Result<Map<String, Value>> {
    let mut out = Map::new();
    for item in tree.find_all("meta_item") {
        match item.children.as_slice() {
            [key, value] => {
                let key = token_text(key).ok_or_else(|| err("meta_item", "key must be a name"))?;
                out.insert(key.trim().to_string(), literal(value)?);
            }
            _ => return Err(err("meta_item", "expected key and value")),
        }
    }
    Ok(out)
}

fn param(tree: &Tree) -> Result<ParamSpec> {
    let name = tree
        .token("NAME")
        .map(|t| t.value.trim().to_string())
        .ok_or_else(|| err("param_def", "missing parameter name"))?;
    let mut ty = ParamType::Str;
    let mut modifiers = Vec::new();
    for child in tree.subtrees() {
        match child.data.as_str() {
            "type_spec" => ty = param_type(child)?,
            tag if tag.starts_with("type_") => ty = type_tag(child)?,
            "param_modifiers" => modifiers.extend(child.subtrees()),
            _ => modifiers.push(child),
        }
    }
    // Declared parameters are optional unless a required modifier says so.
    let mut spec = ParamSpec::new(name, ty).optional();
    for modifier in modifiers {
        match modifier.data.as_str() {
            "default_mod" | "param_default" => {
                let value = modifier
                    .children
                    .first()
                    .ok_or_else(|| err(&modifier.data, "missing default value"))?;
                spec.default = Some(literal(value)?);
            }
            "required_mod" | "param_required" => {
                spec.required = match modifier.children.first() {
                    Some(value) => literal(value)?.as_bool().unwrap_or(true),
                    None => true,
                };
            }
            "optional_mod" | "param_optional" => spec.required = false,
            "choices_mod" | "param_choices" => {
                let choices = match modifier.children.as_slice() {
                    [only] => literal(only)?,
                    many => Value::Array(many.iter().map(literal).collect::<Result<Vec<_>>>()?),
                };
                spec.choices = Some(match choices {
                    Value::Array(items) => items,
                    other => vec![other],
                });
            }
            "description_mod" | "param_description" => {
                spec.description = modifier
                    .first_token()
                    .map(|t| unquote(&t.value).to_string())
                    .unwrap_or_default();
            }
            other => return Err(err(other, "unknown parameter modifier")),
        }
    }
    Ok(spec)
}

/// `type_int`, `type_str`, `type_float`, `type_bool`, `type_list` and
/// `type_list_of` wrapping another `type_*` node.
fn type_tag(tree: &Tree) -> Result<ParamType> {
    if tree.data == "type_list_of" {
        return match tree.subtrees().find(|t| t.data.starts_with("type_")) {
            Some(inner) => Ok(ParamType::List(Some(Box::new(type_tag(inner)?)))),
            None => Ok(ParamType::List(None)),
        };
    }
    tree.data
        .strip_prefix("type_")
        .and_then(ParamType::parse)
        .ok_or_else(|| err(&tree.data, "unknown parameter type"))
}

fn param_type(tree: &Tree) -> Result<ParamType> {
    if let Some(list) = tree.find("list_type") {
        return match list.first_token().or_else(|| list.single_token()) {
            Some(inner) => ParamType::parse(&inner.value)
                .map(|t| ParamType::List(Some(Box::new(t))))
                .ok_or_else(|| err("list_type", format!("unknown element type '{}'", inner.value))),
            None => Ok(ParamType::List(None)),
        };
    }
    let name = tree
        .first_token()
        .or_else(|| tree.single_token())
        .ok_or_else(|| err("type_spec", "missing type name"))?;
    ParamType::parse(&name.value)
        .ok_or_else(|| err("type_spec", format!("unknown parameter type '{}'", name.value)))
}

fn rag_source(args: &Tree) -> Result<SourceSpec> {
    let mut query = None;
    let mut top_k = None;
    let mut entity_types = None;
    for child in &args.children {
        match child {
            Node::Token(t) if t.kind == "STRING" => query = Some(unquote(&t.value).to_string()),
            Node::Token(t) if t.kind == "PARAM" => query = Some(format!("{{{}}}", param_name(&t.value))),
            Node::Token(t) if matches!(t.kind.as_str(), "NUMBER" | "INT") => {
                top_k = Some(as_usize(&token_literal(t), "rag_args")?);
            }
            Node::Tree(t) if t.data == "param_ref" => {
                query = literal(child)?.as_str().map(str::to_string);
            }
            Node::Tree(t) if t.data == "string_array" => {
                entity_types = Some(as_strings(&literal(child)?, "rag_args")?);
            }
            Node::Tree(t) if t.data.ends_with("kwarg") => {
                for (key, value) in kwargs(&Tree::new("rag_args", vec![child.clone()]))? {
                    match key.as_str() {
                        "query" => query = value.as_str().map(str::to_string),
                        "top_k" | "k" => top_k = Some(as_usize(&value, "rag_args")?),
                        "entity_types" | "types" => entity_types = Some(as_strings(&value, "rag_args")?),
                        other => return Err(err("rag_args", format!("unknown argument '{other}'"))),
                    }
                }
            }
            Node::Tree(t) => query = Some(query_text(t)?),
            _ => {}
        }
    }
    let query = query.ok_or_else(|| err("rag_source", "missing search query"))?;
    Ok(SourceSpec::Rag {
        query,
        top_k,
        entity_types,
    })
}

/// A search query written as an expression that reduces to a string or a
/// parameter reference.
fn query_text(tree: &Tree) -> Result<String> {
    match value_literal(&Node::Tree(tree.clone()))? {
        Value::String(text) if text != VALUE_PLACEHOLDER => Ok(text),
        _ => Err(err(&tree.data, "search query must be a string or parameter")),
    }
}

/// A value source expression: literals and parameter references pass through,
/// anything computed becomes [`VALUE_PLACEHOLDER`].
fn value_literal(node: &Node) -> Result<Value> {
    match node {
        Node::Token(token) => Ok(token_literal(token)),
        Node::Tree(tree) => match tree.data.as_str() {
            "string_array" | "list" | "array" | "value_list" | "param_ref" | "val_true"
            | "val_false" | "val_null" => literal(node),
            _ => match tree.children.as_slice() {
                [only] => value_literal(only),
                _ => Ok(Value::String(VALUE_PLACEHOLDER.to_string())),
            },
        },
    }
}

fn expression(tree: &Tree) -> Result<&Node> {
    tree.children
        .first()
        .ok_or_else(|| err(&tree.data, "missing expression"))
}

fn select_fields(tree: &Tree) -> Result<Vec<(String, String)>> {
    let mut fields = Vec::new();
    for child in &tree.children {
        match child {
            Node::Token(t) => {
                let source = t.value.trim();
                fields.push((clean_key(source).to_string(), source.to_string()));
            }
            Node::Tree(t) => match t.data.as_str() {
                "field_list" | "fields" => fields.extend(select_fields(t)?),
                "field_simple" | "field" => {
                    let source = t
                        .first_token()
                        .map(|tok| tok.value.trim())
                        .ok_or_else(|| err(&t.data, "missing field name"))?;
                    fields.push((clean_key(source).to_string(), source.to_string()));
                }
                "field_as" | "field_alias" | "field_rename" => {
                    let names: Vec<&str> = t.tokens().map(|tok| tok.value.trim()).collect();
                    let (output, source) = match (t.data.as_str(), names.as_slice()) {
                        ("field_as" | "field_alias", [source, alias]) => (*alias, *source),
                        ("field_rename", [alias, source]) => (*alias, *source),
                        _ => return Err(err(&t.data, "expected two names")),
                    };
                    fields.push((clean_key(output).to_string(), source.to_string()));
                }
                other => return Err(err(other, "unknown field reference")),
            },
        }
    }
    Ok(fields)
}

fn order_fields(tree: &Tree) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    for child in &tree.children {
        match child {
            Node::Token(t) => fields.push(t.value.trim().to_string()),
            Node::Tree(t) if t.data == "order_list" => fields.extend(order_fields(t)?),
            Node::Tree(t) if t.data == "order_field" => {
                let mut tokens = t.tokens();
                let name = tokens
                    .next()
                    .map(|tok| tok.value.trim())
                    .ok_or_else(|| err("order_field", "missing field name"))?;
                let descending = tokens.any(|tok| tok.value.trim().eq_ignore_ascii_case("desc"));
                let name = name.strip_prefix('-').unwrap_or(name);
                fields.push(if descending {
                    format!("-{name}")
                } else {
                    name.to_string()
                });
            }
            Node::Tree(t)
                if matches!(t.data.as_str(), "order_desc" | "order_asc" | "order_asc_default") =>
            {
                let name = t
                    .first_token()
                    .map(|tok| tok.value.trim())
                    .ok_or_else(|| err(&t.data, "missing field name"))?;
                let name = name.strip_prefix('-').unwrap_or(name);
                fields.push(if t.data == "order_desc" {
                    format!("-{name}")
                } else {
                    name.to_string()
                });
            }
            Node::Tree(t) => return Err(err(&t.data, "unknown order field")),
        }
    }
    if fields.is_empty() {
        return Err(err(&tree.data, "order_by requires at least one field"));
    }
    Ok(fields)
}

fn count(tree: &Tree) -> Result<CountSpec> {
    let node = tree
        .children
        .first()
        .ok_or_else(|| err(&tree.data, "missing count"))?;
    match node {
        Node::Token(t) if matches!(t.kind.as_str(), "NUMBER" | "INT") => {
            as_usize(&token_literal(t), &tree.data).map(CountSpec::Literal)
        }
        Node::Token(t) if matches!(t.kind.as_str(), "PARAM" | "NAME") => {
            Ok(CountSpec::Param(param_name(&t.value).to_string()))
        }
        Node::Tree(t) if matches!(t.data.as_str(), "limit_value" | "offset_value") => count(t),
        Node::Tree(t) if t.data == "param_ref" => t
            .first_token()
            .map(|tok| CountSpec::Param(param_name(&tok.value).to_string()))
            .ok_or_else(|| err("param_ref", "missing parameter name")),
        other => Err(err(&tree.data, format!("unexpected '{}'", other.label()))),
    }
}

fn aggregate_fields(tree: &Tree) -> Result<Vec<AggregateField>> {
    let mut fields = Vec::new();
    for item in tree.subtrees() {
        match item.data.as_str() {
            "aggregate_spec" | "agg_inline" | "agg_field_list" => fields.extend(aggregate_fields(item)?),
            _ => fields.push(aggregate_field(item)?),
        }
    }
    Ok(fields)
}

/// `[output, op, field]` as names, or `[output, agg_<op>, field]` with the
/// operation as a subtree. A missing field defaults to the output name.
fn aggregate_field(item: &Tree) -> Result<AggregateField> {
    let mut names = Vec::new();
    let mut op_tag = None;
    for child in &item.children {
        match child {
            Node::Token(t) => names.push(t.value.trim()),
            Node::Tree(t) => op_tag = Some(t.data.strip_prefix("agg_").unwrap_or(&t.data)),
        }
    }
    let (output, op, field) = match (op_tag, names.as_slice()) {
        (Some(op), [output, field]) => (*output, op, *field),
        (Some(op), [output]) => (*output, op, *output),
        (None, [output, op, field]) => (*output, *op, *field),
        (None, [output, op]) => (*output, *op, *output),
        _ => return Err(err(&item.data, "expected output, operation and field")),
    };
    let op: AggOp = op
        .parse()
        .map_err(|e| err(&item.data, format!("{e}")))?;
    Ok(AggregateField::new(output, clean_key(field), op))
}

fn render(tree: &Tree) -> Result<StepSpec> {
    let mut format = None;
    let mut renderer = None;
    render_parts(tree, &mut format, &mut renderer)?;
    Ok(StepSpec::Render {
        format: format.unwrap_or_else(|| FormatSpec::Literal(DEFAULT_RENDER_FORMAT.to_string())),
        renderer,
    })
}

/// Collects the format and renderer, descending through `render_spec`,
/// `render_with_format`, `format_value` and `render_func`.
fn render_parts(
    tree: &Tree,
    format: &mut Option<FormatSpec>,
    renderer: &mut Option<String>,
) -> Result<()> {
    for child in &tree.children {
        match child {
            Node::Token(t) if matches!(t.kind.as_str(), "STRING" | "ESCAPED_STRING") => {
                *format = Some(FormatSpec::Literal(unquote(&t.value).to_string()));
            }
            Node::Token(t) if t.kind == "PARAM" => {
                *format = Some(FormatSpec::Param(param_name(&t.value).to_string()));
            }
            Node::Token(t) if t.kind == "NAME" => *renderer = Some(t.value.trim().to_string()),
            Node::Tree(t) if t.data == "param_ref" => {
                let name = t
                    .first_token()
                    .map(|tok| param_name(&tok.value).to_string())
                    .ok_or_else(|| err("param_ref", "missing parameter name"))?;
                *format = Some(FormatSpec::Param(name));
            }
            Node::Tree(t)
                if matches!(
                    t.data.as_str(),
                    "render_spec" | "render_with_format" | "format_value" | "render_func"
                ) =>
            {
                render_parts(t, format, renderer)?;
            }
            other => return Err(err(&tree.data, format!("unexpected '{}'", other.label()))),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tok(kind: &str, value: &str) -> Node {
        Node::token(kind, value)
    }

    fn tree(data: &str, children: Vec<Node>) -> Node {
        Node::tree(data, children)
    }

    fn tool(children: Vec<Node>) -> Tree {
        Tree::new("tool_def", children)
    }

    fn reql_pipeline(steps: Vec<Node>) -> Node {
        let mut children = vec![tree(
            "source",
            vec![tree("reql_source", vec![tok("REQL_BLOCK", "{ SELECT ?x WHERE { ?x type {Class} } }")])],
        )];
        children.extend(steps);
        tree("pipeline", children)
    }

    fn one(t: Tree) -> ToolSpec {
        Transformer::default().transform_tool(&t).unwrap()
    }

    #[test]
    fn strip_braces_removes_one_layer() {
        assert_eq!(strip_braces("{ {a} }"), "{a}");
        assert_eq!(strip_braces("  x  "), "x");
    }

    #[test]
    fn header_fields() {
        let spec = one(tool(vec![
            tree("tool_type", vec![tree("detector", vec![])]),
            tok("NAME", "god_classes"),
            tree(
                "metadata",
                vec![
                    tree("meta_item", vec![tok("NAME", "category"), tok("STRING", "\"design\"")]),
                    tree(
                        "meta_item",
                        vec![
                            tok("NAME", "requires"),
                            tree("string_array", vec![tok("STRING", "\"rag\""), tok("STRING", "\"reql\"")]),
                        ],
                    ),
                ],
            ),
            tree("docstring", vec![tok("DOCSTRING", "\"\"\"\n  Find large classes.\n\"\"\"")]),
            reql_pipeline(vec![]),
        ]));
        assert_eq!(spec.kind, ToolKind::Detector);
        assert_eq!(spec.name, "god_classes");
        assert_eq!(spec.description, "Find large classes.");
        assert_eq!(spec.meta_str("category"), Some("design"));
        assert_eq!(spec.metadata["requires"], json!(["rag", "reql"]));
        assert_eq!(
            spec.source,
            SourceSpec::Reql {
                query: "SELECT ?x WHERE { ?x type {Class} }".into()
            }
        );
    }

    #[test]
    fn kind_defaults_to_query() {
        let spec = one(tool(vec![tok("NAME", "t"), reql_pipeline(vec![])]));
        assert_eq!(spec.kind, ToolKind::Query);
        assert!(spec.steps.is_empty());
        assert!(spec.emit.is_none());
    }

    #[test]
    fn param_declarations() {
        let spec = one(tool(vec![
            tok("NAME", "t"),
            tree(
                "param_def",
                vec![
                    tok("NAME", "limit"),
                    tree("type_spec", vec![tok("NAME", "int")]),
                    tree("default_mod", vec![tok("NUMBER", "100")]),
                ],
            ),
            tree(
                "param_def",
                vec![
                    tok("NAME", "kinds"),
                    tree("type_spec", vec![tree("list_type", vec![tok("NAME", "str")])]),
                    tree("optional_mod", vec![]),
                ],
            ),
            tree(
                "param_def",
                vec![
                    tok("NAME", "format"),
                    tree("type_spec", vec![tok("NAME", "string")]),
                    tree(
                        "choices_mod",
                        vec![tree("string_array", vec![tok("STRING", "'json'"), tok("STRING", "'text'")])],
                    ),
                    tree("description_mod", vec![tok("STRING", "\"Output format\"")]),
                ],
            ),
            reql_pipeline(vec![]),
        ]));
        assert_eq!(spec.params.len(), 3);
        assert_eq!(spec.params[0].ty, ParamType::Int);
        assert_eq!(spec.params[0].default, Some(json!(100)));
        assert_eq!(spec.params[1].ty, ParamType::List(Some(Box::new(ParamType::Str))));
        assert!(!spec.params[1].required);
        assert_eq!(spec.params[2].choices, Some(vec![json!("json"), json!("text")]));
        assert_eq!(spec.params[2].description, "Output format");
    }

    #[test]
    fn unknown_param_type_is_rejected() {
        let result = Transformer::default().transform_tool(&tool(vec![
            tok("NAME", "t"),
            tree("param_def", vec![tok("NAME", "x"), tree("type_spec", vec![tok("NAME", "tuple")])]),
            reql_pipeline(vec![]),
        ]));
        let e = result.unwrap_err();
        assert_eq!(e.to_string(), "Transform error in 'type_spec': unknown parameter type 'tuple'");
    }

    #[test]
    fn select_shapes_normalize() {
        let spec = one(tool(vec![
            tok("NAME", "t"),
            reql_pipeline(vec![tree(
                "step",
                vec![tree(
                    "select_step",
                    vec![
                        tree("field_simple", vec![tok("VAR", "?name")]),
                        tree("field_as", vec![tok("NAME", "file"), tok("NAME", "path")]),
                        tree("field_rename", vec![tok("NAME", "line"), tok("NAME", "start_line")]),
                    ],
                )],
            )]),
        ]));
        match &spec.steps[0] {
            StepSpec::Select { fields } => assert_eq!(
                fields,
                &vec![
                    ("name".to_string(), "?name".to_string()),
                    ("path".to_string(), "file".to_string()),
                    ("line".to_string(), "start_line".to_string()),
                ]
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn order_limit_offset_and_emit() {
        let spec = one(tool(vec![
            tok("NAME", "t"),
            reql_pipeline(vec![
                tree(
                    "order_by_step",
                    vec![
                        tree("order_field", vec![tok("NAME", "score"), tok("DESC", "desc")]),
                        tree("order_field", vec![tok("NAME", "name")]),
                    ],
                ),
                tree("limit_step", vec![tree("param_ref", vec![tok("NAME", "max_results")])]),
                tree("offset_step", vec![tok("NUMBER", "5")]),
                tree("emit_step", vec![tok("NAME", "items")]),
            ]),
        ]));
        assert_eq!(spec.steps.len(), 3);
        match &spec.steps[0] {
            StepSpec::OrderBy { fields } => assert_eq!(fields, &vec!["-score".to_string(), "name".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&spec.steps[1], StepSpec::Limit(CountSpec::Param(n)) if n == "max_results"));
        assert!(matches!(&spec.steps[2], StepSpec::Offset(CountSpec::Literal(5))));
        assert_eq!(spec.emit.as_deref(), Some("items"));
    }

    #[test]
    fn bare_emit_uses_default_key() {
        let spec = one(tool(vec![
            tok("NAME", "t"),
            reql_pipeline(vec![tree("emit_step", vec![])]),
        ]));
        assert_eq!(spec.emit.as_deref(), Some(DEFAULT_EMIT_KEY));
    }

    #[test]
    fn group_by_variants() {
        let spec = one(tool(vec![
            tok("NAME", "t"),
            reql_pipeline(vec![
                tree(
                    "group_by_step",
                    vec![
                        tok("NAME", "file"),
                        tree(
                            "aggregate_spec",
                            vec![tree("agg_item", vec![tok("NAME", "total"), tok("NAME", "sum"), tok("NAME", "loc")])],
                        ),
                    ],
                ),
                tree("group_by_step", vec![tree("group_all", vec![])]),
                tree(
                    "group_by_step",
                    vec![
                        tree("field_access", vec![tok("NAME", "row"), tok("NAME", "kind")]),
                        tree("aggregate_ref", vec![tok("NAME", "summarize")]),
                    ],
                ),
            ]),
        ]));
        match &spec.steps[0] {
            StepSpec::GroupBy {
                key: GroupKeySpec::Field(f),
                aggregate: Some(GroupAggregate::Inline(fields)),
            } => {
                assert_eq!(f, "file");
                assert_eq!(fields, &vec![AggregateField::new("total", "loc", AggOp::Sum)]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&spec.steps[1], StepSpec::GroupBy { key: GroupKeySpec::All, aggregate: None }));
        assert!(matches!(
            &spec.steps[2],
            StepSpec::GroupBy { key: GroupKeySpec::Key(_), aggregate: Some(GroupAggregate::Named(n)) } if n == "summarize"
        ));
    }

    #[test]
    fn python_render_and_tap() {
        let spec = one(tool(vec![
            tok("NAME", "t"),
            reql_pipeline(vec![
                tree("tap_step", vec![tok("NAME", "graph")]),
                tree("python_step", vec![tok("PYTHON_BLOCK", "{\n  result = len(rows)\n}")]),
                tree("render_step", vec![tok("STRING", "\"json\"")]),
                tree("render_step", vec![tree("param_ref", vec![tok("NAME", "fmt")]), tok("NAME", "mermaid")]),
                tree("render_step", vec![]),
            ]),
        ]));
        assert!(matches!(&spec.steps[0], StepSpec::Tap { function } if function == "graph"));
        assert!(matches!(&spec.steps[1], StepSpec::Python { code } if code == "result = len(rows)"));
        assert!(matches!(
            &spec.steps[2],
            StepSpec::Render { format: FormatSpec::Literal(f), renderer: None } if f == "json"
        ));
        assert!(matches!(
            &spec.steps[3],
            StepSpec::Render { format: FormatSpec::Param(p), renderer: Some(r) } if p == "fmt" && r == "mermaid"
        ));
        assert!(matches!(
            &spec.steps[4],
            StepSpec::Render { format: FormatSpec::Literal(f), renderer: None } if f == DEFAULT_RENDER_FORMAT
        ));
    }

    #[test]
    fn value_and_rag_sources() {
        let spec = one(tool(vec![
            tok("NAME", "t"),
            tree("pipeline", vec![tree("source", vec![tree("value_source", vec![tok("NUMBER", "3")])])]),
        ]));
        assert_eq!(spec.source, SourceSpec::Value { value: json!(3) });

        let spec = one(tool(vec![
            tok("NAME", "t"),
            tree(
                "pipeline",
                vec![tree(
                    "source",
                    vec![tree(
                        "value_source",
                        vec![tree("call", vec![tok("NAME", "f"), tok("NUMBER", "1")])],
                    )],
                )],
            ),
        ]));
        assert_eq!(spec.source, SourceSpec::Value { value: json!(VALUE_PLACEHOLDER) });

        let spec = one(tool(vec![
            tok("NAME", "t"),
            tree(
                "pipeline",
                vec![tree(
                    "source",
                    vec![tree(
                        "rag_source",
                        vec![tree("rag_args", vec![tok("STRING", "\"authentication\""), tok("NUMBER", "20")])],
                    )],
                )],
            ),
        ]));
        assert_eq!(
            spec.source,
            SourceSpec::Rag {
                query: "authentication".into(),
                top_k: Some(20),
                entity_types: None
            }
        );
    }

    #[test]
    fn duplicate_source_kwargs() {
        let spec = one(tool(vec![
            tok("NAME", "dups"),
            tree(
                "pipeline",
                vec![tree(
                    "source",
                    vec![tree(
                        "rag_duplicates_source",
                        vec![
                            tree("rag_kwarg", vec![tok("NAME", "similarity_threshold"), tok("NUMBER", "0.9")]),
                            tree("rag_kwarg", vec![tok("NAME", "exclude_same_file"), tok("NAME", "false")]),
                        ],
                    )],
                )],
            ),
        ]));
        match spec.source {
            SourceSpec::Duplicates { request } => {
                assert_eq!(request.similarity_threshold, 0.9);
                assert!(!request.exclude_same_file);
                assert_eq!(request.max_results, 50);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn steps_of(steps: Vec<Node>) -> Vec<StepSpec> {
        one(tool(vec![tok("NAME", "t"), reql_pipeline(steps)])).steps
    }

    #[test]
    fn tool_body_header() {
        let spec = one(tool(vec![
            tree("tool_detector", vec![]),
            tok("NAME", "missing_docs"),
            tree(
                "metadata",
                vec![
                    tree(
                        "meta_item",
                        vec![tok("NAME", "category"), tree("meta_value", vec![tok("STRING", "\"docs\"")])],
                    ),
                    tree(
                        "meta_item",
                        vec![
                            tok("NAME", "requires"),
                            tree(
                                "meta_value",
                                vec![tree(
                                    "capability_array",
                                    vec![tree("capability_list", vec![tok("STRING", "\"reql\"")])],
                                )],
                            ),
                        ],
                    ),
                ],
            ),
            tree(
                "tool_body",
                vec![
                    tree("docstring", vec![tok("TRIPLE_STRING", "\"\"\"Undocumented classes.\"\"\"")]),
                    tree("param_def", vec![tok("NAME", "limit"), tree("type_int", vec![])]),
                    reql_pipeline(vec![]),
                ],
            ),
        ]));
        assert_eq!(spec.kind, ToolKind::Detector);
        assert_eq!(spec.description, "Undocumented classes.");
        assert_eq!(spec.meta_str("category"), Some("docs"));
        assert_eq!(spec.metadata["requires"], json!(["reql"]));
        assert_eq!(spec.params.len(), 1);
        assert_eq!(spec.params[0].ty, ParamType::Int);
    }

    #[test]
    fn typed_params_with_modifier_block() {
        let spec = one(tool(vec![
            tok("NAME", "t"),
            tree(
                "param_def",
                vec![
                    tok("NAME", "limit"),
                    tree("type_int", vec![]),
                    tree(
                        "param_modifiers",
                        vec![tree("param_default", vec![tree("val_int", vec![tok("INT", "100")])])],
                    ),
                ],
            ),
            tree(
                "param_def",
                vec![
                    tok("NAME", "target"),
                    tree("type_str", vec![]),
                    tree("param_modifiers", vec![tree("param_required", vec![])]),
                ],
            ),
            tree(
                "param_def",
                vec![
                    tok("NAME", "kinds"),
                    tree("type_list_of", vec![tree("type_str", vec![])]),
                    tree(
                        "param_modifiers",
                        vec![tree(
                            "param_choices",
                            vec![tree(
                                "value_list",
                                vec![
                                    tree("val_string", vec![tok("STRING", "\"class\"")]),
                                    tree("val_string", vec![tok("STRING", "\"method\"")]),
                                ],
                            )],
                        )],
                    ),
                ],
            ),
            tree(
                "param_def",
                vec![
                    tok("NAME", "strict"),
                    tree("type_bool", vec![]),
                    tree("param_modifiers", vec![tree("param_default", vec![tree("val_false", vec![])])]),
                ],
            ),
            tree("param_def", vec![tok("NAME", "ratio"), tree("type_float", vec![])]),
            reql_pipeline(vec![]),
        ]));
        let p = &spec.params;
        assert_eq!(p[0].ty, ParamType::Int);
        assert_eq!(p[0].default, Some(json!(100)));
        assert!(!p[0].required);
        assert_eq!(p[1].ty, ParamType::Str);
        assert!(p[1].required);
        assert_eq!(p[2].ty, ParamType::List(Some(Box::new(ParamType::Str))));
        assert_eq!(p[2].choices, Some(vec![json!("class"), json!("method")]));
        assert_eq!(p[3].ty, ParamType::Bool);
        assert_eq!(p[3].default, Some(json!(false)));
        assert_eq!(p[4].ty, ParamType::Float);
    }

    #[test]
    fn unknown_param_modifier_is_rejected() {
        let e = Transformer::default()
            .transform_tool(&tool(vec![
                tok("NAME", "t"),
                tree(
                    "param_def",
                    vec![
                        tok("NAME", "x"),
                        tree("type_int", vec![]),
                        tree("param_modifiers", vec![tree("param_secret", vec![])]),
                    ],
                ),
                reql_pipeline(vec![]),
            ]))
            .unwrap_err();
        assert_eq!(e.to_string(), "Transform error in 'param_secret': unknown parameter modifier");
    }

    #[test]
    fn order_direction_nodes() {
        let steps = steps_of(vec![tree(
            "order_by_step",
            vec![
                tree("order_desc", vec![tok("NAME", "loc")]),
                tree("order_asc", vec![tok("NAME", "file")]),
                tree("order_asc_default", vec![tok("NAME", "name")]),
            ],
        )]);
        match &steps[0] {
            StepSpec::OrderBy { fields } => assert_eq!(
                fields,
                &vec!["-loc".to_string(), "file".to_string(), "name".to_string()]
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn limit_and_offset_value_nodes() {
        let steps = steps_of(vec![
            tree("limit_step", vec![tree("limit_value", vec![tok("INT", "25")])]),
            tree(
                "offset_step",
                vec![tree("offset_value", vec![tree("param_ref", vec![tok("NAME", "skip")])])],
            ),
        ]);
        assert!(matches!(&steps[0], StepSpec::Limit(CountSpec::Literal(25))));
        assert!(matches!(&steps[1], StepSpec::Offset(CountSpec::Param(n)) if n == "skip"));
    }

    #[test]
    fn group_spec_nodes() {
        let agg_inline = tree(
            "agg_inline",
            vec![tree(
                "agg_field_list",
                vec![tree("agg_field", vec![tok("NAME", "total"), tree("agg_sum", vec![]), tok("NAME", "loc")])],
            )],
        );
        let steps = steps_of(vec![
            tree(
                "group_by_step",
                vec![tree("group_spec", vec![tree("group_field", vec![tok("NAME", "file")]), agg_inline])],
            ),
            tree("group_by_step", vec![tree("group_spec", vec![tree("group_all", vec![])])]),
            tree(
                "group_by_step",
                vec![tree(
                    "group_spec",
                    vec![
                        tree(
                            "group_lambda",
                            vec![tree(
                                "lambda_expr",
                                vec![
                                    tok("NAME", "r"),
                                    tree("field_access", vec![tok("NAME", "r"), tok("NAME", "kind")]),
                                ],
                            )],
                        ),
                        tree("agg_func_ref", vec![tok("NAME", "summarize")]),
                    ],
                )],
            ),
        ]);
        match &steps[0] {
            StepSpec::GroupBy {
                key: GroupKeySpec::Field(f),
                aggregate: Some(GroupAggregate::Inline(fields)),
            } => {
                assert_eq!(f, "file");
                assert_eq!(fields, &vec![AggregateField::new("total", "loc", AggOp::Sum)]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(&steps[1], StepSpec::GroupBy { key: GroupKeySpec::All, aggregate: None }));
        match &steps[2] {
            StepSpec::GroupBy {
                key: GroupKeySpec::Key(key),
                aggregate: Some(GroupAggregate::Named(n)),
            } => {
                assert_eq!(n, "summarize");
                let ctx = cadsl_types::Context::detached();
                assert_eq!(key.call(&json!({"kind": "class"}), &ctx).unwrap(), json!("class"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn aggregate_with_operation_subtrees() {
        let steps = steps_of(vec![tree(
            "aggregate_step",
            vec![
                tree("agg_field", vec![tok("NAME", "total"), tree("agg_sum", vec![]), tok("NAME", "loc")]),
                tree("agg_field", vec![tok("NAME", "n"), tree("agg_count", vec![]), tok("NAME", "name")]),
            ],
        )]);
        match &steps[0] {
            StepSpec::Aggregate { fields } => assert_eq!(
                fields,
                &vec![
                    AggregateField::new("total", "loc", AggOp::Sum),
                    AggregateField::new("n", "name", AggOp::Count),
                ]
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn render_spec_nodes() {
        let steps = steps_of(vec![
            tree(
                "render_step",
                vec![tree(
                    "render_spec",
                    vec![tree(
                        "render_with_format",
                        vec![tree("format_value", vec![tok("STRING", "\"mermaid\"")]), tok("NAME", "mermaid")],
                    )],
                )],
            ),
            tree(
                "render_step",
                vec![tree(
                    "render_spec",
                    vec![tree(
                        "render_with_format",
                        vec![tree("format_value", vec![tree("param_ref", vec![tok("NAME", "fmt")])])],
                    )],
                )],
            ),
            tree(
                "render_step",
                vec![tree("render_spec", vec![tree("render_func", vec![tok("NAME", "markdown")])])],
            ),
        ]);
        assert!(matches!(
            &steps[0],
            StepSpec::Render { format: FormatSpec::Literal(f), renderer: Some(r) } if f == "mermaid" && r == "mermaid"
        ));
        assert!(matches!(
            &steps[1],
            StepSpec::Render { format: FormatSpec::Param(p), renderer: None } if p == "fmt"
        ));
        assert!(matches!(
            &steps[2],
            StepSpec::Render { format: FormatSpec::Literal(f), renderer: Some(r) } if f == DEFAULT_RENDER_FORMAT && r == "markdown"
        ));
    }

    #[test]
    fn rag_args_with_expression_query() {
        let rag = |args: Vec<Node>| {
            one(tool(vec![
                tok("NAME", "t"),
                tree(
                    "pipeline",
                    vec![tree("source", vec![tree("rag_source", vec![tree("rag_args", args)])])],
                ),
            ]))
            .source
        };
        assert_eq!(
            rag(vec![tree("expression", vec![tok("STRING", "\"auth\"")]), tok("INT", "20")]),
            SourceSpec::Rag {
                query: "auth".into(),
                top_k: Some(20),
                entity_types: None
            }
        );
        assert_eq!(
            rag(vec![tree("expression", vec![tree("param_ref", vec![tok("NAME", "topic")])])]),
            SourceSpec::Rag {
                query: "{topic}".into(),
                top_k: None,
                entity_types: None
            }
        );
    }

    #[test]
    fn value_source_param_ref_stays_a_reference() {
        let spec = one(tool(vec![
            tok("NAME", "t"),
            tree(
                "pipeline",
                vec![tree(
                    "source",
                    vec![tree("value_source", vec![tree("param_ref", vec![tok("NAME", "items")])])],
                )],
            ),
        ]));
        assert_eq!(spec.source, SourceSpec::Value { value: json!("{items}") });
    }

    #[test]
    fn select_field_alias() {
        let steps = steps_of(vec![tree(
            "select_step",
            vec![tree(
                "field_list",
                vec![tree("field_alias", vec![tok("NAME", "file"), tok("NAME", "path")])],
            )],
        )]);
        match &steps[0] {
            StepSpec::Select { fields } => assert_eq!(fields, &vec![("path".to_string(), "file".to_string())]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_step_is_invalid() {
        let e = Transformer::default()
            .transform_tool(&tool(vec![tok("NAME", "t"), reql_pipeline(vec![tree("explode_step", vec![])])]))
            .unwrap_err();
        assert!(matches!(e, CadslError::InvalidStep { ref step, .. } if step == "explode"));
    }

    #[test]
    fn missing_pipeline_is_an_error() {
        let e = Transformer::default()
            .transform_tool(&tool(vec![tok("NAME", "t")]))
            .unwrap_err();
        assert_eq!(e.to_string(), "Transform error in 't': tool has no pipeline");
    }

    #[test]
    fn transform_collects_every_tool() {
        let root = Tree::new(
            "start",
            vec![
                Node::Tree(tool(vec![tok("NAME", "a"), reql_pipeline(vec![])])),
                Node::Tree(tool(vec![tok("NAME", "b"), reql_pipeline(vec![])])),
            ],
        );
        let specs = Transformer::default().transform(&root).unwrap();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
