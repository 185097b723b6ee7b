//! Shared types, errors, context, and data shapes for the CADSL pipeline engine.
//!
//! This crate provides the foundational types used across all other CADSL crates:
//! - `CadslError`: error taxonomy for everything outside a running pipeline
//! - `PipelineError` / `StepResult`: the Ok/Err value threaded through sources and steps
//! - `Context`: execution-scoped parameters plus handles to the external collaborators
//! - `Data`: the pipeline value, either plain or carrying a tap annotation
//! - `RawRow`: the single resolution point for `?`-prefixed query variable keys

pub mod config;
pub mod context;
pub mod data;
pub mod row;
pub mod services;
pub mod value;

pub use config::RuntimeConfig;
pub use context::Context;
pub use data::{Data, TAP_ITEMS_KEY, TAP_RESULT_KEY};
pub use row::{clean_key, CleanRow, RawRow, VAR_PREFIX};
pub use services::{
    ClusterRequest, DuplicateRequest, KnowledgeStore, LanguageSupport, PrefixLanguageSupport,
    SearchRequest, SemanticSearch, Table, UnavailableStore,
};

use serde::{Deserialize, Serialize};

/// Unified error type for CADSL subsystems that are not pipeline values.
#[derive(Debug, thiserror::Error)]
pub enum CadslError {
    // === Tree transformation ===
    #[error("Transform error in '{node}': {message}")]
    Transform { node: String, message: String },

    // === Expression language ===
    #[error("Expression parse error at offset {offset}: {message}")]
    ExprParse { offset: usize, message: String },

    // === Building and dispatch ===
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Unknown {role} function '{name}'")]
    UnknownFunction { role: String, name: String },

    #[error("Invalid step '{step}': {message}")]
    InvalidStep { step: String, message: String },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// A convenience alias for `Result<T, CadslError>`.
pub type Result<T> = std::result::Result<T, CadslError>;

// ---------------------------------------------------------------------------
// Origin: which stage of a pipeline produced an error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Source,
    Reql,
    Rag,
    Param,
    Filter,
    Select,
    Map,
    FlatMap,
    OrderBy,
    Limit,
    Offset,
    GroupBy,
    Aggregate,
    Flatten,
    Unique,
    Tap,
    Render,
    Python,
    Bind,
}

impl Origin {
    /// The diagnostic tag used in error reports (e.g. `"reql"`, `"flat_map"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Source => "source",
            Origin::Reql => "reql",
            Origin::Rag => "rag",
            Origin::Param => "param",
            Origin::Filter => "filter",
            Origin::Select => "select",
            Origin::Map => "map",
            Origin::FlatMap => "flat_map",
            Origin::OrderBy => "order_by",
            Origin::Limit => "limit",
            Origin::Offset => "offset",
            Origin::GroupBy => "group_by",
            Origin::Aggregate => "aggregate",
            Origin::Flatten => "flatten",
            Origin::Unique => "unique",
            Origin::Tap => "tap",
            Origin::Render => "render",
            Origin::Python => "python",
            Origin::Bind => "bind",
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PipelineError / Fault: the Err side of every source and step
// ---------------------------------------------------------------------------

/// The Err shape of a pipeline value: origin tag, message, optional cause.
///
/// `Display` renders only the message, which is what callers see in
/// `{"success": false, "error": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct PipelineError {
    pub origin: Origin,
    pub message: String,
    pub cause: Option<String>,
}

impl PipelineError {
    pub fn new(origin: Origin, message: impl Into<String>) -> Self {
        Self {
            origin,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Wrap a callable fault as `"<prefix>: <fault>"`, keeping the fault as the cause.
    pub fn from_fault(origin: Origin, prefix: &str, fault: Fault) -> Self {
        Self {
            origin,
            message: format!("{prefix}: {fault}"),
            cause: Some(fault.0),
        }
    }
}

/// The result every source and step returns.
pub type StepResult<T> = std::result::Result<T, PipelineError>;

/// A failure raised inside a user-supplied callable or an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Fault(pub String);

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for Fault {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for Fault {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<serde_json::Error> for Fault {
    fn from(err: serde_json::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<CadslError> for Fault {
    fn from(err: CadslError) -> Self {
        Self(err.to_string())
    }
}
