//! Runtime configuration: execution defaults loaded from JSON.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Defaults applied when a tool or pipeline leaves a value unspecified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Target language used for concept substitution.
    pub language: String,
    /// Name of the knowledge-store instance queries run against.
    pub instance_name: String,
    /// Default for a `limit` step bound to a parameter that was not supplied.
    pub default_limit: usize,
    pub default_offset: usize,
    /// Default `top_k` for semantic search sources.
    pub default_top_k: usize,
    pub default_render_format: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            language: "oo".into(),
            instance_name: "default".into(),
            default_limit: 100,
            default_offset: 0,
            default_top_k: 10,
            default_render_format: "text".into(),
        }
    }
}

impl RuntimeConfig {
    /// Load a configuration file. Keys that are absent keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        tracing::debug!(path = %path.display(), language = %config.language, "Loaded runtime config");
        Ok(config)
    }
}
