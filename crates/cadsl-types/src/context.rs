//! Execution context threaded through every source and step.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::RuntimeConfig;
use crate::services::{
    KnowledgeStore, LanguageSupport, PrefixLanguageSupport, SemanticSearch, UnavailableStore,
};

/// Parameters and collaborators for one pipeline execution.
///
/// Cloning is cheap: collaborators are shared behind `Arc`. A context is never
/// mutated during execution; [`Context::with_params`] derives a new one.
#[derive(Clone)]
pub struct Context {
    store: Arc<dyn KnowledgeStore>,
    semantic: Option<Arc<dyn SemanticSearch>>,
    languages: Arc<dyn LanguageSupport>,
    params: HashMap<String, Value>,
    language: String,
    instance_name: String,
}

impl Context {
    pub fn new(store: Arc<dyn KnowledgeStore>) -> Self {
        Self::from_config(store, &RuntimeConfig::default())
    }

    /// A context with no store attached, for pipelines over literal values.
    pub fn detached() -> Self {
        Self::new(Arc::new(UnavailableStore))
    }

    pub fn from_config(store: Arc<dyn KnowledgeStore>, config: &RuntimeConfig) -> Self {
        Self {
            store,
            semantic: None,
            languages: Arc::new(PrefixLanguageSupport),
            params: HashMap::new(),
            language: config.language.clone(),
            instance_name: config.instance_name.clone(),
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = name.into();
        self
    }

    pub fn with_semantic_search(mut self, search: Arc<dyn SemanticSearch>) -> Self {
        self.semantic = Some(search);
        self
    }

    pub fn with_language_support(mut self, languages: Arc<dyn LanguageSupport>) -> Self {
        self.languages = languages;
        self
    }

    /// Derive a context whose parameters are this one's overlaid with `params`.
    pub fn with_params<I, K>(&self, params: I) -> Context
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut next = self.clone();
        for (k, v) in params {
            next.params.insert(k.into(), v);
        }
        next
    }

    pub fn with_param(&self, name: impl Into<String>, value: Value) -> Context {
        self.with_params([(name.into(), value)])
    }

    pub fn get_param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn params(&self) -> &HashMap<String, Value> {
        &self.params
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn store(&self) -> &dyn KnowledgeStore {
        self.store.as_ref()
    }

    pub fn semantic_search(&self) -> Option<&dyn SemanticSearch> {
        self.semantic.as_deref()
    }

    pub fn languages(&self) -> &dyn LanguageSupport {
        self.languages.as_ref()
    }

    /// The context as seen by inline expressions and scripts.
    pub fn to_json(&self) -> Value {
        let params: Map<String, Value> = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mut map = Map::new();
        map.insert("params".into(), Value::Object(params));
        map.insert("language".into(), Value::String(self.language.clone()));
        map.insert(
            "instance_name".into(),
            Value::String(self.instance_name.clone()),
        );
        Value::Object(map)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("language", &self.language)
            .field("instance_name", &self.instance_name)
            .field("params", &self.params)
            .field("semantic_search", &self.semantic.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_context_uses_config_defaults() {
        let ctx = Context::detached();
        assert_eq!(ctx.language(), "oo");
        assert_eq!(ctx.instance_name(), "default");
        assert!(ctx.params().is_empty());
        assert!(ctx.semantic_search().is_none());
    }

    #[test]
    fn with_params_leaves_base_untouched() {
        let base = Context::detached().with_param("limit", json!(5));
        let derived = base.with_params([("limit", json!(9)), ("name", json!("x"))]);
        assert_eq!(base.get_param("limit"), Some(&json!(5)));
        assert_eq!(base.get_param("name"), None);
        assert_eq!(derived.get_param("limit"), Some(&json!(9)));
        assert_eq!(derived.get_param("name"), Some(&json!("x")));
    }

    #[test]
    fn builder_methods() {
        let ctx = Context::detached()
            .with_language("python")
            .with_instance_name("proj");
        assert_eq!(ctx.language(), "python");
        assert_eq!(ctx.instance_name(), "proj");
    }

    #[test]
    fn from_config_copies_language() {
        let config = RuntimeConfig {
            language: "cpp".into(),
            ..RuntimeConfig::default()
        };
        let ctx = Context::from_config(Arc::new(UnavailableStore), &config);
        assert_eq!(ctx.language(), "cpp");
    }

    #[test]
    fn to_json_exposes_params_and_language() {
        let ctx = Context::detached().with_param("k", json!(1));
        assert_eq!(
            ctx.to_json(),
            json!({"params": {"k": 1}, "language": "oo", "instance_name": "default"})
        );
    }

    #[test]
    fn concept_resolution_goes_through_language_support() {
        let ctx = Context::detached().with_language("python");
        assert_eq!(
            ctx.languages().concept("Class", ctx.language()).unwrap(),
            "py:Class"
        );
    }
}
