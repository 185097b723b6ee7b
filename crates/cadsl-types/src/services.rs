//! Collaborator contracts: the knowledge store, semantic search, and
//! per-language concept resolution.
//!
//! The engine never talks to a concrete backend. Everything it needs from
//! outside arrives through these traits on the [`Context`](crate::Context).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Fault;

// ---------------------------------------------------------------------------
// Table: tabular query result
// ---------------------------------------------------------------------------

/// A columnar query result as returned by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a table from mapping rows. Columns are collected in first-seen
    /// order and missing cells become null.
    pub fn from_rows(rows: Vec<Map<String, Value>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.clone());
                }
            }
        }
        let rows = rows
            .into_iter()
            .map(|mut row| {
                columns
                    .iter()
                    .map(|c| row.remove(c).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// The rows as mappings keyed by column name.
    pub fn into_rows(self) -> Vec<Value> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|cells| {
                let map: Map<String, Value> = columns.iter().cloned().zip(cells).collect();
                Value::Object(map)
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// KnowledgeStore
// ---------------------------------------------------------------------------

/// Executes structured queries against the code knowledge store.
pub trait KnowledgeStore: Send + Sync {
    fn execute_query(&self, query: &str) -> Result<Table, Fault>;
}

/// Store used when none is attached. Every query fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableStore;

impl KnowledgeStore for UnavailableStore {
    fn execute_query(&self, _query: &str) -> Result<Table, Fault> {
        Err(Fault::new("knowledge store not attached"))
    }
}

// ---------------------------------------------------------------------------
// SemanticSearch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    pub entity_types: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateRequest {
    pub similarity_threshold: f64,
    pub max_results: usize,
    pub exclude_same_file: bool,
    pub exclude_same_class: bool,
    pub entity_types: Vec<String>,
}

impl Default for DuplicateRequest {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            max_results: 50,
            exclude_same_file: true,
            exclude_same_class: true,
            entity_types: vec!["method".into(), "function".into()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterRequest {
    pub n_clusters: usize,
    pub min_cluster_size: usize,
    pub exclude_same_file: bool,
    pub exclude_same_class: bool,
    pub entity_types: Vec<String>,
}

impl Default for ClusterRequest {
    fn default() -> Self {
        Self {
            n_clusters: 50,
            min_cluster_size: 2,
            exclude_same_file: true,
            exclude_same_class: true,
            entity_types: vec!["method".into(), "function".into()],
        }
    }
}

/// Optional semantic-search backend over code entities.
///
/// The duplicate and cluster analyses return a backend-shaped JSON object
/// (`{"pairs": [...]}` / `{"clusters": [...]}` on success, or a `success: false`
/// report). Backends that do not offer them keep the default implementations.
pub trait SemanticSearch: Send + Sync {
    fn search(&self, request: &SearchRequest) -> Result<Vec<Value>, Fault>;

    fn find_duplicate_candidates(&self, _request: &DuplicateRequest) -> Result<Value, Fault> {
        Err(Fault::new("duplicate detection not supported by this backend"))
    }

    fn find_similar_clusters(&self, _request: &ClusterRequest) -> Result<Value, Fault> {
        Err(Fault::new("clustering not supported by this backend"))
    }
}

// ---------------------------------------------------------------------------
// LanguageSupport
// ---------------------------------------------------------------------------

/// Maps an abstract concept (`Class`, `Method`) to the language-specific type
/// name used in stored facts.
pub trait LanguageSupport: Send + Sync {
    fn concept(&self, concept: &str, language: &str) -> Result<String, Fault>;
}

/// Resolves concepts as `<prefix>:<Concept>` using a fixed language table.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrefixLanguageSupport;

impl PrefixLanguageSupport {
    pub fn prefix(language: &str) -> Option<&'static str> {
        match language.to_ascii_lowercase().as_str() {
            "oo" => Some("oo"),
            "python" | "py" => Some("py"),
            "javascript" | "js" | "typescript" | "ts" => Some("js"),
            "html" => Some("html"),
            "csharp" | "cs" | "c#" => Some("cs"),
            "cpp" | "c++" => Some("cpp"),
            "java" => Some("java"),
            "go" => Some("go"),
            "rust" | "rs" => Some("rs"),
            _ => None,
        }
    }
}

impl LanguageSupport for PrefixLanguageSupport {
    fn concept(&self, concept: &str, language: &str) -> Result<String, Fault> {
        let prefix = Self::prefix(language)
            .ok_or_else(|| Fault::new(format!("Unsupported language: {language}")))?;
        Ok(format!("{prefix}:{concept}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn table_from_rows_collects_columns_in_order() {
        let rows = vec![
            json!({"name": "a", "file": "x.py"}).as_object().unwrap().clone(),
            json!({"name": "b", "line": 3}).as_object().unwrap().clone(),
        ];
        let table = Table::from_rows(rows);
        assert_eq!(table.columns(), &["name", "file", "line"]);
        assert_eq!(table.row_count(), 2);
        let out = table.into_rows();
        assert_eq!(out[1], json!({"name": "b", "file": null, "line": 3}));
    }

    #[test]
    fn table_new_into_rows() {
        let table = Table::new(
            vec!["?x".into()],
            vec![vec![json!(1)], vec![json!(2)]],
        );
        assert_eq!(table.into_rows(), vec![json!({"?x": 1}), json!({"?x": 2})]);
    }

    #[test]
    fn unavailable_store_fails() {
        let err = UnavailableStore.execute_query("SELECT ?x").unwrap_err();
        assert_eq!(err.0, "knowledge store not attached");
    }

    #[test]
    fn prefix_language_support_maps_concepts() {
        let ls = PrefixLanguageSupport;
        assert_eq!(ls.concept("Class", "python").unwrap(), "py:Class");
        assert_eq!(ls.concept("Method", "oo").unwrap(), "oo:Method");
        assert_eq!(ls.concept("Function", "JavaScript").unwrap(), "js:Function");
    }

    #[test]
    fn prefix_language_support_rejects_unknown_language() {
        let err = PrefixLanguageSupport.concept("Class", "cobol").unwrap_err();
        assert_eq!(err.0, "Unsupported language: cobol");
    }

    struct SearchOnly;

    impl SemanticSearch for SearchOnly {
        fn search(&self, _request: &SearchRequest) -> Result<Vec<Value>, Fault> {
            Ok(vec![])
        }
    }

    #[test]
    fn semantic_search_default_analyses_fail() {
        let s = SearchOnly;
        assert!(s
            .find_duplicate_candidates(&DuplicateRequest::default())
            .is_err());
        assert!(s.find_similar_clusters(&ClusterRequest::default()).is_err());
    }

    #[test]
    fn request_defaults() {
        let d = DuplicateRequest::default();
        assert_eq!(d.similarity_threshold, 0.85);
        assert_eq!(d.max_results, 50);
        assert_eq!(d.entity_types, vec!["method", "function"]);
        let c = ClusterRequest::default();
        assert_eq!(c.n_clusters, 50);
        assert_eq!(c.min_cluster_size, 2);
    }
}
