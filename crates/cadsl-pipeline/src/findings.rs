//! Sources built on the semantic-search backend's analyses: duplicate
//! candidates and similarity clusters, flattened into finding rows.

use serde_json::{json, Map, Value};

use cadsl_types::{
    ClusterRequest, Context, Data, DuplicateRequest, Origin, PipelineError, StepResult,
};

use crate::source::{Source, NO_SEMANTIC_SEARCH};

fn field<'a>(obj: &'a Value, key: &str) -> &'a Value {
    obj.get(key).unwrap_or(&Value::Null)
}

/// Treat a backend report as failed unless it says `success: true`.
fn check_report(report: &Value, default_error: &str) -> StepResult<()> {
    if report.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(());
    }
    let message = report
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or(default_error);
    Err(PipelineError::new(Origin::Rag, message))
}

fn items<'a>(report: &'a Value, key: &str) -> &'a [Value] {
    report
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

// ---------------------------------------------------------------------------
// DuplicateCandidatesSource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateCandidatesSource {
    request: DuplicateRequest,
}

impl DuplicateCandidatesSource {
    pub fn new(request: DuplicateRequest) -> Self {
        Self { request }
    }

    /// One finding row per similar pair.
    pub fn pair_to_finding(pair: &Value) -> Value {
        let e1 = field(pair, "entity1");
        let e2 = field(pair, "entity2");
        let class_of = |e: &Value| e.get("class_name").cloned().unwrap_or_else(|| json!(""));
        json!({
            "similarity": field(pair, "similarity"),
            "entity1_name": field(e1, "name"),
            "entity1_file": field(e1, "file"),
            "entity1_line": field(e1, "line"),
            "entity1_class": class_of(e1),
            "entity2_name": field(e2, "name"),
            "entity2_file": field(e2, "file"),
            "entity2_line": field(e2, "line"),
            "entity2_class": class_of(e2),
            "entity1": e1,
            "entity2": e2,
        })
    }
}

impl Source for DuplicateCandidatesSource {
    fn name(&self) -> &'static str {
        "rag_duplicates"
    }

    fn execute(&self, ctx: &Context) -> StepResult<Data> {
        let search = ctx
            .semantic_search()
            .ok_or_else(|| PipelineError::new(Origin::Rag, NO_SEMANTIC_SEARCH))?;
        tracing::debug!(
            threshold = self.request.similarity_threshold,
            max_results = self.request.max_results,
            "Finding duplicate candidates"
        );
        let report = search.find_duplicate_candidates(&self.request).map_err(|e| {
            PipelineError::new(Origin::Rag, format!("Duplicate code search failed: {e}"))
                .with_cause(&e)
        })?;
        check_report(&report, "Duplicate detection failed")?;
        let findings = items(&report, "pairs")
            .iter()
            .map(Self::pair_to_finding)
            .collect();
        Ok(Data::Plain(Value::Array(findings)))
    }
}

// ---------------------------------------------------------------------------
// SimilarClustersSource
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimilarClustersSource {
    request: ClusterRequest,
}

impl SimilarClustersSource {
    pub fn new(request: ClusterRequest) -> Self {
        Self { request }
    }

    /// One finding row per cluster. `files` lists distinct member files in
    /// first-seen order.
    pub fn cluster_to_finding(cluster: &Value) -> Value {
        let members = items(cluster, "members");
        let names: Vec<Value> = members.iter().map(|m| field(m, "name").clone()).collect();
        let mut files: Vec<Value> = Vec::new();
        for m in members {
            let f = field(m, "file");
            if !files.contains(f) {
                files.push(f.clone());
            }
        }
        let mut row = Map::new();
        row.insert("cluster_id".into(), field(cluster, "cluster_id").clone());
        row.insert("member_count".into(), field(cluster, "member_count").clone());
        row.insert("unique_files".into(), field(cluster, "unique_files").clone());
        row.insert("members".into(), Value::Array(names));
        row.insert("files".into(), Value::Array(files));
        row.insert(
            "avg_distance".into(),
            cluster.get("avg_distance").cloned().unwrap_or_else(|| json!(0)),
        );
        row.insert("details".into(), Value::Array(members.to_vec()));
        Value::Object(row)
    }
}

impl Source for SimilarClustersSource {
    fn name(&self) -> &'static str {
        "rag_clusters"
    }

    fn execute(&self, ctx: &Context) -> StepResult<Data> {
        let search = ctx
            .semantic_search()
            .ok_or_else(|| PipelineError::new(Origin::Rag, NO_SEMANTIC_SEARCH))?;
        tracing::debug!(
            n_clusters = self.request.n_clusters,
            min_cluster_size = self.request.min_cluster_size,
            "Finding similar clusters"
        );
        let report = search.find_similar_clusters(&self.request).map_err(|e| {
            PipelineError::new(Origin::Rag, format!("Similar clusters search failed: {e}"))
                .with_cause(&e)
        })?;
        check_report(&report, "Clustering failed")?;
        let findings = items(&report, "clusters")
            .iter()
            .map(Self::cluster_to_finding)
            .collect();
        Ok(Data::Plain(Value::Array(findings)))
    }
}
