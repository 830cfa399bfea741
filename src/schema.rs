//! Schema Cache
//!
//! Introspects the graph for node types, relationship types, and patterns,
//! and caches the resulting [`SchemaDescriptor`]. The descriptor is
//! immutable once built and replaced wholesale on refresh; readers keep
//! seeing the previous one until a refresh completes. If the graph is
//! unreachable and a cached descriptor exists, the stale copy is served
//! (stale-but-available); with no cache at all the failure is fatal for
//! the question.

use crate::graph::{GraphError, GraphExecutor};
use crate::PipelineError;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

// ============================================================================
// Descriptor types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeType {
    pub label: String,
    /// Property name -> declared type (the JSON type of a sampled value).
    pub properties: BTreeMap<String, String>,
    /// Approximate instance count.
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipType {
    pub rel_type: String,
    pub properties: BTreeMap<String, String>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationshipPattern {
    pub source: String,
    pub rel_type: String,
    pub target: String,
}

/// Immutable snapshot of the graph's shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub node_types: Vec<NodeType>,
    pub relationship_types: Vec<RelationshipType>,
    pub patterns: Vec<RelationshipPattern>,
    pub fetched_at: DateTime<Utc>,
}

impl SchemaDescriptor {
    pub fn has_label(&self, label: &str) -> bool {
        self.node_types.iter().any(|n| n.label == label)
    }

    pub fn has_rel_type(&self, rel_type: &str) -> bool {
        self.relationship_types.iter().any(|r| r.rel_type == rel_type)
    }

    /// Deterministic human-readable rendering for LLM prompts. Node types,
    /// relationship types, and patterns are emitted in sorted order with
    /// approximate counts.
    pub fn format_for_prompt(&self) -> String {
        let mut out = String::from("GRAPH SCHEMA:\n\nNode types:\n");
        for node in &self.node_types {
            out.push_str(&format!(
                "  {} (approx. {} nodes)\n",
                node.label, node.count
            ));
            if !node.properties.is_empty() {
                let props: Vec<String> = node
                    .properties
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect();
                out.push_str(&format!("    properties: {}\n", props.join(", ")));
            }
        }
        out.push_str("\nRelationship types:\n");
        for rel in &self.relationship_types {
            out.push_str(&format!(
                "  {} (approx. {} relationships)\n",
                rel.rel_type, rel.count
            ));
            if !rel.properties.is_empty() {
                let props: Vec<String> = rel
                    .properties
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect();
                out.push_str(&format!("    properties: {}\n", props.join(", ")));
            }
        }
        out.push_str("\nPatterns:\n");
        for p in &self.patterns {
            out.push_str(&format!(
                "  ({})-[:{}]->({})\n",
                p.source, p.rel_type, p.target
            ));
        }
        out
    }
}

/// An example question/query pair shown to the planner as a few-shot hint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryExample {
    pub question: String,
    pub query: String,
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

// ============================================================================
// Cache
// ============================================================================

pub struct SchemaCache {
    graph: Arc<dyn GraphExecutor>,
    slot: RwLock<Option<Arc<SchemaDescriptor>>>,
    /// Serializes refreshes so at most one schema scan is in flight.
    refresh: tokio::sync::Mutex<()>,
    /// Instances sampled per label/type for property discovery.
    sample_limit: usize,
    /// Relationship triples scanned for pattern discovery.
    pattern_sample_limit: usize,
    /// Owner-provided examples; generated from patterns when empty.
    examples: RwLock<Vec<QueryExample>>,
}

impl SchemaCache {
    pub fn new(graph: Arc<dyn GraphExecutor>) -> Self {
        Self {
            graph,
            slot: RwLock::new(None),
            refresh: tokio::sync::Mutex::new(()),
            sample_limit: 25,
            pattern_sample_limit: 1000,
            examples: RwLock::new(Vec::new()),
        }
    }

    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.sample_limit = limit;
        self
    }

    /// Replace the example set used by the planner prompt.
    pub fn set_examples(&self, examples: Vec<QueryExample>) {
        *self.examples.write() = examples;
    }

    /// Get the schema, loading it on first use or when forced.
    pub async fn get_schema(
        &self,
        force_refresh: bool,
    ) -> Result<Arc<SchemaDescriptor>, PipelineError> {
        if !force_refresh {
            if let Some(cached) = self.slot.read().clone() {
                return Ok(cached);
            }
        }

        let _exclusive = self.refresh.lock().await;
        // Another task may have finished the load while we waited.
        if !force_refresh {
            if let Some(cached) = self.slot.read().clone() {
                return Ok(cached);
            }
        }

        match self.load().await {
            Ok(descriptor) => {
                let descriptor = Arc::new(descriptor);
                *self.slot.write() = Some(Arc::clone(&descriptor));
                tracing::info!(
                    node_types = descriptor.node_types.len(),
                    relationship_types = descriptor.relationship_types.len(),
                    patterns = descriptor.patterns.len(),
                    "schema loaded"
                );
                Ok(descriptor)
            }
            Err(e) => {
                if let Some(stale) = self.slot.read().clone() {
                    tracing::warn!(error = %e, fetched_at = %stale.fetched_at,
                        "schema refresh failed, serving cached descriptor");
                    Ok(stale)
                } else {
                    Err(PipelineError::SchemaUnavailable(e.to_string()))
                }
            }
        }
    }

    /// Prompt-ready schema text (loads the schema if needed).
    pub async fn format_for_prompt(&self) -> Result<String, PipelineError> {
        Ok(self.get_schema(false).await?.format_for_prompt())
    }

    /// Example question/query pairs for the planner prompt: owner-provided
    /// ones when set, otherwise generated from relationship patterns.
    pub async fn get_examples(&self) -> Result<Vec<QueryExample>, PipelineError> {
        {
            let stored = self.examples.read();
            if !stored.is_empty() {
                return Ok(stored.clone());
            }
        }
        let schema = self.get_schema(false).await?;
        Ok(generate_pattern_examples(&schema, 5))
    }

    async fn load(&self) -> Result<SchemaDescriptor, GraphError> {
        let labels = self.fetch_string_column("CALL db.labels() YIELD label RETURN label", "label").await?;
        let rel_types = self
            .fetch_string_column(
                "CALL db.relationshipTypes() YIELD relationshipType RETURN relationshipType",
                "relationshipType",
            )
            .await?;

        let mut node_types = Vec::new();
        for label in labels {
            let count = self
                .fetch_count(&format!("MATCH (n:`{}`) RETURN count(n) AS count", label))
                .await;
            let properties = self
                .sample_properties(&format!(
                    "MATCH (n:`{}`) WITH n LIMIT {} UNWIND keys(n) AS key RETURN key, n[key] AS sample",
                    label, self.sample_limit
                ))
                .await;
            node_types.push(NodeType {
                label,
                properties,
                count,
            });
        }
        node_types.sort_by(|a, b| a.label.cmp(&b.label));
        node_types.dedup_by(|a, b| a.label == b.label);

        let mut relationship_types = Vec::new();
        for rel_type in rel_types {
            let count = self
                .fetch_count(&format!(
                    "MATCH ()-[r:`{}`]->() RETURN count(r) AS count",
                    rel_type
                ))
                .await;
            let properties = self
                .sample_properties(&format!(
                    "MATCH ()-[r:`{}`]->() WITH r LIMIT {} UNWIND keys(r) AS key RETURN key, r[key] AS sample",
                    rel_type, self.sample_limit
                ))
                .await;
            relationship_types.push(RelationshipType {
                rel_type,
                properties,
                count,
            });
        }
        relationship_types.sort_by(|a, b| a.rel_type.cmp(&b.rel_type));
        relationship_types.dedup_by(|a, b| a.rel_type == b.rel_type);

        let patterns = self.fetch_patterns().await;

        Ok(SchemaDescriptor {
            node_types,
            relationship_types,
            patterns,
            fetched_at: Utc::now(),
        })
    }

    async fn fetch_string_column(
        &self,
        query: &str,
        column: &str,
    ) -> Result<Vec<String>, GraphError> {
        let rows = self.graph.execute(query, None).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(column).and_then(Value::as_str).map(String::from))
            .collect())
    }

    /// Counts are best-effort annotations; a failed count query degrades to 0.
    async fn fetch_count(&self, query: &str) -> u64 {
        match self.graph.execute(query, None).await {
            Ok(rows) => rows
                .first()
                .and_then(|row| row.get("count"))
                .and_then(Value::as_u64)
                .unwrap_or(0),
            Err(e) => {
                tracing::debug!(error = %e, "count query failed");
                0
            }
        }
    }

    async fn sample_properties(&self, query: &str) -> BTreeMap<String, String> {
        let rows = match self.graph.execute(query, None).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::debug!(error = %e, "property sampling failed");
                return BTreeMap::new();
            }
        };
        let mut properties = BTreeMap::new();
        for row in &rows {
            if let Some(key) = row.get("key").and_then(Value::as_str) {
                let declared = row.get("sample").map(value_type_name).unwrap_or("null");
                // First non-null sample wins for a given key.
                let entry = properties.entry(key.to_string());
                match entry {
                    std::collections::btree_map::Entry::Vacant(v) => {
                        v.insert(declared.to_string());
                    }
                    std::collections::btree_map::Entry::Occupied(mut o) => {
                        if o.get() == "null" && declared != "null" {
                            o.insert(declared.to_string());
                        }
                    }
                }
            }
        }
        properties
    }

    async fn fetch_patterns(&self) -> Vec<RelationshipPattern> {
        let query = format!(
            "MATCH (a)-[r]->(b) WITH a, r, b LIMIT {} \
             RETURN DISTINCT head(labels(a)) AS source, type(r) AS rel_type, head(labels(b)) AS target",
            self.pattern_sample_limit
        );
        let rows = match self.graph.execute(&query, None).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::debug!(error = %e, "pattern sampling failed");
                return Vec::new();
            }
        };
        let mut patterns: BTreeSet<RelationshipPattern> = BTreeSet::new();
        for row in &rows {
            let get = |key: &str| row.get(key).and_then(Value::as_str).map(String::from);
            if let (Some(source), Some(rel_type), Some(target)) =
                (get("source"), get("rel_type"), get("target"))
            {
                patterns.insert(RelationshipPattern {
                    source,
                    rel_type,
                    target,
                });
            }
        }
        patterns.into_iter().collect()
    }
}

// ============================================================================
// Pattern-based example generation
// ============================================================================

/// Derive example question/query pairs from relationship patterns.
///
/// Patterns whose endpoints both hold data come first, so the planner sees
/// examples it can actually adapt.
pub fn generate_pattern_examples(schema: &SchemaDescriptor, limit: usize) -> Vec<QueryExample> {
    let count_of = |label: &str| {
        schema
            .node_types
            .iter()
            .find(|n| n.label == label)
            .map(|n| n.count)
            .unwrap_or(0)
    };

    let mut ranked: Vec<(&RelationshipPattern, u64)> = schema
        .patterns
        .iter()
        .map(|p| (p, count_of(&p.source).min(count_of(&p.target))))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    ranked
        .into_iter()
        .take(limit)
        .map(|(p, _)| QueryExample {
            question: format!(
                "Which {} nodes are connected to the {} named 'Example' through {}?",
                p.target, p.source, p.rel_type
            ),
            query: format!(
                "MATCH (s:{})-[:{}]->(t:{}) WHERE s.name = 'Example' RETURN t",
                p.source, p.rel_type, p.target
            ),
        })
        .collect()
}

/// Render examples the way the planner prompt expects them.
pub fn format_examples(examples: &[QueryExample]) -> String {
    if examples.is_empty() {
        return String::new();
    }
    let mut out = String::from("EXAMPLES:\n");
    for (i, example) in examples.iter().enumerate() {
        out.push_str(&format!(
            "\nExample {}:\nQuestion: {}\n```cypher\n{}\n```\n",
            i + 1,
            example.question,
            example.query
        ));
    }
    out
}
