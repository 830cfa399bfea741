//! Shared test doubles: a scripted in-memory graph and a deterministic
//! embedder.

#![allow(dead_code)]

use async_trait::async_trait;
use graphqa::embedding::Embedder;
use graphqa::graph::{GraphError, GraphExecutor, Row};
use graphqa::EmbeddingUnavailable;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};

/// Scripted graph: rules are matched by substring against the incoming
/// query, first match wins, unmatched queries return no rows. A global
/// outage switch makes every call fail with a connection error.
pub struct FakeGraph {
    rules: Mutex<Vec<(String, Result<Vec<Row>, GraphError>)>>,
    down: AtomicBool,
    executed: Mutex<Vec<String>>,
}

impl FakeGraph {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            down: AtomicBool::new(false),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(&self, needle: &str, rows: Vec<Row>) {
        self.rules.lock().push((needle.to_string(), Ok(rows)));
    }

    pub fn fail_with(&self, needle: &str, error: GraphError) {
        self.rules.lock().push((needle.to_string(), Err(error)));
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl GraphExecutor for FakeGraph {
    async fn execute(&self, query: &str, _params: Option<&Value>) -> Result<Vec<Row>, GraphError> {
        self.executed.lock().push(query.to_string());
        if self.down.load(Ordering::SeqCst) {
            return Err(GraphError::Connection("database unreachable".to_string()));
        }
        for (needle, outcome) in self.rules.lock().iter() {
            if query.contains(needle.as_str()) {
                return outcome.clone();
            }
        }
        Ok(Vec::new())
    }
}

/// Build a row from column/value pairs.
pub fn row(pairs: &[(&str, Value)]) -> Row {
    let mut row = Row::new();
    for (k, v) in pairs {
        row.insert(k.to_string(), v.clone());
    }
    row
}

/// Script a minimal Table/Column schema into the fake graph.
pub fn script_table_schema(graph: &FakeGraph) {
    graph.respond(
        "CALL db.labels()",
        vec![
            row(&[("label", json!("Table"))]),
            row(&[("label", json!("Column"))]),
        ],
    );
    graph.respond(
        "CALL db.relationshipTypes()",
        vec![row(&[("relationshipType", json!("HAS_COLUMN"))])],
    );
    graph.respond(
        "MATCH (n:`Table`) RETURN count(n)",
        vec![row(&[("count", json!(12))])],
    );
    graph.respond(
        "MATCH (n:`Column`) RETURN count(n)",
        vec![row(&[("count", json!(240))])],
    );
    graph.respond(
        "MATCH (n:`Table`) WITH n LIMIT",
        vec![row(&[("key", json!("name")), ("sample", json!("Work Order"))])],
    );
    graph.respond(
        "MATCH (n:`Column`) WITH n LIMIT",
        vec![row(&[("key", json!("name")), ("sample", json!("priority"))])],
    );
    graph.respond(
        "MATCH (a)-[r]->(b)",
        vec![row(&[
            ("source", json!("Table")),
            ("rel_type", json!("HAS_COLUMN")),
            ("target", json!("Column")),
        ])],
    );
}

/// Deterministic toy embedding: counts of character classes, so texts that
/// share composition are similar.
pub struct CountingEmbedder;

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingUnavailable> {
        let mut v = [0.0f32; 4];
        for c in text.chars() {
            if c.is_ascii_lowercase() {
                v[0] += 1.0;
            } else if c.is_ascii_uppercase() {
                v[1] += 1.0;
            } else if c.is_ascii_digit() {
                v[2] += 1.0;
            } else {
                v[3] += 1.0;
            }
        }
        Ok(v.to_vec())
    }

    fn dimension(&self) -> usize {
        4
    }
}

/// Embedder whose backend is permanently down.
pub struct UnavailableEmbedder;

#[async_trait]
impl Embedder for UnavailableEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingUnavailable> {
        Err(EmbeddingUnavailable("backend offline".to_string()))
    }

    fn dimension(&self) -> usize {
        4
    }
}
