//! Hybrid Retriever
//!
//! Executes a query plan against the graph and, in the same pass, runs a
//! vector similarity search over the embedding store. Both channels end up
//! in one deduplicated evidence set so the reasoner sees a single ranked
//! view of everything retrieval found.
//!
//! Failure handling is asymmetric by design: individual plan steps may fail
//! without sinking the retrieval, and an unavailable embedder degrades to
//! structured-only results. Retrieval as a whole fails only when every step
//! fails and at least one failure looks like a lost connection.

use crate::embedding::{CachedEmbedder, EmbeddingStore, SemanticHit};
use crate::graph::{row_identity, GraphExecutor, Row};
use crate::planner::QueryPlan;
use crate::PipelineError;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

// ============================================================================
// Evidence
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceOrigin {
    Structured,
    Semantic,
}

#[derive(Debug, Clone)]
pub struct EvidenceItem {
    /// Stable identity used for deduplication and citation.
    pub identity: String,
    pub origin: EvidenceOrigin,
    pub payload: BTreeMap<String, Value>,
    pub score: f64,
}

impl EvidenceItem {
    /// Merge another sighting of the same identity: keep the higher score
    /// and the union of payload fields, first writer wins on conflicts.
    pub fn merge(&mut self, other: EvidenceItem) {
        if other.score > self.score {
            self.score = other.score;
            self.origin = other.origin;
        }
        for (k, v) in other.payload {
            self.payload.entry(k).or_insert(v);
        }
    }
}

/// Deduplicated, score-ordered evidence plus the per-step errors that were
/// absorbed while collecting it.
#[derive(Debug, Clone, Default)]
pub struct EvidenceSet {
    pub items: Vec<EvidenceItem>,
    pub step_errors: Vec<String>,
}

impl EvidenceSet {
    pub fn from_items(items: Vec<EvidenceItem>, step_errors: Vec<String>) -> Self {
        let mut merged: BTreeMap<String, EvidenceItem> = BTreeMap::new();
        for item in items {
            match merged.entry(item.identity.clone()) {
                std::collections::btree_map::Entry::Occupied(mut e) => e.get_mut().merge(item),
                std::collections::btree_map::Entry::Vacant(e) => {
                    e.insert(item);
                }
            }
        }
        let mut items: Vec<EvidenceItem> = merged.into_values().collect();
        // Score descending, identity ascending as the tie-break, so ordering
        // is total and repeatable.
        items.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        Self { items, step_errors }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

// ============================================================================
// Retrieval
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub enable_semantic: bool,
    pub similarity_threshold: f64,
    pub result_limit: usize,
    /// Score assigned to every structured row. Kept above the cosine range
    /// so schema-grounded matches always outrank similarity guesses.
    pub structured_score: f64,
    pub expand_neighbors: bool,
    /// Multiplier applied to a hit's score for its expanded neighbors.
    pub neighbor_discount: f64,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            enable_semantic: true,
            similarity_threshold: 0.7,
            result_limit: 10,
            structured_score: 2.0,
            expand_neighbors: false,
            neighbor_discount: 0.5,
        }
    }
}

pub struct HybridRetriever {
    graph: Arc<dyn GraphExecutor>,
    embedder: Arc<CachedEmbedder>,
    store: Arc<EmbeddingStore>,
    options: RetrievalOptions,
}

impl HybridRetriever {
    pub fn new(
        graph: Arc<dyn GraphExecutor>,
        embedder: Arc<CachedEmbedder>,
        store: Arc<EmbeddingStore>,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            graph,
            embedder,
            store,
            options,
        }
    }

    /// Run every plan step and the semantic channel, returning one merged
    /// evidence set.
    pub async fn retrieve(
        &self,
        plan: &QueryPlan,
        question: &str,
    ) -> Result<EvidenceSet, PipelineError> {
        let mut items = Vec::new();
        let mut step_errors = Vec::new();
        let mut connection_failures = 0usize;

        for (idx, step) in plan.steps.iter().enumerate() {
            match self
                .graph
                .execute(&step.query, step.parameters.as_ref())
                .await
            {
                Ok(rows) => {
                    tracing::debug!(step = idx + 1, rows = rows.len(), "plan step executed");
                    for row in rows {
                        items.push(self.structured_item(idx, &row));
                    }
                }
                Err(err) => {
                    tracing::warn!(step = idx + 1, error = %err, "plan step failed, continuing");
                    if err.is_connection() {
                        connection_failures += 1;
                    }
                    step_errors.push(format!("step {}: {}", idx + 1, err));
                }
            }
        }

        if !plan.steps.is_empty() && step_errors.len() == plan.steps.len() && connection_failures > 0
        {
            return Err(PipelineError::RetrievalFailed(format!(
                "all {} plan steps failed, at least one with a connection error",
                plan.steps.len()
            )));
        }

        if self.options.enable_semantic {
            match self.semantic_items(question).await {
                Ok(mut semantic) => items.append(&mut semantic),
                Err(reason) => {
                    tracing::warn!(%reason, "semantic channel unavailable, structured-only");
                }
            }
        }

        Ok(EvidenceSet::from_items(items, step_errors))
    }

    fn structured_item(&self, step_idx: usize, row: &Row) -> EvidenceItem {
        let identity = match row_identity(row) {
            Some(id) => format!("s{}:{}", step_idx, id),
            None => {
                let mut hasher = Sha256::new();
                hasher.update(
                    serde_json::to_string(row).unwrap_or_default().as_bytes(),
                );
                format!("s{}:{:x}", step_idx, hasher.finalize())
            }
        };
        EvidenceItem {
            identity,
            origin: EvidenceOrigin::Structured,
            payload: row.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            score: self.options.structured_score,
        }
    }

    async fn semantic_items(&self, question: &str) -> Result<Vec<EvidenceItem>, String> {
        let query_vec = self
            .embedder
            .embed(question)
            .await
            .map_err(|e| e.to_string())?;
        let hits = self.store.search(
            &query_vec,
            self.options.similarity_threshold as f32,
            self.options.result_limit,
        );
        let mut items: Vec<EvidenceItem> = hits.iter().map(semantic_item).collect();

        if self.options.expand_neighbors {
            for hit in &hits {
                match self.expand_neighbors(hit).await {
                    Ok(mut neighbors) => items.append(&mut neighbors),
                    Err(err) => {
                        tracing::debug!(entity = %hit.entity.id, error = %err, "neighbor expansion failed");
                    }
                }
            }
        }
        Ok(items)
    }

    /// One-hop expansion around a semantic hit. Neighbors inherit the hit's
    /// score at a discount so they rank below the match itself.
    async fn expand_neighbors(&self, hit: &SemanticHit) -> Result<Vec<EvidenceItem>, String> {
        // Stored entity ids are stringified node ids, so the comparison has
        // to stringify too; `id(n) = $id` with a string never matches.
        let query = "MATCH (n)-[r]-(m) WHERE toString(id(n)) = $id \
                     RETURN id(m) AS id, type(r) AS rel, m.name AS name LIMIT 10";
        let params = serde_json::json!({ "id": hit.entity.id });
        let rows = self
            .graph
            .execute(query, Some(&params))
            .await
            .map_err(|e| e.to_string())?;
        let score = hit.score as f64 * self.options.neighbor_discount;
        Ok(rows
            .iter()
            .map(|row| EvidenceItem {
                identity: match row_identity(row) {
                    Some(id) => format!("sem:{}", id),
                    None => format!("sem:neighbor-of:{}", hit.entity.id),
                },
                origin: EvidenceOrigin::Semantic,
                payload: row.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                score,
            })
            .collect())
    }
}

fn semantic_item(hit: &SemanticHit) -> EvidenceItem {
    let mut payload = BTreeMap::new();
    payload.insert(
        "name".to_string(),
        Value::String(hit.entity.display.clone()),
    );
    payload.insert(
        "labels".to_string(),
        Value::Array(
            hit.entity
                .labels
                .iter()
                .map(|l| Value::String(l.clone()))
                .collect(),
        ),
    );
    EvidenceItem {
        identity: format!("sem:{}", hit.entity.id),
        origin: EvidenceOrigin::Semantic,
        payload,
        score: hit.score as f64,
    }
}
