//! Embeddings: provider, cache, tiered store, background fill
//!
//! The request path never computes entity embeddings synchronously. It only
//! embeds the question text (through a bounded, duplicate-suppressing cache)
//! and scans the in-process [`EmbeddingStore`], which a background indexer
//! fills tier by tier. Store coverage grows monotonically; an entity without
//! an embedding is simply absent from semantic results.

use crate::graph::GraphExecutor;
use crate::schema::{NodeType, SchemaDescriptor};
use crate::EmbeddingUnavailable;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

// ============================================================================
// Provider interface
// ============================================================================

/// Converts text to a fixed-length vector. Deterministic for a given model
/// version.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingUnavailable>;
    fn dimension(&self) -> usize;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

// ============================================================================
// Caching wrapper
// ============================================================================

struct LruState {
    map: HashMap<String, Vec<f32>>,
    order: VecDeque<String>,
}

impl LruState {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
            self.order.push_back(key.to_string());
        }
    }
}

/// Bounded LRU cache over an [`Embedder`], with at-most-one computation per
/// uncached key in flight at a time.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    capacity: usize,
    cache: parking_lot::Mutex<LruState>,
    /// Per-key locks for duplicate suppression. Entries are removed once
    /// the computation lands in the cache.
    inflight: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            cache: parking_lot::Mutex::new(LruState {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            inflight: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingUnavailable> {
        if let Some(hit) = self.lookup(text) {
            return Ok(hit);
        }

        let key_lock = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(
                inflight
                    .entry(text.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        let _computing = key_lock.lock().await;

        // A concurrent caller may have finished while we waited on the key.
        if let Some(hit) = self.lookup(text) {
            return Ok(hit);
        }

        let result = self.inner.embed(text).await;
        if let Ok(vector) = &result {
            self.insert(text, vector.clone());
        }
        self.inflight.lock().await.remove(text);
        result
    }

    fn lookup(&self, text: &str) -> Option<Vec<f32>> {
        let mut cache = self.cache.lock();
        let hit = cache.map.get(text).cloned();
        if hit.is_some() {
            cache.touch(text);
        }
        hit
    }

    fn insert(&self, text: &str, vector: Vec<f32>) {
        let mut cache = self.cache.lock();
        if cache.map.insert(text.to_string(), vector).is_none() {
            cache.order.push_back(text.to_string());
        }
        while cache.map.len() > self.capacity {
            if let Some(evicted) = cache.order.pop_front() {
                cache.map.remove(&evicted);
            } else {
                break;
            }
        }
    }

    #[cfg(test)]
    fn cached_len(&self) -> usize {
        self.cache.lock().map.len()
    }
}

// ============================================================================
// Tiered entity store
// ============================================================================

/// Embedding priority for an entity type. Primary types are guaranteed to
/// be embedded before the pipeline serves semantic results; the rest fill
/// in opportunistically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    Primary,
    Secondary,
    Tertiary,
}

#[derive(Debug, Clone)]
pub struct StoredEntity {
    pub id: String,
    pub labels: Vec<String>,
    /// The text that was embedded (display name or description).
    pub display: String,
    pub tier: Tier,
    pub vector: Vec<f32>,
}

/// A cosine match from the store.
#[derive(Debug, Clone)]
pub struct SemanticHit {
    pub entity: StoredEntity,
    pub score: f32,
}

/// Append-only concurrent store of precomputed entity embeddings.
/// Existing entries are never replaced or invalidated.
#[derive(Default)]
pub struct EmbeddingStore {
    entries: DashMap<String, StoredEntity>,
}

impl EmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entity embedding. Returns false (and keeps the existing
    /// entry) if the id is already present.
    pub fn insert(&self, entity: StoredEntity) -> bool {
        match self.entries.entry(entity.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                v.insert(entity);
                true
            }
        }
    }

    pub fn has_embedding(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Linear cosine scan: matches at or above `threshold`, best first,
    /// capped at `limit`. Equal scores order by id for determinism.
    pub fn search(&self, query: &[f32], threshold: f32, limit: usize) -> Vec<SemanticHit> {
        let mut hits: Vec<SemanticHit> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let score = cosine_similarity(query, &entry.vector);
                (score >= threshold).then(|| SemanticHit {
                    entity: entry.value().clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entity.id.cmp(&b.entity.id))
        });
        hits.truncate(limit);
        hits
    }
}

// ============================================================================
// Tier classification
// ============================================================================

const PRIMARY_TERMS: &[&str] = &["table", "entity", "concept", "category", "product", "asset"];
const SECONDARY_TERMS: &[&str] = &["property", "attribute", "type", "class", "department", "rule"];

/// Classifies node labels into embedding tiers from name keywords, instance
/// counts, and how often the label participates in relationship patterns.
#[derive(Default)]
pub struct TierClassifier {
    custom: HashMap<String, Tier>,
}

impl TierClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin specific labels to a tier, overriding the heuristics.
    pub fn with_mapping(mut self, label: &str, tier: Tier) -> Self {
        self.custom.insert(label.to_string(), tier);
        self
    }

    pub fn classify(&self, node: &NodeType, schema: &SchemaDescriptor) -> Tier {
        if let Some(tier) = self.custom.get(&node.label) {
            return *tier;
        }
        let lower = node.label.to_lowercase();
        if PRIMARY_TERMS.iter().any(|t| lower.contains(t)) || node.count > 1000 {
            return Tier::Primary;
        }
        let pattern_degree = schema
            .patterns
            .iter()
            .filter(|p| p.source == node.label || p.target == node.label)
            .count();
        if SECONDARY_TERMS.iter().any(|t| lower.contains(t))
            || pattern_degree > 5
            || node.count > 500
        {
            return Tier::Secondary;
        }
        Tier::Tertiary
    }

    /// All labels in the schema belonging to `tier`.
    pub fn labels_for(&self, schema: &SchemaDescriptor, tier: Tier) -> Vec<String> {
        schema
            .node_types
            .iter()
            .filter(|n| self.classify(n, schema) == tier)
            .map(|n| n.label.clone())
            .collect()
    }
}

// ============================================================================
// Background fill
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub processed: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Walks entity labels tier by tier, embeds display text, and appends to
/// the store. Runs off the request path; semantic retrieval only consults
/// what has landed so far.
pub struct BackgroundIndexer {
    graph: Arc<dyn GraphExecutor>,
    embedder: Arc<CachedEmbedder>,
    store: Arc<EmbeddingStore>,
    classifier: TierClassifier,
    per_label_limit: usize,
}

impl BackgroundIndexer {
    pub fn new(
        graph: Arc<dyn GraphExecutor>,
        embedder: Arc<CachedEmbedder>,
        store: Arc<EmbeddingStore>,
        classifier: TierClassifier,
    ) -> Self {
        Self {
            graph,
            embedder,
            store,
            classifier,
            per_label_limit: 1000,
        }
    }

    pub fn with_per_label_limit(mut self, limit: usize) -> Self {
        self.per_label_limit = limit;
        self
    }

    /// Embed every not-yet-covered entity of one tier.
    pub async fn fill_tier(
        &self,
        schema: &SchemaDescriptor,
        tier: Tier,
    ) -> anyhow::Result<IndexStats> {
        let mut stats = IndexStats::default();
        for label in self.classifier.labels_for(schema, tier) {
            let query = format!(
                "MATCH (n:`{}`) WHERE n.name IS NOT NULL \
                 RETURN id(n) AS id, n.name AS text, labels(n) AS labels LIMIT {}",
                label, self.per_label_limit
            );
            let rows = match self.graph.execute(&query, None).await {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(label = %label, error = %e, "entity fetch failed, skipping label");
                    continue;
                }
            };

            for row in &rows {
                stats.processed += 1;
                let id = match crate::graph::row_identity(row) {
                    Some(id) => id,
                    None => {
                        stats.failed += 1;
                        continue;
                    }
                };
                if self.store.has_embedding(&id) {
                    stats.skipped += 1;
                    continue;
                }
                let text = row
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if text.is_empty() {
                    stats.skipped += 1;
                    continue;
                }
                match self.embedder.embed(&text).await {
                    Ok(vector) => {
                        let labels = row
                            .get("labels")
                            .and_then(Value::as_array)
                            .map(|arr| {
                                arr.iter()
                                    .filter_map(|v| v.as_str().map(String::from))
                                    .collect()
                            })
                            .unwrap_or_else(|| vec![label.clone()]);
                        self.store.insert(StoredEntity {
                            id,
                            labels,
                            display: text,
                            tier,
                            vector,
                        });
                        stats.indexed += 1;
                    }
                    Err(e) => {
                        // The backend is down; retrying per-row would hammer it.
                        stats.failed += 1;
                        tracing::warn!(error = %e, "embedding backend unavailable, aborting tier fill");
                        return Ok(stats);
                    }
                }
            }
        }
        tracing::info!(?tier, indexed = stats.indexed, skipped = stats.skipped, "tier fill complete");
        Ok(stats)
    }

    /// Fill tier 1 inline, then spawn tiers 2 and 3 in the background.
    pub fn spawn_lower_tiers(
        self: Arc<Self>,
        schema: Arc<SchemaDescriptor>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            for tier in [Tier::Secondary, Tier::Tertiary] {
                if let Err(e) = self.fill_tier(&schema, tier).await {
                    tracing::warn!(?tier, error = %e, "background tier fill failed");
                }
            }
        })
    }
}
