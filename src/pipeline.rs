//! Pipeline
//!
//! Sequential coordinator: schema -> plan -> retrieve -> reason. Each
//! question gets its own id and a per-stage timing report. Fatal failures
//! in the early stages are folded into an answer-shaped result so callers
//! never have to special-case the error path.
//!
//! ```text
//!   question
//!      |
//!      v
//!   SchemaCache ---> QueryPlanner ---> HybridRetriever ---> EvidenceReasoner
//!   (cached)         (LLM, retry)      (graph + vectors)    (LLM, degrade)
//!                                                            |
//!                                                            v
//!                                                      QuestionReport
//! ```

use crate::embedding::{BackgroundIndexer, CachedEmbedder, EmbeddingStore, Tier, TierClassifier};
use crate::graph::GraphExecutor;
use crate::llm::TextCompletion;
use crate::planner::{QueryPlan, QueryPlanner};
use crate::prompt::PromptStore;
use crate::reasoner::{Answer, EvidenceReasoner};
use crate::retriever::{HybridRetriever, RetrievalOptions};
use crate::schema::SchemaCache;
use crate::PipelineError;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Planning,
    Retrieving,
    Reasoning,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Planning => write!(f, "planning"),
            Stage::Retrieving => write!(f, "retrieving"),
            Stage::Reasoning => write!(f, "reasoning"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageTiming {
    pub stage: Stage,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone)]
pub struct StageFailure {
    pub stage: Stage,
    pub reason: String,
}

/// Everything the pipeline learned while answering one question.
#[derive(Debug)]
pub struct QuestionReport {
    pub question_id: Uuid,
    pub answer: Answer,
    pub plan: Option<QueryPlan>,
    pub evidence_count: usize,
    /// Non-fatal per-step retrieval errors that were absorbed.
    pub step_errors: Vec<String>,
    pub timings: Vec<StageTiming>,
    /// Set when a stage failed fatally and the answer is a failure shape.
    pub failure: Option<StageFailure>,
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub retrieval: RetrievalOptions,
    /// Embedding cache capacity.
    pub embed_cache_size: usize,
    pub prompt_example_limit: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retrieval: RetrievalOptions::default(),
            embed_cache_size: 512,
            prompt_example_limit: 5,
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `GRAPHQA_*` environment variables. Malformed
    /// values are ignored rather than failing startup.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reading settings through
    /// `lookup`, so callers and tests can supply values without touching
    /// process-global state.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = setting::<f64>(&lookup, "GRAPHQA_SIMILARITY_THRESHOLD") {
            config.retrieval.similarity_threshold = v;
        }
        if let Some(v) = setting::<usize>(&lookup, "GRAPHQA_RESULT_LIMIT") {
            config.retrieval.result_limit = v;
        }
        if let Some(v) = setting::<bool>(&lookup, "GRAPHQA_SEMANTIC") {
            config.retrieval.enable_semantic = v;
        }
        if let Some(v) = setting::<bool>(&lookup, "GRAPHQA_EXPAND_NEIGHBORS") {
            config.retrieval.expand_neighbors = v;
        }
        if let Some(v) = setting::<usize>(&lookup, "GRAPHQA_EMBED_CACHE_SIZE") {
            config.embed_cache_size = v;
        }
        config
    }
}

fn setting<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    let raw = lookup(name)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct Pipeline {
    schema: Arc<SchemaCache>,
    planner: QueryPlanner,
    retriever: HybridRetriever,
    reasoner: EvidenceReasoner,
    indexer: Arc<BackgroundIndexer>,
    store: Arc<EmbeddingStore>,
    example_limit: usize,
}

impl Pipeline {
    pub fn new(
        graph: Arc<dyn GraphExecutor>,
        llm: Arc<dyn TextCompletion>,
        embedder: Arc<dyn crate::embedding::Embedder>,
        config: PipelineConfig,
    ) -> Self {
        Self::with_prompts(graph, llm, embedder, config, Arc::new(PromptStore::new()))
    }

    pub fn with_prompts(
        graph: Arc<dyn GraphExecutor>,
        llm: Arc<dyn TextCompletion>,
        embedder: Arc<dyn crate::embedding::Embedder>,
        config: PipelineConfig,
        prompts: Arc<PromptStore>,
    ) -> Self {
        let schema = Arc::new(SchemaCache::new(Arc::clone(&graph)));
        let cached = Arc::new(CachedEmbedder::new(embedder, config.embed_cache_size));
        let store = Arc::new(EmbeddingStore::new());
        let indexer = Arc::new(BackgroundIndexer::new(
            Arc::clone(&graph),
            Arc::clone(&cached),
            Arc::clone(&store),
            TierClassifier::new(),
        ));
        Self {
            schema,
            planner: QueryPlanner::new(Arc::clone(&llm), Arc::clone(&prompts)),
            retriever: HybridRetriever::new(
                Arc::clone(&graph),
                cached,
                Arc::clone(&store),
                config.retrieval.clone(),
            ),
            reasoner: EvidenceReasoner::new(llm, prompts),
            indexer,
            store,
            example_limit: config.prompt_example_limit,
        }
    }

    pub fn schema_cache(&self) -> &Arc<SchemaCache> {
        &self.schema
    }

    pub fn embedding_store(&self) -> &Arc<EmbeddingStore> {
        &self.store
    }

    /// Force the next schema read to hit the graph.
    pub async fn refresh_schema(&self) -> Result<(), PipelineError> {
        self.schema.get_schema(true).await.map(|_| ())
    }

    /// Load the schema, index the most important entities inline, and kick
    /// off the remaining tiers in the background. Optional; the pipeline
    /// answers without it, just with a cold semantic channel.
    pub async fn warm_up(&self) -> Result<(), PipelineError> {
        let schema = self.schema.get_schema(false).await?;
        if let Err(e) = self.indexer.fill_tier(&schema, Tier::Primary).await {
            tracing::warn!(error = %e, "primary tier fill failed");
        }
        Arc::clone(&self.indexer).spawn_lower_tiers(schema);
        Ok(())
    }

    /// Answer a question end to end. Always returns a report with an
    /// answer-shaped result; fatal stage failures are recorded in
    /// `failure` and produce a zero-confidence answer.
    pub async fn answer_question(&self, question: &str) -> QuestionReport {
        let question_id = Uuid::new_v4();
        // Instrumenting keeps the span attached across awaits; a manually
        // entered guard would leak onto sibling tasks at yield points.
        let span = tracing::info_span!("answer_question", %question_id);
        self.answer_inner(question, question_id).instrument(span).await
    }

    async fn answer_inner(&self, question: &str, question_id: Uuid) -> QuestionReport {
        tracing::info!(%question, "question received");

        let mut timings = Vec::new();

        // Schema failures surface as planning failures: without a schema
        // there is nothing to plan against.
        let started = Instant::now();
        let planned = self.plan_stage(question).await;
        timings.push(StageTiming {
            stage: Stage::Planning,
            elapsed_ms: started.elapsed().as_millis(),
        });
        let plan = match planned {
            Ok(plan) => plan,
            Err(e) => {
                return self.failed_report(question, question_id, Stage::Planning, e, timings)
            }
        };

        let started = Instant::now();
        let retrieved = self.retriever.retrieve(&plan, question).await;
        timings.push(StageTiming {
            stage: Stage::Retrieving,
            elapsed_ms: started.elapsed().as_millis(),
        });
        let evidence = match retrieved {
            Ok(evidence) => evidence,
            Err(e) => {
                let mut report =
                    self.failed_report(question, question_id, Stage::Retrieving, e, timings);
                report.plan = Some(plan);
                return report;
            }
        };
        tracing::info!(
            items = evidence.len(),
            absorbed_errors = evidence.step_errors.len(),
            "retrieval complete"
        );

        let started = Instant::now();
        let answer = self.reasoner.reason(question, &evidence).await;
        timings.push(StageTiming {
            stage: Stage::Reasoning,
            elapsed_ms: started.elapsed().as_millis(),
        });
        tracing::info!(confidence = answer.confidence, "answer produced");

        QuestionReport {
            question_id,
            answer,
            plan: Some(plan),
            evidence_count: evidence.len(),
            step_errors: evidence.step_errors,
            timings,
            failure: None,
        }
    }

    async fn plan_stage(&self, question: &str) -> Result<QueryPlan, PipelineError> {
        let schema = self.schema.get_schema(false).await?;
        let mut examples = self.schema.get_examples().await?;
        examples.truncate(self.example_limit);
        self.planner.plan(question, &schema, &examples).await
    }

    fn failed_report(
        &self,
        question: &str,
        question_id: Uuid,
        stage: Stage,
        error: PipelineError,
        timings: Vec<StageTiming>,
    ) -> QuestionReport {
        let reason = error.to_string();
        tracing::error!(%stage, %reason, "pipeline stage failed");
        QuestionReport {
            question_id,
            answer: Answer::failed(question, &stage.to_string(), &reason),
            plan: None,
            evidence_count: 0,
            step_errors: Vec::new(),
            timings,
            failure: Some(StageFailure { stage, reason }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_sane() {
        let config = PipelineConfig::default();
        assert!(config.retrieval.enable_semantic);
        assert_eq!(config.retrieval.structured_score, 2.0);
        assert!(config.retrieval.similarity_threshold > 0.0);
    }

    #[test]
    fn overrides_are_applied_from_lookup() {
        let vars: std::collections::HashMap<&str, &str> = [
            ("GRAPHQA_RESULT_LIMIT", "25"),
            ("GRAPHQA_SEMANTIC", "false"),
            ("GRAPHQA_SIMILARITY_THRESHOLD", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let config = PipelineConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.retrieval.result_limit, 25);
        assert!(!config.retrieval.enable_semantic);
        assert_eq!(
            config.retrieval.similarity_threshold,
            RetrievalOptions::default().similarity_threshold
        );
    }
}
