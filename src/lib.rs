//! # graphqa
//!
//! Natural-language question answering over a property graph. A question is
//! decomposed into graph queries against the live schema, executed alongside
//! a vector similarity search, and the combined evidence is reasoned over to
//! produce a cited, confidence-scored answer.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------------------------+
//! |                              Pipeline                                 |
//! |                                                                       |
//! |  +-------------+    +--------------+    +-----------------+           |
//! |  | SchemaCache |--->| QueryPlanner |--->| HybridRetriever |           |
//! |  | (cached     |    | (LLM decomp, |    | (plan steps +   |           |
//! |  |  introspec- |    |  validation, |    |  vector search, |           |
//! |  |  tion)      |    |  repair)     |    |  dedup + rank)  |           |
//! |  +-------------+    +--------------+    +-----------------+           |
//! |         |                                        |                    |
//! |         v                                        v                    |
//! |  +-------------------+               +------------------+             |
//! |  | BackgroundIndexer |               | EvidenceReasoner |--> Answer   |
//! |  | (tiered embedding |               | (LLM verdict,    |             |
//! |  |  fill)            |               |  degradation)    |             |
//! |  +-------------------+               +------------------+             |
//! +-----------------------------------------------------------------------+
//!          |                    |                   |
//!          v                    v                   v
//!    GraphExecutor          Embedder          TextCompletion
//!    (Neo4j-style          (vector            (OpenAI / Anthropic /
//!     graph backend)        backend)           local, feature-gated)
//! ```
//!
//! The three external seams are traits: [`graph::GraphExecutor`] for the
//! graph backend, [`embedding::Embedder`] for vectors, and
//! [`llm::TextCompletion`] for the language model. Everything else is
//! self-contained.

pub mod decode;
pub mod embedding;
pub mod graph;
pub mod llm;
pub mod pipeline;
pub mod planner;
pub mod prompt;
pub mod reasoner;
pub mod retriever;
pub mod schema;

pub use embedding::{CachedEmbedder, Embedder, EmbeddingStore, Tier, TierClassifier};
pub use graph::{GraphError, GraphExecutor, Row};
pub use llm::{CompletionRequest, LLMError, TextCompletion};
pub use pipeline::{Pipeline, PipelineConfig, QuestionReport, Stage};
pub use planner::{QueryPlan, QueryPlanner, QueryStep};
pub use prompt::PromptStore;
pub use reasoner::{Answer, Citation, EvidenceReasoner};
pub use retriever::{EvidenceItem, EvidenceOrigin, EvidenceSet, HybridRetriever, RetrievalOptions};
pub use schema::{SchemaCache, SchemaDescriptor};

/// Fatal pipeline failures. Everything else degrades in place: failed plan
/// steps are absorbed into the evidence set, an unavailable embedder drops
/// the semantic channel, and unparseable reasoning output becomes a
/// zero-confidence answer.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("schema unavailable: {0}")]
    SchemaUnavailable(String),
    #[error("query planning failed: {0}")]
    PlanningFailed(String),
    #[error("retrieval failed: {0}")]
    RetrievalFailed(String),
}

/// The embedding backend cannot be reached. Non-fatal: retrieval continues
/// with structured results only.
#[derive(Debug, Clone, thiserror::Error)]
#[error("embedding unavailable: {0}")]
pub struct EmbeddingUnavailable(pub String);
