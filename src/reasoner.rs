//! Evidence Reasoner
//!
//! Turns a retrieved evidence set into a final answer by prompting the
//! language model with a formatted view of the evidence and decoding its
//! structured verdict. Reasoning never fails the pipeline: an empty
//! evidence set short-circuits to a fixed insufficient-evidence answer
//! without an LLM call, and an undecodable response degrades to the raw
//! text with zero confidence.

use crate::decode::{decode_or_retry, DecodeError};
use crate::llm::{CompletionRequest, TextCompletion};
use crate::prompt::PromptStore;
use crate::retriever::{EvidenceItem, EvidenceOrigin, EvidenceSet};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub fact: String,
    /// Identity of the evidence item the fact came from, when the model
    /// provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    pub reasoning: String,
    pub citations: Vec<Citation>,
    /// Always within [0.0, 1.0].
    pub confidence: f64,
    pub insufficient_evidence: bool,
}

impl Answer {
    pub fn insufficient(question: &str) -> Self {
        Self {
            text: format!(
                "The graph does not contain enough information to answer: {}",
                question
            ),
            reasoning: "No evidence was retrieved for this question.".to_string(),
            citations: Vec::new(),
            confidence: 0.0,
            insufficient_evidence: true,
        }
    }

    /// Answer shape for a fatal pipeline failure, so callers always get an
    /// answer-shaped result.
    pub fn failed(question: &str, stage: &str, reason: &str) -> Self {
        Self {
            text: format!("Unable to answer: {}", question),
            reasoning: format!("{} failed: {}", stage, reason),
            citations: Vec::new(),
            confidence: 0.0,
            insufficient_evidence: true,
        }
    }
}

// ============================================================================
// Raw model output
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawVerdict {
    answer: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    evidence: Vec<RawCitation>,
    #[serde(default)]
    confidence: f64,
}

/// Models sometimes emit evidence as bare strings instead of objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCitation {
    Tagged {
        fact: String,
        #[serde(default)]
        source: Option<String>,
    },
    Plain(String),
}

impl From<RawCitation> for Citation {
    fn from(raw: RawCitation) -> Self {
        match raw {
            RawCitation::Tagged { fact, source } => Citation { fact, source },
            RawCitation::Plain(fact) => Citation { fact, source: None },
        }
    }
}

// ============================================================================
// Reasoner
// ============================================================================

pub struct EvidenceReasoner {
    llm: Arc<dyn TextCompletion>,
    prompts: Arc<PromptStore>,
}

impl EvidenceReasoner {
    pub fn new(llm: Arc<dyn TextCompletion>, prompts: Arc<PromptStore>) -> Self {
        Self { llm, prompts }
    }

    pub async fn reason(&self, question: &str, evidence: &EvidenceSet) -> Answer {
        if evidence.is_empty() {
            tracing::info!("no evidence retrieved, skipping reasoning call");
            return Answer::insufficient(question);
        }

        let context = format_evidence(evidence);
        let user = self.prompts.render(
            "reasoning",
            &[("original_question", question), ("graph_context", &context)],
        );
        let system = self.prompts.render("reasoning_system", &[]);
        let request = CompletionRequest::new(system, user);

        let decoded: Result<RawVerdict, DecodeError> = decode_or_retry(
            self.llm.as_ref(),
            request,
            "Respond with only the JSON object described above.",
            |_| Ok(()),
        )
        .await;

        match decoded {
            Ok(raw) => Answer {
                text: raw.answer,
                reasoning: raw.reasoning,
                citations: raw.evidence.into_iter().map(Citation::from).collect(),
                confidence: raw.confidence.clamp(0.0, 1.0),
                insufficient_evidence: false,
            },
            Err(DecodeError::Shape { raw, reason }) => {
                tracing::warn!(%reason, "undecodable reasoning output, degrading to raw text");
                Answer {
                    text: raw,
                    reasoning: format!("Response could not be parsed: {}", reason),
                    citations: Vec::new(),
                    confidence: 0.0,
                    insufficient_evidence: false,
                }
            }
            Err(DecodeError::Llm(err)) => {
                tracing::warn!(error = %err, "reasoning call failed");
                Answer::failed(question, "reasoning", &err.to_string())
            }
        }
    }
}

/// Deterministic evidence rendering: structured facts first, then semantic
/// matches annotated with their similarity. Identities go in brackets so the
/// model can cite them back.
pub fn format_evidence(evidence: &EvidenceSet) -> String {
    let mut structured = String::new();
    let mut semantic = String::new();
    for item in &evidence.items {
        match item.origin {
            EvidenceOrigin::Structured => {
                let _ = writeln!(structured, "- [{}] {}", item.identity, payload_line(item));
            }
            EvidenceOrigin::Semantic => {
                let _ = writeln!(
                    semantic,
                    "- [{}] {} (similarity {:.2})",
                    item.identity,
                    payload_line(item),
                    item.score
                );
            }
        }
    }

    let mut out = String::new();
    if !structured.is_empty() {
        out.push_str("Graph query results:\n");
        out.push_str(&structured);
    }
    if !semantic.is_empty() {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str("Semantically similar entities:\n");
        out.push_str(&semantic);
    }
    out
}

fn payload_line(item: &EvidenceItem) -> String {
    item.payload
        .iter()
        .map(|(k, v)| match v {
            serde_json::Value::String(s) => format!("{}: {}", k, s),
            other => format!("{}: {}", k, other),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
