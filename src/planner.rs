//! Query Planner
//!
//! Decomposes a natural-language question into an ordered plan of Cypher
//! queries by prompting the language model with the formatted schema and
//! example patterns. Parsing is strict about shape but tolerant of prose;
//! plan steps that reference labels or relationship types missing from the
//! schema are flagged, never dropped, since the schema is sampled and may
//! be incomplete.

use crate::decode::{decode_or_retry, DecodeError};
use crate::llm::{CompletionRequest, TextCompletion};
use crate::prompt::PromptStore;
use crate::schema::{format_examples, QueryExample, SchemaDescriptor};
use crate::PipelineError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStep {
    /// What this query is meant to retrieve, in the planner's words.
    pub purpose: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Validation and repair notes attached after planning.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub steps: Vec<QueryStep>,
    pub rationale: String,
}

/// Raw shape the model is asked to produce.
#[derive(Debug, Deserialize)]
struct RawPlan {
    query_plan: Vec<RawStep>,
    #[serde(default)]
    thought_process: String,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    purpose: String,
    #[serde(alias = "cypher")]
    query: String,
    #[serde(default)]
    parameters: Option<Value>,
}

pub struct QueryPlanner {
    llm: Arc<dyn TextCompletion>,
    prompts: Arc<PromptStore>,
    temperature: f32,
}

impl QueryPlanner {
    pub fn new(llm: Arc<dyn TextCompletion>, prompts: Arc<PromptStore>) -> Self {
        Self {
            llm,
            prompts,
            // Low temperature keeps decomposition deterministic.
            temperature: 0.2,
        }
    }

    /// Produce an ordered query plan for the question.
    pub async fn plan(
        &self,
        question: &str,
        schema: &SchemaDescriptor,
        examples: &[QueryExample],
    ) -> Result<QueryPlan, PipelineError> {
        let user = self.prompts.render(
            "query_decomposition",
            &[
                ("question", question),
                ("schema", &schema.format_for_prompt()),
                ("examples", &format_examples(examples)),
            ],
        );
        let system = self.prompts.render("query_decomposition_system", &[]);
        let request = CompletionRequest::new(system, user).with_temperature(self.temperature);

        let raw: RawPlan = decode_or_retry(
            self.llm.as_ref(),
            request,
            "Respond with only the JSON object described above, including a non-empty query_plan.",
            |plan: &RawPlan| {
                if plan.query_plan.is_empty() {
                    return Err("query_plan is empty".to_string());
                }
                if plan.query_plan.iter().any(|s| s.query.trim().is_empty()) {
                    return Err("a step has an empty query".to_string());
                }
                Ok(())
            },
        )
        .await
        .map_err(|e| match e {
            DecodeError::Llm(err) => PipelineError::PlanningFailed(err.to_string()),
            DecodeError::Shape { reason, .. } => PipelineError::PlanningFailed(reason),
        })?;

        let mut steps = Vec::with_capacity(raw.query_plan.len());
        let mut flagged_rationale = Vec::new();
        for (idx, raw_step) in raw.query_plan.into_iter().enumerate() {
            let (query, mut flags) = repair_query(&raw_step.query);
            for token in unknown_schema_tokens(&query, schema) {
                let flag = format!("references unknown label or type '{}'", token);
                flagged_rationale.push(format!("step {}: {}", idx + 1, flag));
                flags.push(flag);
            }
            steps.push(QueryStep {
                purpose: raw_step.purpose,
                query,
                parameters: raw_step.parameters,
                flags,
            });
        }

        let mut rationale = raw.thought_process;
        if !flagged_rationale.is_empty() {
            rationale.push_str("\nValidation flags: ");
            rationale.push_str(&flagged_rationale.join("; "));
        }
        tracing::info!(steps = steps.len(), flagged = flagged_rationale.len(), "query plan ready");

        Ok(QueryPlan { steps, rationale })
    }
}

// ============================================================================
// Best-effort validation and repair
// ============================================================================

fn label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(\s*\w*\s*:\s*`?(\w+)`?").unwrap())
}

fn rel_type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\s*\w*\s*:\s*`?(\w+)`?").unwrap())
}

fn double_where_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)\bWHERE\s+(.+?)\s+WHERE\s+").unwrap())
}

/// Tokens in the query text that look like labels or relationship types
/// but do not appear in the schema.
pub fn unknown_schema_tokens(query: &str, schema: &SchemaDescriptor) -> Vec<String> {
    let mut unknown = Vec::new();
    for cap in label_re().captures_iter(query) {
        let token = &cap[1];
        if !schema.has_label(token) && !unknown.iter().any(|t| t == token) {
            unknown.push(token.to_string());
        }
    }
    for cap in rel_type_re().captures_iter(query) {
        let token = &cap[1];
        if !schema.has_rel_type(token) && !unknown.iter().any(|t| t == token) {
            unknown.push(token.to_string());
        }
    }
    unknown
}

/// Purely syntactic fixes for common generation slips. Anything applied is
/// reported so the executed query is never silently different from the
/// planned one.
pub fn repair_query(query: &str) -> (String, Vec<String>) {
    let mut flags = Vec::new();
    let mut repaired = query.trim().to_string();

    if let Some(stripped) = repaired.strip_suffix(';') {
        repaired = stripped.trim_end().to_string();
        flags.push("stripped trailing semicolon".to_string());
    }

    // A second WHERE in the same clause chain is almost always a mistaken AND.
    if double_where_re().is_match(&repaired) {
        repaired = double_where_re()
            .replace_all(&repaired, "WHERE $1 AND ")
            .into_owned();
        flags.push("collapsed doubled WHERE into AND".to_string());
    }

    (repaired, flags)
}
