//! Prompt Templates
//!
//! Fixed template texts with `{{name}}` placeholders, rendered by plain
//! substitution. No control flow lives in templates; anything conditional
//! is assembled by the caller before rendering.

use std::collections::HashMap;

pub const QUERY_DECOMPOSITION_SYSTEM: &str = "\
You are a query decomposition specialist focused on converting natural language questions \
into graph database queries. Analyze the question about the graph, identify entities, \
relationships, and constraints, and translate them into Cypher queries that retrieve the \
relevant information.";

pub const QUERY_DECOMPOSITION: &str = r#"Analyze the following question about the graph and decompose it into Cypher queries.

QUESTION:
{{question}}

{{schema}}

{{examples}}

Step 1: Identify the key entities and relationships in the question.
Step 2: Use the schema above to understand the data structure.
Step 3: Adapt patterns from the examples where they fit.
Step 4: Formulate one or more Cypher queries that retrieve the relevant information.

Return your answer as JSON:
{
  "query_plan": [
    {"purpose": "what this query retrieves", "query": "MATCH ... RETURN ..."}
  ],
  "thought_process": "why these queries answer the question"
}"#;

pub const REASONING_SYSTEM: &str = "\
You are a graph reasoning specialist who analyzes information retrieved from a knowledge \
graph. Reason over the graph context to answer the question accurately, explain your \
reasoning, and cite specific evidence items by their identity.";

pub const REASONING: &str = r#"Reason over the following graph context to answer the original question.

ORIGINAL QUESTION:
{{original_question}}

GRAPH CONTEXT:
{{graph_context}}

Analyze the retrieved information, then reason step by step to an answer. Cite evidence using
the bracketed identities shown in the context. If the information is insufficient, say so and
give the best answer the data supports.

Return your answer as JSON:
{
  "answer": "your answer to the question",
  "reasoning": "your step-by-step reasoning",
  "evidence": [{"fact": "short quoted fact", "source": "evidence identity"}],
  "confidence": 0.0
}"#;

/// In-memory template store keyed by id. Ships with the built-in templates;
/// callers may override any id before the pipeline starts.
pub struct PromptStore {
    templates: HashMap<String, String>,
}

impl PromptStore {
    pub fn new() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            "query_decomposition_system".to_string(),
            QUERY_DECOMPOSITION_SYSTEM.to_string(),
        );
        templates.insert(
            "query_decomposition".to_string(),
            QUERY_DECOMPOSITION.to_string(),
        );
        templates.insert("reasoning_system".to_string(), REASONING_SYSTEM.to_string());
        templates.insert("reasoning".to_string(), REASONING.to_string());
        Self { templates }
    }

    /// Replace or add a template.
    pub fn set(&mut self, id: &str, text: impl Into<String>) {
        self.templates.insert(id.to_string(), text.into());
    }

    /// Render a template, substituting every `{{name}}` placeholder.
    /// Unknown template ids render as empty; unmatched placeholders are
    /// left in place so missing variables are visible in logs.
    pub fn render(&self, id: &str, vars: &[(&str, &str)]) -> String {
        let Some(template) = self.templates.get(id) else {
            tracing::warn!(template = id, "unknown prompt template");
            return String::new();
        };
        let mut out = template.clone();
        for (name, value) in vars {
            out = out.replace(&format!("{{{{{}}}}}", name), value);
        }
        out
    }
}

impl Default for PromptStore {
    fn default() -> Self {
        Self::new()
    }
}
