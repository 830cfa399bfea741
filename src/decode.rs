//! Structured Output Decoding
//!
//! Model output is free-form text expected to contain one JSON object.
//! Decoding is strict about shape (serde does the validation) but tolerant
//! of surrounding prose: the first well-formed JSON block is extracted,
//! whether bare, fenced, or embedded mid-sentence. Both LLM call sites
//! share the same parse-or-retry-once policy through [`decode_or_retry`].

use crate::llm::{CompletionRequest, LLMError, TextCompletion};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::OnceLock;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The backend itself failed; nothing to parse.
    #[error("completion failed: {0}")]
    Llm(#[from] LLMError),
    /// Output never matched the required shape, even after a retry.
    /// Carries the last raw text so terminal stages can degrade to it.
    #[error("unparseable model output: {reason}")]
    Shape { reason: String, raw: String },
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap())
}

/// Extract the first well-formed JSON object from text.
///
/// Tries a fenced ```json block first, then scans for the first balanced
/// `{...}` span (string- and escape-aware).
pub fn extract_json_block(text: &str) -> Option<&str> {
    if let Some(cap) = fence_re().captures(text) {
        return cap.get(1).map(|m| m.as_str());
    }
    first_balanced_object(text)
}

fn first_balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Decode a typed value out of loosely structured model text.
pub fn decode_block<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let block = extract_json_block(text).ok_or_else(|| "no JSON object found".to_string())?;
    serde_json::from_str(block).map_err(|e| e.to_string())
}

/// Call the model and decode its output, retrying once with a corrective
/// follow-up turn before giving up.
///
/// `validate` runs after deserialization so content requirements (e.g. a
/// non-empty step list) share the same retry budget as shape failures. The
/// retry replays the conversation with the rejected output appended as an
/// assistant turn and `correction` as a new user turn, so the model sees
/// exactly what it produced and why it was rejected.
pub async fn decode_or_retry<T, V>(
    llm: &dyn TextCompletion,
    mut request: CompletionRequest,
    correction: &str,
    validate: V,
) -> Result<T, DecodeError>
where
    T: DeserializeOwned,
    V: Fn(&T) -> Result<(), String>,
{
    let attempt = |content: &str| -> Result<T, String> {
        let value = decode_block::<T>(content)?;
        validate(&value)?;
        Ok(value)
    };

    let first = llm.complete(request.clone()).await?;
    let first_err = match attempt(&first.content) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    tracing::warn!(error = %first_err, "model output failed validation, retrying once");
    request.push_assistant(first.content);
    request.push_user(format!("{} (previous error: {})", correction, first_err));

    let second = llm.complete(request).await?;
    attempt(&second.content).map_err(|reason| DecodeError::Shape {
        reason,
        raw: second.content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockCompletion;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Shape {
        answer: String,
    }

    #[test]
    fn extracts_bare_object() {
        let text = r#"{"answer": "yes"}"#;
        assert_eq!(extract_json_block(text), Some(text));
    }

    #[test]
    fn extracts_fenced_object() {
        let text = "Here you go:\n```json\n{\"answer\": \"yes\"}\n```\nHope that helps.";
        assert_eq!(extract_json_block(text), Some(r#"{"answer": "yes"}"#));
    }

    #[test]
    fn extracts_embedded_object_with_nested_braces() {
        let text = r#"Sure. {"answer": "use {braces} carefully", "extra": {"k": 1}} trailing"#;
        let block = extract_json_block(text).unwrap();
        assert!(block.starts_with('{') && block.ends_with('}'));
        let v: serde_json::Value = serde_json::from_str(block).unwrap();
        assert_eq!(v["extra"]["k"], 1);
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_scanner() {
        let text = r#"{"answer": "close} brace in string"}"#;
        let shape: Shape = decode_block(text).unwrap();
        assert_eq!(shape.answer, "close} brace in string");
    }

    #[test]
    fn no_object_found() {
        assert!(extract_json_block("just prose, no structure").is_none());
    }

    #[tokio::test]
    async fn retry_recovers_after_bad_first_output() {
        let mock = MockCompletion::new(vec![
            "I think the answer is probably yes.".to_string(),
            r#"{"answer": "yes"}"#.to_string(),
        ]);
        let req = CompletionRequest::new("sys", "user");
        let shape: Shape = decode_or_retry(&mock, req, "Respond with JSON only.", |_| Ok(()))
            .await
            .unwrap();
        assert_eq!(shape.answer, "yes");
        assert_eq!(mock.calls(), 2);
    }

    #[tokio::test]
    async fn shape_error_carries_raw_text() {
        let mock = MockCompletion::always("no json here either");
        let req = CompletionRequest::new("sys", "user");
        let err = decode_or_retry::<Shape, _>(&mock, req, "JSON only.", |_| Ok(()))
            .await
            .unwrap_err();
        match err {
            DecodeError::Shape { raw, .. } => assert_eq!(raw, "no json here either"),
            other => panic!("expected shape error, got {other:?}"),
        }
    }
}
