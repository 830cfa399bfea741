//! Language Model Interface
//!
//! Both LLM call sites (query planning and evidence reasoning) go through
//! the [`TextCompletion`] capability: prompt in, loosely structured text
//! out. Shape validation of that text lives in [`crate::decode`], not here.

pub mod providers;

use async_trait::async_trait;

/// Trait for language-model backends.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    /// Generate a completion.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError>;

    /// Get model info.
    fn model_info(&self) -> ModelInfo;
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    /// Ask the backend for JSON-mode output when it supports it.
    pub json_mode: bool,
}

impl CompletionRequest {
    /// A system + user request, the shape both pipeline call sites use.
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![
                Message {
                    role: Role::System,
                    content: system.into(),
                },
                Message {
                    role: Role::User,
                    content: user.into(),
                },
            ],
            max_tokens: None,
            temperature: None,
            json_mode: true,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Append a follow-up user turn (used for corrective retries).
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message {
            role: Role::User,
            content: content.into(),
        });
    }

    /// Append an assistant turn (the model's previous, rejected output).
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message {
            role: Role::Assistant,
            content: content.into(),
        });
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub finish_reason: FinishReason,
    pub usage: Usage,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
}

#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub name: String,
    pub max_tokens: usize,
    pub supports_json_mode: bool,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LLMError {
    #[error("API error: {0}")]
    Api(String),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("network error: {0}")]
    Network(String),
}

// ============================================================================
// Mock backend for tests
// ============================================================================

/// Scripted completion backend. Responses are returned in order, cycling
/// once exhausted; an empty script always errors.
pub struct MockCompletion {
    responses: Vec<String>,
    call_idx: std::sync::atomic::AtomicUsize,
}

impl MockCompletion {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            call_idx: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn always(response: &str) -> Self {
        Self::new(vec![response.to_string()])
    }

    /// How many completions have been requested so far.
    pub fn calls(&self) -> usize {
        self.call_idx.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl TextCompletion for MockCompletion {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let idx = self
            .call_idx
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let content = self
            .responses
            .get(idx % self.responses.len().max(1))
            .cloned()
            .ok_or_else(|| LLMError::Api("mock has no scripted responses".to_string()))?;
        Ok(CompletionResponse {
            content,
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
            model: "mock".to_string(),
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: "mock".to_string(),
            max_tokens: 8192,
            supports_json_mode: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_cycles_through_script() {
        let mock = MockCompletion::new(vec!["first".to_string(), "second".to_string()]);
        let req = CompletionRequest::new("sys", "user");
        assert_eq!(mock.complete(req.clone()).await.unwrap().content, "first");
        assert_eq!(mock.complete(req.clone()).await.unwrap().content, "second");
        assert_eq!(mock.complete(req).await.unwrap().content, "first");
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn empty_mock_errors() {
        let mock = MockCompletion::new(vec![]);
        let err = mock
            .complete(CompletionRequest::new("sys", "user"))
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::Api(_)));
    }
}
