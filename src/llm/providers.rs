//! LLM API Providers
//!
//! Concrete `TextCompletion` backends for OpenAI, Anthropic, and local
//! OpenAI-compatible servers (vLLM, Ollama), each behind a cargo feature.

use super::*;

/// Provider configuration loaded from environment or built explicitly.
#[derive(Debug, Clone)]
pub struct LLMConfig {
    pub provider: Provider,
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Anthropic,
    Local,
}

impl LLMConfig {
    /// Load from environment variables, probing providers in order.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            return Ok(Self {
                provider: Provider::OpenAI,
                api_key: key,
                model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
                base_url: std::env::var("OPENAI_BASE_URL").ok(),
                timeout_secs: 60,
                max_retries: 3,
            });
        }

        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            return Ok(Self {
                provider: Provider::Anthropic,
                api_key: key,
                model: std::env::var("ANTHROPIC_MODEL")
                    .unwrap_or_else(|_| "claude-3-5-sonnet-latest".to_string()),
                base_url: None,
                timeout_secs: 60,
                max_retries: 3,
            });
        }

        if let Ok(url) = std::env::var("LOCAL_LLM_URL") {
            return Ok(Self {
                provider: Provider::Local,
                api_key: String::new(),
                model: std::env::var("LOCAL_LLM_MODEL").unwrap_or_else(|_| "default".to_string()),
                base_url: Some(url),
                timeout_secs: 120,
                max_retries: 1,
            });
        }

        Err(ConfigError::NoProviderConfigured)
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAI,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
            max_retries: 3,
        }
    }

    pub fn anthropic(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::Anthropic,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 60,
            max_retries: 3,
        }
    }

    pub fn local(url: &str, model: &str) -> Self {
        Self {
            provider: Provider::Local,
            api_key: String::new(),
            model: model.to_string(),
            base_url: Some(url.to_string()),
            timeout_secs: 120,
            max_retries: 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no LLM provider configured. Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or LOCAL_LLM_URL")]
    NoProviderConfigured,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(any(feature = "openai", feature = "anthropic", feature = "local"))]
fn http_client(timeout_secs: u64) -> Result<reqwest::Client, LLMError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| LLMError::Network(e.to_string()))
}

#[cfg(any(feature = "openai", feature = "local"))]
fn openai_style_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| {
            serde_json::json!({
                "role": match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                "content": m.content
            })
        })
        .collect()
}

// ============================================================================
// OpenAI
// ============================================================================

#[cfg(feature = "openai")]
pub struct OpenAIClient {
    client: reqwest::Client,
    config: LLMConfig,
}

#[cfg(feature = "openai")]
impl OpenAIClient {
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        let client = http_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or("https://api.openai.com/v1")
    }
}

#[cfg(feature = "openai")]
#[async_trait]
impl TextCompletion for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let url = format!("{}/chat/completions", self.base_url());

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": openai_style_messages(&request.messages),
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if request.json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if response.status() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(LLMError::RateLimited {
                retry_after_ms: retry_after * 1000,
            });
        }
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::Api(error_text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let finish_reason = match data["choices"][0]["finish_reason"].as_str() {
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            _ => FinishReason::Stop,
        };

        Ok(CompletionResponse {
            content,
            finish_reason,
            usage: Usage {
                prompt_tokens: data["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as usize,
                completion_tokens: data["usage"]["completion_tokens"].as_u64().unwrap_or(0)
                    as usize,
            },
            model: self.config.model.clone(),
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            max_tokens: 128_000,
            supports_json_mode: true,
        }
    }
}

/// OpenAI embeddings endpoint as an [`crate::embedding::Embedder`].
#[cfg(feature = "openai")]
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    config: LLMConfig,
    model: String,
    dimension: usize,
}

#[cfg(feature = "openai")]
impl OpenAIEmbedder {
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        let client = http_client(config.timeout_secs)?;
        Ok(Self {
            client,
            config,
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
        })
    }
}

#[cfg(feature = "openai")]
#[async_trait]
impl crate::embedding::Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, crate::EmbeddingUnavailable> {
        let url = format!(
            "{}/embeddings",
            self.config
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1")
        );
        let body = serde_json::json!({ "model": self.model, "input": [text] });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| crate::EmbeddingUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(crate::EmbeddingUnavailable(error_text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| crate::EmbeddingUnavailable(e.to_string()))?;

        data["data"][0]["embedding"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect()
            })
            .ok_or_else(|| crate::EmbeddingUnavailable("missing embedding array".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// Anthropic
// ============================================================================

#[cfg(feature = "anthropic")]
pub struct AnthropicClient {
    client: reqwest::Client,
    config: LLMConfig,
}

#[cfg(feature = "anthropic")]
impl AnthropicClient {
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        let client = http_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }
}

#[cfg(feature = "anthropic")]
#[async_trait]
impl TextCompletion for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let url = "https://api.anthropic.com/v1/messages";

        let system = request
            .messages
            .iter()
            .find(|m| m.role == Role::System)
            .map(|m| m.content.clone());
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                serde_json::json!({
                    "role": match m.role {
                        Role::Assistant => "assistant",
                        _ => "user",
                    },
                    "content": m.content
                })
            })
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(4096),
        });
        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        let response = self
            .client
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if response.status() == 429 {
            return Err(LLMError::RateLimited {
                retry_after_ms: 60_000,
            });
        }
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::Api(error_text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        let content = data["content"][0]["text"].as_str().unwrap_or("").to_string();
        let finish_reason = match data["stop_reason"].as_str() {
            Some("max_tokens") => FinishReason::Length,
            _ => FinishReason::Stop,
        };

        Ok(CompletionResponse {
            content,
            finish_reason,
            usage: Usage {
                prompt_tokens: data["usage"]["input_tokens"].as_u64().unwrap_or(0) as usize,
                completion_tokens: data["usage"]["output_tokens"].as_u64().unwrap_or(0) as usize,
            },
            model: self.config.model.clone(),
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            max_tokens: 200_000,
            supports_json_mode: false,
        }
    }
}

// ============================================================================
// Local (Ollama, vLLM, any OpenAI-compatible chat endpoint)
// ============================================================================

#[cfg(feature = "local")]
pub struct LocalClient {
    client: reqwest::Client,
    config: LLMConfig,
}

#[cfg(feature = "local")]
impl LocalClient {
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        let client = http_client(config.timeout_secs)?;
        Ok(Self { client, config })
    }
}

#[cfg(feature = "local")]
#[async_trait]
impl TextCompletion for LocalClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .ok_or_else(|| LLMError::Api("no base URL configured".to_string()))?;
        let url = format!("{}/v1/chat/completions", base_url);

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": openai_style_messages(&request.messages),
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LLMError::Api(error_text));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LLMError::InvalidResponse(e.to_string()))?;

        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();

        Ok(CompletionResponse {
            content,
            finish_reason: FinishReason::Stop,
            usage: Usage::default(),
            model: self.config.model.clone(),
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            name: self.config.model.clone(),
            max_tokens: 32_768,
            supports_json_mode: false,
        }
    }
}

// ============================================================================
// Unified client
// ============================================================================

/// Dispatches to whichever provider the configuration selects.
#[cfg(any(feature = "openai", feature = "anthropic", feature = "local"))]
pub enum UnifiedClient {
    #[cfg(feature = "openai")]
    OpenAI(OpenAIClient),
    #[cfg(feature = "anthropic")]
    Anthropic(AnthropicClient),
    #[cfg(feature = "local")]
    Local(LocalClient),
}

#[cfg(any(feature = "openai", feature = "anthropic", feature = "local"))]
impl UnifiedClient {
    pub fn from_config(config: LLMConfig) -> Result<Self, LLMError> {
        match config.provider {
            #[cfg(feature = "openai")]
            Provider::OpenAI => Ok(Self::OpenAI(OpenAIClient::new(config)?)),
            #[cfg(feature = "anthropic")]
            Provider::Anthropic => Ok(Self::Anthropic(AnthropicClient::new(config)?)),
            #[cfg(feature = "local")]
            Provider::Local => Ok(Self::Local(LocalClient::new(config)?)),
            #[allow(unreachable_patterns)]
            other => Err(LLMError::Api(format!(
                "provider {:?} not enabled at build time",
                other
            ))),
        }
    }

    pub fn from_env() -> Result<Self, LLMError> {
        let config = LLMConfig::from_env().map_err(|e| LLMError::Api(e.to_string()))?;
        Self::from_config(config)
    }
}

#[cfg(any(feature = "openai", feature = "anthropic", feature = "local"))]
#[async_trait]
impl TextCompletion for UnifiedClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LLMError> {
        match self {
            #[cfg(feature = "openai")]
            Self::OpenAI(c) => c.complete(request).await,
            #[cfg(feature = "anthropic")]
            Self::Anthropic(c) => c.complete(request).await,
            #[cfg(feature = "local")]
            Self::Local(c) => c.complete(request).await,
        }
    }

    fn model_info(&self) -> ModelInfo {
        match self {
            #[cfg(feature = "openai")]
            Self::OpenAI(c) => c.model_info(),
            #[cfg(feature = "anthropic")]
            Self::Anthropic(c) => c.model_info(),
            #[cfg(feature = "local")]
            Self::Local(c) => c.model_info(),
        }
    }
}
