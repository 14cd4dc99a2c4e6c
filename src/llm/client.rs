//! LLM client abstraction and provider selection
//!
//! Every provider speaks the same two operations: a chat turn that may
//! request tool calls, and a schema-constrained JSON turn used for agent
//! selection.
//!
//! - **OpenAI**: any OpenAI-compatible `/chat/completions` endpoint
//! - **Ollama**: Ollama's OpenAI-compatible `/v1` endpoint

use crate::hierarchy::GenerationConfig;
use crate::llm::coordinator::ConversationMessage;
use crate::types::{AppError, Result, ToolCall, ToolDefinition};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default sampling temperature for agent replies.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
/// Default completion budget for agent replies.
pub const DEFAULT_MAX_TOKENS: u32 = 1500;

/// Generic LLM client trait for provider abstraction
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// One chat turn. `tools` may be empty, in which case none are offered.
    async fn chat(
        &self,
        messages: &[ConversationMessage],
        tools: &[ToolDefinition],
        params: &GenerationParams,
    ) -> Result<LLMResponse>;

    /// One chat turn whose output must be a JSON object matching `schema`.
    async fn chat_json(
        &self,
        messages: &[ConversationMessage],
        schema_name: &str,
        schema: &serde_json::Value,
        params: &GenerationParams,
    ) -> Result<serde_json::Value>;

    /// Get the model name/identifier
    fn model_name(&self) -> &str;
}

/// Response from an LLM generation request
#[derive(Debug, Clone, Default)]
pub struct LLMResponse {
    /// The text content of the response
    pub content: String,
    /// Any tool calls requested by the model
    pub tool_calls: Vec<ToolCall>,
    /// The reason generation stopped (e.g., "stop", "tool_calls", "length")
    pub finish_reason: String,
    pub usage: Option<TokenUsage>,
}

impl LLMResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            finish_reason: "stop".to_string(),
            usage: None,
        }
    }

    pub fn with_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: String::new(),
            tool_calls,
            finish_reason: "tool_calls".to_string(),
            usage: None,
        }
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn add(self, other: TokenUsage) -> Self {
        Self::new(
            self.prompt_tokens + other.prompt_tokens,
            self.completion_tokens + other.completion_tokens,
        )
    }
}

/// Sampling parameters for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Overrides the client's default model.
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl GenerationParams {
    /// Parameters for an agent, filling gaps with the defaults.
    pub fn from_config(config: Option<&GenerationConfig>) -> Self {
        let defaults = Self::default();
        match config {
            Some(config) => Self {
                model: config.model.clone().filter(|m| !m.trim().is_empty()),
                temperature: config.temperature.unwrap_or(defaults.temperature),
                max_tokens: config.max_tokens.unwrap_or(defaults.max_tokens),
            },
            None => defaults,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Provider enum for runtime selection
#[derive(Debug, Clone, PartialEq)]
pub enum Provider {
    /// OpenAI API or any compatible gateway
    OpenAI {
        api_key: String,
        api_base: String,
        model: String,
    },

    /// Ollama local server, reached through its OpenAI-compatible API
    Ollama { base_url: String, model: String },
}

impl Provider {
    /// Create a client instance for this provider
    pub fn create_client(&self, request_timeout: Duration) -> Result<Arc<dyn LLMClient>> {
        let client = match self {
            Provider::OpenAI {
                api_key,
                api_base,
                model,
            } => super::openai::OpenAICompatibleClient::new(
                api_base.clone(),
                Some(api_key.clone()).filter(|k| !k.is_empty()),
                model.clone(),
                request_timeout,
            )?,
            Provider::Ollama { base_url, model } => {
                let base = base_url.trim_end_matches('/');
                let api_base = if base.ends_with("/v1") {
                    base.to_string()
                } else {
                    format!("{}/v1", base)
                };
                super::openai::OpenAICompatibleClient::new(
                    api_base,
                    None,
                    model.clone(),
                    request_timeout,
                )?
            }
        };
        Ok(Arc::new(client))
    }

    /// Resolve from `provider`, `base_url`, `model` and an optional API key.
    pub fn from_settings(
        provider: &str,
        base_url: &str,
        model: &str,
        api_key: Option<String>,
    ) -> Result<Self> {
        if model.trim().is_empty() {
            return Err(AppError::Configuration("llm model must be set".to_string()));
        }
        match provider.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAI {
                api_key: api_key.unwrap_or_default(),
                api_base: base_url.to_string(),
                model: model.to_string(),
            }),
            "ollama" => Ok(Provider::Ollama {
                base_url: base_url.to_string(),
                model: model.to_string(),
            }),
            other => Err(AppError::Configuration(format!(
                "unknown llm provider '{}' (expected openai or ollama)",
                other
            ))),
        }
    }

    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAI { .. } => "OpenAI",
            Provider::Ollama { .. } => "Ollama",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Provider::OpenAI { model, .. } | Provider::Ollama { model, .. } => model,
        }
    }
}
