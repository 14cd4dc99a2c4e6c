//! OpenAI-compatible chat completions client.
//!
//! Speaks the `/chat/completions` wire format used by OpenAI, Ollama's `/v1`
//! endpoint, and most hosted gateways.

use crate::llm::client::{GenerationParams, LLMClient, LLMResponse, TokenUsage};
use crate::llm::coordinator::{ConversationMessage, MessageRole};
use crate::types::{AppError, Result, ToolCall, ToolDefinition};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub struct OpenAICompatibleClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// A JSON-encoded string per the OpenAI format; some servers send an object.
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAICompatibleClient {
    pub fn new(
        api_base: String,
        api_key: Option<String>,
        model: String,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", api_base.trim_end_matches('/')),
            api_key,
            model,
        })
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<ChatResponse> {
        tracing::debug!(
            model = request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            structured = request.response_format.is_some(),
            "Sending chat completion request"
        );

        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(format!("LLM request timed out: {}", e))
            } else {
                AppError::LLM(format!("LLM request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::LLM(format!(
                "LLM provider returned {}: {}",
                status, body
            )));
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|e| AppError::LLM(format!("Invalid LLM response: {}", e)))
    }

    fn request<'a>(
        &'a self,
        messages: &[ConversationMessage],
        params: &'a GenerationParams,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: params.model.as_deref().unwrap_or(&self.model),
            messages: messages.iter().map(to_wire).collect(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            tools: Vec::new(),
            response_format: None,
        }
    }
}

fn to_wire(message: &ConversationMessage) -> WireMessage {
    let role = match message.role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    };
    let tool_calls = if message.tool_calls.is_empty() {
        None
    } else {
        Some(
            message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: Some(call.id.clone()),
                    call_type: function_type(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: Value::String(call.arguments.to_string()),
                    },
                })
                .collect(),
        )
    };
    WireMessage {
        role: role.to_string(),
        content: Some(message.content.clone()),
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

fn from_wire(index: usize, call: WireToolCall) -> ToolCall {
    let arguments = match call.function.arguments {
        Value::String(raw) if raw.trim().is_empty() => serde_json::json!({}),
        Value::String(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
        other => other,
    };
    ToolCall {
        id: call.id.unwrap_or_else(|| format!("call_{}", index)),
        name: call.function.name,
        arguments,
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn chat(
        &self,
        messages: &[ConversationMessage],
        tools: &[ToolDefinition],
        params: &GenerationParams,
    ) -> Result<LLMResponse> {
        let mut request = self.request(messages, params);
        request.tools = tools
            .iter()
            .map(|tool| WireTool {
                tool_type: "function",
                function: WireFunction {
                    name: &tool.name,
                    description: &tool.description,
                    parameters: &tool.parameters,
                },
            })
            .collect();

        let response = self.send(&request).await?;
        let usage = response
            .usage
            .as_ref()
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens));
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LLM("LLM response contained no choices".to_string()))?;

        Ok(LLMResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls: choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .enumerate()
                .map(|(i, call)| from_wire(i, call))
                .collect(),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }

    async fn chat_json(
        &self,
        messages: &[ConversationMessage],
        schema_name: &str,
        schema: &Value,
        params: &GenerationParams,
    ) -> Result<Value> {
        let mut request = self.request(messages, params);
        request.response_format = Some(serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema_name,
                "schema": schema,
                "strict": true,
            }
        }));

        let response = self.send(&request).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::LLM("LLM response contained no content".to_string()))?;

        serde_json::from_str(content.trim())
            .map_err(|e| AppError::LLM(format!("Structured output was not valid JSON: {}", e)))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
