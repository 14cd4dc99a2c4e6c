//! Completion service: the prompt-in, text-or-object-out boundary the agents use.

use crate::llm::client::{GenerationParams, LLMClient, TokenUsage};
use crate::llm::coordinator::{
    ConversationMessage, ToolCallRecord, ToolCallingConfig, ToolCoordinator, ToolDispatch,
};
use crate::types::{Result, ToolDefinition};
use async_trait::async_trait;
use std::sync::Arc;

/// A free-text generation request.
///
/// Tool calling is enabled only when `tools` is non-empty and a `dispatch`
/// callback is supplied.
pub struct TextRequest<'a> {
    pub system: Option<String>,
    pub prompt: String,
    pub params: GenerationParams,
    pub tools: Vec<ToolDefinition>,
    pub dispatch: Option<&'a dyn ToolDispatch>,
}

impl<'a> TextRequest<'a> {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            params: GenerationParams::default(),
            tools: Vec::new(),
            dispatch: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>, dispatch: &'a dyn ToolDispatch) -> Self {
        self.tools = tools;
        self.dispatch = Some(dispatch);
        self
    }

    fn messages(&self) -> Vec<ConversationMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.system.as_deref().filter(|s| !s.trim().is_empty()) {
            messages.push(ConversationMessage::system(system));
        }
        messages.push(ConversationMessage::user(&self.prompt));
        messages
    }
}

/// Generated text plus the tool calls resolved while producing it.
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub usage: TokenUsage,
}

/// A schema-constrained generation request.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub params: GenerationParams,
    pub schema_name: String,
    pub schema: serde_json::Value,
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn generate_text(&self, request: TextRequest<'_>) -> Result<Completion>;

    async fn generate_structured(&self, request: StructuredRequest) -> Result<serde_json::Value>;
}

/// [`CompletionService`] over any [`LLMClient`], with the tool loop run by a
/// [`ToolCoordinator`].
pub struct LlmCompletionService {
    client: Arc<dyn LLMClient>,
    coordinator: ToolCoordinator,
}

impl LlmCompletionService {
    pub fn new(client: Arc<dyn LLMClient>, tool_config: ToolCallingConfig) -> Self {
        Self {
            coordinator: ToolCoordinator::new(client.clone(), tool_config),
            client,
        }
    }

    pub fn client(&self) -> &dyn LLMClient {
        self.client.as_ref()
    }
}

#[async_trait]
impl CompletionService for LlmCompletionService {
    async fn generate_text(&self, request: TextRequest<'_>) -> Result<Completion> {
        let messages = request.messages();

        match request.dispatch {
            Some(dispatch) if !request.tools.is_empty() => {
                let result = self
                    .coordinator
                    .execute(messages, &request.tools, dispatch, &request.params)
                    .await?;
                Ok(Completion {
                    text: result.content,
                    tool_calls: result.tool_calls,
                    usage: result.total_usage,
                })
            }
            _ => {
                let response = self.client.chat(&messages, &[], &request.params).await?;
                Ok(Completion {
                    text: response.content,
                    tool_calls: Vec::new(),
                    usage: response.usage.unwrap_or_default(),
                })
            }
        }
    }

    async fn generate_structured(&self, request: StructuredRequest) -> Result<serde_json::Value> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system.as_deref().filter(|s| !s.trim().is_empty()) {
            messages.push(ConversationMessage::system(system));
        }
        messages.push(ConversationMessage::user(&request.prompt));

        self.client
            .chat_json(&messages, &request.schema_name, &request.schema, &request.params)
            .await
    }
}
