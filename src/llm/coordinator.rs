//! Multi-turn tool calling
//!
//! `ToolCoordinator` drives the loop for any [`LLMClient`]:
//!
//! 1. Send the conversation with the offered tool definitions
//! 2. If the model requests tool calls, run them through a [`ToolDispatch`]
//! 3. Send the results (or `{"error": ..}` objects) back to the model
//! 4. Repeat until the model answers in text or `max_iterations` is reached
//!
//! When the iteration budget runs out, one last turn is made with no tools
//! offered so the model has to answer with what it has.
//!
//! # Example
//!
//! ```rust,ignore
//! use switchboard::llm::coordinator::{ConversationMessage, ToolCallingConfig, ToolCoordinator};
//!
//! let coordinator = ToolCoordinator::new(client, ToolCallingConfig::default());
//! let result = coordinator
//!     .execute(
//!         vec![ConversationMessage::user("Do you have red shoes?")],
//!         &definitions,
//!         &dispatch,
//!         &GenerationParams::default(),
//!     )
//!     .await?;
//! println!("{} ({} tool calls)", result.content, result.tool_calls.len());
//! ```

use crate::llm::client::{GenerationParams, LLMClient, TokenUsage};
use crate::types::{AppError, Result, ToolCall, ToolDefinition};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// Runs the tool calls a model requests during a coordinated turn.
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    /// Whether `name` is one of the tools offered for this turn.
    fn has_tool(&self, name: &str) -> bool;

    async fn dispatch(&self, call: &ToolCall) -> Result<serde_json::Value>;
}

/// Configuration for tool calling coordination behavior.
#[derive(Debug, Clone)]
pub struct ToolCallingConfig {
    /// Maximum number of tool rounds before the final no-tools turn.
    pub max_iterations: usize,

    /// Whether to execute multiple tool calls in parallel.
    /// When false, tools are executed sequentially.
    pub parallel_execution: bool,

    /// Timeout for individual tool execution.
    pub tool_timeout: Duration,

    /// Abort the turn on the first failed tool instead of reporting the error to the model.
    pub stop_on_error: bool,
}

impl Default for ToolCallingConfig {
    fn default() -> Self {
        Self {
            max_iterations: 7,
            parallel_execution: false,
            tool_timeout: Duration::from_secs(30),
            stop_on_error: false,
        }
    }
}

/// Record of a single tool call execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    /// Unique identifier for this tool call (from the LLM).
    pub id: String,
    /// Name of the tool that was called.
    pub name: String,
    /// Arguments passed to the tool.
    pub arguments: serde_json::Value,
    /// Result returned by the tool (or error object).
    pub result: serde_json::Value,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl ToolCallRecord {
    fn failed(call: &ToolCall, message: String, duration_ms: u64) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            result: serde_json::json!({ "error": message }),
            success: false,
            duration_ms,
            error: Some(message),
        }
    }
}

/// Reason why a tool coordination session ended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum FinishReason {
    /// Model decided to stop (no more tool calls).
    Stop,
    /// Hit the maximum iterations limit; the content comes from the final no-tools turn.
    MaxIterations,
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinishReason::Stop => write!(f, "stop"),
            FinishReason::MaxIterations => write!(f, "max_iterations"),
        }
    }
}

/// A message in a tool-calling conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub role: MessageRole,
    pub content: String,
    /// Tool calls requested by the assistant (only for Assistant role).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The call this message answers (only for Tool role).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Role of a message sender in a tool-calling conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl ConversationMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant message with optional tool calls.
    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Create a tool result message.
    pub fn tool_result(tool_call_id: impl Into<String>, result: &serde_json::Value) -> Self {
        Self {
            role: MessageRole::Tool,
            content: serde_json::to_string(result).unwrap_or_else(|_| "{}".to_string()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// Result of a complete tool coordination session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorResult {
    /// Final text response from the model.
    pub content: String,

    /// All tool calls made during the session.
    pub tool_calls: Vec<ToolCallRecord>,

    /// Number of LLM round-trips performed.
    pub iterations: usize,

    pub finish_reason: FinishReason,

    /// Accumulated token usage across all iterations.
    pub total_usage: TokenUsage,

    /// Full message history (useful for debugging).
    pub message_history: Vec<ConversationMessage>,
}

/// Provider-agnostic tool loop.
pub struct ToolCoordinator {
    client: Arc<dyn LLMClient>,
    config: ToolCallingConfig,
}

impl ToolCoordinator {
    pub fn new(client: Arc<dyn LLMClient>, config: ToolCallingConfig) -> Self {
        Self { client, config }
    }

    pub fn with_defaults(client: Arc<dyn LLMClient>) -> Self {
        Self::new(client, ToolCallingConfig::default())
    }

    /// Execute a complete tool-calling conversation loop.
    ///
    /// Unknown tools and failing tools are reported back to the model as
    /// `{"error": ..}` results; only provider errors (or a failed tool with
    /// `stop_on_error`) end the session with an error.
    pub async fn execute(
        &self,
        mut messages: Vec<ConversationMessage>,
        tools: &[ToolDefinition],
        dispatch: &dyn ToolDispatch,
        params: &GenerationParams,
    ) -> Result<CoordinatorResult> {
        let mut all_tool_calls: Vec<ToolCallRecord> = Vec::new();
        let mut total_usage = TokenUsage::default();

        for iteration in 0..self.config.max_iterations {
            let response = self.client.chat(&messages, tools, params).await?;
            if let Some(usage) = response.usage {
                total_usage = total_usage.add(usage);
            }

            messages.push(ConversationMessage::assistant(
                &response.content,
                response.tool_calls.clone(),
            ));

            if response.tool_calls.is_empty() {
                return Ok(CoordinatorResult {
                    content: response.content,
                    tool_calls: all_tool_calls,
                    iterations: iteration + 1,
                    finish_reason: FinishReason::Stop,
                    total_usage,
                    message_history: messages,
                });
            }

            tracing::debug!(
                iteration,
                calls = response.tool_calls.len(),
                "Model requested tool calls"
            );

            let records = self.execute_tool_calls(&response.tool_calls, dispatch).await?;
            for record in records {
                messages.push(ConversationMessage::tool_result(&record.id, &record.result));
                all_tool_calls.push(record);
            }
        }

        tracing::warn!(
            max_iterations = self.config.max_iterations,
            "Tool iteration limit reached; requesting a final answer without tools"
        );
        let response = self.client.chat(&messages, &[], params).await?;
        if let Some(usage) = response.usage {
            total_usage = total_usage.add(usage);
        }
        messages.push(ConversationMessage::assistant(&response.content, Vec::new()));

        Ok(CoordinatorResult {
            content: response.content,
            tool_calls: all_tool_calls,
            iterations: self.config.max_iterations + 1,
            finish_reason: FinishReason::MaxIterations,
            total_usage,
            message_history: messages,
        })
    }

    /// Execute tool calls, either in parallel or sequentially based on config.
    async fn execute_tool_calls(
        &self,
        calls: &[ToolCall],
        dispatch: &dyn ToolDispatch,
    ) -> Result<Vec<ToolCallRecord>> {
        let records = if self.config.parallel_execution {
            join_all(calls.iter().map(|call| self.execute_single_tool(call, dispatch))).await
        } else {
            let mut records = Vec::with_capacity(calls.len());
            for call in calls {
                let record = self.execute_single_tool(call, dispatch).await;
                let failed = !record.success;
                records.push(record);
                if failed && self.config.stop_on_error {
                    break;
                }
            }
            records
        };

        if self.config.stop_on_error {
            if let Some(failed) = records.iter().find(|r| !r.success) {
                return Err(AppError::Tool(format!(
                    "{}: {}",
                    failed.name,
                    failed.error.as_deref().unwrap_or("failed")
                )));
            }
        }
        Ok(records)
    }

    /// Execute a single tool call with timeout.
    async fn execute_single_tool(&self, call: &ToolCall, dispatch: &dyn ToolDispatch) -> ToolCallRecord {
        if !dispatch.has_tool(&call.name) {
            tracing::warn!(tool = %call.name, "Model requested a tool that was not offered");
            return ToolCallRecord::failed(call, format!("Unknown tool: {}", call.name), 0);
        }

        let start = Instant::now();
        let result = timeout(self.config.tool_timeout, dispatch.dispatch(call)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(value)) => ToolCallRecord {
                id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
                result: value,
                success: true,
                duration_ms,
                error: None,
            },
            Ok(Err(e)) => {
                tracing::warn!(tool = %call.name, error = %e, "Tool execution failed");
                ToolCallRecord::failed(call, e.to_string(), duration_ms)
            }
            Err(_) => {
                tracing::warn!(tool = %call.name, "Tool execution timed out");
                ToolCallRecord::failed(call, "Tool execution timed out".to_string(), duration_ms)
            }
        }
    }

    pub fn client(&self) -> &dyn LLMClient {
        self.client.as_ref()
    }

    pub fn config(&self) -> &ToolCallingConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::LLMResponse;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct ScriptedClient {
        responses: Mutex<VecDeque<LLMResponse>>,
        offered: Mutex<Vec<usize>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<LLMResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                offered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedClient {
        async fn chat(
            &self,
            _messages: &[ConversationMessage],
            tools: &[ToolDefinition],
            _params: &GenerationParams,
        ) -> Result<LLMResponse> {
            self.offered.lock().push(tools.len());
            self.responses
                .lock()
                .pop_front()
                .ok_or_else(|| AppError::LLM("script exhausted".to_string()))
        }

        async fn chat_json(
            &self,
            _messages: &[ConversationMessage],
            _schema_name: &str,
            _schema: &serde_json::Value,
            _params: &GenerationParams,
        ) -> Result<serde_json::Value> {
            Err(AppError::LLM("not scripted".to_string()))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    struct EchoDispatch;

    #[async_trait]
    impl ToolDispatch for EchoDispatch {
        fn has_tool(&self, name: &str) -> bool {
            name == "echo" || name == "broken" || name == "slow"
        }

        async fn dispatch(&self, call: &ToolCall) -> Result<serde_json::Value> {
            match call.name.as_str() {
                "broken" => Err(AppError::Tool("database offline".to_string())),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(serde_json::json!({}))
                }
                _ => Ok(serde_json::json!({ "echo": call.arguments })),
            }
        }
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: format!("{}-1", name),
            name: name.to_string(),
            arguments: serde_json::json!({"q": "x"}),
        }
    }

    fn definitions() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "echo".to_string(),
            description: "Echo".to_string(),
            parameters: serde_json::json!({"type": "object"}),
        }]
    }

    #[test]
    fn test_tool_calling_config_default() {
        let config = ToolCallingConfig::default();
        assert_eq!(config.max_iterations, 7);
        assert!(!config.parallel_execution);
        assert_eq!(config.tool_timeout, Duration::from_secs(30));
        assert!(!config.stop_on_error);
    }

    #[test]
    fn test_conversation_message_tool_result() {
        let result = serde_json::json!({"result": 42});
        let msg = ConversationMessage::tool_result("call_1", &result);
        assert_eq!(msg.role, MessageRole::Tool);
        assert_eq!(msg.tool_call_id, Some("call_1".to_string()));
        assert!(msg.content.contains("42"));
    }

    #[test]
    fn test_finish_reason_display() {
        assert_eq!(FinishReason::Stop.to_string(), "stop");
        assert_eq!(FinishReason::MaxIterations.to_string(), "max_iterations");
    }

    #[tokio::test]
    async fn test_tool_result_fed_back() {
        let client = Arc::new(ScriptedClient::new(vec![
            LLMResponse::with_tool_calls(vec![call("echo")]),
            LLMResponse::text("done"),
        ]));
        let coordinator = ToolCoordinator::with_defaults(client.clone());
        let result = coordinator
            .execute(
                vec![ConversationMessage::user("hi")],
                &definitions(),
                &EchoDispatch,
                &GenerationParams::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.content, "done");
        assert_eq!(result.iterations, 2);
        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert!(result.tool_calls[0].success);
        let tool_msg = &result.message_history[2];
        assert_eq!(tool_msg.role, MessageRole::Tool);
        assert!(tool_msg.content.contains("echo"));
    }

    #[tokio::test]
    async fn test_failing_and_unknown_tools_reported_to_model() {
        let client = Arc::new(ScriptedClient::new(vec![
            LLMResponse::with_tool_calls(vec![call("broken"), call("missing")]),
            LLMResponse::text("sorry"),
        ]));
        let coordinator = ToolCoordinator::with_defaults(client);
        let result = coordinator
            .execute(
                vec![ConversationMessage::user("hi")],
                &definitions(),
                &EchoDispatch,
                &GenerationParams::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.content, "sorry");
        assert_eq!(result.tool_calls.len(), 2);
        assert!(result.tool_calls.iter().all(|r| !r.success));
        assert!(result.tool_calls[0].result["error"]
            .as_str()
            .unwrap()
            .contains("database offline"));
        assert!(result.tool_calls[1].result["error"]
            .as_str()
            .unwrap()
            .contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_stop_on_error_aborts() {
        let client = Arc::new(ScriptedClient::new(vec![LLMResponse::with_tool_calls(vec![
            call("broken"),
        ])]));
        let config = ToolCallingConfig {
            stop_on_error: true,
            ..Default::default()
        };
        let coordinator = ToolCoordinator::new(client, config);
        let err = coordinator
            .execute(
                vec![ConversationMessage::user("hi")],
                &definitions(),
                &EchoDispatch,
                &GenerationParams::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Tool(_)));
    }

    #[tokio::test]
    async fn test_tool_timeout() {
        let client = Arc::new(ScriptedClient::new(vec![
            LLMResponse::with_tool_calls(vec![call("slow")]),
            LLMResponse::text("gave up"),
        ]));
        let config = ToolCallingConfig {
            tool_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let coordinator = ToolCoordinator::new(client, config);
        let result = coordinator
            .execute(
                vec![ConversationMessage::user("hi")],
                &definitions(),
                &EchoDispatch,
                &GenerationParams::default(),
            )
            .await
            .unwrap();
        assert_eq!(
            result.tool_calls[0].error.as_deref(),
            Some("Tool execution timed out")
        );
    }

    #[tokio::test]
    async fn test_max_iterations_forces_final_answer_without_tools() {
        let client = Arc::new(ScriptedClient::new(vec![
            LLMResponse::with_tool_calls(vec![call("echo")]),
            LLMResponse::with_tool_calls(vec![call("echo")]),
            LLMResponse::text("final"),
        ]));
        let config = ToolCallingConfig {
            max_iterations: 2,
            parallel_execution: true,
            ..Default::default()
        };
        let coordinator = ToolCoordinator::new(client.clone(), config);
        let result = coordinator
            .execute(
                vec![ConversationMessage::user("hi")],
                &definitions(),
                &EchoDispatch,
                &GenerationParams::default(),
            )
            .await
            .unwrap();

        assert_eq!(result.content, "final");
        assert_eq!(result.finish_reason, FinishReason::MaxIterations);
        assert_eq!(result.tool_calls.len(), 2);
        assert_eq!(*client.offered.lock(), vec![1, 1, 0]);
    }
}
