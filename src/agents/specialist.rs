//! Runs one agent's turn: persona, history and message in, reply out.
//!
//! The agent's active tool bindings are offered to the completion service in
//! a single tool-calling turn. Tool failures are fed back to the model by the
//! coordinator; a failing completion call is answered with the agent's
//! fallback message instead of an error.

use crate::hierarchy::{Agent, ToolBinding};
use crate::llm::{CompletionService, GenerationParams, TextRequest, ToolCallRecord, ToolDispatch};
use crate::tools::ToolExecutor;
use crate::types::{AppError, Result, ToolCall, ToolDefinition};
use async_trait::async_trait;
use std::sync::Arc;

/// Persona used when an agent has none.
pub const DEFAULT_PERSONA: &str = "You are a helpful and friendly assistant.";

/// Reply used when generation fails and the agent has no fallback message.
pub const GENERIC_FALLBACK: &str =
    "Sorry, I can't help with that right now. Please try again later.";

/// Outcome of one agent turn.
#[derive(Debug, Clone, Default)]
pub struct SpecialistReply {
    pub text: String,
    /// The reply is a fallback message, not model output.
    pub used_fallback: bool,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Tool definitions for the agent's active bindings.
pub fn tool_definitions(agent: &Agent) -> Vec<ToolDefinition> {
    agent
        .active_tools()
        .map(|binding| ToolDefinition {
            name: binding.tool.name.clone(),
            description: binding.tool.description.clone(),
            parameters: binding.tool.parameters.clone(),
        })
        .collect()
}

/// System block: optional instruction override followed by the persona.
pub fn system_prompt(agent: &Agent) -> String {
    let persona = agent.persona_text().unwrap_or(DEFAULT_PERSONA);
    match agent
        .config
        .as_ref()
        .and_then(|c| c.system_prompt.as_deref())
        .filter(|s| !s.trim().is_empty())
    {
        Some(instructions) => format!("{}\n\nPersona: {}", instructions, persona),
        None => persona.to_string(),
    }
}

/// User block: rendered history (possibly empty) then the current message.
pub fn user_prompt(history: &str, message: &str) -> String {
    format!("{}\nRespond to the customer's message: \"{}\"", history, message)
}

/// Routes model tool calls to the agent's bindings.
pub struct BindingDispatch<'a> {
    bindings: Vec<&'a ToolBinding>,
    executor: &'a dyn ToolExecutor,
}

impl<'a> BindingDispatch<'a> {
    pub fn new(agent: &'a Agent, executor: &'a dyn ToolExecutor) -> Self {
        Self {
            bindings: agent.active_tools().collect(),
            executor,
        }
    }

    fn binding(&self, name: &str) -> Option<&'a ToolBinding> {
        self.bindings.iter().copied().find(|b| b.tool.name == name)
    }
}

#[async_trait]
impl ToolDispatch for BindingDispatch<'_> {
    fn has_tool(&self, name: &str) -> bool {
        self.binding(name).is_some()
    }

    async fn dispatch(&self, call: &ToolCall) -> Result<serde_json::Value> {
        let binding = self
            .binding(&call.name)
            .ok_or_else(|| AppError::Tool(format!("tool '{}' is not bound to this agent", call.name)))?;
        tracing::debug!(tool = %call.name, kind = %binding.tool.kind, "Executing tool");
        self.executor
            .execute(&binding.tool, call.arguments.clone(), binding.config.clone())
            .await
    }
}

/// Runs agent turns against a completion service and a tool executor.
#[derive(Clone)]
pub struct SpecialistExecutor {
    completion: Arc<dyn CompletionService>,
    tools: Arc<dyn ToolExecutor>,
}

impl SpecialistExecutor {
    pub fn new(completion: Arc<dyn CompletionService>, tools: Arc<dyn ToolExecutor>) -> Self {
        Self { completion, tools }
    }

    pub async fn run(&self, agent: &Agent, message: &str, history: &str) -> SpecialistReply {
        let definitions = tool_definitions(agent);
        let dispatch = BindingDispatch::new(agent, self.tools.as_ref());

        let mut request = TextRequest::new(user_prompt(history, message))
            .with_system(system_prompt(agent))
            .with_params(GenerationParams::from_config(agent.config.as_ref()));
        if !definitions.is_empty() {
            request = request.with_tools(definitions, &dispatch);
        }

        tracing::debug!(
            agent = %agent.id,
            name = %agent.name,
            tools = request.tools.len(),
            "Running agent turn"
        );

        match self.completion.generate_text(request).await {
            Ok(completion) if !completion.text.trim().is_empty() => SpecialistReply {
                text: completion.text,
                used_fallback: false,
                tool_calls: completion.tool_calls,
            },
            Ok(completion) => {
                tracing::warn!(agent = %agent.id, "Model returned an empty reply, using fallback");
                SpecialistReply {
                    text: fallback_text(agent),
                    used_fallback: true,
                    tool_calls: completion.tool_calls,
                }
            }
            Err(e) => {
                tracing::warn!(agent = %agent.id, error = %e, "Agent turn failed, using fallback");
                SpecialistReply {
                    text: fallback_text(agent),
                    used_fallback: true,
                    tool_calls: Vec::new(),
                }
            }
        }
    }
}

fn fallback_text(agent: &Agent) -> String {
    agent.fallback_message().unwrap_or(GENERIC_FALLBACK).to_string()
}
