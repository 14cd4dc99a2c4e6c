//! LLM-driven candidate selection with strict ID validation.
//!
//! The selector asks the completion service for a structured
//! `{"agent_id": "..."}` object and accepts the answer only when it is a
//! well-formed [`ObjectId`] of one of the offered candidates. It never
//! returns an error: an empty candidate list or an invalid answer means "no
//! selection", and a failing completion call falls back to the candidate
//! with the lowest priority.

use crate::hierarchy::{Agent, ObjectId};
use crate::llm::{CompletionService, GenerationParams, StructuredRequest};
use schemars::JsonSchema;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

/// Decoding temperature for selection calls.
pub const SELECTION_TEMPERATURE: f32 = 0.1;

/// Which tier is being chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    /// A department under the router.
    Organization,
    /// A specialist under a department.
    Specialist,
}

impl SelectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionKind::Organization => "organization",
            SelectionKind::Specialist => "specialist",
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            SelectionKind::Organization => "department",
            SelectionKind::Specialist => "specialist",
        }
    }
}

impl fmt::Display for SelectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shape the model must return.
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SelectionOutput {
    /// ID of the chosen candidate, copied exactly from the list.
    pub agent_id: String,
}

/// JSON schema for [`SelectionOutput`].
pub fn selection_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(SelectionOutput))
        .unwrap_or_else(|_| {
            serde_json::json!({
                "type": "object",
                "properties": { "agent_id": { "type": "string" } },
                "required": ["agent_id"],
                "additionalProperties": false
            })
        })
}

/// Candidate with the lowest priority value. Ties keep input order.
pub fn fallback_candidate(candidates: &[Agent]) -> Option<&Agent> {
    candidates
        .iter()
        .enumerate()
        .min_by_key(|(idx, agent)| (agent.priority, *idx))
        .map(|(_, agent)| agent)
}

/// Validate a model-returned ID against the candidate set.
pub fn validate_choice<'a>(raw: &str, candidates: &'a [Agent]) -> Option<&'a Agent> {
    let raw = raw.trim();
    if raw.is_empty() || !ObjectId::is_valid(raw) {
        return None;
    }
    candidates.iter().find(|agent| agent.id.as_str() == raw)
}

fn describe(candidate: &Agent, kind: SelectionKind) -> String {
    match candidate.persona_text() {
        Some(persona) => persona.to_string(),
        None => match kind {
            SelectionKind::Organization => format!(
                "Principal agent of department {}",
                candidate
                    .organization_id
                    .as_deref()
                    .unwrap_or(candidate.name.as_str())
            ),
            SelectionKind::Specialist => format!("Specialist in {}", candidate.name),
        },
    }
}

/// Build the selection prompt shown to the orchestrating agent.
pub fn selection_prompt(
    orchestrator: &Agent,
    candidates: &[Agent],
    message: &str,
    kind: SelectionKind,
) -> String {
    let options = candidates
        .iter()
        .map(|c| format!("- ID: {} | Name: {} | {}", c.id, c.name, describe(c, kind)))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are {name}, routing customer messages to the most suitable {noun}.\n\n\
         Customer message: \"{message}\"\n\n\
         Available options:\n{options}\n\n\
         Reply with the ID of the {noun} best suited to handle this message. \
         Use an ID exactly as listed.",
        name = orchestrator.name,
        noun = kind.noun(),
        message = message,
        options = options,
    )
}

/// Picks at most one candidate for a message.
#[derive(Clone)]
pub struct AgentSelector {
    completion: Arc<dyn CompletionService>,
}

impl AgentSelector {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    pub async fn select(
        &self,
        orchestrator: &Agent,
        candidates: &[Agent],
        message: &str,
        kind: SelectionKind,
    ) -> Option<Agent> {
        match candidates {
            [] => {
                tracing::debug!(kind = %kind, "No candidates to select from");
                return None;
            }
            [only] => {
                tracing::debug!(kind = %kind, agent = %only.id, "Single candidate, skipping model call");
                return Some(only.clone());
            }
            _ => {}
        }

        let params = GenerationParams::from_config(orchestrator.config.as_ref())
            .with_temperature(SELECTION_TEMPERATURE);
        let request = StructuredRequest {
            system: orchestrator.persona_text().map(str::to_string),
            prompt: selection_prompt(orchestrator, candidates, message, kind),
            params,
            schema_name: "agent_selection".to_string(),
            schema: selection_schema(),
        };

        let value = match self.completion.generate_structured(request).await {
            Ok(value) => value,
            Err(e) => {
                let fallback = fallback_candidate(candidates);
                tracing::warn!(
                    kind = %kind,
                    error = %e,
                    fallback = ?fallback.map(|a| a.id.as_str()),
                    "Selection call failed, using priority fallback"
                );
                return fallback.cloned();
            }
        };

        let raw = match serde_json::from_value::<SelectionOutput>(value.clone()) {
            Ok(output) => output.agent_id,
            Err(_) => {
                tracing::warn!(kind = %kind, output = %value, "Selection output has the wrong shape");
                return None;
            }
        };

        match validate_choice(&raw, candidates) {
            Some(agent) => {
                tracing::info!(kind = %kind, agent = %agent.id, name = %agent.name, "Candidate selected");
                Some(agent.clone())
            }
            None => {
                tracing::warn!(kind = %kind, returned = %raw, "Model returned an invalid or unknown ID");
                None
            }
        }
    }
}
