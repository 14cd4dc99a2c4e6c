//! The router's review pass over a delegate's reply.

use crate::hierarchy::{Agent, AgentKind};
use crate::llm::{CompletionService, GenerationParams, TextRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// When the router reviews a delegate's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementPolicy {
    /// Only specialist replies are reviewed.
    #[default]
    SpecialistOnly,
    /// Department replies are reviewed too.
    AnyDelegate,
}

impl RefinementPolicy {
    /// Whether a reply from an agent of `responder` kind is reviewed.
    pub fn applies_to(&self, responder: AgentKind) -> bool {
        match responder {
            AgentKind::Router => false,
            AgentKind::Parent => matches!(self, RefinementPolicy::AnyDelegate),
            AgentKind::Child => true,
        }
    }
}

pub fn refinement_prompt(original_message: &str, candidate: &str) -> String {
    format!(
        "A member of your team drafted the reply below to a customer. Review it for \
         clarity, tone and completeness. If it is already good, return it unchanged; \
         otherwise return an improved version. Return only the final reply text.\n\n\
         Customer message: \"{}\"\n\n\
         Draft reply:\n{}",
        original_message, candidate
    )
}

/// Runs the review pass. Never fails: on error the draft is returned as is.
#[derive(Clone)]
pub struct Refiner {
    completion: Arc<dyn CompletionService>,
}

impl Refiner {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    pub async fn refine(&self, top: &Agent, original_message: &str, candidate: &str) -> String {
        let mut request = TextRequest::new(refinement_prompt(original_message, candidate))
            .with_params(GenerationParams::from_config(top.config.as_ref()));
        if let Some(persona) = top.persona_text() {
            request = request.with_system(persona);
        }

        match self.completion.generate_text(request).await {
            Ok(completion) if !completion.text.trim().is_empty() => {
                tracing::debug!(agent = %top.id, changed = completion.text != candidate, "Reply refined");
                completion.text
            }
            Ok(_) => {
                tracing::warn!(agent = %top.id, "Refinement returned nothing, keeping draft");
                candidate.to_string()
            }
            Err(e) => {
                tracing::warn!(agent = %top.id, error = %e, "Refinement failed, keeping draft");
                candidate.to_string()
            }
        }
    }
}
