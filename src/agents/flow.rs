//! The hierarchical flow: router, department, specialist, refinement, log.
//!
//! ```text
//! Start -> RouterResolved -> DepartmentResolved? -> SpecialistResolved? -> Responded -> Logged
//! ```
//!
//! Each inbound message runs one flow. The body is bounded by the request
//! timeout and can be cancelled by the caller; whatever happens, exactly one
//! execution record is written, carrying the agents visited so far.

use super::execution_log::{
    ChainEntry, ExecutionLogger, ExecutionRecord, ToolUsage, DEFAULT_LOG_TIMEOUT,
};
use super::refinement::{RefinementPolicy, Refiner};
use super::selector::{AgentSelector, SelectionKind};
use super::specialist::{SpecialistExecutor, SpecialistReply};
use crate::db::{AgentRepository, ExecutionStore};
use crate::hierarchy::{Agent, ObjectId, ScopeId};
use crate::llm::CompletionService;
use crate::memory::{Author, ConversationHistory};
use crate::tools::ToolExecutor;
use crate::types::{AppError, FlowError, Result};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Runtime knobs for the flow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSettings {
    /// Upper bound on everything before logging.
    pub request_timeout: Duration,
    /// Upper bound on the execution record write.
    pub log_timeout: Duration,
    pub refinement: RefinementPolicy,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(120),
            log_timeout: DEFAULT_LOG_TIMEOUT,
            refinement: RefinementPolicy::default(),
        }
    }
}

/// A message to answer.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub scope_id: ScopeId,
    pub text: String,
    /// History key; defaults to the scope.
    pub conversation_id: Option<String>,
}

impl InboundMessage {
    pub fn new(scope_id: ScopeId, text: impl Into<String>) -> Self {
        Self {
            scope_id,
            text: text.into(),
            conversation_id: None,
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn history_key(&self) -> &str {
        self.conversation_id
            .as_deref()
            .unwrap_or_else(|| self.scope_id.as_str())
    }
}

/// A successful flow.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowOutcome {
    pub reply: String,
    /// `None` when the execution record could not be written.
    pub execution_id: Option<ObjectId>,
    pub chain: Vec<ChainEntry>,
    /// The agent whose turn produced the reply.
    pub responder: ChainEntry,
}

/// Dependencies of a flow, built once at start-up and shared.
#[derive(Clone)]
pub struct FlowContext {
    pub repository: Arc<dyn AgentRepository>,
    pub executions: Arc<dyn ExecutionStore>,
    pub completion: Arc<dyn CompletionService>,
    pub tools: Arc<dyn ToolExecutor>,
    pub history: Option<Arc<dyn ConversationHistory>>,
    pub settings: FlowSettings,
}

impl FlowContext {
    pub fn builder() -> FlowContextBuilder {
        FlowContextBuilder::new()
    }
}

/// Builder for [`FlowContext`].
#[derive(Default)]
pub struct FlowContextBuilder {
    repository: Option<Arc<dyn AgentRepository>>,
    executions: Option<Arc<dyn ExecutionStore>>,
    completion: Option<Arc<dyn CompletionService>>,
    tools: Option<Arc<dyn ToolExecutor>>,
    history: Option<Arc<dyn ConversationHistory>>,
    settings: FlowSettings,
}

impl FlowContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repository(mut self, repository: Arc<dyn AgentRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn executions(mut self, executions: Arc<dyn ExecutionStore>) -> Self {
        self.executions = Some(executions);
        self
    }

    pub fn completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn tools(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn history(mut self, history: Arc<dyn ConversationHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn settings(mut self, settings: FlowSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> Result<FlowContext> {
        let missing = |what: &str| AppError::Configuration(format!("{} is required for FlowContext", what));
        Ok(FlowContext {
            repository: self.repository.ok_or_else(|| missing("an agent repository"))?,
            executions: self.executions.ok_or_else(|| missing("an execution store"))?,
            completion: self.completion.ok_or_else(|| missing("a completion service"))?,
            tools: self.tools.ok_or_else(|| missing("a tool executor"))?,
            history: self.history,
            settings: self.settings,
        })
    }
}

/// What the flow has seen so far. Survives timeout and cancellation.
#[derive(Default)]
struct FlowTrace {
    origin: Option<ObjectId>,
    chain: Vec<ChainEntry>,
    tools_used: Vec<ToolUsage>,
}

impl FlowTrace {
    fn visit(&mut self, agent: &Agent) {
        if self.chain.is_empty() {
            self.origin = Some(agent.id.clone());
        }
        self.chain.push(agent.into());
    }

    fn record_tools(&mut self, agent: &Agent, reply: &SpecialistReply) {
        self.tools_used
            .extend(reply.tool_calls.iter().map(|call| ToolUsage {
                agent_id: agent.id.clone(),
                tool: call.name.clone(),
                success: call.success,
            }));
    }
}

struct Answer {
    reply: String,
    responder: ChainEntry,
}

/// Answers inbound messages through the agent hierarchy.
#[derive(Clone)]
pub struct HierarchicalFlow {
    repository: Arc<dyn AgentRepository>,
    history: Option<Arc<dyn ConversationHistory>>,
    selector: AgentSelector,
    executor: SpecialistExecutor,
    refiner: Refiner,
    logger: ExecutionLogger,
    settings: FlowSettings,
}

impl HierarchicalFlow {
    pub fn new(context: FlowContext) -> Self {
        Self {
            selector: AgentSelector::new(context.completion.clone()),
            executor: SpecialistExecutor::new(context.completion.clone(), context.tools.clone()),
            refiner: Refiner::new(context.completion),
            logger: ExecutionLogger::new(context.executions)
                .with_timeout(context.settings.log_timeout),
            repository: context.repository,
            history: context.history,
            settings: context.settings,
        }
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    pub async fn handle(&self, message: InboundMessage) -> std::result::Result<FlowOutcome, FlowError> {
        self.handle_with_cancel(message, std::future::pending::<()>())
            .await
    }

    /// Like [`handle`](Self::handle), but stops early when `cancel` resolves.
    ///
    /// The in-flight completion or tool call is dropped and a failed
    /// execution record is still written.
    pub async fn handle_with_cancel<C>(
        &self,
        message: InboundMessage,
        cancel: C,
    ) -> std::result::Result<FlowOutcome, FlowError>
    where
        C: Future<Output = ()> + Send,
    {
        let span = tracing::info_span!("flow", scope = %message.scope_id);
        self.execute(message, cancel).instrument(span).await
    }

    async fn execute<C>(
        &self,
        message: InboundMessage,
        cancel: C,
    ) -> std::result::Result<FlowOutcome, FlowError>
    where
        C: Future<Output = ()> + Send,
    {
        let started = Instant::now();
        let trace = Mutex::new(FlowTrace::default());
        tracing::info!(chars = message.text.len(), "Flow started");

        let result = {
            let body = self.run(&message, &trace);
            tokio::pin!(body);
            tokio::pin!(cancel);
            tokio::select! {
                result = &mut body => result,
                _ = &mut cancel => Err(AppError::Cancelled("request cancelled by caller".to_string())),
                _ = tokio::time::sleep(self.settings.request_timeout) => Err(AppError::Timeout(format!(
                    "flow exceeded {} ms",
                    self.settings.request_timeout.as_millis()
                ))),
            }
        };

        let trace = trace.into_inner();
        let mut record = ExecutionRecord::new(message.scope_id.clone(), &message.text);
        record.origin_agent_id = trace.origin;
        record.chain = trace.chain;
        record.tools_used = trace.tools_used;
        record.duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(answer) => {
                record.success = true;
                record.final_response = Some(answer.reply.clone());
                self.remember(&message, &answer.reply).await;

                let chain = record.chain.clone();
                let execution_id = self.logger.log(record).await.map(|r| r.id);
                tracing::info!(
                    responder = %answer.responder.name,
                    hops = chain.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Flow completed"
                );
                Ok(FlowOutcome {
                    reply: answer.reply,
                    execution_id,
                    chain,
                    responder: answer.responder,
                })
            }
            Err(e) => {
                record.error_message = Some(e.to_string());
                tracing::warn!(error = %e, hops = record.chain.len(), "Flow failed");
                let execution_id = self.logger.log(record).await.map(|r| r.id);
                Err(FlowError::new(e, execution_id))
            }
        }
    }

    async fn run(&self, message: &InboundMessage, trace: &Mutex<FlowTrace>) -> Result<Answer> {
        let scope = &message.scope_id;
        let text = message.text.as_str();

        let router = self
            .repository
            .get_router(scope)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no active router for scope '{}'", scope)))?;
        trace.lock().visit(&router);
        tracing::info!(router = %router.id, name = %router.name, "Router resolved");

        let history = self.rendered_history(message).await;

        let departments = self.repository.get_departments(scope).await?;
        if departments.is_empty() {
            tracing::info!("No departments, router answers directly");
            return Ok(self.answer(&router, &router, text, &history, trace).await);
        }

        let Some(department) = self
            .selector
            .select(&router, &departments, text, SelectionKind::Organization)
            .await
        else {
            tracing::info!("No department selected, router answers directly");
            return Ok(self.answer(&router, &router, text, &history, trace).await);
        };
        trace.lock().visit(&department);
        tracing::info!(department = %department.id, name = %department.name, "Department resolved");

        let specialists = self.repository.get_specialists(&department.id).await?;
        let specialist = if specialists.is_empty() {
            None
        } else {
            self.selector
                .select(&department, &specialists, text, SelectionKind::Specialist)
                .await
        };

        match specialist {
            Some(specialist) => {
                trace.lock().visit(&specialist);
                tracing::info!(specialist = %specialist.id, name = %specialist.name, "Specialist resolved");
                Ok(self.answer(&router, &specialist, text, &history, trace).await)
            }
            None => {
                tracing::info!(department = %department.id, "No specialist, department answers directly");
                Ok(self.answer(&router, &department, text, &history, trace).await)
            }
        }
    }

    /// Run the responder's turn and, when the policy says so, the router's review.
    async fn answer(
        &self,
        router: &Agent,
        responder: &Agent,
        text: &str,
        history: &str,
        trace: &Mutex<FlowTrace>,
    ) -> Answer {
        let reply = self.executor.run(responder, text, history).await;
        trace.lock().record_tools(responder, &reply);

        let final_reply = if self.settings.refinement.applies_to(responder.kind) {
            self.refiner.refine(router, text, &reply.text).await
        } else {
            reply.text
        };

        Answer {
            reply: final_reply,
            responder: responder.into(),
        }
    }

    async fn rendered_history(&self, message: &InboundMessage) -> String {
        let Some(history) = &self.history else {
            return String::new();
        };
        match history.render(message.history_key()).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Could not load conversation history");
                String::new()
            }
        }
    }

    async fn remember(&self, message: &InboundMessage, reply: &str) {
        let Some(history) = &self.history else {
            return;
        };
        let key = message.history_key();
        let appended = match history.append(key, Author::User, &message.text).await {
            Ok(()) => history.append(key, Author::Agent, reply).await,
            Err(e) => Err(e),
        };
        if let Err(e) = appended {
            tracing::warn!(error = %e, "Could not update conversation history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_key_defaults_to_scope() {
        let scope = ScopeId::new("instance-1").unwrap();
        let message = InboundMessage::new(scope.clone(), "hi");
        assert_eq!(message.history_key(), "instance-1");
        assert_eq!(message.with_conversation("5511999").history_key(), "5511999");
    }

    #[test]
    fn test_trace_origin_is_first_visit() {
        let scope = ScopeId::new("s").unwrap();
        let router = Agent::router(&scope, "Router", "");
        let dept = Agent::department(&router, "Default", "Support", "");

        let mut trace = FlowTrace::default();
        trace.visit(&router);
        trace.visit(&dept);
        assert_eq!(trace.origin, Some(router.id.clone()));
        assert_eq!(trace.chain.len(), 2);
    }

    #[test]
    fn test_builder_requires_collaborators() {
        let err = FlowContext::builder().build().err().unwrap();
        assert!(err.to_string().contains("agent repository"));
    }
}
