//! Mock implementations for testing.
//!
//! Hand-written doubles for the completion service, the LLM client and the
//! execution store, plus a `mockall` tool executor, shared across the
//! integration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard::agents::ExecutionRecord;
use switchboard::db::{ExecutionStore, InMemoryStore};
use switchboard::hierarchy::{ObjectId, ScopeId, Tool};
use switchboard::llm::{
    Completion, CompletionService, ConversationMessage, GenerationParams, LLMClient, LLMResponse,
    StructuredRequest, TextRequest,
};
use switchboard::tools::ToolExecutor;
use switchboard::types::{AppError, Result, ToolCall, ToolDefinition};

/// Completion service with scripted answers.
///
/// Text and structured calls each pop from their own queue. When a queue is
/// empty, text calls return `"default reply"` and structured calls fail,
/// unless the mock was built with [`MockCompletion::failing`].
pub struct MockCompletion {
    texts: Mutex<VecDeque<std::result::Result<String, String>>>,
    structured: Mutex<VecDeque<std::result::Result<Value, String>>>,
    should_fail: bool,
    delay: Option<Duration>,
    pub text_calls: AtomicUsize,
    pub structured_calls: AtomicUsize,
    offered_tools: Mutex<Vec<Vec<String>>>,
    prompts: Mutex<Vec<String>>,
    systems: Mutex<Vec<Option<String>>>,
    temperatures: Mutex<Vec<f32>>,
}

impl MockCompletion {
    pub fn new() -> Self {
        Self {
            texts: Mutex::new(VecDeque::new()),
            structured: Mutex::new(VecDeque::new()),
            should_fail: false,
            delay: None,
            text_calls: AtomicUsize::new(0),
            structured_calls: AtomicUsize::new(0),
            offered_tools: Mutex::new(Vec::new()),
            prompts: Mutex::new(Vec::new()),
            systems: Mutex::new(Vec::new()),
            temperatures: Mutex::new(Vec::new()),
        }
    }

    /// Every call errors.
    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::new()
        }
    }

    pub fn with_text(self, reply: &str) -> Self {
        self.texts.lock().push_back(Ok(reply.to_string()));
        self
    }

    pub fn with_text_error(self, message: &str) -> Self {
        self.texts.lock().push_back(Err(message.to_string()));
        self
    }

    /// Queue a structured answer selecting `id`.
    pub fn with_selection(self, id: &str) -> Self {
        self.structured.lock().push_back(Ok(json!({ "agent_id": id })));
        self
    }

    pub fn with_structured(self, value: Value) -> Self {
        self.structured.lock().push_back(Ok(value));
        self
    }

    pub fn with_structured_error(self, message: &str) -> Self {
        self.structured.lock().push_back(Err(message.to_string()));
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn text_count(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }

    pub fn structured_count(&self) -> usize {
        self.structured_calls.load(Ordering::SeqCst)
    }

    /// Tool names offered on each text call, in call order.
    pub fn offered_tools(&self) -> Vec<Vec<String>> {
        self.offered_tools.lock().clone()
    }

    /// Prompts of every call (text and structured), in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    pub fn systems(&self) -> Vec<Option<String>> {
        self.systems.lock().clone()
    }

    pub fn temperatures(&self) -> Vec<f32> {
        self.temperatures.lock().clone()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for MockCompletion {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CompletionService for MockCompletion {
    async fn generate_text(&self, request: TextRequest<'_>) -> Result<Completion> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        self.offered_tools
            .lock()
            .push(request.tools.iter().map(|t| t.name.clone()).collect());
        self.prompts.lock().push(request.prompt.clone());
        self.systems.lock().push(request.system.clone());
        self.temperatures.lock().push(request.params.temperature);
        self.pause().await;

        if self.should_fail {
            return Err(AppError::LLM("Mock completion failure".to_string()));
        }
        let next = self.texts.lock().pop_front();
        match next {
            Some(Ok(text)) => Ok(Completion {
                text,
                ..Default::default()
            }),
            Some(Err(message)) => Err(AppError::LLM(message)),
            None => Ok(Completion {
                text: "default reply".to_string(),
                ..Default::default()
            }),
        }
    }

    async fn generate_structured(&self, request: StructuredRequest) -> Result<Value> {
        self.structured_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.prompt.clone());
        self.systems.lock().push(request.system.clone());
        self.temperatures.lock().push(request.params.temperature);
        self.pause().await;

        if self.should_fail {
            return Err(AppError::LLM("Mock completion failure".to_string()));
        }
        let next = self.structured.lock().pop_front();
        match next {
            Some(Ok(value)) => Ok(value),
            Some(Err(message)) => Err(AppError::LLM(message)),
            None => Err(AppError::LLM("no scripted structured answer".to_string())),
        }
    }
}

/// LLM client replaying scripted responses and recording what it was sent.
pub struct ScriptedLLMClient {
    responses: Mutex<VecDeque<LLMResponse>>,
    should_fail: bool,
    pub calls: AtomicUsize,
    sent_tools: Mutex<Vec<Vec<String>>>,
    sent_messages: Mutex<Vec<Vec<ConversationMessage>>>,
}

impl ScriptedLLMClient {
    pub fn new(responses: Vec<LLMResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            should_fail: false,
            calls: AtomicUsize::new(0),
            sent_tools: Mutex::new(Vec::new()),
            sent_messages: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            should_fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent_tools(&self) -> Vec<Vec<String>> {
        self.sent_tools.lock().clone()
    }

    pub fn sent_messages(&self) -> Vec<Vec<ConversationMessage>> {
        self.sent_messages.lock().clone()
    }
}

#[async_trait]
impl LLMClient for ScriptedLLMClient {
    async fn chat(
        &self,
        messages: &[ConversationMessage],
        tools: &[ToolDefinition],
        _params: &GenerationParams,
    ) -> Result<LLMResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent_tools
            .lock()
            .push(tools.iter().map(|t| t.name.clone()).collect());
        self.sent_messages.lock().push(messages.to_vec());

        if self.should_fail {
            return Err(AppError::LLM("Mock LLM failure".to_string()));
        }
        Ok(self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| LLMResponse::text("done")))
    }

    async fn chat_json(
        &self,
        _messages: &[ConversationMessage],
        _schema_name: &str,
        _schema: &Value,
        _params: &GenerationParams,
    ) -> Result<Value> {
        Err(AppError::LLM("structured output not scripted".to_string()))
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

/// A tool call as a model would request it.
pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments,
    }
}

/// Execution store whose writes always fail.
#[derive(Default)]
pub struct FailingExecutionStore {
    pub attempts: AtomicUsize,
}

#[async_trait]
impl ExecutionStore for FailingExecutionStore {
    async fn append(&self, _record: ExecutionRecord) -> Result<ExecutionRecord> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(AppError::Database("Mock store failure".to_string()))
    }

    async fn recent(&self, _scope: &ScopeId, _limit: usize) -> Result<Vec<ExecutionRecord>> {
        Ok(Vec::new())
    }
}

mockall::mock! {
    pub Executor {}

    #[async_trait]
    impl ToolExecutor for Executor {
        async fn execute(
            &self,
            tool: &Tool,
            parameters: Value,
            binding_config: Option<Value>,
        ) -> Result<Value>;
    }
}

/// IDs of a store populated by [`build_hierarchy`].
pub struct Hierarchy {
    pub scope: ScopeId,
    pub router: ObjectId,
    /// Departments in creation order.
    pub departments: Vec<ObjectId>,
    /// Specialists per department, in creation order.
    pub specialists: Vec<Vec<ObjectId>>,
}

/// Populate `store` with one router and departments with the given
/// specialist counts. Department `i` has priority `i`; so do specialists.
pub fn build_hierarchy(store: &InMemoryStore, scope: &str, specialists: &[usize]) -> Hierarchy {
    let scope = ScopeId::new(scope).expect("scope");
    store.with_arena(|arena| {
        let router = arena
            .create_router(&scope, "Front Desk", "You are the store's front desk.")
            .expect("router");
        let mut departments = Vec::new();
        let mut children = Vec::new();
        for (i, count) in specialists.iter().enumerate() {
            let dept = arena
                .create_department(
                    &scope,
                    &format!("Org{}", i),
                    &format!("Department {}", i),
                    &format!("Handles topic {}", i),
                    i as i32,
                )
                .expect("department");
            let mut kids = Vec::new();
            for j in 0..*count {
                kids.push(
                    arena
                        .create_specialist(
                            &dept,
                            &format!("Specialist {}.{}", i, j),
                            &format!("Expert in subtopic {}.{}", i, j),
                            j as i32,
                        )
                        .expect("specialist"),
                );
            }
            departments.push(dept);
            children.push(kids);
        }
        Hierarchy {
            scope: scope.clone(),
            router,
            departments,
            specialists: children,
        }
    })
}

/// Shared in-memory store.
pub fn store() -> Arc<InMemoryStore> {
    Arc::new(InMemoryStore::new())
}
