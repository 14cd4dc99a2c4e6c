//! LLM provider clients and the completion service
//!
//! # Architecture
//!
//! - [`LLMClient`] - provider trait (chat turn, JSON-schema turn)
//! - [`OpenAICompatibleClient`] - reqwest client for `/chat/completions` endpoints
//! - [`ToolCoordinator`] - multi-turn tool loop over any client
//! - [`CompletionService`] - what the agents call: free text (optionally with
//!   tools) or a structured object
//!
//! # Example
//!
//! ```ignore
//! use switchboard::llm::{LlmCompletionService, Provider, TextRequest};
//!
//! let client = Provider::Ollama {
//!     base_url: "http://localhost:11434".into(),
//!     model: "llama3.2".into(),
//! }
//! .create_client(Duration::from_secs(60))?;
//! let service = LlmCompletionService::new(client, ToolCallingConfig::default());
//! let completion = service.generate_text(TextRequest::new("What is 2+2?")).await?;
//! println!("{}", completion.text);
//! ```

pub mod client;
pub mod completion;
pub mod coordinator;
pub mod openai;

pub use client::{GenerationParams, LLMClient, LLMResponse, Provider, TokenUsage};
pub use completion::{
    Completion, CompletionService, LlmCompletionService, StructuredRequest, TextRequest,
};
pub use coordinator::{
    ConversationMessage, MessageRole, ToolCallRecord, ToolCallingConfig, ToolCoordinator,
    ToolDispatch,
};
pub use openai::OpenAICompatibleClient;
