//! # switchboard - hierarchical agent routing
//!
//! Routes each inbound chat message through a three-tier agent hierarchy
//! (Router, Department, Specialist) and returns one final reply, writing an
//! execution record of the decision chain for every request.
//!
//! ## Overview
//!
//! switchboard can be used in two ways:
//!
//! 1. **As a CLI** - Run the `switchboard` binary
//! 2. **As a library** - Build a [`FlowContext`] and call [`HierarchicalFlow::handle`]
//!
//! ### Basic Example
//!
//! ```rust,ignore
//! use switchboard::{FlowContext, HierarchicalFlow, InboundMessage};
//! use switchboard::db::DatabaseProvider;
//! use switchboard::hierarchy::ScopeId;
//! use switchboard::llm::{LlmCompletionService, Provider, ToolCallingConfig};
//! use std::sync::Arc;
//!
//! let store = Arc::new(DatabaseProvider::Memory.create_store().await?);
//! let client = Provider::Ollama {
//!     base_url: "http://localhost:11434".to_string(),
//!     model: "llama3.2".to_string(),
//! }
//! .create_client(std::time::Duration::from_secs(60))?;
//!
//! let context = FlowContext::builder()
//!     .repository(store.clone())
//!     .executions(store)
//!     .completion(Arc::new(LlmCompletionService::new(client, ToolCallingConfig::default())))
//!     .tools(Arc::new(switchboard::tools::KindToolExecutor::new()))
//!     .build()?;
//!
//! let flow = HierarchicalFlow::new(context);
//! let outcome = flow
//!     .handle(InboundMessage::new(ScopeId::new("store-1")?, "Do you sell sneakers?"))
//!     .await?;
//! println!("{}", outcome.reply);
//! ```
//!
//! ## Modules
//!
//! - [`hierarchy`] - agents, tools, IDs and the agent arena
//! - [`db`] - repository traits, in-memory and libsql stores
//! - [`llm`] - provider client, tool coordinator, completion service
//! - [`tools`] - tool execution by kind
//! - [`memory`] - bounded conversation history
//! - [`agents`] - selector, specialist executor, refiner, logger and the flow
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | (default) | Local libsql file or in-memory database |
//! | `turso` | Remote Turso database |

pub mod agents;
pub mod cli;
pub mod db;
pub mod hierarchy;
pub mod llm;
pub mod memory;
pub mod tools;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use agents::{
    FlowContext, FlowContextBuilder, FlowOutcome, FlowSettings, HierarchicalFlow, InboundMessage,
};
pub use db::{AgentRepository, ExecutionStore, HierarchyStore, InMemoryStore, TursoStore};
pub use hierarchy::{Agent, AgentKind, ObjectId, ScopeId};
pub use llm::{CompletionService, LLMClient, LlmCompletionService, Provider};
pub use tools::ToolExecutor;
pub use types::{AppError, FlowError, Result};
pub use utils::toml_config::{ConfigManager, SwitchboardConfig};
