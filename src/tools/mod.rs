//! Tool execution for agent turns
//!
//! # Module Structure
//!
//! - [`executor`](crate::tools::executor) - `ToolExecutor` trait and the kind-dispatching executor
//! - [`database`](crate::tools::database) - search/create/update over a libsql table
//! - [`http`](crate::tools::http) - outbound API calls and webhooks
//! - [`registry`](crate::tools::registry) - named sub-flows
//!
//! # Example
//!
//! ```ignore
//! let executor = KindToolExecutor::new()
//!     .with_handler(ToolKind::Database, Arc::new(DatabaseToolHandler::new(store.connection())))
//!     .with_handler(ToolKind::Api, Arc::new(HttpToolHandler::api(timeout)?))
//!     .with_handler(ToolKind::Webhook, Arc::new(HttpToolHandler::webhook(timeout)?));
//! let rows = executor.execute(&tool, json!({"query": "shoes"}), None).await?;
//! ```

pub mod database;
pub mod executor;
pub mod http;
pub mod registry;

pub use database::DatabaseToolHandler;
pub use executor::{merge_config, system_tools, KindToolExecutor, ToolExecutor, ToolHandler};
pub use http::HttpToolHandler;
pub use registry::{Subflow, SubflowHandler, SubflowRegistry};
