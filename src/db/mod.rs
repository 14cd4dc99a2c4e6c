//! Agent hierarchy and execution log storage.
//!
//! - [`InMemoryStore`]: lock-guarded arena, for embedding and tests
//! - [`TursoStore`]: libsql (local SQLite file, `:memory:`, or remote Turso)
//!
//! Enable remote Turso via Cargo features:
//! ```toml
//! switchboard = { version = "*", features = ["turso"] }
//! ```

pub mod memory;
pub mod traits;
pub mod turso;

pub use memory::InMemoryStore;
pub use traits::{AgentRepository, DatabaseProvider, ExecutionStore, HierarchyStore};
pub use turso::TursoStore;
