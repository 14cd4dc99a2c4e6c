pub mod execution_log;
pub mod flow;
pub mod refinement;
pub mod selector;
pub mod specialist;

// Re-export commonly used types
pub use execution_log::{ChainEntry, ExecutionLogger, ExecutionRecord, ToolUsage};
pub use flow::{
    FlowContext, FlowContextBuilder, FlowOutcome, FlowSettings, HierarchicalFlow, InboundMessage,
};
pub use refinement::{RefinementPolicy, Refiner};
pub use selector::{AgentSelector, SelectionKind};
pub use specialist::{BindingDispatch, SpecialistExecutor, SpecialistReply};
