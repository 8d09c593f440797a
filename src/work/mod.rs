//! Work execution: items, sets, serial shard queues and the coordinator.

pub mod coordinator;
pub mod item;
pub mod policy;
pub mod queue;
pub mod report;
pub mod set;

pub use coordinator::{ExecutionCoordinator, PlanExecution, QueueLookup};
pub use item::{DirtyPaths, WorkItem, WorkKind};
pub use policy::{CommitStrategy, RefreshStrategy};
pub use queue::{QueueConfig, QueueState, SerialWorkQueue};
pub use report::{
    EntityIndexingFailureContext, ExecutionReport, FailureContext, FailureHandler,
    LoggingFailureHandler,
};
pub use set::{WorkSet, WorkSetCompletion};
