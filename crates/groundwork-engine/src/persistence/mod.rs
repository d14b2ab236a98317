//! Persistence for the engine
//!
//! Trait-based so the executor, queue and orchestrator are testable in
//! isolation: `PostgresPlatformStore` for production, `InMemoryPlatformStore`
//! for unit tests.

mod memory;
mod postgres;
mod store;

pub use memory::InMemoryPlatformStore;
pub use postgres::PostgresPlatformStore;
pub use store::{
    ExecutionFilter, ExecutionRecord, ExecutionStatus, ExecutionStore, NewExecution, NewQueueTask,
    NewResource, NewStep, Page, PlatformStore, QueueStats, QueueStore, QueueTaskRecord,
    ResourceRecord, ResourceStore, StepRecord, StepStatus, StoreError, TaskStatus,
    TransitionRecord,
};
