//! # Groundwork Engine
//!
//! The orchestration core of the platform server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    ResourceOrchestrator                      │
//! │  (scans pending resource rows, acquires by CAS, dispatches) │
//! └─────────────────────────────────────────────────────────────┘
//!            │                                       │
//!            ▼                                       ▼
//! ┌──────────────────────┐              ┌──────────────────────┐
//! │   ProviderRegistry    │              │    WorkflowRunner     │
//! │ (type+op → workflow)  │              │ (DAG plan, step run,  │
//! └──────────────────────┘              │  retry, reconstruct)  │
//!                                        └──────────────────────┘
//!                                                   │
//!                                                   ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PlatformStore                           │
//! │   (PostgreSQL: executions, steps, resources, queue tasks)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The `WorkflowQueue` pulls durable task records through the same store,
//! and the `GraphHub` fans execution/resource events out to streaming
//! subscribers per application.

pub mod config;
pub mod executor;
pub mod hub;
pub mod logbuf;
pub mod orchestrator;
pub mod persistence;
pub mod providers;
pub mod queue;
pub mod resolver;
pub mod steps;
pub mod substitute;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::executor::{ExecutionParams, ExecutorError, WorkflowRunner};
    pub use crate::hub::{GraphHub, GraphMessage, GraphSource, HubConfig};
    pub use crate::orchestrator::{OrchestratorConfig, ResourceOrchestrator};
    pub use crate::persistence::{
        ExecutionStatus, ExecutionStore, InMemoryPlatformStore, PlatformStore,
        PostgresPlatformStore, QueueStore, ResourceStore, StepStatus, StoreError, TaskStatus,
    };
    pub use crate::providers::{ProviderError, ProviderRegistry, ResolvedWorkflow};
    pub use crate::queue::{QueueConfig, QueueError, WorkflowQueue};
    pub use crate::resolver::{AdminPolicy, ResolverError, WorkflowResolver};
    pub use crate::steps::{ExecutorRegistry, StepContext, StepError, StepExecutor};
    pub use crate::substitute::SubstitutionContext;
}

pub use config::EngineConfig;
pub use executor::{ExecutionParams, ExecutorError, WorkflowRunner};
pub use hub::{GraphHub, GraphMessage, GraphSource, HubConfig, ResourceGraphSource, Subscription};
pub use orchestrator::{OrchestratorConfig, ResourceOrchestrator};
pub use persistence::{
    ExecutionStatus, ExecutionStore, InMemoryPlatformStore, PlatformStore, PostgresPlatformStore,
    QueueStore, ResourceStore, StepStatus, StoreError, TaskStatus,
};
pub use providers::{ProviderError, ProviderRegistry, ResolvedWorkflow};
pub use queue::{QueueConfig, QueueError, WorkflowQueue};
pub use resolver::{AdminPolicy, ResolverError, WorkflowResolver};
pub use steps::{ExecutorRegistry, StepContext, StepError, StepExecutor};
pub use substitute::SubstitutionContext;
