//! Store traits and record types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use groundwork_core::{Operation, ResourceState};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Workflow execution not found
    #[error("execution not found: {0}")]
    ExecutionNotFound(Uuid),

    /// Step not found
    #[error("step not found: {0}")]
    StepNotFound(Uuid),

    /// Resource instance not found
    #[error("resource not found: {0}")]
    ResourceNotFound(Uuid),

    /// Queue task not found
    #[error("queue task not found: {0}")]
    TaskNotFound(String),

    /// Uniqueness or state conflict
    #[error("conflict: {0}")]
    Conflict(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Workflow execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// Workflow step status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown step status: {other}")),
        }
    }
}

/// Queue task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A persisted workflow execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub application_name: String,
    pub workflow_name: String,
    pub status: ExecutionStatus,
    pub total_steps: i32,
    pub completed_steps: i32,
    pub failed_steps: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub parent_execution_id: Option<Uuid>,
}

/// Input for creating an execution
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub application_name: String,
    pub workflow_name: String,
    pub total_steps: i32,
    pub parent_execution_id: Option<Uuid>,
}

/// A persisted workflow step
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub step_number: i32,
    pub name: String,
    pub step_type: String,
    pub status: StepStatus,
    pub step_config: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Input for creating a step row
#[derive(Debug, Clone)]
pub struct NewStep {
    pub workflow_id: Uuid,
    pub step_number: i32,
    pub name: String,
    pub step_type: String,
    pub status: StepStatus,
    pub step_config: Option<serde_json::Value>,
}

/// Filter for listing executions
#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub application: Option<String>,
    pub search: Option<String>,
    pub status: Option<ExecutionStatus>,
}

/// Pagination parameters
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// A persisted resource instance
#[derive(Debug, Clone, Serialize)]
pub struct ResourceRecord {
    pub id: Uuid,
    pub application_name: String,
    pub resource_name: String,
    pub resource_type: String,
    pub state: ResourceState,
    pub desired_operation: Option<Operation>,
    pub configuration: serde_json::Value,
    pub provider: Option<String>,
    pub provider_metadata: serde_json::Value,
    pub health_status: Option<String>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub workflow_execution_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a resource instance
#[derive(Debug, Clone)]
pub struct NewResource {
    pub application_name: String,
    pub resource_name: String,
    pub resource_type: String,
    pub configuration: serde_json::Value,
}

/// An immutable state-transition audit record
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub from_state: ResourceState,
    pub to_state: ResourceState,
    pub reason: String,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted queue task
#[derive(Debug, Clone, Serialize)]
pub struct QueueTaskRecord {
    pub task_id: String,
    pub app_name: String,
    pub workflow_name: String,
    pub spec: serde_json::Value,
    pub metadata: serde_json::Value,
    pub status: TaskStatus,
    pub worker_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// Input for enqueuing a task
#[derive(Debug, Clone)]
pub struct NewQueueTask {
    pub task_id: String,
    pub app_name: String,
    pub workflow_name: String,
    pub spec: serde_json::Value,
    pub metadata: serde_json::Value,
}

/// Queue depth counters by status
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueStats {
    pub queued: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
}

/// Store for workflow executions and their steps.
///
/// Implementations must be thread-safe and support concurrent access.
#[async_trait]
pub trait ExecutionStore: Send + Sync + 'static {
    async fn create_execution(&self, input: NewExecution) -> Result<ExecutionRecord, StoreError>;

    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRecord, StoreError>;

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        page: Page,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;

    async fn count_executions(&self, filter: &ExecutionFilter) -> Result<i64, StoreError>;

    /// Move an execution to a terminal status.
    async fn finish_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Bump the per-execution progress counters.
    async fn bump_execution_progress(
        &self,
        id: Uuid,
        completed_delta: i32,
        failed_delta: i32,
    ) -> Result<(), StoreError>;

    async fn create_step(&self, input: NewStep) -> Result<StepRecord, StoreError>;

    /// pending -> running, stamping started_at.
    async fn start_step(&self, step_id: Uuid) -> Result<(), StoreError>;

    /// running -> terminal, stamping completed_at.
    async fn finish_step(
        &self,
        step_id: Uuid,
        status: StepStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Steps of one execution ordered by step_number.
    async fn get_steps(&self, execution_id: Uuid) -> Result<Vec<StepRecord>, StoreError>;

    /// Append to a step's log (append-only).
    async fn append_step_logs(&self, step_id: Uuid, content: &str) -> Result<(), StoreError>;

    async fn get_step_logs(&self, step_id: Uuid) -> Result<String, StoreError>;
}

/// Store for resource instances and their transition history.
#[async_trait]
pub trait ResourceStore: Send + Sync + 'static {
    /// Fails with `Conflict` when (application, resource_name) exists.
    async fn create_resource(&self, input: NewResource) -> Result<ResourceRecord, StoreError>;

    async fn get_resource(&self, id: Uuid) -> Result<ResourceRecord, StoreError>;

    async fn find_resource(
        &self,
        app_name: &str,
        resource_name: &str,
    ) -> Result<Option<ResourceRecord>, StoreError>;

    async fn list_resources(&self, app_name: &str) -> Result<Vec<ResourceRecord>, StoreError>;

    /// Rows with pending work for their desired operation, oldest
    /// updated_at first.
    async fn scan_pending(&self, limit: usize) -> Result<Vec<ResourceRecord>, StoreError>;

    /// Conditional state update: the orchestrator's serialization point.
    /// Succeeds only when the row is still in `from` with no owning
    /// execution; returns false when another worker won the race.
    async fn try_acquire(
        &self,
        id: Uuid,
        from: ResourceState,
        to: ResourceState,
    ) -> Result<bool, StoreError>;

    /// Move an owned row to its terminal state, linking the execution that
    /// operated on it. A successful release clears desired_operation.
    async fn release(
        &self,
        id: Uuid,
        to: ResourceState,
        execution_id: Option<Uuid>,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Request an operation (update/delete) on an existing row.
    async fn set_desired_operation(
        &self,
        id: Uuid,
        operation: Option<Operation>,
        configuration: Option<serde_json::Value>,
    ) -> Result<(), StoreError>;

    /// Append an immutable transition record.
    async fn record_transition(
        &self,
        resource_id: Uuid,
        from: ResourceState,
        to: ResourceState,
        reason: &str,
        actor: &str,
    ) -> Result<(), StoreError>;

    async fn list_transitions(
        &self,
        resource_id: Uuid,
    ) -> Result<Vec<TransitionRecord>, StoreError>;

    /// Rows parked in an intermediate state (startup recovery).
    async fn find_in_flight(&self) -> Result<Vec<ResourceRecord>, StoreError>;
}

/// Store for durable queue task records.
#[async_trait]
pub trait QueueStore: Send + Sync + 'static {
    async fn enqueue_task(&self, input: NewQueueTask) -> Result<QueueTaskRecord, StoreError>;

    async fn queued_depth(&self) -> Result<i64, StoreError>;

    /// Atomically claim the oldest queued task for a worker.
    async fn claim_next_task(
        &self,
        worker_id: &str,
    ) -> Result<Option<QueueTaskRecord>, StoreError>;

    async fn finish_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Atomic queued -> cancelled; false when the task was not queued.
    async fn cancel_queued_task(&self, task_id: &str) -> Result<bool, StoreError>;

    async fn get_task(&self, task_id: &str) -> Result<QueueTaskRecord, StoreError>;

    async fn list_active_tasks(&self) -> Result<Vec<QueueTaskRecord>, StoreError>;

    async fn queue_stats(&self) -> Result<QueueStats, StoreError>;

    /// Requeue tasks left `running` by a dead process. Returns how many
    /// rows were reset.
    async fn requeue_orphaned_tasks(&self) -> Result<u64, StoreError>;
}

/// The full persistence surface the engine needs.
pub trait PlatformStore: ExecutionStore + ResourceStore + QueueStore {}

impl<T: ExecutionStore + ResourceStore + QueueStore> PlatformStore for T {}
