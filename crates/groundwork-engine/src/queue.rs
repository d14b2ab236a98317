//! Async workflow queue
//!
//! A bounded worker pool consuming durable task records. Enqueue is
//! non-blocking and surfaces backpressure as an explicit `queue-full`
//! error; cancellation of a running task is advisory (the current step
//! finishes, nothing further is dispatched). Restarts resume: tasks left
//! `running` by a dead process are requeued on startup.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use groundwork_core::WorkflowSpec;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::executor::{ExecutionParams, WorkflowRunner};
use crate::persistence::{
    ExecutionStatus, NewQueueTask, QueueStats, QueueStore, QueueTaskRecord, StoreError, TaskStatus,
};

/// Queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of worker tasks.
    pub workers: usize,

    /// Maximum queued (not yet running) tasks before enqueue rejects
    /// with `queue-full`.
    pub max_depth: usize,

    /// Idle poll interval; enqueues also wake workers directly.
    pub poll_interval: Duration,

    /// Graceful shutdown budget.
    pub shutdown_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            max_depth: 512,
            poll_interval: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Queue errors
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Bounded queue depth reached; explicit backpressure
    #[error("queue-full: {depth} tasks already queued")]
    Full { depth: i64 },

    /// Enqueue attempted while shutting down
    #[error("queue is shutting down")]
    ShuttingDown,

    /// Task id unknown
    #[error("task not found: {0}")]
    NotFound(String),

    /// Task spec did not deserialize
    #[error("invalid workflow spec on task {task_id}: {message}")]
    InvalidSpec { task_id: String, message: String },

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Execution error from the workflow runner
    #[error("execution failed: {0}")]
    Execution(#[from] crate::executor::ExecutorError),
}

impl QueueError {
    pub fn kind(&self) -> groundwork_core::ErrorKind {
        use groundwork_core::ErrorKind;
        match self {
            Self::Full { .. } => ErrorKind::RateLimited,
            Self::ShuttingDown => ErrorKind::Unavailable,
            Self::NotFound(_) | Self::Store(StoreError::TaskNotFound(_)) => ErrorKind::NotFound,
            Self::InvalidSpec { .. } => ErrorKind::Validation,
            Self::Execution(e) => e.kind(),
            Self::Store(_) => ErrorKind::Unavailable,
        }
    }
}

struct ActiveTask {
    worker_id: String,
    cancel: CancellationToken,
}

/// Bounded worker pool over durable task records.
pub struct WorkflowQueue {
    store: Arc<dyn QueueStore>,
    runner: Arc<WorkflowRunner>,
    config: QueueConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    notify: Arc<Notify>,
    active: Arc<DashMap<String, ActiveTask>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkflowQueue {
    pub fn new(
        store: Arc<dyn QueueStore>,
        runner: Arc<WorkflowRunner>,
        config: QueueConfig,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            store,
            runner,
            config,
            shutdown_tx,
            shutdown_rx,
            notify: Arc::new(Notify::new()),
            active: Arc::new(DashMap::new()),
            workers: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Requeue orphaned work and start the worker pool.
    pub async fn start(self: &Arc<Self>) -> Result<(), QueueError> {
        let requeued = self.store.requeue_orphaned_tasks().await?;
        if requeued > 0 {
            info!(requeued, "requeued tasks orphaned by a previous process");
        }

        let mut workers = self.workers.lock();
        for n in 0..self.config.workers {
            let queue = Arc::clone(self);
            let worker_id = format!("worker-{n}");
            workers.push(tokio::spawn(async move {
                queue.worker_loop(worker_id).await;
            }));
        }
        info!(workers = self.config.workers, "workflow queue started");
        Ok(())
    }

    /// Append a task record. Fails fast when shutting down or when the
    /// queued depth reached the bound.
    #[instrument(skip(self, spec, metadata), fields(app = %app_name, workflow = %workflow_name))]
    pub async fn enqueue(
        &self,
        app_name: &str,
        workflow_name: &str,
        spec: &WorkflowSpec,
        metadata: serde_json::Value,
    ) -> Result<String, QueueError> {
        if *self.shutdown_rx.borrow() {
            return Err(QueueError::ShuttingDown);
        }

        let depth = self.store.queued_depth().await?;
        if depth >= self.config.max_depth as i64 {
            warn!(depth, "queue full, rejecting enqueue");
            return Err(QueueError::Full { depth });
        }

        let task_id = format!("task-{}", Uuid::now_v7());
        let spec_json = serde_json::to_value(spec)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.store
            .enqueue_task(NewQueueTask {
                task_id: task_id.clone(),
                app_name: app_name.to_string(),
                workflow_name: workflow_name.to_string(),
                spec: spec_json,
                metadata,
            })
            .await?;

        self.notify.notify_waiters();
        debug!(%task_id, "task enqueued");
        Ok(task_id)
    }

    /// Cancel a task. A queued task transitions atomically to
    /// `cancelled`; a running task gets an advisory signal and finishes
    /// its current step. Returns false when the task already reached a
    /// terminal state (idempotent).
    pub async fn cancel(&self, task_id: &str) -> Result<bool, QueueError> {
        if self.store.cancel_queued_task(task_id).await? {
            info!(%task_id, "queued task cancelled");
            return Ok(true);
        }

        if let Some(active) = self.active.get(task_id) {
            info!(%task_id, worker = %active.worker_id, "advisory cancellation of running task");
            active.cancel.cancel();
            return Ok(true);
        }

        // terminal already: the second cancel of anything is a no-op
        let task = self.store.get_task(task_id).await?;
        debug!(%task_id, status = %task.status, "cancel on settled task ignored");
        Ok(false)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<QueueTaskRecord, QueueError> {
        Ok(self.store.get_task(task_id).await?)
    }

    pub async fn active_tasks(&self) -> Result<Vec<QueueTaskRecord>, QueueError> {
        Ok(self.store.list_active_tasks().await?)
    }

    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        Ok(self.store.queue_stats().await?)
    }

    /// Signal shutdown and wait for workers to drain their current step.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.notify.notify_waiters();

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let drain = async {
            for worker in workers {
                let _ = worker.await;
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout, drain)
            .await
            .is_err()
        {
            warn!("queue workers did not drain before deadline");
        }
        info!("workflow queue stopped");
    }

    async fn worker_loop(self: Arc<Self>, worker_id: String) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        debug!(%worker_id, "worker started");

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            match self.store.claim_next_task(&worker_id).await {
                Ok(Some(task)) => {
                    self.run_task(&worker_id, task).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown_rx.changed() => {}
                    }
                }
                Err(e) => {
                    error!(%worker_id, "claim failed: {}", e);
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        debug!(%worker_id, "worker exited");
    }

    async fn run_task(&self, worker_id: &str, task: QueueTaskRecord) {
        let task_id = task.task_id.clone();
        let cancel = CancellationToken::new();
        self.active.insert(
            task_id.clone(),
            ActiveTask {
                worker_id: worker_id.to_string(),
                cancel: cancel.clone(),
            },
        );

        let (status, error) = match self.execute_task(&task, cancel).await {
            Ok(execution) => match execution.status {
                ExecutionStatus::Completed => (TaskStatus::Completed, None),
                ExecutionStatus::Cancelled => (TaskStatus::Cancelled, None),
                _ => (TaskStatus::Failed, execution.error_message),
            },
            Err(e) => (TaskStatus::Failed, Some(e.to_string())),
        };

        if let Err(e) = self
            .store
            .finish_task(&task_id, status, error.as_deref())
            .await
        {
            error!(%task_id, "failed to settle task: {}", e);
        }
        self.active.remove(&task_id);
        info!(%task_id, %status, "task finished");
    }

    async fn execute_task(
        &self,
        task: &QueueTaskRecord,
        cancel: CancellationToken,
    ) -> Result<crate::persistence::ExecutionRecord, QueueError> {
        let spec: WorkflowSpec =
            serde_json::from_value(task.spec.clone()).map_err(|e| QueueError::InvalidSpec {
                task_id: task.task_id.clone(),
                message: e.to_string(),
            })?;
        let params = params_from_metadata(&task.metadata);

        Ok(self
            .runner
            .execute(
                &task.app_name,
                &task.workflow_name,
                &spec,
                &params,
                Some(cancel),
            )
            .await?)
    }
}

/// Task metadata carries the environment type and extra substitution
/// variables as flat string entries.
fn params_from_metadata(metadata: &serde_json::Value) -> ExecutionParams {
    let mut params = ExecutionParams::default();
    if let Some(object) = metadata.as_object() {
        if let Some(env) = object.get("environment").and_then(|v| v.as_str()) {
            params.env_type = env.to_string();
        }
        let extra: BTreeMap<String, String> = object
            .iter()
            .filter(|(k, _)| k.as_str() != "environment")
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect();
        params.extra_vars = extra;
    }
    params
}
