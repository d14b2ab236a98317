//! In-memory implementation of the platform store
//!
//! Mirrors the PostgreSQL implementation's semantics (including the CAS
//! acquire and atomic queue claim) so the engine can be unit-tested
//! without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use groundwork_core::{Operation, ResourceState};
use parking_lot::Mutex;
use uuid::Uuid;

use super::store::*;

#[derive(Default)]
struct Inner {
    executions: HashMap<Uuid, ExecutionRecord>,
    steps: HashMap<Uuid, StepRecord>,
    step_logs: HashMap<Uuid, String>,
    resources: HashMap<Uuid, ResourceRecord>,
    transitions: Vec<TransitionRecord>,
    tasks: HashMap<String, (u64, QueueTaskRecord)>,
    task_seq: u64,
}

/// In-memory store for tests and local development.
#[derive(Default)]
pub struct InMemoryPlatformStore {
    inner: Mutex<Inner>,
}

impl InMemoryPlatformStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryPlatformStore {
    async fn create_execution(&self, input: NewExecution) -> Result<ExecutionRecord, StoreError> {
        let record = ExecutionRecord {
            id: Uuid::now_v7(),
            application_name: input.application_name,
            workflow_name: input.workflow_name,
            status: ExecutionStatus::Running,
            total_steps: input.total_steps,
            completed_steps: 0,
            failed_steps: 0,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
            parent_execution_id: input.parent_execution_id,
        };
        self.inner
            .lock()
            .executions
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRecord, StoreError> {
        self.inner
            .lock()
            .executions
            .get(&id)
            .cloned()
            .ok_or(StoreError::ExecutionNotFound(id))
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        page: Page,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut rows: Vec<_> = inner
            .executions
            .values()
            .filter(|e| matches_filter(e, filter))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        Ok(rows
            .into_iter()
            .skip(page.offset.max(0) as usize)
            .take(page.limit.max(0) as usize)
            .collect())
    }

    async fn count_executions(&self, filter: &ExecutionFilter) -> Result<i64, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .executions
            .values()
            .filter(|e| matches_filter(e, filter))
            .count() as i64)
    }

    async fn finish_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let execution = inner
            .executions
            .get_mut(&id)
            .ok_or(StoreError::ExecutionNotFound(id))?;
        execution.status = status;
        execution.completed_at = Some(Utc::now());
        execution.error_message = error.map(str::to_string);
        Ok(())
    }

    async fn bump_execution_progress(
        &self,
        id: Uuid,
        completed_delta: i32,
        failed_delta: i32,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let execution = inner
            .executions
            .get_mut(&id)
            .ok_or(StoreError::ExecutionNotFound(id))?;
        execution.completed_steps += completed_delta;
        execution.failed_steps += failed_delta;
        Ok(())
    }

    async fn create_step(&self, input: NewStep) -> Result<StepRecord, StoreError> {
        let record = StepRecord {
            id: Uuid::now_v7(),
            workflow_id: input.workflow_id,
            step_number: input.step_number,
            name: input.name,
            step_type: input.step_type,
            status: input.status,
            step_config: input.step_config,
            error_message: None,
            started_at: None,
            completed_at: if matches!(input.status, StepStatus::Skipped) {
                Some(Utc::now())
            } else {
                None
            },
        };
        self.inner.lock().steps.insert(record.id, record.clone());
        Ok(record)
    }

    async fn start_step(&self, step_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let step = inner
            .steps
            .get_mut(&step_id)
            .ok_or(StoreError::StepNotFound(step_id))?;
        step.status = StepStatus::Running;
        step.started_at = Some(Utc::now());
        Ok(())
    }

    async fn finish_step(
        &self,
        step_id: Uuid,
        status: StepStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let step = inner
            .steps
            .get_mut(&step_id)
            .ok_or(StoreError::StepNotFound(step_id))?;
        step.status = status;
        step.completed_at = Some(Utc::now());
        step.error_message = error.map(str::to_string);
        Ok(())
    }

    async fn get_steps(&self, execution_id: Uuid) -> Result<Vec<StepRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut rows: Vec<_> = inner
            .steps
            .values()
            .filter(|s| s.workflow_id == execution_id)
            .cloned()
            .collect();
        rows.sort_by_key(|s| s.step_number);
        Ok(rows)
    }

    async fn append_step_logs(&self, step_id: Uuid, content: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.steps.contains_key(&step_id) {
            return Err(StoreError::StepNotFound(step_id));
        }
        inner.step_logs.entry(step_id).or_default().push_str(content);
        Ok(())
    }

    async fn get_step_logs(&self, step_id: Uuid) -> Result<String, StoreError> {
        Ok(self
            .inner
            .lock()
            .step_logs
            .get(&step_id)
            .cloned()
            .unwrap_or_default())
    }
}

fn matches_filter(execution: &ExecutionRecord, filter: &ExecutionFilter) -> bool {
    if let Some(app) = &filter.application {
        if &execution.application_name != app {
            return false;
        }
    }
    if let Some(status) = filter.status {
        if execution.status != status {
            return false;
        }
    }
    if let Some(search) = &filter.search {
        let needle = search.to_lowercase();
        if !execution.workflow_name.to_lowercase().contains(&needle)
            && !execution.application_name.to_lowercase().contains(&needle)
        {
            return false;
        }
    }
    true
}

#[async_trait]
impl ResourceStore for InMemoryPlatformStore {
    async fn create_resource(&self, input: NewResource) -> Result<ResourceRecord, StoreError> {
        let mut inner = self.inner.lock();
        let duplicate = inner.resources.values().any(|r| {
            r.application_name == input.application_name
                && r.resource_name == input.resource_name
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "resource {}/{} already exists",
                input.application_name, input.resource_name
            )));
        }
        let now = Utc::now();
        let record = ResourceRecord {
            id: Uuid::now_v7(),
            application_name: input.application_name,
            resource_name: input.resource_name,
            resource_type: input.resource_type,
            state: ResourceState::Requested,
            desired_operation: None,
            configuration: input.configuration,
            provider: None,
            provider_metadata: serde_json::json!({}),
            health_status: None,
            last_health_check: None,
            error_message: None,
            workflow_execution_id: None,
            created_at: now,
            updated_at: now,
        };
        inner.resources.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_resource(&self, id: Uuid) -> Result<ResourceRecord, StoreError> {
        self.inner
            .lock()
            .resources
            .get(&id)
            .cloned()
            .ok_or(StoreError::ResourceNotFound(id))
    }

    async fn find_resource(
        &self,
        app_name: &str,
        resource_name: &str,
    ) -> Result<Option<ResourceRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .resources
            .values()
            .find(|r| r.application_name == app_name && r.resource_name == resource_name)
            .cloned())
    }

    async fn list_resources(&self, app_name: &str) -> Result<Vec<ResourceRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut rows: Vec<_> = inner
            .resources
            .values()
            .filter(|r| r.application_name == app_name)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.resource_name.cmp(&b.resource_name));
        Ok(rows)
    }

    async fn scan_pending(&self, limit: usize) -> Result<Vec<ResourceRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut rows: Vec<_> = inner
            .resources
            .values()
            .filter(|r| r.workflow_execution_id.is_none() && has_pending_work(r))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn try_acquire(
        &self,
        id: Uuid,
        from: ResourceState,
        to: ResourceState,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let resource = inner
            .resources
            .get_mut(&id)
            .ok_or(StoreError::ResourceNotFound(id))?;
        if resource.state != from || resource.workflow_execution_id.is_some() {
            return Ok(false);
        }
        resource.state = to;
        resource.updated_at = Utc::now();
        Ok(true)
    }

    async fn release(
        &self,
        id: Uuid,
        to: ResourceState,
        execution_id: Option<Uuid>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let resource = inner
            .resources
            .get_mut(&id)
            .ok_or(StoreError::ResourceNotFound(id))?;
        resource.state = to;
        resource.workflow_execution_id = execution_id;
        resource.error_message = error.map(str::to_string);
        if error.is_none() {
            resource.desired_operation = None;
        }
        resource.updated_at = Utc::now();
        Ok(())
    }

    async fn set_desired_operation(
        &self,
        id: Uuid,
        operation: Option<Operation>,
        configuration: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let resource = inner
            .resources
            .get_mut(&id)
            .ok_or(StoreError::ResourceNotFound(id))?;
        resource.desired_operation = operation;
        if let Some(configuration) = configuration {
            resource.configuration = configuration;
        }
        // a fresh request detaches the previous execution so the
        // orchestrator can reacquire the row
        resource.workflow_execution_id = None;
        resource.updated_at = Utc::now();
        Ok(())
    }

    async fn record_transition(
        &self,
        resource_id: Uuid,
        from: ResourceState,
        to: ResourceState,
        reason: &str,
        actor: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.transitions.push(TransitionRecord {
            id: Uuid::now_v7(),
            resource_id,
            from_state: from,
            to_state: to,
            reason: reason.to_string(),
            actor: actor.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_transitions(
        &self,
        resource_id: Uuid,
    ) -> Result<Vec<TransitionRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .transitions
            .iter()
            .filter(|t| t.resource_id == resource_id)
            .cloned()
            .collect())
    }

    async fn find_in_flight(&self) -> Result<Vec<ResourceRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .resources
            .values()
            .filter(|r| r.state.is_in_flight())
            .cloned()
            .collect())
    }
}

fn has_pending_work(resource: &ResourceRecord) -> bool {
    match (resource.state, resource.desired_operation) {
        (ResourceState::Requested, None | Some(Operation::Create)) => true,
        (ResourceState::Active, Some(Operation::Update)) => true,
        (ResourceState::Active | ResourceState::Degraded, Some(Operation::Delete)) => true,
        _ => false,
    }
}

#[async_trait]
impl QueueStore for InMemoryPlatformStore {
    async fn enqueue_task(&self, input: NewQueueTask) -> Result<QueueTaskRecord, StoreError> {
        let mut inner = self.inner.lock();
        if inner.tasks.contains_key(&input.task_id) {
            return Err(StoreError::Conflict(format!(
                "task {} already exists",
                input.task_id
            )));
        }
        let record = QueueTaskRecord {
            task_id: input.task_id.clone(),
            app_name: input.app_name,
            workflow_name: input.workflow_name,
            spec: input.spec,
            metadata: input.metadata,
            status: TaskStatus::Queued,
            worker_id: None,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error_message: None,
        };
        inner.task_seq += 1;
        let seq = inner.task_seq;
        inner.tasks.insert(input.task_id, (seq, record.clone()));
        Ok(record)
    }

    async fn queued_depth(&self) -> Result<i64, StoreError> {
        Ok(self
            .inner
            .lock()
            .tasks
            .values()
            .filter(|(_, t)| t.status == TaskStatus::Queued)
            .count() as i64)
    }

    async fn claim_next_task(
        &self,
        worker_id: &str,
    ) -> Result<Option<QueueTaskRecord>, StoreError> {
        let mut inner = self.inner.lock();
        let next = inner
            .tasks
            .values()
            .filter(|(_, t)| t.status == TaskStatus::Queued)
            .min_by_key(|(seq, _)| *seq)
            .map(|(_, t)| t.task_id.clone());

        match next {
            Some(task_id) => {
                let (_, task) = inner.tasks.get_mut(&task_id).expect("task present");
                task.status = TaskStatus::Running;
                task.worker_id = Some(worker_id.to_string());
                task.started_at = Some(Utc::now());
                Ok(Some(task.clone()))
            }
            None => Ok(None),
        }
    }

    async fn finish_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let (_, task) = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;
        task.status = status;
        task.finished_at = Some(Utc::now());
        task.error_message = error.map(str::to_string);
        Ok(())
    }

    async fn cancel_queued_task(&self, task_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        match inner.tasks.get_mut(task_id) {
            Some((_, task)) if task.status == TaskStatus::Queued => {
                task.status = TaskStatus::Cancelled;
                task.finished_at = Some(Utc::now());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::TaskNotFound(task_id.to_string())),
        }
    }

    async fn get_task(&self, task_id: &str) -> Result<QueueTaskRecord, StoreError> {
        self.inner
            .lock()
            .tasks
            .get(task_id)
            .map(|(_, t)| t.clone())
            .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))
    }

    async fn list_active_tasks(&self) -> Result<Vec<QueueTaskRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut rows: Vec<(u64, QueueTaskRecord)> = inner
            .tasks
            .values()
            .filter(|(_, t)| !t.status.is_terminal())
            .map(|(seq, t)| (*seq, t.clone()))
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, t)| t).collect())
    }

    async fn queue_stats(&self) -> Result<QueueStats, StoreError> {
        let inner = self.inner.lock();
        let mut stats = QueueStats::default();
        for (_, task) in inner.tasks.values() {
            match task.status {
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }

    async fn requeue_orphaned_tasks(&self) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let mut reset = 0;
        for (_, task) in inner.tasks.values_mut() {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Queued;
                task.worker_id = None;
                task.started_at = None;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resource_uniqueness_per_app() {
        let store = InMemoryPlatformStore::new();
        let input = NewResource {
            application_name: "shop".into(),
            resource_name: "db".into(),
            resource_type: "postgres".into(),
            configuration: serde_json::json!({}),
        };
        store.create_resource(input.clone()).await.unwrap();
        let err = store.create_resource(input).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn try_acquire_is_a_cas() {
        let store = InMemoryPlatformStore::new();
        let resource = store
            .create_resource(NewResource {
                application_name: "shop".into(),
                resource_name: "db".into(),
                resource_type: "postgres".into(),
                configuration: serde_json::json!({}),
            })
            .await
            .unwrap();

        let won = store
            .try_acquire(
                resource.id,
                ResourceState::Requested,
                ResourceState::Provisioning,
            )
            .await
            .unwrap();
        assert!(won);

        // second acquire from the stale state loses
        let lost = store
            .try_acquire(
                resource.id,
                ResourceState::Requested,
                ResourceState::Provisioning,
            )
            .await
            .unwrap();
        assert!(!lost);
    }

    #[tokio::test]
    async fn queue_claims_oldest_first() {
        let store = InMemoryPlatformStore::new();
        for n in 0..3 {
            store
                .enqueue_task(NewQueueTask {
                    task_id: format!("task-{n}"),
                    app_name: "shop".into(),
                    workflow_name: "deploy".into(),
                    spec: serde_json::json!({}),
                    metadata: serde_json::json!({}),
                })
                .await
                .unwrap();
        }

        let first = store.claim_next_task("w1").await.unwrap().unwrap();
        assert_eq!(first.task_id, "task-0");
        assert_eq!(first.worker_id.as_deref(), Some("w1"));

        let second = store.claim_next_task("w2").await.unwrap().unwrap();
        assert_eq!(second.task_id, "task-1");
    }

    #[tokio::test]
    async fn cancel_queued_twice_is_noop() {
        let store = InMemoryPlatformStore::new();
        store
            .enqueue_task(NewQueueTask {
                task_id: "task-x".into(),
                app_name: "shop".into(),
                workflow_name: "deploy".into(),
                spec: serde_json::json!({}),
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();

        assert!(store.cancel_queued_task("task-x").await.unwrap());
        assert!(!store.cancel_queued_task("task-x").await.unwrap());
    }
}
