//! PostgreSQL implementation of the platform store
//!
//! Conditional updates (compare-and-set on state) provide cross-worker
//! serialization; queue claiming uses SELECT ... FOR UPDATE SKIP LOCKED.

use async_trait::async_trait;
use groundwork_core::{Operation, ResourceState};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::*;

/// PostgreSQL-backed store, shared via its connection pool.
#[derive(Clone)]
pub struct PostgresPlatformStore {
    pool: PgPool,
}

impl PostgresPlatformStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    error!("database error: {}", e);
    StoreError::Database(e.to_string())
}

fn parse_status<T: std::str::FromStr<Err = String>>(s: &str) -> Result<T, StoreError> {
    s.parse().map_err(StoreError::Serialization)
}

fn execution_from_row(row: &PgRow) -> Result<ExecutionRecord, StoreError> {
    let status: String = row.get("status");
    Ok(ExecutionRecord {
        id: row.get("id"),
        application_name: row.get("application_name"),
        workflow_name: row.get("workflow_name"),
        status: parse_status(&status)?,
        total_steps: row.get("total_steps"),
        completed_steps: row.get("completed_steps"),
        failed_steps: row.get("failed_steps"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        error_message: row.get("error_message"),
        parent_execution_id: row.get("parent_execution_id"),
    })
}

fn step_from_row(row: &PgRow) -> Result<StepRecord, StoreError> {
    let status: String = row.get("status");
    Ok(StepRecord {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        step_number: row.get("step_number"),
        name: row.get("name"),
        step_type: row.get("type"),
        status: parse_status(&status)?,
        step_config: row.get("step_config"),
        error_message: row.get("error_message"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
    })
}

fn resource_from_row(row: &PgRow) -> Result<ResourceRecord, StoreError> {
    let state: String = row.get("state");
    let desired: Option<String> = row.get("desired_operation");
    Ok(ResourceRecord {
        id: row.get("id"),
        application_name: row.get("application_name"),
        resource_name: row.get("resource_name"),
        resource_type: row.get("resource_type"),
        state: parse_status(&state)?,
        desired_operation: desired.as_deref().map(parse_status).transpose()?,
        configuration: row.get("configuration"),
        provider: row.get("provider"),
        provider_metadata: row.get("provider_metadata"),
        health_status: row.get("health_status"),
        last_health_check: row.get("last_health_check"),
        error_message: row.get("error_message"),
        workflow_execution_id: row.get("workflow_execution_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn task_from_row(row: &PgRow) -> Result<QueueTaskRecord, StoreError> {
    let status: String = row.get("status");
    Ok(QueueTaskRecord {
        task_id: row.get("task_id"),
        app_name: row.get("app_name"),
        workflow_name: row.get("workflow_name"),
        spec: row.get("spec"),
        metadata: row.get("metadata"),
        status: parse_status(&status)?,
        worker_id: row.get("worker_id"),
        enqueued_at: row.get("enqueued_at"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        error_message: row.get("error_message"),
    })
}

const EXECUTION_COLUMNS: &str = "id, application_name, workflow_name, status, total_steps, \
     completed_steps, failed_steps, started_at, completed_at, error_message, parent_execution_id";

const STEP_COLUMNS: &str =
    "id, workflow_id, step_number, name, type, status, step_config, error_message, \
     started_at, completed_at";

const RESOURCE_COLUMNS: &str =
    "id, application_name, resource_name, resource_type, state, desired_operation, \
     configuration, provider, provider_metadata, health_status, last_health_check, \
     error_message, workflow_execution_id, created_at, updated_at";

const TASK_COLUMNS: &str = "task_id, app_name, workflow_name, spec, metadata, status, \
     worker_id, enqueued_at, started_at, finished_at, error_message";

#[async_trait]
impl ExecutionStore for PostgresPlatformStore {
    #[instrument(skip(self, input), fields(workflow = %input.workflow_name))]
    async fn create_execution(&self, input: NewExecution) -> Result<ExecutionRecord, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO workflow_executions
                (id, application_name, workflow_name, status, total_steps, parent_execution_id)
            VALUES ($1, $2, $3, 'running', $4, $5)
            RETURNING {EXECUTION_COLUMNS}
            "#,
        ))
        .bind(Uuid::now_v7())
        .bind(&input.application_name)
        .bind(&input.workflow_name)
        .bind(input.total_steps)
        .bind(input.parent_execution_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        execution_from_row(&row)
    }

    async fn get_execution(&self, id: Uuid) -> Result<ExecutionRecord, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM workflow_executions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(StoreError::ExecutionNotFound(id))?;

        execution_from_row(&row)
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        page: Page,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        let search = filter.search.as_ref().map(|s| format!("%{s}%"));
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS} FROM workflow_executions
            WHERE ($1::text IS NULL OR application_name = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR workflow_name ILIKE $3 OR application_name ILIKE $3)
            ORDER BY started_at DESC, id DESC
            LIMIT $4 OFFSET $5
            "#,
        ))
        .bind(&filter.application)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(&search)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(execution_from_row).collect()
    }

    async fn count_executions(&self, filter: &ExecutionFilter) -> Result<i64, StoreError> {
        let search = filter.search.as_ref().map(|s| format!("%{s}%"));
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM workflow_executions
            WHERE ($1::text IS NULL OR application_name = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR workflow_name ILIKE $3 OR application_name ILIKE $3)
            "#,
        )
        .bind(&filter.application)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(&search)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.get("n"))
    }

    async fn finish_execution(
        &self,
        id: Uuid,
        status: ExecutionStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = $2, completed_at = NOW(), error_message = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ExecutionNotFound(id));
        }
        debug!(%id, %status, "finished execution");
        Ok(())
    }

    async fn bump_execution_progress(
        &self,
        id: Uuid,
        completed_delta: i32,
        failed_delta: i32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions
            SET completed_steps = completed_steps + $2,
                failed_steps = failed_steps + $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(completed_delta)
        .bind(failed_delta)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ExecutionNotFound(id));
        }
        Ok(())
    }

    async fn create_step(&self, input: NewStep) -> Result<StepRecord, StoreError> {
        let completed_at = matches!(input.status, StepStatus::Skipped).then(chrono::Utc::now);
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO workflow_steps
                (id, workflow_id, step_number, name, type, status, step_config, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {STEP_COLUMNS}
            "#,
        ))
        .bind(Uuid::now_v7())
        .bind(input.workflow_id)
        .bind(input.step_number)
        .bind(&input.name)
        .bind(&input.step_type)
        .bind(input.status.as_str())
        .bind(&input.step_config)
        .bind(completed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        step_from_row(&row)
    }

    async fn start_step(&self, step_id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_steps
            SET status = 'running', started_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(step_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StepNotFound(step_id));
        }
        Ok(())
    }

    async fn finish_step(
        &self,
        step_id: Uuid,
        status: StepStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_steps
            SET status = $2, completed_at = NOW(), error_message = $3
            WHERE id = $1
            "#,
        )
        .bind(step_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::StepNotFound(step_id));
        }
        Ok(())
    }

    async fn get_steps(&self, execution_id: Uuid) -> Result<Vec<StepRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM workflow_steps WHERE workflow_id = $1 ORDER BY step_number"
        ))
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(step_from_row).collect()
    }

    async fn append_step_logs(&self, step_id: Uuid, content: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_step_logs (step_id, log_content)
            VALUES ($1, $2)
            ON CONFLICT (step_id)
            DO UPDATE SET log_content = workflow_step_logs.log_content || EXCLUDED.log_content
            "#,
        )
        .bind(step_id)
        .bind(content)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn get_step_logs(&self, step_id: Uuid) -> Result<String, StoreError> {
        let row = sqlx::query("SELECT log_content FROM workflow_step_logs WHERE step_id = $1")
            .bind(step_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(row.map(|r| r.get("log_content")).unwrap_or_default())
    }
}

#[async_trait]
impl ResourceStore for PostgresPlatformStore {
    async fn create_resource(&self, input: NewResource) -> Result<ResourceRecord, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO resource_instances
                (id, application_name, resource_name, resource_type, state, configuration)
            VALUES ($1, $2, $3, $4, 'requested', $5)
            RETURNING {RESOURCE_COLUMNS}
            "#,
        ))
        .bind(Uuid::now_v7())
        .bind(&input.application_name)
        .bind(&input.resource_name)
        .bind(&input.resource_type)
        .bind(&input.configuration)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(
                format!(
                    "resource {}/{} already exists",
                    input.application_name, input.resource_name
                ),
            ),
            _ => db_err(e),
        })?;

        resource_from_row(&row)
    }

    async fn get_resource(&self, id: Uuid) -> Result<ResourceRecord, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM resource_instances WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(StoreError::ResourceNotFound(id))?;

        resource_from_row(&row)
    }

    async fn find_resource(
        &self,
        app_name: &str,
        resource_name: &str,
    ) -> Result<Option<ResourceRecord>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {RESOURCE_COLUMNS} FROM resource_instances
            WHERE application_name = $1 AND resource_name = $2
            "#
        ))
        .bind(app_name)
        .bind(resource_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(resource_from_row).transpose()
    }

    async fn list_resources(&self, app_name: &str) -> Result<Vec<ResourceRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESOURCE_COLUMNS} FROM resource_instances
            WHERE application_name = $1
            ORDER BY resource_name
            "#
        ))
        .bind(app_name)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(resource_from_row).collect()
    }

    async fn scan_pending(&self, limit: usize) -> Result<Vec<ResourceRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESOURCE_COLUMNS} FROM resource_instances
            WHERE workflow_execution_id IS NULL
              AND (
                (state = 'requested' AND (desired_operation IS NULL OR desired_operation = 'create'))
                OR (state = 'active' AND desired_operation = 'update')
                OR (state IN ('active', 'degraded') AND desired_operation = 'delete')
              )
            ORDER BY updated_at ASC
            LIMIT $1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(resource_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn try_acquire(
        &self,
        id: Uuid,
        from: ResourceState,
        to: ResourceState,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE resource_instances
            SET state = $3, updated_at = NOW()
            WHERE id = $1 AND state = $2 AND workflow_execution_id IS NULL
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(
        &self,
        id: Uuid,
        to: ResourceState,
        execution_id: Option<Uuid>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE resource_instances
            SET state = $2,
                workflow_execution_id = $3,
                error_message = $4,
                desired_operation = CASE WHEN $4::text IS NULL THEN NULL ELSE desired_operation END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(execution_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ResourceNotFound(id));
        }
        Ok(())
    }

    async fn set_desired_operation(
        &self,
        id: Uuid,
        operation: Option<Operation>,
        configuration: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE resource_instances
            SET desired_operation = $2,
                configuration = COALESCE($3, configuration),
                workflow_execution_id = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(operation.map(|o| o.as_str()))
        .bind(configuration)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::ResourceNotFound(id));
        }
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
        sqlx::query(
            r#"
            INSERT INTO resource_state_transitions (id, resource_id, from_state, to_state, reason, actor)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(resource_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(reason)
        .bind(actor)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn list_transitions(
        &self,
        resource_id: Uuid,
    ) -> Result<Vec<TransitionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, resource_id, from_state, to_state, reason, actor, created_at
            FROM resource_state_transitions
            WHERE resource_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                let from: String = row.get("from_state");
                let to: String = row.get("to_state");
                Ok(TransitionRecord {
                    id: row.get("id"),
                    resource_id: row.get("resource_id"),
                    from_state: parse_status(&from)?,
                    to_state: parse_status(&to)?,
                    reason: row.get("reason"),
                    actor: row.get("actor"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn find_in_flight(&self) -> Result<Vec<ResourceRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {RESOURCE_COLUMNS} FROM resource_instances
            WHERE state IN ('provisioning', 'updating', 'terminating')
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(resource_from_row).collect()
    }
}

#[async_trait]
impl QueueStore for PostgresPlatformStore {
    async fn enqueue_task(&self, input: NewQueueTask) -> Result<QueueTaskRecord, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO queue_tasks (task_id, app_name, workflow_name, spec, metadata, status)
            VALUES ($1, $2, $3, $4, $5, 'queued')
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(&input.task_id)
        .bind(&input.app_name)
        .bind(&input.workflow_name)
        .bind(&input.spec)
        .bind(&input.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        task_from_row(&row)
    }

    async fn queued_depth(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM queue_tasks WHERE status = 'queued'")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.get("n"))
    }

    #[instrument(skip(self))]
    async fn claim_next_task(
        &self,
        worker_id: &str,
    ) -> Result<Option<QueueTaskRecord>, StoreError> {
        // SKIP LOCKED keeps concurrent workers from claiming the same row
        let row = sqlx::query(&format!(
            r#"
            UPDATE queue_tasks
            SET status = 'running', worker_id = $1, started_at = NOW()
            WHERE task_id = (
                SELECT task_id FROM queue_tasks
                WHERE status = 'queued'
                ORDER BY enqueued_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {TASK_COLUMNS}
            "#,
        ))
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(task_from_row).transpose()
    }

    async fn finish_task(
        &self,
        task_id: &str,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_tasks
            SET status = $2, finished_at = NOW(), error_message = $3
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    async fn cancel_queued_task(&self, task_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_tasks
            SET status = 'cancelled', finished_at = NOW()
            WHERE task_id = $1 AND status = 'queued'
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // distinguish "already terminal/running" from "never existed"
        let exists = sqlx::query("SELECT 1 AS one FROM queue_tasks WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        if exists.is_none() {
            return Err(StoreError::TaskNotFound(task_id.to_string()));
        }
        Ok(false)
    }

    async fn get_task(&self, task_id: &str) -> Result<QueueTaskRecord, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM queue_tasks WHERE task_id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::TaskNotFound(task_id.to_string()))?;

        task_from_row(&row)
    }

    async fn list_active_tasks(&self) -> Result<Vec<QueueTaskRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM queue_tasks
            WHERE status IN ('queued', 'running')
            ORDER BY enqueued_at
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(task_from_row).collect()
    }

    async fn queue_stats(&self) -> Result<QueueStats, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM queue_tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            match parse_status::<TaskStatus>(&status)? {
                TaskStatus::Queued => stats.queued = n,
                TaskStatus::Running => stats.running = n,
                TaskStatus::Completed => stats.completed = n,
                TaskStatus::Failed => stats.failed = n,
                TaskStatus::Cancelled => stats.cancelled = n,
            }
        }
        Ok(stats)
    }

    async fn requeue_orphaned_tasks(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_tasks
            SET status = 'queued', worker_id = NULL, started_at = NULL
            WHERE status = 'running'
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(result.rows_affected())
    }
}
