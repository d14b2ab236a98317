// Queue routes: enqueue, cancel, active tasks, stats

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use groundwork_core::WorkflowSpec;
use groundwork_engine::persistence::{QueueStats, QueueTaskRecord};
use groundwork_engine::WorkflowQueue;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<WorkflowQueue>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/queue/tasks", post(enqueue).get(active_tasks))
        .route("/api/queue/tasks/:id", get(get_task))
        .route("/api/queue/tasks/:id", delete(cancel_task))
        .route("/api/queue/stats", get(stats))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct EnqueueRequest {
    application: String,
    workflow: String,
    spec: WorkflowSpec,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    task_id: String,
}

async fn enqueue(
    State(state): State<AppState>,
    Json(request): Json<EnqueueRequest>,
) -> Result<Json<EnqueueResponse>, ApiError> {
    let task_id = state
        .queue
        .enqueue(
            &request.application,
            &request.workflow,
            &request.spec,
            request.metadata,
        )
        .await?;
    Ok(Json(EnqueueResponse { task_id }))
}

async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<QueueTaskRecord>, ApiError> {
    Ok(Json(state.queue.get_task(&id).await?))
}

async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let cancelled = state.queue.cancel(&id).await?;
    Ok(Json(serde_json::json!({ "task_id": id, "cancelled": cancelled })))
}

async fn active_tasks(
    State(state): State<AppState>,
) -> Result<Json<Vec<QueueTaskRecord>>, ApiError> {
    Ok(Json(state.queue.active_tasks().await?))
}

async fn stats(State(state): State<AppState>) -> Result<Json<QueueStats>, ApiError> {
    Ok(Json(state.queue.stats().await?))
}
