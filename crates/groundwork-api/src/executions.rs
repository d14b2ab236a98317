// Workflow execution routes: listing with search/status filters, detail
// with steps, per-step logs, and retry-from-failed-step.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use groundwork_core::WorkflowSpec;
use groundwork_engine::persistence::{
    ExecutionFilter, ExecutionRecord, ExecutionStatus, Page, StepRecord,
};
use groundwork_engine::{ExecutionParams, WorkflowRunner};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<WorkflowRunner>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/executions", get(list_executions))
        .route("/api/executions/:id", get(get_execution))
        .route("/api/executions/:id/retry", post(retry_execution))
        .route("/api/executions/:id/steps/:number/logs", get(step_logs))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ListParams {
    application: Option<String>,
    search: Option<String>,
    status: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ListResponse {
    data: Vec<ExecutionRecord>,
    total: i64,
}

async fn list_executions(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, ApiError> {
    let status = params
        .status
        .as_deref()
        .map(|s| s.parse::<ExecutionStatus>())
        .transpose()
        .map_err(ApiError::validation)?;
    let filter = ExecutionFilter {
        application: params.application,
        search: params.search,
        status,
    };
    let page = Page {
        limit: params.limit.unwrap_or(50).clamp(1, 500),
        offset: params.offset.unwrap_or(0).max(0),
    };

    let data = state.runner.list_executions(&filter, page).await?;
    let total = state.runner.count_executions(&filter).await?;
    Ok(Json(ListResponse { data, total }))
}

#[derive(Debug, Serialize)]
struct ExecutionDetail {
    #[serde(flatten)]
    execution: ExecutionRecord,
    steps: Vec<StepRecord>,
}

async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ExecutionDetail>, ApiError> {
    let execution = state.runner.get_execution(id).await?;
    let steps = state.runner.get_steps(id).await?;
    Ok(Json(ExecutionDetail { execution, steps }))
}

#[derive(Debug, Deserialize, Default)]
struct RetryRequest {
    /// Updated spec; when absent the spec is reconstructed from the
    /// parent's persisted step configs.
    spec: Option<WorkflowSpec>,
    environment: Option<String>,
}

async fn retry_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<RetryRequest>>,
) -> Result<Json<ExecutionRecord>, ApiError> {
    let Json(request) = body.unwrap_or_default();
    let parent = state.runner.get_execution(id).await?;

    let spec = match request.spec {
        Some(spec) => spec,
        None => state.runner.reconstruct_workflow(id).await?,
    };
    let mut params = ExecutionParams::default();
    if let Some(environment) = request.environment {
        params.env_type = environment;
    }

    let execution = state
        .runner
        .retry_from_failed_step(
            &parent.application_name,
            &parent.workflow_name,
            &spec,
            id,
            &params,
        )
        .await?;
    Ok(Json(execution))
}

async fn step_logs(
    State(state): State<AppState>,
    Path((id, number)): Path<(Uuid, i32)>,
) -> Result<String, ApiError> {
    let steps = state.runner.get_steps(id).await?;
    let step = steps
        .iter()
        .find(|s| s.step_number == number)
        .ok_or_else(|| ApiError::not_found(format!("no step {number} in execution {id}")))?;
    Ok(state.runner.get_step_logs(step.id).await?)
}
