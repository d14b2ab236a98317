// Application routes: spec submission, lookup, deletion, and resource
// inspection. Submission materializes resource rows in `requested` state
// for the orchestrator and runs spec-embedded workflows synchronously —
// those never touch resource rows, which the orchestrator owns
// exclusively.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::{Extension, Json, Router};
use groundwork_core::{AppSpec, Operation, ResourceState};
use groundwork_engine::persistence::{NewResource, ResourceRecord, TransitionRecord};
use groundwork_engine::{
    ExecutionParams, ExecutionStatus, ResourceStore, WorkflowResolver, WorkflowRunner,
};
use groundwork_storage::Database;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub resources: Arc<dyn ResourceStore>,
    pub runner: Arc<WorkflowRunner>,
    pub resolver: Arc<WorkflowResolver>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/apps", post(submit_app).get(list_apps))
        .route("/api/apps/:name", get(get_app).delete(delete_app))
        .route("/api/apps/:name/resources", get(list_resources))
        .route(
            "/api/apps/:name/resources/:resource",
            patch(request_operation),
        )
        .route(
            "/api/apps/:name/resources/:resource/transitions",
            get(list_transitions),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct InlineWorkflowResult {
    workflow: String,
    execution_id: Uuid,
    status: ExecutionStatus,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    application: String,
    created: bool,
    resources: Vec<String>,
    workflows: Vec<InlineWorkflowResult>,
}

async fn submit_app(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(spec): Json<AppSpec>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let name = spec.metadata.name.clone();
    if name.is_empty() {
        return Err(ApiError::validation("metadata.name must not be empty"));
    }

    let spec_json =
        serde_json::to_value(&spec).map_err(|e| ApiError::internal(e.to_string()))?;

    let created = match state.db.get_application(&name).await? {
        Some(existing) => {
            // resubmitting the identical spec is idempotent
            if existing.app_spec != spec_json {
                return Err(ApiError::conflict(format!(
                    "application '{name}' already exists with a different spec"
                )));
            }
            false
        }
        None => {
            state
                .db
                .create_application(
                    &name,
                    &spec_json,
                    spec.metadata.team.as_deref(),
                    &user.effective_user,
                )
                .await?;
            info!(app = %name, by = %user.effective_user, "application created");
            true
        }
    };

    let mut resources = Vec::new();
    for (resource_name, resource) in &spec.resources {
        let existing = state.resources.find_resource(&name, resource_name).await?;
        if existing.is_none() {
            state
                .resources
                .create_resource(NewResource {
                    application_name: name.clone(),
                    resource_name: resource_name.clone(),
                    resource_type: resource.resource_type.clone(),
                    configuration: serde_json::to_value(&resource.params)
                        .unwrap_or_else(|_| serde_json::json!({})),
                })
                .await?;
        }
        resources.push(resource_name.clone());
    }

    let mut workflows = Vec::new();
    if created {
        let params = ExecutionParams {
            env_type: spec.environment_type().to_string(),
            ..Default::default()
        };
        for workflow_name in spec.workflows.keys() {
            let plan = state.resolver.resolve(&spec, workflow_name)?;
            for planned in plan.workflows {
                let execution = state
                    .runner
                    .execute(&name, &planned.name, &planned.spec, &params, None)
                    .await?;
                if execution.status != ExecutionStatus::Completed {
                    warn!(app = %name, workflow = %planned.name, "inline workflow did not complete");
                }
                workflows.push(InlineWorkflowResult {
                    workflow: planned.name,
                    execution_id: execution.id,
                    status: execution.status,
                });
            }
        }
    }

    Ok(Json(SubmitResponse {
        application: name,
        created,
        resources,
        workflows,
    }))
}

#[derive(Debug, Serialize)]
struct AppSummary {
    name: String,
    team: Option<String>,
    created_by: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

async fn list_apps(State(state): State<AppState>) -> Result<Json<Vec<AppSummary>>, ApiError> {
    let apps = state.db.list_applications().await?;
    Ok(Json(
        apps.into_iter()
            .map(|a| AppSummary {
                name: a.name,
                team: a.team,
                created_by: a.created_by,
                created_at: a.created_at,
            })
            .collect(),
    ))
}

async fn get_app(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let app = state
        .db
        .get_application(&name)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("application '{name}' not found")))?;
    Ok(Json(serde_json::json!({
        "name": app.name,
        "team": app.team,
        "created_by": app.created_by,
        "spec": app.app_spec,
    })))
}

/// Deletion cascades resources and workflow history.
async fn delete_app(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let app = state
        .db
        .get_application(&name)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("application '{name}' not found")))?;

    let same_team = app.team.as_deref() == Some(user.team.as_str());
    if !user.is_admin() && !same_team {
        return Err(ApiError::forbidden(
            "only admins or the owning team may delete an application",
        ));
    }

    state.db.delete_application(&name).await?;
    info!(app = %name, by = %user.effective_user, "application deleted");
    Ok(Json(serde_json::json!({ "deleted": name })))
}

async fn list_resources(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<ResourceRecord>>, ApiError> {
    Ok(Json(state.resources.list_resources(&name).await?))
}

#[derive(Debug, Deserialize)]
struct OperationRequest {
    operation: Operation,
    configuration: Option<serde_json::Value>,
}

/// Request an update or delete on an existing resource; the orchestrator
/// picks it up on its next tick.
async fn request_operation(
    State(state): State<AppState>,
    Path((name, resource_name)): Path<(String, String)>,
    Json(request): Json<OperationRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let resource = state
        .resources
        .find_resource(&name, &resource_name)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(format!("resource '{resource_name}' not found in '{name}'"))
        })?;

    let allowed = match request.operation {
        Operation::Create => false,
        Operation::Update => resource.state == ResourceState::Active,
        Operation::Delete => matches!(
            resource.state,
            ResourceState::Active | ResourceState::Degraded
        ),
    };
    if !allowed {
        return Err(ApiError::validation(format!(
            "cannot request {} while resource is {}",
            request.operation, resource.state
        )));
    }

    state
        .resources
        .set_desired_operation(
            resource.id,
            Some(request.operation),
            request.configuration,
        )
        .await?;

    Ok(Json(serde_json::json!({
        "resource": resource_name,
        "operation": request.operation,
    })))
}

async fn list_transitions(
    State(state): State<AppState>,
    Path((name, resource_name)): Path<(String, String)>,
) -> Result<Json<Vec<TransitionRecord>>, ApiError> {
    let resource = state
        .resources
        .find_resource(&name, &resource_name)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(format!("resource '{resource_name}' not found in '{name}'"))
        })?;
    Ok(Json(state.resources.list_transitions(resource.id).await?))
}
