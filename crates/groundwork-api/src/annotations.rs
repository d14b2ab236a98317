// Graph annotation routes. Deletion is authorized for admins or the
// annotation's creator; impersonated sessions act as the impersonated
// user.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use groundwork_storage::{AnnotationRow, CreateAnnotation, Database};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::CurrentUser;
use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/apps/:name/annotations",
            post(create_annotation).get(list_annotations),
        )
        .route("/api/annotations/:id", delete(delete_annotation))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateAnnotationRequest {
    node_id: String,
    node_name: String,
    text: String,
}

async fn create_annotation(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(name): Path<String>,
    Json(request): Json<CreateAnnotationRequest>,
) -> Result<Json<AnnotationRow>, ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError::validation("annotation text must not be empty"));
    }
    let row = state
        .db
        .create_annotation(CreateAnnotation {
            application_name: name,
            node_id: request.node_id,
            node_name: request.node_name,
            annotation_text: request.text,
            created_by: user.effective_user,
        })
        .await?;
    Ok(Json(row))
}

async fn list_annotations(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<AnnotationRow>>, ApiError> {
    Ok(Json(state.db.list_annotations(&name).await?))
}

async fn delete_annotation(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let annotation = state
        .db
        .get_annotation(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("annotation {id} not found")))?;

    if !user.is_admin() && annotation.created_by != user.effective_user {
        return Err(ApiError::forbidden(
            "only admins or the annotation's creator may delete it",
        ));
    }

    state.db.delete_annotation(id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}
