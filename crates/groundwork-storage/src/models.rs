// Database models (internal, may differ from public DTOs)

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Application row from database
#[derive(Debug, Clone, FromRow)]
pub struct ApplicationRow {
    pub name: String,
    pub app_spec: sqlx::types::JsonValue,
    pub team: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Session row from database
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub id: String,
    pub username: String,
    pub team: String,
    pub role: String,
    pub original_user: Option<String>,
    pub impersonated_user: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRow {
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    /// Authorization checks use the impersonated identity while
    /// impersonation is active.
    pub fn effective_user(&self) -> &str {
        self.impersonated_user.as_deref().unwrap_or(&self.username)
    }

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Input for creating a session
#[derive(Debug, Clone)]
pub struct CreateSession {
    pub id: String,
    pub username: String,
    pub team: String,
    pub role: String,
    pub expires_at: DateTime<Utc>,
}

/// API key row from database
#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyRow {
    pub key_hash: String,
    pub username: String,
    pub key_name: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKeyRow {
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }
}

/// Input for creating an API key
#[derive(Debug, Clone)]
pub struct CreateApiKey {
    pub key_hash: String,
    pub username: String,
    pub key_name: String,
    pub expires_at: DateTime<Utc>,
}

/// Graph annotation row from database
#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct AnnotationRow {
    pub id: Uuid,
    pub application_name: String,
    pub node_id: String,
    pub node_name: String,
    pub annotation_text: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a graph annotation
#[derive(Debug, Clone)]
pub struct CreateAnnotation {
    pub application_name: String,
    pub node_id: String,
    pub node_name: String,
    pub annotation_text: String,
    pub created_by: String,
}
