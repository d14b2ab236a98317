// API error handling
//
// Internal detail never reaches responses; clients see a short kind label
// and a message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use groundwork_core::ErrorKind;
use serde::Serialize;

#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorKind::Unauthorized, "authentication required")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.kind);
        if status.is_server_error() {
            tracing::error!(kind = %self.kind, "request failed: {}", self.message);
        }
        let body = Json(ErrorResponse {
            error: self.kind.label(),
            message: self.message,
        });
        (status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        tracing::error!("internal error: {e:#}");
        Self::new(ErrorKind::Internal, "internal error")
    }
}

impl From<groundwork_engine::ExecutorError> for ApiError {
    fn from(e: groundwork_engine::ExecutorError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<groundwork_engine::QueueError> for ApiError {
    fn from(e: groundwork_engine::QueueError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<groundwork_engine::ResolverError> for ApiError {
    fn from(e: groundwork_engine::ResolverError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<groundwork_engine::ProviderError> for ApiError {
    fn from(e: groundwork_engine::ProviderError) -> Self {
        Self::new(e.kind(), e.to_string())
    }
}

impl From<groundwork_engine::StoreError> for ApiError {
    fn from(e: groundwork_engine::StoreError) -> Self {
        use groundwork_engine::StoreError;
        let kind = match &e {
            StoreError::ExecutionNotFound(_)
            | StoreError::StepNotFound(_)
            | StoreError::ResourceNotFound(_)
            | StoreError::TaskNotFound(_) => ErrorKind::NotFound,
            StoreError::Conflict(_) => ErrorKind::Conflict,
            StoreError::Database(_) => ErrorKind::Unavailable,
            StoreError::Serialization(_) => ErrorKind::Internal,
        };
        Self::new(kind, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_to_status_mapping() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(status_for(ErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorKind::Unavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorKind::Conflict), StatusCode::CONFLICT);
    }
}
