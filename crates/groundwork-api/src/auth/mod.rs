// Session & API-key authentication
//
// Credential validation order per request: session cookie first, then
// Authorization: Bearer (session id, falling back to API-key hash).

mod api_key;
mod rate_limit;
mod routes;
mod session;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::CookieJar;
use groundwork_storage::SessionRow;

use crate::error::ApiError;

pub use rate_limit::LoginRateLimiter;
pub use routes::routes;
pub use session::SessionManager;

pub const SESSION_COOKIE: &str = "groundwork_session";

#[derive(Clone)]
pub struct AuthState {
    pub sessions: Arc<SessionManager>,
    pub limiter: Arc<LoginRateLimiter>,
}

/// The authenticated caller, attached to request extensions.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    /// Empty for synthetic (API key) sessions.
    pub session_id: String,
    pub username: String,
    /// Authorization checks use this; differs from `username` while
    /// impersonating.
    pub effective_user: String,
    pub team: String,
    pub role: String,
}

impl CurrentUser {
    fn from_session(session: &SessionRow) -> Self {
        Self {
            session_id: session.id.clone(),
            username: session.username.clone(),
            effective_user: session.effective_user().to_string(),
            team: session.team.clone(),
            role: session.role.clone(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Middleware resolving the caller and rejecting anonymous requests.
pub async fn require_auth(
    State(state): State<AuthState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let mut session = None;

    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        session = state.sessions.validate_session(cookie.value()).await?;
    }
    if session.is_none() {
        if let Some(token) = bearer_token(request.headers()) {
            session = state.sessions.validate_bearer(token).await?;
        }
    }

    let session = session.ok_or_else(ApiError::unauthorized)?;
    request
        .extensions_mut()
        .insert(CurrentUser::from_session(&session));
    Ok(next.run(request).await)
}
