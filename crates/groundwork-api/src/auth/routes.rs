// Auth HTTP routes: login/logout, impersonation, API keys

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, State};
use axum::routing::{delete, get, post};
use axum::{middleware, Extension, Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use groundwork_core::ErrorKind;
use serde::{Deserialize, Serialize};

use super::{require_auth, AuthState, CurrentUser, SESSION_COOKIE};
use crate::error::ApiError;

pub fn routes(state: AuthState) -> Router {
    let protected = Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route(
            "/auth/impersonate",
            post(impersonate_start).delete(impersonate_stop),
        )
        .route("/auth/api-keys", post(create_api_key).get(list_api_keys))
        .route("/auth/api-keys/:name", delete(revoke_api_key))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    Router::new()
        .route("/auth/login", post(login))
        .with_state(state)
        .merge(protected)
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
    username: String,
    team: String,
    role: String,
    expires_at: DateTime<Utc>,
}

async fn login(
    State(state): State<AuthState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    jar: CookieJar,
    Json(request): Json<LoginRequest>,
) -> Result<(CookieJar, Json<LoginResponse>), ApiError> {
    let ip = addr.ip();
    if !state.limiter.check(ip) {
        return Err(ApiError::new(
            ErrorKind::RateLimited,
            "too-many-attempts: login temporarily blocked for this address",
        ));
    }

    let session = match state.sessions.login(&request.username, &request.password).await {
        Ok(session) => session,
        Err(e) => {
            state.limiter.record_failure(ip);
            return Err(e);
        }
    };
    state.limiter.clear(ip);

    let cookie = Cookie::build((SESSION_COOKIE, session.id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    Ok((
        jar.add(cookie),
        Json(LoginResponse {
            token: session.id.clone(),
            username: session.username,
            team: session.team,
            role: session.role,
            expires_at: session.expires_at,
        }),
    ))
}

async fn logout(
    State(state): State<AuthState>,
    Extension(user): Extension<CurrentUser>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<serde_json::Value>), ApiError> {
    if !user.session_id.is_empty() {
        state.sessions.logout(&user.session_id).await?;
    }
    Ok((
        jar.remove(Cookie::from(SESSION_COOKIE)),
        Json(serde_json::json!({ "status": "logged out" })),
    ))
}

#[derive(Debug, Serialize)]
struct MeResponse {
    username: String,
    effective_user: String,
    team: String,
    role: String,
    impersonating: bool,
}

async fn me(Extension(user): Extension<CurrentUser>) -> Json<MeResponse> {
    Json(MeResponse {
        impersonating: user.username != user.effective_user,
        username: user.username.clone(),
        effective_user: user.effective_user,
        team: user.team,
        role: user.role,
    })
}

#[derive(Debug, Deserialize)]
struct ImpersonateRequest {
    username: String,
}

async fn impersonate_start(
    State(state): State<AuthState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<ImpersonateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if user.session_id.is_empty() {
        return Err(ApiError::validation(
            "impersonation requires a persistent session",
        ));
    }
    let session = state
        .sessions
        .impersonate_start(&user.session_id, &request.username)
        .await?;
    Ok(Json(serde_json::json!({
        "original_user": session.original_user,
        "impersonated_user": session.impersonated_user,
    })))
}

async fn impersonate_stop(
    State(state): State<AuthState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if user.session_id.is_empty() {
        return Err(ApiError::validation(
            "impersonation requires a persistent session",
        ));
    }
    let session = state.sessions.impersonate_stop(&user.session_id).await?;
    Ok(Json(serde_json::json!({ "username": session.username })))
}

#[derive(Debug, Deserialize)]
struct CreateApiKeyRequest {
    name: String,
    #[serde(default = "default_expiry_days")]
    expires_in_days: i64,
}

fn default_expiry_days() -> i64 {
    90
}

#[derive(Debug, Serialize)]
struct CreateApiKeyResponse {
    /// Shown exactly once.
    key: String,
    name: String,
}

async fn create_api_key(
    State(state): State<AuthState>,
    Extension(user): Extension<CurrentUser>,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<Json<CreateApiKeyResponse>, ApiError> {
    let key = state
        .sessions
        .create_api_key(&user.username, &request.name, request.expires_in_days)
        .await?;
    Ok(Json(CreateApiKeyResponse {
        key,
        name: request.name,
    }))
}

#[derive(Debug, Serialize)]
struct ApiKeySummary {
    name: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_used_at: Option<DateTime<Utc>>,
}

async fn list_api_keys(
    State(state): State<AuthState>,
    Extension(user): Extension<CurrentUser>,
) -> Result<Json<Vec<ApiKeySummary>>, ApiError> {
    let keys = state.sessions.list_api_keys(&user.username).await?;
    Ok(Json(
        keys.into_iter()
            .map(|k| ApiKeySummary {
                name: k.key_name,
                created_at: k.created_at,
                expires_at: k.expires_at,
                last_used_at: k.last_used_at,
            })
            .collect(),
    ))
}

async fn revoke_api_key(
    State(state): State<AuthState>,
    Extension(user): Extension<CurrentUser>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.sessions.revoke_api_key(&user.username, &name).await? {
        return Err(ApiError::not_found(format!("no api key named '{name}'")));
    }
    Ok(Json(serde_json::json!({ "revoked": name })))
}
