// Session manager
//
// Dual-path credential validation: session tokens (cookie or bearer) and
// hashed API keys. Sessions live in the database with an in-process
// cache; API-key hits yield a synthetic 24 h session that is never
// persisted.

use std::sync::Arc;

use chrono::{Duration, Utc};
use dashmap::DashMap;
use groundwork_core::ErrorKind;
use groundwork_storage::{CreateApiKey, CreateSession, Database, SessionRow, UserDirectory};
use rand::Rng;
use tracing::{debug, info};

use super::api_key::{generate_api_key, hash_api_key, is_valid_api_key_format};
use crate::error::ApiError;

const SESSION_ID_BYTES: usize = 32; // 256 bits
const SYNTHETIC_SESSION_HOURS: i64 = 24;

pub struct SessionManager {
    db: Arc<Database>,
    users: Arc<UserDirectory>,
    cache: DashMap<String, SessionRow>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(db: Arc<Database>, users: Arc<UserDirectory>, ttl_hours: i64) -> Self {
        Self {
            db,
            users,
            cache: DashMap::new(),
            ttl: Duration::hours(ttl_hours),
        }
    }

    fn new_session_id() -> String {
        let mut rng = rand::thread_rng();
        let bytes: Vec<u8> = (0..SESSION_ID_BYTES).map(|_| rng.gen()).collect();
        hex::encode(bytes)
    }

    /// Validate credentials and issue a session.
    pub async fn login(&self, username: &str, password: &str) -> Result<SessionRow, ApiError> {
        let user = self
            .users
            .authenticate(username, password)
            .ok_or_else(|| ApiError::new(ErrorKind::Unauthorized, "invalid credentials"))?;

        let session = self
            .db
            .create_session(CreateSession {
                id: Self::new_session_id(),
                username: user.username.clone(),
                team: user.team.clone(),
                role: user.role.clone(),
                expires_at: Utc::now() + self.ttl,
            })
            .await?;

        self.cache.insert(session.id.clone(), session.clone());
        info!(username = %session.username, "session issued");
        Ok(session)
    }

    /// Look up an active session by token. Expired sessions are evicted.
    pub async fn validate_session(&self, token: &str) -> Result<Option<SessionRow>, ApiError> {
        if let Some(cached) = self.cache.get(token) {
            if !cached.is_expired() {
                return Ok(Some(cached.clone()));
            }
            drop(cached);
            self.cache.remove(token);
        }

        match self.db.get_session(token).await? {
            Some(session) if !session.is_expired() => {
                self.cache.insert(token.to_string(), session.clone());
                Ok(Some(session))
            }
            Some(session) => {
                self.db.delete_session(&session.id).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Bearer validation order: session id first, then API key by hash.
    pub async fn validate_bearer(&self, token: &str) -> Result<Option<SessionRow>, ApiError> {
        if let Some(session) = self.validate_session(token).await? {
            return Ok(Some(session));
        }

        if !is_valid_api_key_format(token) {
            return Ok(None);
        }

        let hash = hash_api_key(token);
        let Some(key) = self.db.get_api_key_by_hash(&hash).await? else {
            return Ok(None);
        };
        if key.is_expired() {
            return Ok(None);
        }
        self.db.touch_api_key(&hash).await?;

        // synthetic session: never persisted, never cached
        let (team, role) = match self.users.get(&key.username) {
            Some(user) => (user.team.clone(), user.role.clone()),
            None => (String::new(), "user".to_string()),
        };
        debug!(username = %key.username, key = %key.key_name, "api key authenticated");
        Ok(Some(SessionRow {
            id: String::new(),
            username: key.username,
            team,
            role,
            original_user: None,
            impersonated_user: None,
            created_at: Utc::now(),
            expires_at: Utc::now() + Duration::hours(SYNTHETIC_SESSION_HOURS),
        }))
    }

    pub async fn logout(&self, token: &str) -> Result<(), ApiError> {
        self.cache.remove(token);
        self.db.delete_session(token).await?;
        Ok(())
    }

    /// Admins may assume another identity; the session keeps both names.
    pub async fn impersonate_start(
        &self,
        session_id: &str,
        target: &str,
    ) -> Result<SessionRow, ApiError> {
        let session = self
            .validate_session(session_id)
            .await?
            .ok_or_else(ApiError::unauthorized)?;
        if !session.is_admin() {
            return Err(ApiError::forbidden("impersonation requires admin role"));
        }
        if self.users.get(target).is_none() {
            return Err(ApiError::not_found(format!("unknown user: {target}")));
        }

        let updated = self
            .db
            .set_session_impersonation(session_id, Some(&session.username), Some(target))
            .await?
            .ok_or_else(ApiError::unauthorized)?;
        self.cache.insert(session_id.to_string(), updated.clone());
        info!(admin = %session.username, %target, "impersonation started");
        Ok(updated)
    }

    pub async fn impersonate_stop(&self, session_id: &str) -> Result<SessionRow, ApiError> {
        let session = self
            .validate_session(session_id)
            .await?
            .ok_or_else(ApiError::unauthorized)?;
        if session.impersonated_user.is_none() {
            return Err(ApiError::validation("session is not impersonating"));
        }

        let updated = self
            .db
            .set_session_impersonation(session_id, None, None)
            .await?
            .ok_or_else(ApiError::unauthorized)?;
        self.cache.insert(session_id.to_string(), updated.clone());
        Ok(updated)
    }

    // ============================================
    // API keys
    // ============================================

    /// Issue a key for a user. The full key is returned exactly once.
    pub async fn create_api_key(
        &self,
        username: &str,
        key_name: &str,
        expires_in_days: i64,
    ) -> Result<String, ApiError> {
        if key_name.is_empty() {
            return Err(ApiError::validation("key name must not be empty"));
        }
        if self.db.find_api_key(username, key_name).await?.is_some() {
            return Err(ApiError::conflict(format!(
                "api key '{key_name}' already exists for {username}"
            )));
        }

        let generated = generate_api_key();
        self.db
            .create_api_key(CreateApiKey {
                key_hash: generated.key_hash,
                username: username.to_string(),
                key_name: key_name.to_string(),
                expires_at: Utc::now() + Duration::days(expires_in_days),
            })
            .await?;
        info!(%username, key = %key_name, "api key created");
        Ok(generated.key)
    }

    pub async fn list_api_keys(
        &self,
        username: &str,
    ) -> Result<Vec<groundwork_storage::ApiKeyRow>, ApiError> {
        Ok(self.db.list_api_keys_for_user(username).await?)
    }

    pub async fn revoke_api_key(&self, username: &str, key_name: &str) -> Result<bool, ApiError> {
        Ok(self.db.delete_api_key(username, key_name).await?)
    }
}
