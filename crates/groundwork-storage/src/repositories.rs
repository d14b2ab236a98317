// Repository layer for database operations

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::*;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL and apply migrations
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ============================================
    // Applications
    // ============================================

    pub async fn create_application(
        &self,
        name: &str,
        app_spec: &serde_json::Value,
        team: Option<&str>,
        created_by: &str,
    ) -> Result<ApplicationRow> {
        let row = sqlx::query_as::<_, ApplicationRow>(
            r#"
            INSERT INTO applications (name, app_spec, team, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING name, app_spec, team, created_by, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(app_spec)
        .bind(team)
        .bind(created_by)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_application(&self, name: &str) -> Result<Option<ApplicationRow>> {
        let row = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT name, app_spec, team, created_by, created_at, updated_at
            FROM applications
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn update_application_spec(
        &self,
        name: &str,
        app_spec: &serde_json::Value,
    ) -> Result<Option<ApplicationRow>> {
        let row = sqlx::query_as::<_, ApplicationRow>(
            r#"
            UPDATE applications
            SET app_spec = $2, updated_at = NOW()
            WHERE name = $1
            RETURNING name, app_spec, team, created_by, created_at, updated_at
            "#,
        )
        .bind(name)
        .bind(app_spec)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_applications(&self) -> Result<Vec<ApplicationRow>> {
        let rows = sqlx::query_as::<_, ApplicationRow>(
            r#"
            SELECT name, app_spec, team, created_by, created_at, updated_at
            FROM applications
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Delete an application; resources, executions linked by FK, and
    /// annotations cascade.
    pub async fn delete_application(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM applications WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Sessions
    // ============================================

    pub async fn create_session(&self, input: CreateSession) -> Result<SessionRow> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            INSERT INTO sessions (id, username, team, role, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, username, team, role, original_user, impersonated_user, created_at, expires_at
            "#,
        )
        .bind(&input.id)
        .bind(&input.username)
        .bind(&input.team)
        .bind(&input.role)
        .bind(input.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<SessionRow>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, username, team, role, original_user, impersonated_user, created_at, expires_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn delete_session(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_expired_sessions(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn set_session_impersonation(
        &self,
        id: &str,
        original_user: Option<&str>,
        impersonated_user: Option<&str>,
    ) -> Result<Option<SessionRow>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            UPDATE sessions
            SET original_user = $2, impersonated_user = $3
            WHERE id = $1
            RETURNING id, username, team, role, original_user, impersonated_user, created_at, expires_at
            "#,
        )
        .bind(id)
        .bind(original_user)
        .bind(impersonated_user)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    // ============================================
    // API Keys
    // ============================================

    /// Fails on a duplicate (username, key_name) via the unique index.
    pub async fn create_api_key(&self, input: CreateApiKey) -> Result<ApiKeyRow> {
        let row = sqlx::query_as::<_, ApiKeyRow>(
            r#"
            INSERT INTO api_keys (key_hash, username, key_name, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING key_hash, username, key_name, created_at, expires_at, last_used_at
            "#,
        )
        .bind(&input.key_hash)
        .bind(&input.username)
        .bind(&input.key_name)
        .bind(input.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRow>> {
        let row = sqlx::query_as::<_, ApiKeyRow>(
            r#"
            SELECT key_hash, username, key_name, created_at, expires_at, last_used_at
            FROM api_keys
            WHERE key_hash = $1
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn find_api_key(
        &self,
        username: &str,
        key_name: &str,
    ) -> Result<Option<ApiKeyRow>> {
        let row = sqlx::query_as::<_, ApiKeyRow>(
            r#"
            SELECT key_hash, username, key_name, created_at, expires_at, last_used_at
            FROM api_keys
            WHERE username = $1 AND key_name = $2
            "#,
        )
        .bind(username)
        .bind(key_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_api_keys_for_user(&self, username: &str) -> Result<Vec<ApiKeyRow>> {
        let rows = sqlx::query_as::<_, ApiKeyRow>(
            r#"
            SELECT key_hash, username, key_name, created_at, expires_at, last_used_at
            FROM api_keys
            WHERE username = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn touch_api_key(&self, key_hash: &str) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE key_hash = $1")
            .bind(key_hash)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Revocation is by name, scoped to the owner.
    pub async fn delete_api_key(&self, username: &str, key_name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM api_keys WHERE username = $1 AND key_name = $2")
            .bind(username)
            .bind(key_name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ============================================
    // Graph annotations
    // ============================================

    pub async fn create_annotation(&self, input: CreateAnnotation) -> Result<AnnotationRow> {
        let row = sqlx::query_as::<_, AnnotationRow>(
            r#"
            INSERT INTO graph_annotations (id, application_name, node_id, node_name, annotation_text, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, application_name, node_id, node_name, annotation_text, created_by, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&input.application_name)
        .bind(&input.node_id)
        .bind(&input.node_name)
        .bind(&input.annotation_text)
        .bind(&input.created_by)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn get_annotation(&self, id: Uuid) -> Result<Option<AnnotationRow>> {
        let row = sqlx::query_as::<_, AnnotationRow>(
            r#"
            SELECT id, application_name, node_id, node_name, annotation_text, created_by, created_at, updated_at
            FROM graph_annotations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    pub async fn list_annotations(&self, application_name: &str) -> Result<Vec<AnnotationRow>> {
        let rows = sqlx::query_as::<_, AnnotationRow>(
            r#"
            SELECT id, application_name, node_id, node_name, annotation_text, created_by, created_at, updated_at
            FROM graph_annotations
            WHERE application_name = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(application_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn delete_annotation(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM graph_annotations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
