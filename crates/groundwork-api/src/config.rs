// Server configuration from environment variables

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use groundwork_engine::{EngineConfig, OrchestratorConfig, QueueConfig};

/// OIDC settings are parsed for deployments fronted by an identity
/// provider; the browser flow lives outside this server.
#[derive(Debug, Clone, Default)]
pub struct OidcConfig {
    pub enabled: bool,
    pub issuer: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: Option<String>,
}

impl OidcConfig {
    fn from_env() -> Self {
        Self {
            enabled: std::env::var("OIDC_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            issuer: std::env::var("OIDC_ISSUER").ok(),
            client_id: std::env::var("OIDC_CLIENT_ID").ok(),
            client_secret: std::env::var("OIDC_CLIENT_SECRET").ok(),
            redirect_uri: std::env::var("OIDC_REDIRECT_URI").ok(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub database_url: String,
    pub workflows_root: PathBuf,
    pub providers_root: PathBuf,
    pub users_file: PathBuf,
    pub workflow_policy_file: Option<PathBuf>,
    pub session_ttl_hours: i64,
    pub queue: QueueConfig,
    pub orchestrator: OrchestratorConfig,
    pub engine: EngineConfig,
    pub oidc: OidcConfig,
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL environment variable required")?;

        let mut queue = QueueConfig::default();
        if let Ok(workers) = std::env::var("QUEUE_WORKERS") {
            queue.workers = workers.parse().context("QUEUE_WORKERS must be a number")?;
        }
        if let Ok(depth) = std::env::var("QUEUE_MAX_DEPTH") {
            queue.max_depth = depth.parse().context("QUEUE_MAX_DEPTH must be a number")?;
        }

        let mut orchestrator = OrchestratorConfig::default();
        if let Ok(secs) = std::env::var("ORCHESTRATOR_POLL_SECS") {
            let secs: u64 = secs
                .parse()
                .context("ORCHESTRATOR_POLL_SECS must be a number")?;
            orchestrator.poll_interval = Duration::from_secs(secs.max(1));
        }

        let session_ttl_hours = std::env::var("SESSION_TTL_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(24);

        Ok(Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url,
            workflows_root: env_path("WORKFLOWS_ROOT", "workflows"),
            providers_root: env_path("PROVIDERS_ROOT", "providers"),
            users_file: env_path("USERS_FILE", "users.yaml"),
            workflow_policy_file: std::env::var("WORKFLOW_POLICY_FILE").ok().map(PathBuf::from),
            session_ttl_hours,
            queue,
            orchestrator,
            engine: EngineConfig::from_env(),
            oidc: OidcConfig::from_env(),
        })
    }
}
