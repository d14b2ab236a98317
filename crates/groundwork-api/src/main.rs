// Groundwork API server
//
// Wires the engine together: Postgres-backed platform store, provider
// registry (capability conflicts are fatal here), workflow resolver,
// runner, bounded queue, resource orchestrator, graph hub, and the thin
// HTTP surface with session/API-key authentication.

mod annotations;
mod apps;
mod auth;
mod config;
mod error;
mod events;
mod executions;
mod queue_routes;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::get;
use axum::{middleware, Json, Router};
use groundwork_engine::{
    AdminPolicy, EngineConfig, ExecutorRegistry, GraphHub, HubConfig, PostgresPlatformStore,
    ProviderRegistry, ResourceGraphSource, ResourceOrchestrator, WorkflowQueue, WorkflowResolver,
    WorkflowRunner,
};
use groundwork_storage::{Database, UserDirectory};
use serde::Serialize;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth::{AuthState, LoginRateLimiter, SessionManager};
use config::ServerConfig;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn load_policy(config: &ServerConfig) -> Result<AdminPolicy> {
    match &config.workflow_policy_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read workflow policy {}", path.display()))?;
            serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse workflow policy {}", path.display()))
        }
        None => Ok(AdminPolicy::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "groundwork=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("groundwork-api starting...");

    let config = ServerConfig::from_env()?;
    if config.oidc.enabled {
        tracing::info!(issuer = ?config.oidc.issuer, "OIDC configured");
    }

    // Database and stores
    let db = Database::from_url(&config.database_url)
        .await
        .context("failed to connect to database")?;
    tracing::info!("connected to database");
    let store = Arc::new(PostgresPlatformStore::new(db.pool().clone()));
    let db = Arc::new(db);

    // User directory for credential validation
    let users = Arc::new(
        UserDirectory::from_file(&config.users_file).context("failed to load users file")?,
    );
    tracing::info!(users = users.len(), "user directory loaded");

    // Provider registry: capability conflicts and alias cycles abort startup
    let providers = Arc::new(
        ProviderRegistry::from_dir(&config.providers_root)
            .context("provider registry failed to load")?,
    );
    tracing::info!(providers = ?providers.provider_names(), "providers registered");

    let policy = load_policy(&config)?;
    let resolver = Arc::new(WorkflowResolver::new(config.workflows_root.clone(), policy));

    // Graph hub fed by the resource store
    let hub = Arc::new(GraphHub::new(
        Arc::new(ResourceGraphSource::new(store.clone())),
        HubConfig::default(),
    ));

    // Workflow runner and queue
    let engine_config: Arc<EngineConfig> = Arc::new(config.engine.clone());
    let runner = Arc::new(
        WorkflowRunner::new(
            store.clone(),
            Arc::new(ExecutorRegistry::builtin()),
            engine_config,
        )
        .with_hub(hub.clone()),
    );
    let queue = WorkflowQueue::new(store.clone(), runner.clone(), config.queue.clone());
    queue.start().await.context("queue failed to start")?;

    // Resource orchestrator
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let orchestrator = Arc::new(
        ResourceOrchestrator::new(
            store.clone(),
            providers.clone(),
            runner.clone(),
            config.orchestrator.clone(),
        )
        .with_hub(hub.clone()),
    );
    let orchestrator_handle = tokio::spawn(orchestrator.run(shutdown_rx));

    // Authentication
    let sessions = Arc::new(SessionManager::new(
        db.clone(),
        users,
        config.session_ttl_hours,
    ));
    let auth_state = AuthState {
        sessions,
        limiter: Arc::new(LoginRateLimiter::default()),
    };

    // Routes
    let protected = Router::new()
        .merge(apps::routes(apps::AppState {
            db: db.clone(),
            resources: store.clone(),
            runner: runner.clone(),
            resolver,
        }))
        .merge(executions::routes(executions::AppState {
            runner: runner.clone(),
        }))
        .merge(queue_routes::routes(queue_routes::AppState {
            queue: queue.clone(),
        }))
        .merge(annotations::routes(annotations::AppState { db: db.clone() }))
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            auth::require_auth,
        ))
        // request-scoped deadline for database-backed handlers; the SSE
        // stream below is long-lived and stays outside it
        .layer(TimeoutLayer::new(std::time::Duration::from_secs(30)));

    let streaming = Router::new()
        .merge(events::routes(events::AppState { hub: hub.clone() }))
        .layer(middleware::from_fn_with_state(
            auth_state.clone(),
            auth::require_auth,
        ));

    let app = Router::new()
        .route("/health", get(health))
        .merge(auth::routes(auth_state))
        .merge(protected)
        .merge(streaming)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Serve until ctrl-c, then drain the background loops
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!("listening on {}", config.bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    })
    .await
    .context("server error")?;

    let _ = shutdown_tx.send(true);
    queue.shutdown().await;
    hub.shutdown().await;
    let _ = orchestrator_handle.await;
    tracing::info!("groundwork-api stopped");

    Ok(())
}
