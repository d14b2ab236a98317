//! Resource orchestration loop
//!
//! A single reconciler per process. Each tick scans resource rows with
//! pending work, acquires ownership by conditional update (the
//! serialization point; losing the race is silently skipped), resolves
//! the provider workflow for the operation, runs it, and transitions the
//! row to its terminal state with an immutable transition record for
//! every change. Startup recovers rows left in flight by a dead process.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use groundwork_core::{Operation, ResourceState};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::executor::{ExecutionParams, WorkflowRunner};
use crate::hub::GraphHub;
use crate::persistence::{
    ExecutionStatus, ExecutionStore, ResourceRecord, ResourceStore, StoreError,
};
use crate::providers::ProviderRegistry;

const ACTOR: &str = "orchestrator";

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Reconcile cadence.
    pub poll_interval: Duration,

    /// Rows examined per tick.
    pub batch_size: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 20,
        }
    }
}

/// Store surface the orchestrator needs.
pub trait OrchestratorStore: ResourceStore + ExecutionStore {}
impl<T: ResourceStore + ExecutionStore> OrchestratorStore for T {}

/// The periodic reconciler driving resource rows from desired to actual
/// state.
pub struct ResourceOrchestrator {
    store: Arc<dyn OrchestratorStore>,
    providers: Arc<ProviderRegistry>,
    runner: Arc<WorkflowRunner>,
    hub: Option<Arc<GraphHub>>,
    config: OrchestratorConfig,
}

impl ResourceOrchestrator {
    pub fn new(
        store: Arc<dyn OrchestratorStore>,
        providers: Arc<ProviderRegistry>,
        runner: Arc<WorkflowRunner>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            providers,
            runner,
            hub: None,
            config,
        }
    }

    pub fn with_hub(mut self, hub: Arc<GraphHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Run until shutdown. Recovery happens once before the first tick;
    /// the tick itself is interruptible.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        if let Err(e) = self.recover().await {
            error!("startup recovery failed: {}", e);
        }

        let mut tick = tokio::time::interval(self.config.poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval = ?self.config.poll_interval, "orchestrator started");

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match self.reconcile_once().await {
                        Ok(0) => {}
                        Ok(n) => debug!(reconciled = n, "reconcile tick"),
                        Err(e) => error!("reconcile tick failed: {}", e),
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("orchestrator stopping");
                    break;
                }
            }
        }
    }

    /// Complete transitions for rows whose workflow ended while the
    /// process was down; rows with no conclusive execution are failed.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<(), StoreError> {
        let in_flight = self.store.find_in_flight().await?;
        if in_flight.is_empty() {
            return Ok(());
        }
        info!(rows = in_flight.len(), "recovering in-flight resources");

        for resource in in_flight {
            let operation = operation_for(&resource);
            let outcome = match resource.workflow_execution_id {
                Some(execution_id) => match self.store.get_execution(execution_id).await {
                    Ok(execution) if execution.status == ExecutionStatus::Completed => {
                        Some((operation.success_state(), Some(execution_id), None))
                    }
                    Ok(execution) if execution.status.is_terminal() => Some((
                        ResourceState::Failed,
                        Some(execution_id),
                        execution.error_message.clone(),
                    )),
                    Ok(_) | Err(StoreError::ExecutionNotFound(_)) => Some((
                        ResourceState::Failed,
                        None,
                        Some("orchestrator restart; workflow state unknown".to_string()),
                    )),
                    Err(e) => {
                        error!(resource = %resource.id, "recovery lookup failed: {}", e);
                        None
                    }
                },
                None => Some((
                    ResourceState::Failed,
                    None,
                    Some("orchestrator restart; workflow state unknown".to_string()),
                )),
            };

            if let Some((to, execution_id, error)) = outcome {
                self.store
                    .release(resource.id, to, execution_id, error.as_deref())
                    .await?;
                self.store
                    .record_transition(
                        resource.id,
                        resource.state,
                        to,
                        "recovered after restart",
                        ACTOR,
                    )
                    .await?;
            }
        }

        Ok(())
    }

    /// One reconcile pass. Returns the number of rows acted on.
    pub async fn reconcile_once(&self) -> Result<usize, StoreError> {
        let pending = self.store.scan_pending(self.config.batch_size).await?;
        let mut acted = 0;

        for resource in pending {
            let operation = operation_for(&resource);
            let intermediate = operation.in_flight_state();

            // the CAS is the serialization point; a lost race is not an error
            if !self
                .store
                .try_acquire(resource.id, resource.state, intermediate)
                .await?
            {
                debug!(resource = %resource.id, "lost acquire race, skipping");
                continue;
            }
            self.store
                .record_transition(
                    resource.id,
                    resource.state,
                    intermediate,
                    &format!("{operation} requested"),
                    ACTOR,
                )
                .await?;

            acted += 1;
            self.process_resource(&resource, operation, intermediate)
                .await?;
        }

        Ok(acted)
    }

    #[instrument(skip(self, resource), fields(resource = %resource.resource_name, app = %resource.application_name, %operation))]
    async fn process_resource(
        &self,
        resource: &ResourceRecord,
        operation: Operation,
        intermediate: ResourceState,
    ) -> Result<(), StoreError> {
        let outcome = self.run_provider_workflow(resource, operation).await;

        let (to, execution_id, error) = match outcome {
            Ok(execution) if execution.status == ExecutionStatus::Completed => {
                (operation.success_state(), Some(execution.id), None)
            }
            Ok(execution) => {
                let message = execution
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("workflow ended {}", execution.status));
                (ResourceState::Failed, Some(execution.id), Some(message))
            }
            Err(message) => (ResourceState::Failed, None, Some(message)),
        };

        self.store
            .release(resource.id, to, execution_id, error.as_deref())
            .await?;
        let reason = match &error {
            None => format!("{operation} completed"),
            Some(message) => message.clone(),
        };
        self.store
            .record_transition(resource.id, intermediate, to, &reason, ACTOR)
            .await?;

        match to {
            ResourceState::Failed => {
                warn!(resource = %resource.id, "resource failed: {}", reason)
            }
            _ => info!(resource = %resource.id, state = %to, "resource transitioned"),
        }

        if let Some(hub) = &self.hub {
            let payload = serde_json::json!({
                "type": "resource-transition",
                "resource_name": resource.resource_name,
                "state": to,
                "operation": operation,
            });
            let _ = hub.broadcast(&resource.application_name, payload).await;
        }

        Ok(())
    }

    /// Resolve and run the provider workflow; any failure comes back as a
    /// message for the resource row.
    async fn run_provider_workflow(
        &self,
        resource: &ResourceRecord,
        operation: Operation,
    ) -> Result<crate::persistence::ExecutionRecord, String> {
        let resolved = self
            .providers
            .resolve(&resource.resource_type, operation)
            .map_err(|e| e.to_string())?;
        let spec = self
            .providers
            .load_workflow(&resolved)
            .map_err(|e| e.to_string())?;

        let params = ExecutionParams {
            env_type: "kubernetes".to_string(),
            extra_vars: injected_vars(resource),
        };

        self.runner
            .execute(
                &resource.application_name,
                &resolved.workflow_name,
                &spec,
                &params,
                None,
            )
            .await
            .map_err(|e| e.to_string())
    }
}

fn operation_for(resource: &ResourceRecord) -> Operation {
    // an absent operation on a requested row means create
    resource.desired_operation.unwrap_or(Operation::Create)
}

/// Parameters injected into provider workflows: resource identity plus
/// the flattened configuration.
fn injected_vars(resource: &ResourceRecord) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert(
        "resource.name".to_string(),
        resource.resource_name.clone(),
    );
    vars.insert(
        "resource.type".to_string(),
        resource.resource_type.clone(),
    );
    vars.insert(
        "application.name".to_string(),
        resource.application_name.clone(),
    );
    if let Some(config) = resource.configuration.as_object() {
        for (key, value) in config {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            vars.insert(format!("config.{key}"), rendered);
        }
    }
    vars
}

#[cfg(test)]
mod tests {
    use groundwork_core::ProviderManifest;
    use uuid::Uuid;

    use super::*;
    use crate::config::EngineConfig;
    use crate::persistence::{InMemoryPlatformStore, NewExecution, NewResource};
    use crate::steps::ExecutorRegistry;

    fn write_provider(dir: &std::path::Path) -> Arc<ProviderRegistry> {
        std::fs::create_dir_all(dir.join("workflows")).unwrap();
        for (file, step) in [
            ("provision-postgres", "create-db"),
            ("update-postgres", "update-db"),
            ("teardown-postgres", "drop-db"),
        ] {
            std::fs::write(
                dir.join(format!("workflows/{file}.yaml")),
                format!(
                    "apiVersion: groundwork.dev/v1\nkind: Workflow\nspec:\n  steps:\n    - name: {step}-1\n      type: dummy\n    - name: {step}-2\n      type: dummy\n      dependsOn: [{step}-1]\n    - name: {step}-3\n      type: dummy\n      dependsOn: [{step}-2]\n"
                ),
            )
            .unwrap();
        }

        let manifest: ProviderManifest = serde_yaml::from_str(
            r#"
metadata:
  name: database-team
  version: "1.0.0"
capabilities:
  resourceTypeCapabilities:
    - type: postgres
      operations:
        create: provision-postgres
        update: update-postgres
        delete: teardown-postgres
workflows:
  - name: provision-postgres
    operation: create
    file: workflows/provision-postgres.yaml
  - name: update-postgres
    operation: update
    file: workflows/update-postgres.yaml
  - name: teardown-postgres
    operation: delete
    file: workflows/teardown-postgres.yaml
"#,
        )
        .unwrap();

        let mut registry = ProviderRegistry::new();
        registry.register(&manifest, dir).unwrap();
        registry.validate_aliases().unwrap();
        Arc::new(registry)
    }

    fn orchestrator(
        store: Arc<InMemoryPlatformStore>,
        providers: Arc<ProviderRegistry>,
    ) -> ResourceOrchestrator {
        let runner = Arc::new(WorkflowRunner::new(
            store.clone(),
            Arc::new(ExecutorRegistry::builtin()),
            Arc::new(EngineConfig::default()),
        ));
        ResourceOrchestrator::new(store, providers, runner, OrchestratorConfig::default())
    }

    async fn requested_resource(store: &Arc<InMemoryPlatformStore>) -> Uuid {
        store
            .create_resource(NewResource {
                application_name: "shop".into(),
                resource_name: "db".into(),
                resource_type: "postgres".into(),
                configuration: serde_json::json!({ "version": "16" }),
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn happy_create_path() {
        let tmp = tempfile::tempdir().unwrap();
        let providers = write_provider(tmp.path());
        let store = Arc::new(InMemoryPlatformStore::new());
        let orchestrator = orchestrator(store.clone(), providers);
        let resource_id = requested_resource(&store).await;

        let acted = orchestrator.reconcile_once().await.unwrap();
        assert_eq!(acted, 1);

        let resource = store.get_resource(resource_id).await.unwrap();
        assert_eq!(resource.state, ResourceState::Active);
        let execution_id = resource.workflow_execution_id.expect("execution linked");

        let execution = store.get_execution(execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.completed_steps, 3);

        // requested -> provisioning -> active, both audited
        let transitions = store.list_transitions(resource_id).await.unwrap();
        let states: Vec<(ResourceState, ResourceState)> = transitions
            .iter()
            .map(|t| (t.from_state, t.to_state))
            .collect();
        assert_eq!(
            states,
            vec![
                (ResourceState::Requested, ResourceState::Provisioning),
                (ResourceState::Provisioning, ResourceState::Active),
            ]
        );
        assert!(transitions.iter().all(|t| t.actor == ACTOR));
    }

    #[tokio::test]
    async fn update_after_create_links_second_execution() {
        let tmp = tempfile::tempdir().unwrap();
        let providers = write_provider(tmp.path());
        let store = Arc::new(InMemoryPlatformStore::new());
        let orchestrator = orchestrator(store.clone(), providers);
        let resource_id = requested_resource(&store).await;

        orchestrator.reconcile_once().await.unwrap();
        let first = store
            .get_resource(resource_id)
            .await
            .unwrap()
            .workflow_execution_id
            .unwrap();

        store
            .set_desired_operation(
                resource_id,
                Some(Operation::Update),
                Some(serde_json::json!({ "replicas": 5 })),
            )
            .await
            .unwrap();

        let acted = orchestrator.reconcile_once().await.unwrap();
        assert_eq!(acted, 1);

        let resource = store.get_resource(resource_id).await.unwrap();
        assert_eq!(resource.state, ResourceState::Active);
        let second = resource.workflow_execution_id.unwrap();
        assert_ne!(first, second);

        // the first execution is preserved for audit
        assert!(store.get_execution(first).await.is_ok());
    }

    #[tokio::test]
    async fn delete_terminates_resource() {
        let tmp = tempfile::tempdir().unwrap();
        let providers = write_provider(tmp.path());
        let store = Arc::new(InMemoryPlatformStore::new());
        let orchestrator = orchestrator(store.clone(), providers);
        let resource_id = requested_resource(&store).await;

        orchestrator.reconcile_once().await.unwrap();
        store
            .set_desired_operation(resource_id, Some(Operation::Delete), None)
            .await
            .unwrap();
        orchestrator.reconcile_once().await.unwrap();

        let resource = store.get_resource(resource_id).await.unwrap();
        assert_eq!(resource.state, ResourceState::Terminated);
    }

    #[tokio::test]
    async fn unknown_type_fails_resource_with_message() {
        let tmp = tempfile::tempdir().unwrap();
        let providers = write_provider(tmp.path());
        let store = Arc::new(InMemoryPlatformStore::new());
        let orchestrator = orchestrator(store.clone(), providers);

        let resource_id = store
            .create_resource(NewResource {
                application_name: "shop".into(),
                resource_name: "queue".into(),
                resource_type: "kafka".into(),
                configuration: serde_json::json!({}),
            })
            .await
            .unwrap()
            .id;

        orchestrator.reconcile_once().await.unwrap();

        let resource = store.get_resource(resource_id).await.unwrap();
        assert_eq!(resource.state, ResourceState::Failed);
        assert!(resource
            .error_message
            .unwrap()
            .contains("no provider registered"));
    }

    #[tokio::test]
    async fn recovery_completes_finished_transition() {
        let tmp = tempfile::tempdir().unwrap();
        let providers = write_provider(tmp.path());
        let store = Arc::new(InMemoryPlatformStore::new());
        let orchestrator = orchestrator(store.clone(), providers);
        let resource_id = requested_resource(&store).await;

        // simulate a crash after the workflow completed but before the
        // terminal transition was written
        store
            .try_acquire(
                resource_id,
                ResourceState::Requested,
                ResourceState::Provisioning,
            )
            .await
            .unwrap();
        let execution = store
            .create_execution(NewExecution {
                application_name: "shop".into(),
                workflow_name: "provision-postgres".into(),
                total_steps: 0,
                parent_execution_id: None,
            })
            .await
            .unwrap();
        store
            .finish_execution(execution.id, ExecutionStatus::Completed, None)
            .await
            .unwrap();
        store
            .release(
                resource_id,
                ResourceState::Provisioning,
                Some(execution.id),
                None,
            )
            .await
            .unwrap();

        orchestrator.recover().await.unwrap();

        let resource = store.get_resource(resource_id).await.unwrap();
        assert_eq!(resource.state, ResourceState::Active);
    }

    #[tokio::test]
    async fn recovery_fails_rows_with_unknown_outcome() {
        let tmp = tempfile::tempdir().unwrap();
        let providers = write_provider(tmp.path());
        let store = Arc::new(InMemoryPlatformStore::new());
        let orchestrator = orchestrator(store.clone(), providers);
        let resource_id = requested_resource(&store).await;

        store
            .try_acquire(
                resource_id,
                ResourceState::Requested,
                ResourceState::Provisioning,
            )
            .await
            .unwrap();

        orchestrator.recover().await.unwrap();

        let resource = store.get_resource(resource_id).await.unwrap();
        assert_eq!(resource.state, ResourceState::Failed);
        assert!(resource
            .error_message
            .unwrap()
            .contains("orchestrator restart"));
    }

    #[tokio::test]
    async fn lost_cas_race_is_silently_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let providers = write_provider(tmp.path());
        let store = Arc::new(InMemoryPlatformStore::new());
        let orchestrator = orchestrator(store.clone(), providers);
        let resource_id = requested_resource(&store).await;

        // another worker already took the row
        store
            .try_acquire(
                resource_id,
                ResourceState::Requested,
                ResourceState::Provisioning,
            )
            .await
            .unwrap();

        // scan_pending no longer sees it (in-flight), so nothing happens
        let acted = orchestrator.reconcile_once().await.unwrap();
        assert_eq!(acted, 0);
    }
}
