//! Workflow executor
//!
//! Validates the step DAG, creates the execution and step rows, drives
//! steps in topological order (serial by default, bounded fan-out when
//! the workflow declares `maxParallel > 1`), and supports
//! retry-from-failed-step and spec reconstruction from persisted step
//! configs.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use groundwork_core::{StepSpec, WorkflowSpec};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::hub::GraphHub;
use crate::logbuf::StepLogBuffer;
use crate::persistence::{
    ExecutionFilter, ExecutionRecord, ExecutionStatus, ExecutionStore, NewExecution, NewStep,
    Page, StepRecord, StepStatus, StoreError,
};
use crate::steps::{ExecutorRegistry, StepContext, StepError};
use crate::substitute::SubstitutionContext;

/// Errors from executor operations
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// Spec validation failure (unknown dependency, cycle, duplicate name)
    #[error("validation error: {0}")]
    Validation(String),

    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Reconstruction found no persisted step configurations
    #[error("no step configurations stored for execution {0}")]
    NoStepConfigs(Uuid),

    /// Step execution task panicked or was torn down
    #[error("internal execution error: {0}")]
    Internal(String),
}

impl ExecutorError {
    pub fn kind(&self) -> groundwork_core::ErrorKind {
        use groundwork_core::ErrorKind;
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NoStepConfigs(_) => ErrorKind::NotFound,
            Self::Store(StoreError::ExecutionNotFound(_) | StoreError::StepNotFound(_)) => {
                ErrorKind::NotFound
            }
            Self::Store(StoreError::Database(_)) => ErrorKind::Unavailable,
            Self::Store(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Per-execution parameters injected by the caller (the orchestrator adds
/// resource context here).
#[derive(Debug, Clone)]
pub struct ExecutionParams {
    pub env_type: String,
    pub extra_vars: BTreeMap<String, String>,
}

impl Default for ExecutionParams {
    fn default() -> Self {
        Self {
            env_type: "kubernetes".to_string(),
            extra_vars: BTreeMap::new(),
        }
    }
}

/// A step with its dense topological number and dependencies remapped to
/// topological positions.
#[derive(Debug, Clone)]
struct PlannedStep {
    number: i32,
    spec: StepSpec,
    /// indices into the planned order
    deps: Vec<usize>,
}

/// Validate the DAG and return steps in topological order with dense
/// 1-based numbering. Declaration order breaks ties.
fn plan_steps(spec: &WorkflowSpec) -> Result<Vec<PlannedStep>, ExecutorError> {
    use petgraph::graph::DiGraph;
    use petgraph::Direction;

    let n = spec.steps.len();
    let mut index_by_name = HashMap::with_capacity(n);
    for (i, step) in spec.steps.iter().enumerate() {
        if step.name.is_empty() {
            return Err(ExecutorError::Validation(
                "step name must not be empty".to_string(),
            ));
        }
        if index_by_name.insert(step.name.as_str(), i).is_some() {
            return Err(ExecutorError::Validation(format!(
                "duplicate step name '{}'",
                step.name
            )));
        }
    }

    let mut graph = DiGraph::<usize, ()>::with_capacity(n, n);
    let nodes: Vec<_> = (0..n).map(|i| graph.add_node(i)).collect();
    let mut deps: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, step) in spec.steps.iter().enumerate() {
        for dep in &step.depends_on {
            let j = *index_by_name.get(dep.as_str()).ok_or_else(|| {
                ExecutorError::Validation(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.name, dep
                ))
            })?;
            if j == i {
                return Err(ExecutorError::Validation(format!(
                    "step '{}' depends on itself",
                    step.name
                )));
            }
            graph.add_edge(nodes[j], nodes[i], ());
            deps[i].push(j);
        }
    }

    // Kahn's algorithm; the ready set is ordered by declaration index
    let mut indegree: Vec<usize> = (0..n)
        .map(|i| graph.neighbors_directed(nodes[i], Direction::Incoming).count())
        .collect();
    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(&i) = ready.iter().next() {
        ready.remove(&i);
        order.push(i);
        for neighbor in graph.neighbors_directed(nodes[i], Direction::Outgoing) {
            let j = graph[neighbor];
            indegree[j] -= 1;
            if indegree[j] == 0 {
                ready.insert(j);
            }
        }
    }

    if order.len() != n {
        return Err(ExecutorError::Validation(
            "workflow contains a dependency cycle".to_string(),
        ));
    }

    let mut position = vec![0usize; n];
    for (pos, &i) in order.iter().enumerate() {
        position[i] = pos;
    }

    Ok(order
        .iter()
        .enumerate()
        .map(|(pos, &i)| PlannedStep {
            number: (pos + 1) as i32,
            spec: spec.steps[i].clone(),
            deps: deps[i].iter().map(|&j| position[j]).collect(),
        })
        .collect())
}

#[derive(Debug, Default)]
struct RunStats {
    failed: i32,
    cancelled: bool,
    timed_out: bool,
    first_error: Option<String>,
}

/// Outcome of one step, shared between the serial and parallel paths.
enum StepOutcome {
    Completed,
    Failed { message: String, continue_on: bool },
}

/// Runs workflows against the execution store.
pub struct WorkflowRunner {
    store: Arc<dyn ExecutionStore>,
    registry: Arc<ExecutorRegistry>,
    config: Arc<EngineConfig>,
    hub: Option<Arc<GraphHub>>,
}

impl WorkflowRunner {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        registry: Arc<ExecutorRegistry>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            hub: None,
        }
    }

    /// Attach a graph hub; completed executions publish an update event.
    pub fn with_hub(mut self, hub: Arc<GraphHub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    /// Run a full workflow and return the terminal execution record.
    #[instrument(skip(self, spec, params, cancel), fields(app = %app_name, workflow = %workflow_name))]
    pub async fn execute(
        &self,
        app_name: &str,
        workflow_name: &str,
        spec: &WorkflowSpec,
        params: &ExecutionParams,
        cancel: Option<CancellationToken>,
    ) -> Result<ExecutionRecord, ExecutorError> {
        let planned = plan_steps(spec)?;

        let execution = self
            .store
            .create_execution(NewExecution {
                application_name: app_name.to_string(),
                workflow_name: workflow_name.to_string(),
                total_steps: planned.len() as i32,
                parent_execution_id: None,
            })
            .await?;
        info!(execution_id = %execution.id, steps = planned.len(), "starting workflow");

        self.drive(&execution, planned, spec, app_name, params, cancel)
            .await
    }

    /// Create a new execution that skips through the parent's completed
    /// prefix and runs the remainder using the updated spec.
    #[instrument(skip(self, updated_spec, params), fields(app = %app_name, workflow = %workflow_name))]
    pub async fn retry_from_failed_step(
        &self,
        app_name: &str,
        workflow_name: &str,
        updated_spec: &WorkflowSpec,
        parent_execution_id: Uuid,
        params: &ExecutionParams,
    ) -> Result<ExecutionRecord, ExecutorError> {
        let parent = self.store.get_execution(parent_execution_id).await?;
        if !parent.status.is_terminal() {
            return Err(ExecutorError::Validation(format!(
                "execution {} is still {}; only finished executions can be retried",
                parent.id, parent.status
            )));
        }

        let parent_steps = self.store.get_steps(parent_execution_id).await?;
        let last_completed = parent_steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| s.step_number)
            .max()
            .unwrap_or(0);

        let mut planned = plan_steps(updated_spec)?;
        if (planned.len() as i32) < last_completed {
            return Err(ExecutorError::Validation(format!(
                "updated spec has {} steps but {} were already completed",
                planned.len(),
                last_completed
            )));
        }

        let execution = self
            .store
            .create_execution(NewExecution {
                application_name: app_name.to_string(),
                workflow_name: workflow_name.to_string(),
                total_steps: planned.len() as i32,
                parent_execution_id: Some(parent_execution_id),
            })
            .await?;
        info!(
            execution_id = %execution.id,
            parent = %parent_execution_id,
            resume_from = last_completed + 1,
            "retrying workflow from failed step"
        );

        // materialize the skipped prefix for audit, preserving the
        // parent's step names and numbering continuity
        for parent_step in parent_steps
            .iter()
            .filter(|s| s.step_number <= last_completed)
        {
            self.store
                .create_step(NewStep {
                    workflow_id: execution.id,
                    step_number: parent_step.step_number,
                    name: parent_step.name.clone(),
                    step_type: parent_step.step_type.clone(),
                    status: StepStatus::Skipped,
                    step_config: parent_step.step_config.clone(),
                })
                .await?;
        }

        // the remainder comes positionally from the updated plan;
        // dependencies into the skipped prefix are already satisfied
        let skip = last_completed as usize;
        planned.drain(..skip);
        for step in &mut planned {
            step.deps.retain(|&d| d >= skip);
            for dep in &mut step.deps {
                *dep -= skip;
            }
        }

        self.drive(&execution, planned, updated_spec, app_name, params, None)
            .await
    }

    pub async fn get_execution(&self, id: Uuid) -> Result<ExecutionRecord, ExecutorError> {
        Ok(self.store.get_execution(id).await?)
    }

    pub async fn get_steps(&self, id: Uuid) -> Result<Vec<StepRecord>, ExecutorError> {
        Ok(self.store.get_steps(id).await?)
    }

    pub async fn get_step_logs(&self, step_id: Uuid) -> Result<String, ExecutorError> {
        Ok(self.store.get_step_logs(step_id).await?)
    }

    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        page: Page,
    ) -> Result<Vec<ExecutionRecord>, ExecutorError> {
        Ok(self.store.list_executions(filter, page).await?)
    }

    pub async fn count_executions(&self, filter: &ExecutionFilter) -> Result<i64, ExecutorError> {
        Ok(self.store.count_executions(filter).await?)
    }

    /// Rebuild a workflow spec from persisted step configs.
    pub async fn reconstruct_workflow(
        &self,
        execution_id: Uuid,
    ) -> Result<WorkflowSpec, ExecutorError> {
        // surfaces ExecutionNotFound for unknown ids
        self.store.get_execution(execution_id).await?;

        let steps = self.store.get_steps(execution_id).await?;
        let mut specs = Vec::with_capacity(steps.len());
        for step in &steps {
            if let Some(config) = &step.step_config {
                let spec: StepSpec = serde_json::from_value(config.clone())
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                specs.push(spec);
            }
        }
        if specs.is_empty() {
            return Err(ExecutorError::NoStepConfigs(execution_id));
        }

        Ok(WorkflowSpec {
            steps: specs,
            ..Default::default()
        })
    }

    // =========================================================================
    // Internal
    // =========================================================================

    async fn drive(
        &self,
        execution: &ExecutionRecord,
        planned: Vec<PlannedStep>,
        spec: &WorkflowSpec,
        app_name: &str,
        params: &ExecutionParams,
        cancel: Option<CancellationToken>,
    ) -> Result<ExecutionRecord, ExecutorError> {
        let mut ctx = SubstitutionContext::new(app_name, &params.env_type);
        for (key, value) in &params.extra_vars {
            ctx.set(key.clone(), value.clone());
        }

        // all rows exist up front so numbering stays dense even when a
        // failure aborts the remainder
        let mut rows = Vec::with_capacity(planned.len());
        for step in &planned {
            let config = serde_json::to_value(&step.spec)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let row = self
                .store
                .create_step(NewStep {
                    workflow_id: execution.id,
                    step_number: step.number,
                    name: step.spec.name.clone(),
                    step_type: step.spec.step_type.clone(),
                    status: StepStatus::Pending,
                    step_config: Some(config),
                })
                .await?;
            rows.push(row);
        }

        let cap = spec
            .duration_cap()
            .unwrap_or(self.config.default_workflow_timeout);
        let max_parallel = spec.max_parallel.unwrap_or(1).max(1);

        let run = self.run_rows(
            execution.id,
            app_name,
            params,
            &ctx,
            &planned,
            &rows,
            max_parallel,
            cancel,
        );

        let stats = match tokio::time::timeout(cap, run).await {
            Ok(stats) => stats?,
            Err(_) => {
                warn!(execution_id = %execution.id, cap_secs = cap.as_secs(), "workflow timed out");
                self.fail_running_steps(execution.id, "workflow timeout")
                    .await?;
                RunStats {
                    failed: 1,
                    timed_out: true,
                    first_error: Some(format!(
                        "timeout: workflow exceeded maximum duration of {}s",
                        cap.as_secs()
                    )),
                    ..Default::default()
                }
            }
        };

        let status = if stats.cancelled {
            ExecutionStatus::Cancelled
        } else if stats.failed > 0 || stats.timed_out {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        self.store
            .finish_execution(execution.id, status, stats.first_error.as_deref())
            .await?;

        let record = self.store.get_execution(execution.id).await?;
        info!(execution_id = %record.id, status = %record.status, "workflow finished");

        if let Some(hub) = &self.hub {
            let payload = serde_json::json!({
                "type": "workflow-completed",
                "execution_id": record.id,
                "workflow_name": record.workflow_name,
                "status": record.status,
            });
            if hub.broadcast(app_name, payload).await.is_err() {
                warn!(execution_id = %record.id, "graph broadcast dropped");
            }
        }

        Ok(record)
    }

    async fn fail_running_steps(
        &self,
        execution_id: Uuid,
        reason: &str,
    ) -> Result<(), ExecutorError> {
        for step in self.store.get_steps(execution_id).await? {
            if step.status == StepStatus::Running {
                self.store
                    .finish_step(step.id, StepStatus::Failed, Some(reason))
                    .await?;
                self.store
                    .bump_execution_progress(execution_id, 0, 1)
                    .await?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_rows(
        &self,
        execution_id: Uuid,
        app_name: &str,
        params: &ExecutionParams,
        ctx: &SubstitutionContext,
        planned: &[PlannedStep],
        rows: &[StepRecord],
        max_parallel: usize,
        cancel: Option<CancellationToken>,
    ) -> Result<RunStats, ExecutorError> {
        let mut stats = RunStats::default();

        if max_parallel <= 1 {
            for (step, row) in planned.iter().zip(rows) {
                if cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                    stats.cancelled = true;
                    break;
                }
                let outcome = run_one_step(
                    self.store.clone(),
                    self.registry.clone(),
                    self.config.clone(),
                    app_name.to_string(),
                    params.env_type.clone(),
                    ctx.clone(),
                    execution_id,
                    row.id,
                    step.spec.clone(),
                )
                .await?;
                match outcome {
                    StepOutcome::Completed => {}
                    StepOutcome::Failed {
                        message,
                        continue_on,
                    } => {
                        stats.failed += 1;
                        stats
                            .first_error
                            .get_or_insert(format!("step '{}' failed: {message}", step.spec.name));
                        if !continue_on {
                            break;
                        }
                    }
                }
            }
            return Ok(stats);
        }

        // bounded fan-out of independent ready steps; completion order is
        // not semantic
        let n = planned.len();
        let mut indegree: Vec<usize> = vec![0; n];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, step) in planned.iter().enumerate() {
            indegree[i] = step.deps.len();
            for &d in &step.deps {
                children[d].push(i);
            }
        }
        let mut ready: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut join_set: JoinSet<(usize, Result<StepOutcome, ExecutorError>)> = JoinSet::new();
        let mut running = 0usize;
        let mut aborted = false;

        loop {
            if cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                stats.cancelled = true;
                aborted = true;
            }

            while !aborted && running < max_parallel {
                let Some(i) = ready.pop_front() else { break };
                let store = self.store.clone();
                let registry = self.registry.clone();
                let config = self.config.clone();
                let app = app_name.to_string();
                let env = params.env_type.clone();
                let ctx = ctx.clone();
                let row_id = rows[i].id;
                let spec = planned[i].spec.clone();
                join_set.spawn(async move {
                    let outcome = run_one_step(
                        store, registry, config, app, env, ctx, execution_id, row_id, spec,
                    )
                    .await;
                    (i, outcome)
                });
                running += 1;
            }

            if running == 0 {
                break;
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            running -= 1;
            let (i, outcome) =
                joined.map_err(|e| ExecutorError::Internal(format!("step task failed: {e}")))?;
            match outcome? {
                StepOutcome::Completed => {
                    for &child in &children[i] {
                        indegree[child] -= 1;
                        if indegree[child] == 0 {
                            ready.push_back(child);
                        }
                    }
                }
                StepOutcome::Failed {
                    message,
                    continue_on,
                } => {
                    stats.failed += 1;
                    stats.first_error.get_or_insert(format!(
                        "step '{}' failed: {message}",
                        planned[i].spec.name
                    ));
                    if continue_on {
                        for &child in &children[i] {
                            indegree[child] -= 1;
                            if indegree[child] == 0 {
                                ready.push_back(child);
                            }
                        }
                    } else {
                        aborted = true;
                    }
                }
            }
        }

        Ok(stats)
    }
}

/// Run a single step against the store: substitution on a step-local
/// copy, dispatch by type, and bookkeeping. The log buffer is always
/// flushed on exit.
#[allow(clippy::too_many_arguments)]
async fn run_one_step(
    store: Arc<dyn ExecutionStore>,
    registry: Arc<ExecutorRegistry>,
    config: Arc<EngineConfig>,
    app_name: String,
    env_type: String,
    ctx: SubstitutionContext,
    execution_id: Uuid,
    step_id: Uuid,
    mut step: StepSpec,
) -> Result<StepOutcome, ExecutorError> {
    store.start_step(step_id).await?;
    let logs = StepLogBuffer::bound(store.clone(), step_id);

    ctx.apply_step(&mut step);
    let continue_on = step.continue_on_failure;

    let result = match registry.get(&step.step_type) {
        Some(executor) => {
            let workspace = config.workspace_for(&app_name);
            let step_ctx = StepContext {
                step,
                app_name,
                env_type,
                workspace,
                config,
            };
            executor.execute(&step_ctx, &logs).await
        }
        None => Err(StepError::Failed(format!(
            "unknown step type: {}",
            step.step_type
        ))),
    };
    logs.flush().await;

    match result {
        Ok(()) => {
            store
                .finish_step(step_id, StepStatus::Completed, None)
                .await?;
            store.bump_execution_progress(execution_id, 1, 0).await?;
            Ok(StepOutcome::Completed)
        }
        Err(e) => {
            let message = match &e {
                StepError::Failed(m) => m.clone(),
                StepError::Internal(m) => format!("internal: {m}"),
            };
            store
                .finish_step(step_id, StepStatus::Failed, Some(&message))
                .await?;
            store.bump_execution_progress(execution_id, 0, 1).await?;
            Ok(StepOutcome::Failed {
                message,
                continue_on,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::persistence::InMemoryPlatformStore;

    fn runner() -> (Arc<InMemoryPlatformStore>, WorkflowRunner) {
        let store = Arc::new(InMemoryPlatformStore::new());
        let runner = WorkflowRunner::new(
            store.clone(),
            Arc::new(ExecutorRegistry::builtin()),
            Arc::new(EngineConfig::default()),
        );
        (store, runner)
    }

    fn dummy_step(name: &str, deps: &[&str]) -> StepSpec {
        StepSpec {
            name: name.into(),
            step_type: "dummy".into(),
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn failing_step(name: &str) -> StepSpec {
        // unknown type fails at dispatch without touching the filesystem
        StepSpec {
            name: name.into(),
            step_type: "does-not-exist".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn zero_step_workflow_completes_immediately() {
        let (_, runner) = runner();
        let spec = WorkflowSpec::default();
        let record = runner
            .execute("shop", "noop", &spec, &ExecutionParams::default(), None)
            .await
            .unwrap();
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.total_steps, 0);
    }

    #[tokio::test]
    async fn serial_run_completes_in_order() {
        let (store, runner) = runner();
        let spec = WorkflowSpec {
            steps: vec![
                dummy_step("one", &[]),
                dummy_step("two", &["one"]),
                dummy_step("three", &["two"]),
            ],
            ..Default::default()
        };
        let record = runner
            .execute("shop", "deploy", &spec, &ExecutionParams::default(), None)
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.completed_steps, 3);
        assert_eq!(record.failed_steps, 0);

        let steps = store.get_steps(record.id).await.unwrap();
        let numbers: Vec<i32> = steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn dependencies_reorder_steps_topologically() {
        let (store, runner) = runner();
        // declared out of order; 'last' depends on 'first'
        let spec = WorkflowSpec {
            steps: vec![dummy_step("last", &["first"]), dummy_step("first", &[])],
            ..Default::default()
        };
        let record = runner
            .execute("shop", "deploy", &spec, &ExecutionParams::default(), None)
            .await
            .unwrap();

        let steps = store.get_steps(record.id).await.unwrap();
        assert_eq!(steps[0].name, "first");
        assert_eq!(steps[0].step_number, 1);
        assert_eq!(steps[1].name, "last");
        assert_eq!(steps[1].step_number, 2);
    }

    #[tokio::test]
    async fn cycle_is_rejected_before_any_step_runs() {
        let (store, runner) = runner();
        let spec = WorkflowSpec {
            steps: vec![dummy_step("a", &["b"]), dummy_step("b", &["a"])],
            ..Default::default()
        };
        let err = runner
            .execute("shop", "deploy", &spec, &ExecutionParams::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Validation(_)));

        // no execution row was created
        let count = store
            .count_executions(&ExecutionFilter::default())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn self_dependency_is_rejected() {
        let (_, runner) = runner();
        let spec = WorkflowSpec {
            steps: vec![dummy_step("a", &["a"])],
            ..Default::default()
        };
        let err = runner
            .execute("shop", "deploy", &spec, &ExecutionParams::default(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("depends on itself"));
    }

    #[tokio::test]
    async fn unknown_dependency_is_rejected() {
        let (_, runner) = runner();
        let spec = WorkflowSpec {
            steps: vec![dummy_step("a", &["ghost"])],
            ..Default::default()
        };
        let err = runner
            .execute("shop", "deploy", &spec, &ExecutionParams::default(), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown step 'ghost'"));
    }

    #[tokio::test]
    async fn failure_aborts_remaining_steps() {
        let (store, runner) = runner();
        let spec = WorkflowSpec {
            steps: vec![
                dummy_step("one", &[]),
                failing_step("boom"),
                dummy_step("three", &[]),
            ],
            ..Default::default()
        };
        let record = runner
            .execute("shop", "deploy", &spec, &ExecutionParams::default(), None)
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.completed_steps, 1);
        assert_eq!(record.failed_steps, 1);
        assert!(record.error_message.unwrap().contains("boom"));

        let steps = store.get_steps(record.id).await.unwrap();
        assert_eq!(steps[2].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn continue_on_failure_keeps_going() {
        let (_, runner) = runner();
        let mut boom = failing_step("boom");
        boom.continue_on_failure = true;
        let spec = WorkflowSpec {
            steps: vec![boom, dummy_step("after", &[])],
            ..Default::default()
        };
        let record = runner
            .execute("shop", "deploy", &spec, &ExecutionParams::default(), None)
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(record.completed_steps, 1);
        assert_eq!(record.failed_steps, 1);
    }

    #[tokio::test]
    async fn parallel_fanout_completes_everything() {
        let (store, runner) = runner();
        let spec = WorkflowSpec {
            steps: vec![
                dummy_step("a", &[]),
                dummy_step("b", &[]),
                dummy_step("c", &[]),
                dummy_step("join", &["a", "b", "c"]),
            ],
            max_parallel: Some(2),
            ..Default::default()
        };
        let record = runner
            .execute("shop", "deploy", &spec, &ExecutionParams::default(), None)
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Completed);
        assert_eq!(record.completed_steps, 4);

        let steps = store.get_steps(record.id).await.unwrap();
        assert_eq!(steps.last().unwrap().name, "join");
    }

    #[tokio::test]
    async fn cancellation_before_start_cancels_execution() {
        let (store, runner) = runner();
        let token = CancellationToken::new();
        token.cancel();
        let spec = WorkflowSpec {
            steps: vec![dummy_step("one", &[])],
            ..Default::default()
        };
        let record = runner
            .execute(
                "shop",
                "deploy",
                &spec,
                &ExecutionParams::default(),
                Some(token),
            )
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Cancelled);
        let steps = store.get_steps(record.id).await.unwrap();
        assert_eq!(steps[0].status, StepStatus::Pending);
    }

    struct SlowStep;

    #[async_trait]
    impl crate::steps::StepExecutor for SlowStep {
        fn step_type(&self) -> &'static str {
            "slow"
        }

        async fn execute(
            &self,
            _ctx: &StepContext,
            _logs: &StepLogBuffer,
        ) -> Result<(), StepError> {
            tokio::time::sleep(std::time::Duration::from_secs(10)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duration_cap_fails_with_timeout_classification() {
        let store = Arc::new(InMemoryPlatformStore::new());
        let mut registry = ExecutorRegistry::builtin();
        registry.register(Arc::new(SlowStep));
        let runner = WorkflowRunner::new(
            store.clone(),
            Arc::new(registry),
            Arc::new(EngineConfig::default()),
        );

        let spec = WorkflowSpec {
            steps: vec![StepSpec {
                name: "sleepy".into(),
                step_type: "slow".into(),
                ..Default::default()
            }],
            max_workflow_duration: Some(1),
            ..Default::default()
        };
        let record = runner
            .execute("shop", "deploy", &spec, &ExecutionParams::default(), None)
            .await
            .unwrap();

        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.error_message.unwrap().starts_with("timeout:"));

        let steps = store.get_steps(record.id).await.unwrap();
        assert_eq!(steps[0].status, StepStatus::Failed);
    }

    #[tokio::test]
    async fn retry_skips_completed_prefix_and_runs_remainder() {
        let (store, runner) = runner();
        let parent_spec = WorkflowSpec {
            steps: vec![
                dummy_step("one", &[]),
                dummy_step("two", &[]),
                failing_step("three"),
                dummy_step("four", &[]),
                dummy_step("five", &[]),
            ],
            ..Default::default()
        };
        let parent = runner
            .execute("shop", "deploy", &parent_spec, &ExecutionParams::default(), None)
            .await
            .unwrap();
        assert_eq!(parent.status, ExecutionStatus::Failed);
        assert_eq!(parent.completed_steps, 2);

        // fixed spec: step three is now a dummy
        let updated_spec = WorkflowSpec {
            steps: vec![
                dummy_step("one", &[]),
                dummy_step("two", &[]),
                dummy_step("three", &[]),
                dummy_step("four", &[]),
                dummy_step("five", &[]),
            ],
            ..Default::default()
        };
        let retry = runner
            .retry_from_failed_step(
                "shop",
                "deploy",
                &updated_spec,
                parent.id,
                &ExecutionParams::default(),
            )
            .await
            .unwrap();

        assert_eq!(retry.status, ExecutionStatus::Completed);
        assert_eq!(retry.parent_execution_id, Some(parent.id));
        assert_eq!(retry.total_steps, 5);
        assert_eq!(retry.completed_steps, 3);
        assert_eq!(retry.failed_steps, 0);

        let steps = store.get_steps(retry.id).await.unwrap();
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0].status, StepStatus::Skipped);
        assert_eq!(steps[0].name, "one");
        assert_eq!(steps[1].status, StepStatus::Skipped);
        assert_eq!(steps[2].status, StepStatus::Completed);
        assert_eq!(steps[4].status, StepStatus::Completed);
        let numbers: Vec<i32> = steps.iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn retry_requires_terminal_parent() {
        let (store, runner) = runner();
        let execution = store
            .create_execution(NewExecution {
                application_name: "shop".into(),
                workflow_name: "deploy".into(),
                total_steps: 1,
                parent_execution_id: None,
            })
            .await
            .unwrap();

        let err = runner
            .retry_from_failed_step(
                "shop",
                "deploy",
                &WorkflowSpec::default(),
                execution.id,
                &ExecutionParams::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Validation(_)));
    }

    #[tokio::test]
    async fn reconstruct_rebuilds_spec_from_step_configs() {
        let (_, runner) = runner();
        let spec = WorkflowSpec {
            steps: vec![dummy_step("one", &[]), dummy_step("two", &["one"])],
            ..Default::default()
        };
        let record = runner
            .execute("shop", "deploy", &spec, &ExecutionParams::default(), None)
            .await
            .unwrap();

        let rebuilt = runner.reconstruct_workflow(record.id).await.unwrap();
        assert_eq!(rebuilt.steps.len(), 2);
        assert_eq!(rebuilt.steps[0].name, "one");
        assert_eq!(rebuilt.steps[1].depends_on, vec!["one"]);
    }

    #[tokio::test]
    async fn reconstruct_without_configs_is_a_specific_error() {
        let (store, runner) = runner();
        let execution = store
            .create_execution(NewExecution {
                application_name: "shop".into(),
                workflow_name: "deploy".into(),
                total_steps: 1,
                parent_execution_id: None,
            })
            .await
            .unwrap();
        store
            .create_step(NewStep {
                workflow_id: execution.id,
                step_number: 1,
                name: "legacy".into(),
                step_type: "dummy".into(),
                status: StepStatus::Completed,
                step_config: None,
            })
            .await
            .unwrap();

        let err = runner.reconstruct_workflow(execution.id).await.unwrap_err();
        assert!(matches!(err, ExecutorError::NoStepConfigs(_)));
    }

    #[tokio::test]
    async fn substitution_reaches_step_fields() {
        let (store, runner) = runner();
        let mut step = dummy_step("echo", &[]);
        step.variables.insert(
            "target".into(),
            serde_json::json!("${metadata.name}-${environment.type}"),
        );
        let spec = WorkflowSpec {
            steps: vec![step],
            ..Default::default()
        };
        let record = runner
            .execute("shop", "deploy", &spec, &ExecutionParams::default(), None)
            .await
            .unwrap();

        let steps = store.get_steps(record.id).await.unwrap();
        let logs = store.get_step_logs(steps[0].id).await.unwrap();
        assert!(logs.contains("shop-kubernetes"));
    }
}
