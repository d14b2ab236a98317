//! Step executors
//!
//! Each step type is handled by a small polymorphic unit registered by
//! type name; adding a step type is a pure addition. Variable
//! substitution has already been applied to the step by the time an
//! executor sees it.

mod container;
mod delivery;
mod dummy;
mod git;
mod policy;
mod process;
mod terraform;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use groundwork_core::StepSpec;

use crate::config::EngineConfig;
use crate::logbuf::StepLogBuffer;

pub use container::ContainerApply;
pub use delivery::DeliveryAppCreate;
pub use dummy::Dummy;
pub use git::{GitCommitPush, GitRepoCreate};
pub use policy::PolicyCheck;
pub use process::run_command;
pub use terraform::{TerraformGenerate, TerraformInitPlanApply};

/// Step failure, split by whether the step's own work failed or the
/// engine failed around it.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// The step's work failed (bad input, child exit nonzero, HTTP error).
    #[error("{0}")]
    Failed(String),

    /// The engine failed around the step (I/O, serialization).
    #[error("internal: {0}")]
    Internal(String),
}

impl StepError {
    pub fn classification(&self) -> &'static str {
        match self {
            Self::Failed(_) => "step",
            Self::Internal(_) => "internal",
        }
    }
}

/// Everything an executor needs to run one step.
pub struct StepContext {
    /// The step, post-substitution.
    pub step: StepSpec,
    pub app_name: String,
    pub env_type: String,
    /// Dedicated working tree for this application.
    pub workspace: PathBuf,
    pub config: Arc<EngineConfig>,
}

impl StepContext {
    /// Namespace with the documented default `{app}-{env}`.
    pub fn namespace(&self) -> String {
        self.step
            .namespace
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.app_name, self.env_type))
    }
}

/// A polymorphic unit over {validate inputs, run, capture logs}.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn step_type(&self) -> &'static str;

    async fn execute(&self, ctx: &StepContext, logs: &StepLogBuffer) -> Result<(), StepError>;
}

/// Registry of executors keyed by step type.
pub struct ExecutorRegistry {
    executors: HashMap<&'static str, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Registry with every built-in step type.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ContainerApply));
        registry.register(Arc::new(GitRepoCreate));
        registry.register(Arc::new(GitCommitPush));
        registry.register(Arc::new(DeliveryAppCreate));
        registry.register(Arc::new(TerraformGenerate));
        registry.register(Arc::new(TerraformInitPlanApply));
        registry.register(Arc::new(PolicyCheck));
        registry.register(Arc::new(Dummy));
        registry
    }

    pub fn register(&mut self, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(executor.step_type(), executor);
    }

    pub fn get(&self, step_type: &str) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(step_type).cloned()
    }

    pub fn types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.executors.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_covers_all_step_types() {
        let registry = ExecutorRegistry::builtin();
        for step_type in [
            "container-apply",
            "git-repo-create",
            "git-commit-push",
            "continuous-delivery-app-create",
            "terraform-generate",
            "terraform-init-plan-apply",
            "policy-check",
            "dummy",
        ] {
            assert!(registry.get(step_type).is_some(), "missing {step_type}");
        }
        assert!(registry.get("no-such-type").is_none());
    }

    #[test]
    fn namespace_defaults_to_app_env() {
        let ctx = StepContext {
            step: StepSpec {
                name: "deploy".into(),
                step_type: "container-apply".into(),
                ..Default::default()
            },
            app_name: "shop".into(),
            env_type: "kubernetes".into(),
            workspace: PathBuf::from("workspaces/shop"),
            config: Arc::new(EngineConfig::default()),
        };
        assert_eq!(ctx.namespace(), "shop-kubernetes");
    }
}
