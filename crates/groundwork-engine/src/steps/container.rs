//! Container platform apply

use async_trait::async_trait;

use super::{process::run_command, StepContext, StepError, StepExecutor};
use crate::logbuf::StepLogBuffer;

/// Applies a manifest to the container platform via the configured apply
/// binary, in the step's namespace.
pub struct ContainerApply;

#[async_trait]
impl StepExecutor for ContainerApply {
    fn step_type(&self) -> &'static str {
        "container-apply"
    }

    async fn execute(&self, ctx: &StepContext, logs: &StepLogBuffer) -> Result<(), StepError> {
        let manifest = ctx
            .step
            .manifest_path
            .as_deref()
            .or(ctx.step.path.as_deref())
            .ok_or_else(|| {
                StepError::Failed("container-apply requires manifestPath or path".to_string())
            })?;

        let namespace = ctx.namespace();
        logs.write(&format!("applying {manifest} to namespace {namespace}"))
            .await;

        run_command(
            &ctx.config.container_apply_bin,
            &["apply", "-n", &namespace, "-f", manifest],
            Some(&ctx.workspace),
            logs,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use groundwork_core::StepSpec;

    use super::*;
    use crate::config::EngineConfig;
    use crate::persistence::InMemoryPlatformStore;

    fn ctx(step: StepSpec) -> StepContext {
        StepContext {
            step,
            app_name: "shop".into(),
            env_type: "kubernetes".into(),
            workspace: PathBuf::from("."),
            config: Arc::new(EngineConfig::default()),
        }
    }

    #[tokio::test]
    async fn rejects_missing_manifest() {
        let logs = StepLogBuffer::detached(Arc::new(InMemoryPlatformStore::new()));
        let step = StepSpec {
            name: "deploy".into(),
            step_type: "container-apply".into(),
            ..Default::default()
        };
        let err = ContainerApply.execute(&ctx(step), &logs).await.unwrap_err();
        assert!(matches!(err, StepError::Failed(_)));
    }
}
