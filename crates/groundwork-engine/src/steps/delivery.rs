//! Continuous-delivery application registration

use async_trait::async_trait;
use uuid::Uuid;

use super::{process::run_command, StepContext, StepError, StepExecutor};
use crate::logbuf::StepLogBuffer;

/// Writes a delivery-controller application manifest to a temp path and
/// invokes the platform apply binary on it.
pub struct DeliveryAppCreate;

impl DeliveryAppCreate {
    fn render(ctx: &StepContext) -> Result<String, StepError> {
        let manifest = serde_json::json!({
            "apiVersion": "delivery/v1",
            "kind": "Application",
            "metadata": {
                "name": ctx.app_name,
                "namespace": ctx.namespace(),
            },
            "spec": {
                "source": {
                    "repo": ctx.step.repo_name.clone().unwrap_or_else(|| ctx.app_name.clone()),
                    "path": ctx.step.path.clone().unwrap_or_else(|| ".".to_string()),
                },
                "syncPolicy": ctx.step.sync_policy.clone().unwrap_or_else(|| "automated".to_string()),
            },
        });
        serde_yaml::to_string(&manifest)
            .map_err(|e| StepError::Internal(format!("failed to render manifest: {e}")))
    }
}

#[async_trait]
impl StepExecutor for DeliveryAppCreate {
    fn step_type(&self) -> &'static str {
        "continuous-delivery-app-create"
    }

    async fn execute(&self, ctx: &StepContext, logs: &StepLogBuffer) -> Result<(), StepError> {
        let manifest = Self::render(ctx)?;
        let path = std::env::temp_dir().join(format!("delivery-app-{}.yaml", Uuid::now_v7()));

        tokio::fs::write(&path, manifest.as_bytes())
            .await
            .map_err(|e| StepError::Internal(format!("failed to write {path:?}: {e}")))?;
        logs.write(&format!("wrote delivery manifest to {}", path.display()))
            .await;

        let result = run_command(
            &ctx.config.delivery_bin,
            &["apply", "-f", &path.to_string_lossy()],
            None,
            logs,
        )
        .await;

        let _ = tokio::fs::remove_file(&path).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use groundwork_core::StepSpec;

    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn manifest_carries_app_and_namespace() {
        let ctx = StepContext {
            step: StepSpec {
                name: "cd".into(),
                step_type: "continuous-delivery-app-create".into(),
                repo_name: Some("shop-config".into()),
                sync_policy: Some("manual".into()),
                ..Default::default()
            },
            app_name: "shop".into(),
            env_type: "kubernetes".into(),
            workspace: PathBuf::from("."),
            config: Arc::new(EngineConfig::default()),
        };
        let manifest = DeliveryAppCreate::render(&ctx).unwrap();
        assert!(manifest.contains("name: shop"));
        assert!(manifest.contains("namespace: shop-kubernetes"));
        assert!(manifest.contains("repo: shop-config"));
        assert!(manifest.contains("syncPolicy: manual"));
    }
}
