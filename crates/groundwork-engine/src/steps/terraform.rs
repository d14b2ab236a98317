//! Terraform steps: deterministic file generation and init/plan/apply.

use std::path::Path;

use async_trait::async_trait;

use super::{process::run_command, StepContext, StepError, StepExecutor};
use crate::logbuf::StepLogBuffer;

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// Generates `main.tf.json` from the step's variables. Idempotent: the
/// variables map is ordered, so reruns produce byte-identical output.
pub struct TerraformGenerate;

impl TerraformGenerate {
    fn render(ctx: &StepContext) -> Result<String, StepError> {
        let body = serde_json::json!({
            "variable": ctx.step.variables,
            "locals": {
                "application": ctx.app_name,
                "environment": ctx.env_type,
            },
        });
        let mut rendered = serde_json::to_string_pretty(&body)
            .map_err(|e| StepError::Internal(format!("failed to render terraform json: {e}")))?;
        rendered.push('\n');
        Ok(rendered)
    }
}

#[async_trait]
impl StepExecutor for TerraformGenerate {
    fn step_type(&self) -> &'static str {
        "terraform-generate"
    }

    async fn execute(&self, ctx: &StepContext, logs: &StepLogBuffer) -> Result<(), StepError> {
        let output_dir = ctx
            .step
            .output_dir
            .as_deref()
            .unwrap_or("terraform");
        let dir = ctx.workspace.join(output_dir);

        if !dir.exists() {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StepError::Internal(format!("failed to create {dir:?}: {e}")))?;
            set_mode(&dir, 0o750)
                .map_err(|e| StepError::Internal(format!("failed to chmod {dir:?}: {e}")))?;
        }

        let rendered = Self::render(ctx)?;
        let file = dir.join("main.tf.json");
        tokio::fs::write(&file, rendered.as_bytes())
            .await
            .map_err(|e| StepError::Internal(format!("failed to write {file:?}: {e}")))?;
        set_mode(&file, 0o600)
            .map_err(|e| StepError::Internal(format!("failed to chmod {file:?}: {e}")))?;

        logs.write(&format!("generated {}", file.display())).await;
        Ok(())
    }
}

/// Runs `terraform init`, `plan` and `apply` in the step's working
/// directory.
pub struct TerraformInitPlanApply;

#[async_trait]
impl StepExecutor for TerraformInitPlanApply {
    fn step_type(&self) -> &'static str {
        "terraform-init-plan-apply"
    }

    async fn execute(&self, ctx: &StepContext, logs: &StepLogBuffer) -> Result<(), StepError> {
        let dir = ctx
            .workspace
            .join(ctx.step.working_dir.as_deref().unwrap_or("terraform"));
        let terraform = &ctx.config.terraform_bin;

        run_command(terraform, &["init", "-input=false"], Some(&dir), logs).await?;
        run_command(
            terraform,
            &["plan", "-input=false", "-out=tfplan"],
            Some(&dir),
            logs,
        )
        .await?;
        run_command(
            terraform,
            &["apply", "-input=false", "-auto-approve", "tfplan"],
            Some(&dir),
            logs,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use groundwork_core::StepSpec;

    use super::*;
    use crate::config::EngineConfig;
    use crate::persistence::InMemoryPlatformStore;

    fn generate_ctx(workspace: &Path) -> StepContext {
        let mut step = StepSpec {
            name: "gen".into(),
            step_type: "terraform-generate".into(),
            output_dir: Some("terraform/db".into()),
            ..Default::default()
        };
        step.variables
            .insert("size".into(), serde_json::json!("small"));
        step.variables
            .insert("replicas".into(), serde_json::json!(2));

        StepContext {
            step,
            app_name: "shop".into(),
            env_type: "kubernetes".into(),
            workspace: workspace.to_path_buf(),
            config: Arc::new(EngineConfig::default()),
        }
    }

    #[tokio::test]
    async fn generate_is_byte_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = generate_ctx(tmp.path());
        let logs = StepLogBuffer::detached(Arc::new(InMemoryPlatformStore::new()));

        TerraformGenerate.execute(&ctx, &logs).await.unwrap();
        let file = tmp.path().join("terraform/db/main.tf.json");
        let first = std::fs::read(&file).unwrap();

        TerraformGenerate.execute(&ctx, &logs).await.unwrap();
        let second = std::fs::read(&file).unwrap();

        assert_eq!(first, second);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn generate_sets_modes() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let ctx = generate_ctx(tmp.path());
        let logs = StepLogBuffer::detached(Arc::new(InMemoryPlatformStore::new()));
        TerraformGenerate.execute(&ctx, &logs).await.unwrap();

        let dir_mode = std::fs::metadata(tmp.path().join("terraform/db"))
            .unwrap()
            .permissions()
            .mode();
        let file_mode = std::fs::metadata(tmp.path().join("terraform/db/main.tf.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o750);
        assert_eq!(file_mode & 0o777, 0o600);
    }
}
