//! Git steps: repository creation via the provider REST API, and
//! commit+push via the configured git binary.

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{process::run_command, StepContext, StepError, StepExecutor};
use crate::logbuf::StepLogBuffer;

/// Creates a repository on the Git provider. Organization-scoped creation
/// is attempted first; a 404 falls back to user-scoped creation; a 409
/// means the repository already exists and the step continues.
pub struct GitRepoCreate;

impl GitRepoCreate {
    async fn create(
        &self,
        client: &reqwest::Client,
        url: &str,
        token: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<StatusCode, StepError> {
        let mut request = client.post(url).json(body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| StepError::Failed(format!("git provider request failed: {e}")))?;
        Ok(response.status())
    }
}

#[async_trait]
impl StepExecutor for GitRepoCreate {
    fn step_type(&self) -> &'static str {
        "git-repo-create"
    }

    async fn execute(&self, ctx: &StepContext, logs: &StepLogBuffer) -> Result<(), StepError> {
        let repo_name = ctx
            .step
            .repo_name
            .as_deref()
            .ok_or_else(|| StepError::Failed("git-repo-create requires repoName".to_string()))?;
        let base = ctx.config.git_api_base.as_deref().ok_or_else(|| {
            StepError::Failed("git provider API is not configured (GIT_API_BASE)".to_string())
        })?;
        let owner = ctx.step.owner.as_deref().unwrap_or(&ctx.app_name);
        let token = ctx.config.git_api_token.as_deref();

        let body = serde_json::json!({
            "name": repo_name,
            "description": ctx.step.description.clone().unwrap_or_default(),
            "auto_init": true,
        });
        let client = reqwest::Client::new();

        let org_url = format!("{base}/orgs/{owner}/repos");
        logs.write(&format!("creating repository {owner}/{repo_name}"))
            .await;
        let status = self.create(&client, &org_url, token, &body).await?;

        let status = if status == StatusCode::NOT_FOUND {
            // no such organization, retry user-scoped
            logs.write("organization not found, retrying user-scoped")
                .await;
            let user_url = format!("{base}/user/repos");
            self.create(&client, &user_url, token, &body).await?
        } else {
            status
        };

        match status {
            s if s.is_success() => {
                logs.write(&format!("repository {repo_name} created")).await;
                Ok(())
            }
            StatusCode::CONFLICT => {
                logs.write(&format!("repository {repo_name} already exists, continuing"))
                    .await;
                Ok(())
            }
            s => Err(StepError::Failed(format!(
                "git provider returned {s} for repository {repo_name}"
            ))),
        }
    }
}

/// Stages, commits and pushes the step's working directory.
pub struct GitCommitPush;

#[async_trait]
impl StepExecutor for GitCommitPush {
    fn step_type(&self) -> &'static str {
        "git-commit-push"
    }

    async fn execute(&self, ctx: &StepContext, logs: &StepLogBuffer) -> Result<(), StepError> {
        let dir = ctx
            .workspace
            .join(ctx.step.working_dir.as_deref().unwrap_or("."));
        let message = ctx
            .step
            .commit_message
            .as_deref()
            .unwrap_or("groundwork update");

        let git = &ctx.config.git_bin;
        run_command(git, &["add", "-A"], Some(&dir), logs).await?;
        // --allow-empty keeps reruns idempotent when nothing changed
        run_command(
            git,
            &["commit", "--allow-empty", "-m", message],
            Some(&dir),
            logs,
        )
        .await?;
        run_command(git, &["push"], Some(&dir), logs).await
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

    #[tokio::test]
    async fn repo_create_requires_configuration() {
        let logs = StepLogBuffer::detached(Arc::new(InMemoryPlatformStore::new()));
        let ctx = StepContext {
            step: StepSpec {
                name: "repo".into(),
                step_type: "git-repo-create".into(),
                repo_name: Some("shop".into()),
                ..Default::default()
            },
            app_name: "shop".into(),
            env_type: "kubernetes".into(),
            workspace: PathBuf::from("."),
            config: Arc::new(EngineConfig::default()),
        };
        let err = GitRepoCreate.execute(&ctx, &logs).await.unwrap_err();
        assert!(err.to_string().contains("GIT_API_BASE"));
    }
}
