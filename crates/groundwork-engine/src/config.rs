//! Engine configuration
//!
//! External tool paths and execution policy, loaded from the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for step execution and workflow policy.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root under which each workflow gets a dedicated working tree
    /// (`workspaces/<app>/...`).
    pub workspaces_root: PathBuf,

    /// Binary invoked by `container-apply`.
    pub container_apply_bin: String,

    /// Binary invoked by `git-commit-push`.
    pub git_bin: String,

    /// Binary invoked by the terraform steps.
    pub terraform_bin: String,

    /// Binary invoked by `continuous-delivery-app-create`.
    pub delivery_bin: String,

    /// Binary invoked by `policy-check`.
    pub policy_bin: String,

    /// Base URL of the Git provider REST API (`git-repo-create`).
    pub git_api_base: Option<String>,

    /// Token for the Git provider REST API.
    pub git_api_token: Option<String>,

    /// Duration cap applied when a workflow declares none.
    pub default_workflow_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspaces_root: PathBuf::from("workspaces"),
            container_apply_bin: "kubectl".to_string(),
            git_bin: "git".to_string(),
            terraform_bin: "terraform".to_string(),
            delivery_bin: "ctl-apply".to_string(),
            policy_bin: "policy".to_string(),
            git_api_base: None,
            git_api_token: None,
            default_workflow_timeout: Duration::from_secs(300),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            workspaces_root: std::env::var("WORKSPACES_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspaces_root),
            container_apply_bin: std::env::var("CONTAINER_APPLY_BIN")
                .unwrap_or(defaults.container_apply_bin),
            git_bin: std::env::var("GIT_BIN").unwrap_or(defaults.git_bin),
            terraform_bin: std::env::var("TERRAFORM_BIN").unwrap_or(defaults.terraform_bin),
            delivery_bin: std::env::var("DELIVERY_BIN").unwrap_or(defaults.delivery_bin),
            policy_bin: std::env::var("POLICY_BIN").unwrap_or(defaults.policy_bin),
            git_api_base: std::env::var("GIT_API_BASE").ok(),
            git_api_token: std::env::var("GIT_API_TOKEN").ok(),
            default_workflow_timeout: std::env::var("WORKFLOW_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_workflow_timeout),
        }
    }

    /// The dedicated working tree for one application.
    pub fn workspace_for(&self, app_name: &str) -> PathBuf {
        self.workspaces_root.join(app_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.container_apply_bin, "kubectl");
        assert_eq!(config.default_workflow_timeout, Duration::from_secs(300));
        assert_eq!(
            config.workspace_for("shop"),
            PathBuf::from("workspaces/shop")
        );
    }
}
