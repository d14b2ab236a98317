//! Workflow tier resolution
//!
//! Selects the workflow to run from three tiers: platform (forced by the
//! admin policy), product (allowed list), and application (submitted with
//! the app spec). Required platform workflows are prepended to every
//! plan. YAML is loaded by name under the workflows root; names may not
//! escape the root.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use groundwork_core::{AppSpec, WorkflowDocument, WorkflowSpec};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Resolver errors
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// Name not available in any tier
    #[error("workflow not found: {0}")]
    UnknownWorkflow(String),

    /// Name resolves outside the workflows root
    #[error("workflow name '{0}' escapes the workflows root")]
    PathEscape(String),

    #[error("failed to read workflow '{name}': {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse workflow '{name}': {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_yaml::Error,
    },
}

impl ResolverError {
    pub fn kind(&self) -> groundwork_core::ErrorKind {
        use groundwork_core::ErrorKind;
        match self {
            Self::UnknownWorkflow(_) => ErrorKind::NotFound,
            Self::PathEscape(_) | Self::Parse { .. } => ErrorKind::Validation,
            Self::Io { .. } => ErrorKind::Internal,
        }
    }
}

/// Which tiers may replace which.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideFlags {
    #[serde(default)]
    pub platform: bool,
    #[serde(default)]
    pub product: bool,
}

/// Admin-controlled workflow policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminPolicy {
    /// Prepended to every execution plan.
    #[serde(default)]
    pub required_platform_workflows: Vec<String>,

    /// Workflows the platform tier defines.
    #[serde(default)]
    pub platform_workflows: Vec<String>,

    /// Allowed product-tier workflow names.
    #[serde(default)]
    pub product_workflows: Vec<String>,

    #[serde(default)]
    pub overrides: OverrideFlags,
}

/// The tier a workflow was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Platform,
    Product,
    Application,
}

/// One workflow of an execution plan.
#[derive(Debug, Clone)]
pub struct PlannedWorkflow {
    pub name: String,
    pub tier: Tier,
    pub spec: WorkflowSpec,
}

/// An ordered execution plan: required platform workflows first, then the
/// requested workflow.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub workflows: Vec<PlannedWorkflow>,
}

pub struct WorkflowResolver {
    root: PathBuf,
    policy: AdminPolicy,
}

impl WorkflowResolver {
    pub fn new(root: impl Into<PathBuf>, policy: AdminPolicy) -> Self {
        Self {
            root: root.into(),
            policy,
        }
    }

    pub fn policy(&self) -> &AdminPolicy {
        &self.policy
    }

    /// Validate a workflow name and resolve it under the root. `..`
    /// components and absolute names are rejected.
    fn safe_path(&self, name: &str) -> Result<PathBuf, ResolverError> {
        let relative = Path::new(name);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(ResolverError::PathEscape(name.to_string()));
        }
        let mut path = self.root.join(relative);
        if path.extension().is_none() {
            path.set_extension("yaml");
        }
        Ok(path)
    }

    /// Load a workflow YAML by name from the workflows root.
    pub fn load(&self, name: &str) -> Result<WorkflowSpec, ResolverError> {
        let path = self.safe_path(name)?;
        debug!(%name, path = %path.display(), "loading workflow");
        let raw = std::fs::read_to_string(&path).map_err(|source| ResolverError::Io {
            name: name.to_string(),
            source,
        })?;
        let document: WorkflowDocument =
            serde_yaml::from_str(&raw).map_err(|source| ResolverError::Parse {
                name: name.to_string(),
                source,
            })?;
        Ok(document.spec)
    }

    /// Resolve a workflow by name across the three tiers and build the
    /// execution plan with required platform workflows prepended.
    ///
    /// Tier choice: platform wins iff `overrides.platform`, else product
    /// wins iff it is in the allowed list and `overrides.product`, else
    /// the application's own workflow, else the earlier tiers fill in
    /// names the application did not define.
    pub fn resolve(
        &self,
        app_spec: &AppSpec,
        workflow_name: &str,
    ) -> Result<ExecutionPlan, ResolverError> {
        let mut workflows = Vec::new();
        let mut seen = BTreeSet::new();

        for required in &self.policy.required_platform_workflows {
            if seen.insert(required.clone()) {
                workflows.push(PlannedWorkflow {
                    name: required.clone(),
                    tier: Tier::Platform,
                    spec: self.load(required)?,
                });
            }
        }

        if !seen.contains(workflow_name) {
            let main = self.resolve_tier(app_spec, workflow_name)?;
            workflows.push(main);
        }

        Ok(ExecutionPlan { workflows })
    }

    fn resolve_tier(
        &self,
        app_spec: &AppSpec,
        name: &str,
    ) -> Result<PlannedWorkflow, ResolverError> {
        let in_platform = self.policy.platform_workflows.iter().any(|w| w == name);
        let in_product = self.policy.product_workflows.iter().any(|w| w == name);
        let in_application = app_spec.workflows.contains_key(name);

        let tier = if in_platform && self.policy.overrides.platform {
            Tier::Platform
        } else if in_product && self.policy.overrides.product {
            Tier::Product
        } else if in_application {
            Tier::Application
        } else if in_product {
            Tier::Product
        } else if in_platform {
            Tier::Platform
        } else {
            return Err(ResolverError::UnknownWorkflow(name.to_string()));
        };

        let spec = match tier {
            Tier::Application => app_spec.workflows[name].clone(),
            Tier::Platform | Tier::Product => self.load(name)?,
        };

        Ok(PlannedWorkflow {
            name: name.to_string(),
            tier,
            spec,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use groundwork_core::Metadata;

    use super::*;

    fn write_workflow(root: &Path, name: &str) {
        let body = format!(
            "apiVersion: groundwork.dev/v1\nkind: Workflow\nspec:\n  steps:\n    - name: {name}-step\n      type: dummy\n"
        );
        let path = root.join(format!("{name}.yaml"));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, body).unwrap();
    }

    fn app_with_workflow(name: &str) -> AppSpec {
        let mut workflows = BTreeMap::new();
        workflows.insert(
            name.to_string(),
            WorkflowSpec {
                steps: vec![groundwork_core::StepSpec {
                    name: "app-step".into(),
                    step_type: "dummy".into(),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        AppSpec {
            metadata: Metadata {
                name: "shop".into(),
                team: None,
            },
            containers: BTreeMap::new(),
            resources: BTreeMap::new(),
            environment: None,
            workflows,
        }
    }

    #[test]
    fn path_escape_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = WorkflowResolver::new(tmp.path(), AdminPolicy::default());
        assert!(matches!(
            resolver.load("../outside"),
            Err(ResolverError::PathEscape(_))
        ));
        assert!(matches!(
            resolver.load("/etc/passwd"),
            Err(ResolverError::PathEscape(_))
        ));
        assert!(matches!(
            resolver.load("nested/../../outside"),
            Err(ResolverError::PathEscape(_))
        ));
    }

    #[test]
    fn loads_by_name_with_yaml_extension() {
        let tmp = tempfile::tempdir().unwrap();
        write_workflow(tmp.path(), "deploy");
        let resolver = WorkflowResolver::new(tmp.path(), AdminPolicy::default());
        let spec = resolver.load("deploy").unwrap();
        assert_eq!(spec.steps[0].name, "deploy-step");
    }

    #[test]
    fn application_tier_wins_without_override_flags() {
        let tmp = tempfile::tempdir().unwrap();
        write_workflow(tmp.path(), "deploy");
        let policy = AdminPolicy {
            product_workflows: vec!["deploy".into()],
            ..Default::default()
        };
        let resolver = WorkflowResolver::new(tmp.path(), policy);

        let plan = resolver.resolve(&app_with_workflow("deploy"), "deploy").unwrap();
        assert_eq!(plan.workflows.len(), 1);
        assert_eq!(plan.workflows[0].tier, Tier::Application);
        assert_eq!(plan.workflows[0].spec.steps[0].name, "app-step");
    }

    #[test]
    fn product_override_replaces_application_tier() {
        let tmp = tempfile::tempdir().unwrap();
        write_workflow(tmp.path(), "deploy");
        let policy = AdminPolicy {
            product_workflows: vec!["deploy".into()],
            overrides: OverrideFlags {
                product: true,
                platform: false,
            },
            ..Default::default()
        };
        let resolver = WorkflowResolver::new(tmp.path(), policy);

        let plan = resolver.resolve(&app_with_workflow("deploy"), "deploy").unwrap();
        assert_eq!(plan.workflows[0].tier, Tier::Product);
        assert_eq!(plan.workflows[0].spec.steps[0].name, "deploy-step");
    }

    #[test]
    fn platform_override_beats_product() {
        let tmp = tempfile::tempdir().unwrap();
        write_workflow(tmp.path(), "deploy");
        let policy = AdminPolicy {
            platform_workflows: vec!["deploy".into()],
            product_workflows: vec!["deploy".into()],
            overrides: OverrideFlags {
                platform: true,
                product: true,
            },
            ..Default::default()
        };
        let resolver = WorkflowResolver::new(tmp.path(), policy);

        let plan = resolver.resolve(&app_with_workflow("deploy"), "deploy").unwrap();
        assert_eq!(plan.workflows[0].tier, Tier::Platform);
    }

    #[test]
    fn earlier_tiers_augment_missing_names() {
        let tmp = tempfile::tempdir().unwrap();
        write_workflow(tmp.path(), "golden-path");
        let policy = AdminPolicy {
            product_workflows: vec!["golden-path".into()],
            ..Default::default()
        };
        let resolver = WorkflowResolver::new(tmp.path(), policy);

        // the app never defined golden-path; product supplies it
        let plan = resolver
            .resolve(&app_with_workflow("deploy"), "golden-path")
            .unwrap();
        assert_eq!(plan.workflows[0].tier, Tier::Product);
    }

    #[test]
    fn required_platform_workflows_are_prepended() {
        let tmp = tempfile::tempdir().unwrap();
        write_workflow(tmp.path(), "policy-gate");
        let policy = AdminPolicy {
            required_platform_workflows: vec!["policy-gate".into()],
            ..Default::default()
        };
        let resolver = WorkflowResolver::new(tmp.path(), policy);

        let plan = resolver.resolve(&app_with_workflow("deploy"), "deploy").unwrap();
        assert_eq!(plan.workflows.len(), 2);
        assert_eq!(plan.workflows[0].name, "policy-gate");
        assert_eq!(plan.workflows[0].tier, Tier::Platform);
        assert_eq!(plan.workflows[1].name, "deploy");
    }

    #[test]
    fn unknown_workflow_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let resolver = WorkflowResolver::new(tmp.path(), AdminPolicy::default());
        let err = resolver
            .resolve(&app_with_workflow("deploy"), "missing")
            .unwrap_err();
        assert!(matches!(err, ResolverError::UnknownWorkflow(_)));
    }
}
