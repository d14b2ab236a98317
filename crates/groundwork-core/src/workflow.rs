// Workflow specification documents.
//
// Workflows are authored in YAML as {apiVersion, kind, spec}. The engine
// consumes the inner WorkflowSpec; embedded app-spec workflows carry the
// spec directly.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Outer YAML document for a workflow stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDocument {
    pub api_version: String,
    pub kind: String,
    pub spec: WorkflowSpec,
}

/// Ordered steps plus execution policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    #[serde(default)]
    pub steps: Vec<StepSpec>,

    /// Concurrent fan-out bound for independent steps. Absent or 1 means
    /// strictly serial execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,

    /// Whole-workflow duration cap in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workflow_duration: Option<u64>,
}

impl WorkflowSpec {
    pub fn is_parallel(&self) -> bool {
        self.max_parallel.map(|p| p > 1).unwrap_or(false)
    }

    pub fn duration_cap(&self) -> Option<Duration> {
        self.max_workflow_duration.map(Duration::from_secs)
    }
}

/// One step of a workflow. Type-specific fields are optional and flat, the
/// way authors write them; absent fields fall back to per-type defaults at
/// execution time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub step_type: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub continue_on_failure: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playbook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, serde_json::Value>,
}

impl StepSpec {
    /// Mutable references to every substitutable string field, in a fixed
    /// order. The variables map is handled separately because its values
    /// are JSON.
    pub fn string_fields_mut(&mut self) -> [&mut Option<String>; 12] {
        [
            &mut self.namespace,
            &mut self.path,
            &mut self.repo_name,
            &mut self.manifest_path,
            &mut self.target_path,
            &mut self.playbook,
            &mut self.owner,
            &mut self.sync_policy,
            &mut self.output_dir,
            &mut self.working_dir,
            &mut self.commit_message,
            &mut self.description,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_workflow_document() {
        let yaml = r#"
apiVersion: groundwork.dev/v1
kind: Workflow
spec:
  maxParallel: 3
  maxWorkflowDuration: 300
  steps:
    - name: gen
      type: terraform-generate
      outputDir: terraform/db
    - name: apply
      type: terraform-init-plan-apply
      dependsOn: [gen]
      workingDir: terraform/db
      continueOnFailure: true
"#;
        let doc: WorkflowDocument = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(doc.kind, "Workflow");
        assert!(doc.spec.is_parallel());
        assert_eq!(doc.spec.duration_cap(), Some(Duration::from_secs(300)));
        assert_eq!(doc.spec.steps[1].depends_on, vec!["gen"]);
        assert!(doc.spec.steps[1].continue_on_failure);
    }

    #[test]
    fn empty_spec_is_serial_and_uncapped() {
        let spec = WorkflowSpec::default();
        assert!(!spec.is_parallel());
        assert!(spec.duration_cap().is_none());
        assert!(spec.steps.is_empty());
    }

    #[test]
    fn round_trips_through_json() {
        let mut step = StepSpec {
            name: "deploy".into(),
            step_type: "container-apply".into(),
            namespace: Some("shop-kubernetes".into()),
            ..Default::default()
        };
        step.variables
            .insert("replicas".into(), serde_json::json!(3));

        let spec = WorkflowSpec {
            steps: vec![step],
            ..Default::default()
        };
        let json = serde_json::to_value(&spec).unwrap();
        let back: WorkflowSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }
}
