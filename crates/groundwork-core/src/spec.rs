// Declarative application specification submitted by clients.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowSpec;

/// A declarative application specification: containers, resources, target
/// environment, and optional embedded workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSpec {
    pub metadata: Metadata,

    #[serde(default)]
    pub containers: BTreeMap<String, ContainerSpec>,

    #[serde(default)]
    pub resources: BTreeMap<String, ResourceSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentSpec>,

    #[serde(default)]
    pub workflows: BTreeMap<String, WorkflowSpec>,
}

impl AppSpec {
    /// Environment type with the conventional default applied.
    pub fn environment_type(&self) -> &str {
        self.environment
            .as_ref()
            .map(|e| e.env_type.as_str())
            .unwrap_or("kubernetes")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,

    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    #[serde(rename = "type")]
    pub resource_type: String,

    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    #[serde(rename = "type")]
    pub env_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_spec() {
        let yaml = r#"
metadata:
  name: shop
  team: storefront
containers:
  web:
    image: ghcr.io/acme/shop:1.4
resources:
  db:
    type: postgres
    params:
      version: "16"
environment:
  type: kubernetes
"#;
        let spec: AppSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.metadata.name, "shop");
        assert_eq!(spec.resources["db"].resource_type, "postgres");
        assert_eq!(spec.environment_type(), "kubernetes");
        assert!(spec.workflows.is_empty());
    }

    #[test]
    fn environment_defaults_to_kubernetes() {
        let spec: AppSpec = serde_yaml::from_str("metadata:\n  name: bare\n").unwrap();
        assert_eq!(spec.environment_type(), "kubernetes");
    }

    #[test]
    fn identical_specs_compare_equal() {
        let yaml = "metadata:\n  name: a\nresources:\n  q:\n    type: redis\n";
        let one: AppSpec = serde_yaml::from_str(yaml).unwrap();
        let two: AppSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(one, two);
    }
}
