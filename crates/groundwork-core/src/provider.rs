// Provider manifest documents.
//
// A provider advertises either a flat list of resource types (create only)
// or per-type operation tables, optionally aliasing another type's
// workflow set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resource::Operation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderManifest {
    pub metadata: ProviderMetadata,

    #[serde(default)]
    pub capabilities: ProviderCapabilities,

    #[serde(default)]
    pub workflows: Vec<ProviderWorkflow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCapabilities {
    /// Simple form: the provider handles `create` for each listed type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_types: Vec<String>,

    /// Advanced form: per-type operation tables.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_type_capabilities: Vec<TypeCapability>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeCapability {
    #[serde(rename = "type")]
    pub resource_type: String,

    /// operation -> workflow name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub operations: BTreeMap<Operation, String>,

    /// Share another type's workflow set instead of declaring operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias_for: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderWorkflow {
    pub name: String,
    pub operation: Operation,
    pub file: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_manifest() {
        let yaml = r#"
metadata:
  name: database-team
  version: "1.2.0"
  category: data
capabilities:
  resourceTypes: [postgres, redis]
workflows:
  - name: provision-postgres
    operation: create
    file: workflows/provision-postgres.yaml
"#;
        let m: ProviderManifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(m.metadata.name, "database-team");
        assert_eq!(m.capabilities.resource_types, vec!["postgres", "redis"]);
        assert_eq!(m.workflows[0].operation, Operation::Create);
    }

    #[test]
    fn parses_advanced_manifest_with_alias() {
        let yaml = r#"
metadata:
  name: database-team
  version: "2.0.0"
capabilities:
  resourceTypeCapabilities:
    - type: postgres
      operations:
        create: provision-postgres
        delete: teardown-postgres
    - type: pg
      aliasFor: postgres
"#;
        let m: ProviderManifest = serde_yaml::from_str(yaml).unwrap();
        let caps = &m.capabilities.resource_type_capabilities;
        assert_eq!(caps[0].operations[&Operation::Create], "provision-postgres");
        assert_eq!(caps[1].alias_for.as_deref(), Some("postgres"));
    }
}
