//! Provider registry and resolver
//!
//! Providers advertise `(resource_type, operation) → workflow` claims via
//! YAML manifests. Overlapping claims and alias cycles are startup
//! errors; resolution follows aliases transitively and returns specific
//! errors for missing providers or unsupported operations.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use groundwork_core::{Operation, ProviderManifest, WorkflowDocument, WorkflowSpec};
use tracing::{debug, info};

/// Provider errors
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Two providers claim the same (resource_type, operation)
    #[error(
        "capability conflict: providers '{first}' and '{second}' both claim {resource_type}/{operation}"
    )]
    CapabilityConflict {
        resource_type: String,
        operation: Operation,
        first: String,
        second: String,
    },

    /// Alias chain loops
    #[error("alias cycle detected for resource type '{0}'")]
    AliasCycle(String),

    /// Manifest references a workflow it does not declare
    #[error("provider '{provider}' references undeclared workflow '{workflow}' for {resource_type}/{operation}")]
    UndeclaredWorkflow {
        provider: String,
        workflow: String,
        resource_type: String,
        operation: Operation,
    },

    /// Workflow file path escapes the provider directory
    #[error("provider '{provider}' workflow file '{file}' escapes the provider directory")]
    PathEscape { provider: String, file: String },

    /// No provider claims the resource type
    #[error("no provider registered for resource type '{0}'")]
    NoProviderForType(String),

    /// The provider for the type does not support the operation
    #[error("provider '{provider}' does not support {operation} for resource type '{resource_type}'")]
    OperationUnsupported {
        provider: String,
        resource_type: String,
        operation: Operation,
    },

    #[error("failed to read provider manifest {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse provider manifest {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to load workflow file {path}: {source}")]
    WorkflowLoad {
        path: String,
        #[source]
        source: anyhow::Error,
    },
}

impl ProviderError {
    pub fn kind(&self) -> groundwork_core::ErrorKind {
        use groundwork_core::ErrorKind;
        match self {
            Self::NoProviderForType(_) | Self::OperationUnsupported { .. } => ErrorKind::NotFound,
            Self::CapabilityConflict { .. }
            | Self::AliasCycle(_)
            | Self::UndeclaredWorkflow { .. }
            | Self::PathEscape { .. }
            | Self::Parse { .. } => ErrorKind::Validation,
            Self::Io { .. } | Self::WorkflowLoad { .. } => ErrorKind::Internal,
        }
    }
}

/// The outcome of resolving `(resource_type, operation)`.
#[derive(Debug, Clone)]
pub struct ResolvedWorkflow {
    pub provider: String,
    pub workflow_name: String,
    pub file: PathBuf,
}

#[derive(Debug, Clone)]
struct Claim {
    provider: String,
    workflow_name: String,
    file: PathBuf,
}

/// Registry of provider capability claims.
#[derive(Default)]
pub struct ProviderRegistry {
    claims: HashMap<(String, Operation), Claim>,
    aliases: HashMap<String, String>,
    providers: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.yaml` manifest directly under the providers root.
    /// Workflow files are resolved relative to the root.
    pub fn from_dir(root: &Path) -> Result<Self, ProviderError> {
        let mut registry = Self::new();

        let entries = std::fs::read_dir(root).map_err(|source| ProviderError::Io {
            path: root.display().to_string(),
            source,
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
            .collect();
        paths.sort();

        for path in paths {
            let raw = std::fs::read_to_string(&path).map_err(|source| ProviderError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let manifest: ProviderManifest =
                serde_yaml::from_str(&raw).map_err(|source| ProviderError::Parse {
                    path: path.display().to_string(),
                    source,
                })?;
            registry.register(&manifest, root)?;
        }

        registry.validate_aliases()?;
        info!(providers = registry.providers.len(), "provider registry loaded");
        Ok(registry)
    }

    /// Register one manifest. Detects capability conflicts immediately.
    pub fn register(
        &mut self,
        manifest: &ProviderManifest,
        base_dir: &Path,
    ) -> Result<(), ProviderError> {
        let provider = manifest.metadata.name.clone();

        let mut workflow_files: HashMap<(&str, Operation), &str> = HashMap::new();
        for workflow in &manifest.workflows {
            workflow_files.insert((workflow.name.as_str(), workflow.operation), &workflow.file);
        }

        // simple form implies create only, one workflow per type
        for resource_type in &manifest.capabilities.resource_types {
            let workflow = manifest
                .workflows
                .iter()
                .find(|w| w.operation == Operation::Create)
                .ok_or_else(|| ProviderError::UndeclaredWorkflow {
                    provider: provider.clone(),
                    workflow: "<create>".to_string(),
                    resource_type: resource_type.clone(),
                    operation: Operation::Create,
                })?;
            insert_claim(
                &mut self.claims,
                &provider,
                resource_type,
                Operation::Create,
                &workflow.name,
                &workflow_files,
                base_dir,
            )?;
        }

        for capability in &manifest.capabilities.resource_type_capabilities {
            if let Some(target) = &capability.alias_for {
                self.aliases
                    .insert(capability.resource_type.clone(), target.clone());
                continue;
            }
            for (operation, workflow_name) in &capability.operations {
                insert_claim(
                    &mut self.claims,
                    &provider,
                    &capability.resource_type,
                    *operation,
                    workflow_name,
                    &workflow_files,
                    base_dir,
                )?;
            }
        }

        self.providers.push(provider);
        Ok(())
    }

    /// Reject alias cycles and aliases pointing at nothing.
    pub fn validate_aliases(&self) -> Result<(), ProviderError> {
        for start in self.aliases.keys() {
            let mut seen = vec![start.as_str()];
            let mut current = start.as_str();
            while let Some(next) = self.aliases.get(current) {
                if seen.contains(&next.as_str()) {
                    return Err(ProviderError::AliasCycle(start.clone()));
                }
                seen.push(next);
                current = next;
            }
            let has_claims = self.claims.keys().any(|(t, _)| t == current);
            if !has_claims {
                return Err(ProviderError::NoProviderForType(current.to_string()));
            }
        }
        Ok(())
    }

    /// Follow aliases to the concrete resource type.
    fn canonical<'a>(&'a self, resource_type: &'a str) -> &'a str {
        let mut current = resource_type;
        let mut hops = 0;
        while let Some(next) = self.aliases.get(current) {
            current = next;
            hops += 1;
            if hops > self.aliases.len() {
                // cycles are rejected at startup; guard anyway
                return resource_type;
            }
        }
        current
    }

    /// Resolve the workflow for `(resource_type, operation)`.
    pub fn resolve(
        &self,
        resource_type: &str,
        operation: Operation,
    ) -> Result<ResolvedWorkflow, ProviderError> {
        let concrete = self.canonical(resource_type);

        if let Some(claim) = self.claims.get(&(concrete.to_string(), operation)) {
            return Ok(ResolvedWorkflow {
                provider: claim.provider.clone(),
                workflow_name: claim.workflow_name.clone(),
                file: claim.file.clone(),
            });
        }

        match self.claims.iter().find(|((t, _), _)| t == concrete) {
            Some((_, claim)) => Err(ProviderError::OperationUnsupported {
                provider: claim.provider.clone(),
                resource_type: resource_type.to_string(),
                operation,
            }),
            None => Err(ProviderError::NoProviderForType(resource_type.to_string())),
        }
    }

    /// Load the workflow spec behind a resolved claim.
    pub fn load_workflow(&self, resolved: &ResolvedWorkflow) -> Result<WorkflowSpec, ProviderError> {
        let raw =
            std::fs::read_to_string(&resolved.file).map_err(|source| ProviderError::WorkflowLoad {
                path: resolved.file.display().to_string(),
                source: source.into(),
            })?;
        let document: WorkflowDocument =
            serde_yaml::from_str(&raw).map_err(|source| ProviderError::WorkflowLoad {
                path: resolved.file.display().to_string(),
                source: source.into(),
            })?;
        Ok(document.spec)
    }

    pub fn provider_names(&self) -> &[String] {
        &self.providers
    }
}

#[allow(clippy::too_many_arguments)]
fn insert_claim(
    claims: &mut HashMap<(String, Operation), Claim>,
    provider: &str,
    resource_type: &str,
    operation: Operation,
    workflow_name: &str,
    workflow_files: &HashMap<(&str, Operation), &str>,
    base_dir: &Path,
) -> Result<(), ProviderError> {
    let file = workflow_files
        .get(&(workflow_name, operation))
        .copied()
        .ok_or_else(|| ProviderError::UndeclaredWorkflow {
            provider: provider.to_string(),
            workflow: workflow_name.to_string(),
            resource_type: resource_type.to_string(),
            operation,
        })?;
    let file = safe_join(base_dir, file).ok_or_else(|| ProviderError::PathEscape {
        provider: provider.to_string(),
        file: file.to_string(),
    })?;

    let key = (resource_type.to_string(), operation);
    if let Some(existing) = claims.get(&key) {
        return Err(ProviderError::CapabilityConflict {
            resource_type: resource_type.to_string(),
            operation,
            first: existing.provider.clone(),
            second: provider.to_string(),
        });
    }
    debug!(%provider, %resource_type, %operation, workflow = %workflow_name, "registered claim");
    claims.insert(
        key,
        Claim {
            provider: provider.to_string(),
            workflow_name: workflow_name.to_string(),
            file,
        },
    );
    Ok(())
}

fn safe_join(base: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    if relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    {
        return None;
    }
    Some(base.join(relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(yaml: &str) -> ProviderManifest {
        serde_yaml::from_str(yaml).unwrap()
    }

    const DATABASE_TEAM: &str = r#"
metadata:
  name: database-team
  version: "1.0.0"
capabilities:
  resourceTypeCapabilities:
    - type: postgres
      operations:
        create: provision-postgres
        update: update-postgres
        delete: teardown-postgres
    - type: pg
      aliasFor: postgres
workflows:
  - name: provision-postgres
    operation: create
    file: workflows/provision-postgres.yaml
  - name: update-postgres
    operation: update
    file: workflows/update-postgres.yaml
  - name: teardown-postgres
    operation: delete
    file: workflows/teardown-postgres.yaml
"#;

    #[test]
    fn resolves_by_type_and_operation() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(&manifest(DATABASE_TEAM), Path::new("/providers"))
            .unwrap();
        registry.validate_aliases().unwrap();

        let resolved = registry.resolve("postgres", Operation::Create).unwrap();
        assert_eq!(resolved.provider, "database-team");
        assert_eq!(resolved.workflow_name, "provision-postgres");
        assert_eq!(
            resolved.file,
            PathBuf::from("/providers/workflows/provision-postgres.yaml")
        );
    }

    #[test]
    fn alias_resolution_is_transitive() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(&manifest(DATABASE_TEAM), Path::new("/providers"))
            .unwrap();
        registry
            .aliases
            .insert("psql".to_string(), "pg".to_string());
        registry.validate_aliases().unwrap();

        let resolved = registry.resolve("psql", Operation::Delete).unwrap();
        assert_eq!(resolved.workflow_name, "teardown-postgres");
    }

    #[test]
    fn capability_conflict_names_both_providers() {
        let other = r#"
metadata:
  name: dba-guild
  version: "0.1.0"
capabilities:
  resourceTypes: [postgres]
workflows:
  - name: make-postgres
    operation: create
    file: workflows/make-postgres.yaml
"#;
        let mut registry = ProviderRegistry::new();
        registry
            .register(&manifest(DATABASE_TEAM), Path::new("/providers"))
            .unwrap();
        let err = registry
            .register(&manifest(other), Path::new("/providers"))
            .unwrap_err();

        match err {
            ProviderError::CapabilityConflict { first, second, .. } => {
                assert_eq!(first, "database-team");
                assert_eq!(second, "dba-guild");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn alias_cycle_is_rejected() {
        let cyclic = r#"
metadata:
  name: loopy
  version: "0.1.0"
capabilities:
  resourceTypeCapabilities:
    - type: a
      aliasFor: b
    - type: b
      aliasFor: a
workflows: []
"#;
        let mut registry = ProviderRegistry::new();
        registry
            .register(&manifest(cyclic), Path::new("/providers"))
            .unwrap();
        assert!(matches!(
            registry.validate_aliases(),
            Err(ProviderError::AliasCycle(_))
        ));
    }

    #[test]
    fn specific_errors_for_missing_claims() {
        let mut registry = ProviderRegistry::new();
        registry
            .register(&manifest(DATABASE_TEAM), Path::new("/providers"))
            .unwrap();

        assert!(matches!(
            registry.resolve("redis", Operation::Create),
            Err(ProviderError::NoProviderForType(_))
        ));

        let simple = r#"
metadata:
  name: cache-team
  version: "1.0.0"
capabilities:
  resourceTypes: [redis]
workflows:
  - name: provision-redis
    operation: create
    file: workflows/provision-redis.yaml
"#;
        registry
            .register(&manifest(simple), Path::new("/providers"))
            .unwrap();

        // simple form implies create only
        assert!(registry.resolve("redis", Operation::Create).is_ok());
        assert!(matches!(
            registry.resolve("redis", Operation::Delete),
            Err(ProviderError::OperationUnsupported { .. })
        ));
    }

    #[test]
    fn workflow_file_may_not_escape_provider_dir() {
        let sneaky = r#"
metadata:
  name: sneaky
  version: "0.1.0"
capabilities:
  resourceTypes: [vault]
workflows:
  - name: escape
    operation: create
    file: ../../etc/shadow
"#;
        let mut registry = ProviderRegistry::new();
        let err = registry
            .register(&manifest(sneaky), Path::new("/providers"))
            .unwrap_err();
        assert!(matches!(err, ProviderError::PathEscape { .. }));
    }
}
