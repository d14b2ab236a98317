// Domain types shared across the groundwork crates.
// No I/O here: app specs, workflow specs, resource lifecycle, provider
// manifests, and the boundary error taxonomy.

mod error;
mod provider;
mod resource;
mod spec;
mod workflow;

pub use error::ErrorKind;
pub use provider::{
    ProviderCapabilities, ProviderManifest, ProviderMetadata, ProviderWorkflow, TypeCapability,
};
pub use resource::{Operation, ResourceState};
pub use spec::{AppSpec, ContainerSpec, EnvironmentSpec, Metadata, ResourceSpec};
pub use workflow::{StepSpec, WorkflowDocument, WorkflowSpec};
