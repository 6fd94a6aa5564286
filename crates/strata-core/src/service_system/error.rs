//! # Strata Service Registry Errors
//!
//! Defines error types for descriptor registration and dependency resolution.
//! Every variant is fatal to platform startup: the kernel never returns a
//! partially resolved platform.
use thiserror::Error;

use crate::service_system::version::VersionError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Service descriptor '{name}' not found (required by {})", .required_by.as_deref().unwrap_or("<caller>"))]
    DescriptorNotFound {
        name: String,
        /// The service that declared the dependency, or `None` when the name was requested directly.
        required_by: Option<String>,
    },

    #[error("Dependency cycle detected: {}", .path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("Service '{name}' is already registered")]
    DuplicateDescriptor { name: String },

    #[error("Invalid descriptor for service '{name}': {reason}")]
    InvalidDescriptor { name: String, reason: String },

    #[error("Service '{service}' requires '{dependency}' version '{required}' but found '{found}'")]
    IncompatibleVersion {
        service: String,
        dependency: String,
        required: String,
        found: String,
    },

    #[error("Version error: {0}")]
    Version(#[from] VersionError),
}
