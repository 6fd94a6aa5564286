use std::fmt;

use semver::Version;

use crate::service_system::dependency::ServiceDependency;
use crate::service_system::error::RegistryError;
use crate::service_system::version::{parse_version, VersionRange};

/// Static metadata describing a hosted service.
///
/// Descriptors are built once at process start and never change after
/// registration. The route prefix is consumed by the HTTP layer to mount the
/// service's endpoints; the kernel itself only carries it.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    name: String,
    version: Version,
    dependencies: Vec<ServiceDependency>,
    route_prefix: Option<String>,
    uses_message_queue: bool,
}

impl ServiceDescriptor {
    /// Create a descriptor with a semver version string.
    pub fn new(name: impl Into<String>, version: &str) -> Result<Self, RegistryError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::InvalidDescriptor {
                name,
                reason: "service name must not be empty".to_string(),
            });
        }
        let version = parse_version(version).map_err(|e| RegistryError::InvalidDescriptor {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            name,
            version,
            dependencies: Vec::new(),
            route_prefix: None,
            uses_message_queue: false,
        })
    }

    /// Declare a dependency on another service (any version).
    /// Declaring the same service twice keeps the first declaration.
    pub fn depends_on(self, service: &str) -> Self {
        self.with_dependency(ServiceDependency::any(service))
    }

    /// Declare a dependency constrained to a version range.
    pub fn depends_on_version(self, service: &str, range: VersionRange) -> Self {
        self.with_dependency(ServiceDependency::constrained(service, range))
    }

    pub fn with_dependency(mut self, dependency: ServiceDependency) -> Self {
        if !self.dependencies.iter().any(|d| d.service == dependency.service) {
            self.dependencies.push(dependency);
        }
        self
    }

    /// Route prefix under which the HTTP layer mounts this service.
    pub fn with_route_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.route_prefix = Some(prefix.into());
        self
    }

    /// Ask the kernel to wire the platform message queue into this service.
    pub fn with_message_queue(mut self) -> Self {
        self.uses_message_queue = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn dependencies(&self) -> &[ServiceDependency] {
        &self.dependencies
    }

    /// Names of the declared dependencies, in declaration order.
    pub fn dependency_names(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.service.as_str())
    }

    pub fn route_prefix(&self) -> Option<&str> {
        self.route_prefix.as_deref()
    }

    pub fn uses_message_queue(&self) -> bool {
        self.uses_message_queue
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}
