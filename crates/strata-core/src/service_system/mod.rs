//! # Strata Service System
//!
//! Static service metadata and dependency resolution.
//!
//! - [`ServiceDescriptor`](descriptor::ServiceDescriptor): name, semver version,
//!   declared dependencies, optional route prefix and queue usage.
//! - [`ServiceRegistry`](registry::ServiceRegistry): descriptors paired with their
//!   factories, resolved into a deterministic dependencies-first order.
//! - [`ServiceFactory`](factory::ServiceFactory): builds implementation objects
//!   against a scoped [`ServiceContext`](crate::kernel::ServiceContext).
pub mod dependency;
pub mod descriptor;
pub mod error;
pub mod factory;
pub mod registry;
pub mod version;

pub use dependency::{DependencyGraph, ServiceDependency};
pub use descriptor::ServiceDescriptor;
pub use error::RegistryError;
pub use factory::ServiceFactory;
pub use registry::{depth_levels, Registration, ResolvedPlan, ServiceRegistry};
pub use version::{VersionError, VersionRange};

#[cfg(test)]
mod tests;
