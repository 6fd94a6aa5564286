//! # strata-core
//!
//! Kernel of the Strata service platform: declare services, resolve their
//! dependency graph, inject per-service configuration, drive each service
//! through `init`/`start`/`stop`, and let services reach each other through
//! typed capabilities. Also provides the platform message queue.
pub mod config;
pub mod kernel;
pub mod mq;
pub mod service_system;

pub use config::{ConfigResolver, ConfigSource, Configuration};
pub use kernel::error::Error as KernelError;
pub use kernel::{
    Capability, Dependencies, Kernel, LifecyclePhase, PlatformHandle, Service, ServiceContext, ServiceOutcome,
    ServiceState, ShutdownReport, StartupReport,
};
pub use mq::{Message, MessageHandler, MessageQueue, PublishOutcome, QueueError};
pub use service_system::{ServiceDescriptor, ServiceRegistry, VersionRange};

#[cfg(test)]
mod tests;
