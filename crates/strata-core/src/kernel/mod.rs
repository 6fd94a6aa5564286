//! # Strata Kernel
//!
//! The service lifecycle kernel. It resolves a requested set of services
//! through the [`ServiceRegistry`](crate::service_system::ServiceRegistry),
//! builds each one with its scoped configuration, and drives them
//! `init -> start` level by level, `stop` in reverse.
//!
//! ## Key Components:
//!
//! - [`Kernel`](bootstrap::Kernel): `start(requested, configuration)` and `stop(handle)`.
//! - [`Service`](component::Service): the contract hosted services implement,
//!   plus [`ServiceState`](component::ServiceState) and
//!   [`LifecyclePhase`](component::LifecyclePhase).
//! - [`Capability`](capability::Capability): type-erased `Arc<dyn Api>` handles
//!   passed to dependents through [`Dependencies`](capability::Dependencies).
//! - [`PlatformHandle`](handle::PlatformHandle): the running platform.
//! - [`StartupReport`](report::StartupReport) and
//!   [`ShutdownReport`](report::ShutdownReport).
//! - [`Error`](error::Error) and the crate-wide `Result` alias.
pub mod bootstrap;
pub mod capability;
pub mod component;
pub mod constants;
pub mod context;
pub mod error;
pub mod handle;
pub mod report;
pub mod settings;

pub use bootstrap::Kernel;
pub use capability::{Capability, CapabilityMap, Dependencies};
pub use component::{LifecyclePhase, Service, ServiceInstance, ServiceState};
pub use context::{PlatformContext, ServiceContext};
pub use error::{Error, Result};
pub use handle::PlatformHandle;
pub use report::{ServiceOutcome, ServiceReport, ShutdownReport, StartupReport, StopFailure};
pub use settings::LifecycleSettings;
