//! # Strata Kernel Errors
//!
//! [`Error`] is the error type of the whole platform kernel. Subsystem errors
//! (registry, configuration, message queue) are wrapped with `#[from]`;
//! lifecycle failures carry the service name and the phase they happened in.
use std::result::Result as StdResult;
use std::time::Duration;

use thiserror::Error as ThisError;

use crate::config::ConfigError;
use crate::kernel::component::LifecyclePhase;
use crate::kernel::component::ServiceState;
use crate::kernel::report::StartupReport;
use crate::mq::QueueError;
use crate::service_system::RegistryError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Descriptor registration or dependency resolution failed
    #[error("Service registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Message queue selection, connection or operation failed
    #[error("Message queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Service '{service}' failed during {phase}: {cause}")]
    LifecyclePhaseFailed {
        service: String,
        phase: LifecyclePhase,
        #[source]
        cause: Box<Error>,
    },

    #[error("Service '{service}' timed out during {phase} after {timeout:?}")]
    LifecycleTimeout {
        service: String,
        phase: LifecyclePhase,
        timeout: Duration,
    },

    #[error("Service '{service}' cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        service: String,
        from: ServiceState,
        to: ServiceState,
    },

    #[error("Platform startup exceeded {timeout:?}; started services were stopped")]
    StartupTimeout { timeout: Duration, report: StartupReport },

    #[error("Platform is not ready: {}", report.summary())]
    NotReady { report: StartupReport },

    #[error("Capability of service '{service}' is unavailable: {reason}")]
    ApiUnavailable { service: String, reason: String },

    /// Free-form failure raised by a service implementation
    #[error("{0}")]
    Service(String),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::LifecycleTimeout { .. } | Error::StartupTimeout { .. })
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Service(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Service(s)
    }
}

/// Result type for kernel operations
pub type Result<T> = StdResult<T, Error>;
