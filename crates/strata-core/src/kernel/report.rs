//! Startup and shutdown reports.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kernel::component::{LifecyclePhase, ServiceState};

/// How a service's startup ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ServiceOutcome {
    Started,
    Failed { phase: LifecyclePhase, cause: String },
    TimedOut { phase: LifecyclePhase, timeout_ms: u64 },
    /// A dependency (transitively) failed; the service never ran `init` or `start`.
    Unstartable { blocked_by: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceReport {
    pub name: String,
    pub version: String,
    pub level: usize,
    pub state: ServiceState,
    pub outcome: ServiceOutcome,
}

/// Per-service result of `Kernel::start`, in resolved order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupReport {
    pub services: Vec<ServiceReport>,
}

impl StartupReport {
    /// Every service reached `Started`.
    pub fn is_ready(&self) -> bool {
        self.services.iter().all(|s| s.outcome == ServiceOutcome::Started)
    }

    pub fn get(&self, name: &str) -> Option<&ServiceReport> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn outcome(&self, name: &str) -> Option<&ServiceOutcome> {
        self.get(name).map(|s| &s.outcome)
    }

    pub fn started(&self) -> impl Iterator<Item = &str> {
        self.services
            .iter()
            .filter(|s| s.outcome == ServiceOutcome::Started)
            .map(|s| s.name.as_str())
    }

    pub fn not_started(&self) -> impl Iterator<Item = &ServiceReport> {
        self.services.iter().filter(|s| s.outcome != ServiceOutcome::Started)
    }

    /// One line: counts, plus the names that did not start.
    pub fn summary(&self) -> String {
        let started = self.started().count();
        let total = self.services.len();
        if started == total {
            return format!("{}/{} services started", started, total);
        }
        let missing: Vec<&str> = self.not_started().map(|s| s.name.as_str()).collect();
        format!(
            "{}/{} services started; not started: {}",
            started,
            total,
            missing.join(", ")
        )
    }
}

impl fmt::Display for StartupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary())?;
        for s in &self.services {
            let detail = match &s.outcome {
                ServiceOutcome::Started => "started".to_string(),
                ServiceOutcome::Failed { phase, cause } => format!("failed during {}: {}", phase, cause),
                ServiceOutcome::TimedOut { phase, timeout_ms } => {
                    format!("timed out during {} after {}ms", phase, timeout_ms)
                }
                ServiceOutcome::Unstartable { blocked_by } => format!("unstartable, blocked by {}", blocked_by),
            };
            writeln!(f, "  [L{}] {}@{}: {}", s.level, s.name, s.version, detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopFailure {
    pub name: String,
    pub cause: String,
}

/// Result of `Kernel::stop`. Every started service is attempted; failures
/// are collected, never fatal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Services that stopped cleanly, in stop order.
    pub stopped: Vec<String>,
    pub failures: Vec<StopFailure>,
    /// Set when closing the message queue failed.
    pub queue_error: Option<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.queue_error.is_none()
    }
}

impl fmt::Display for ShutdownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} service(s) stopped", self.stopped.len())?;
        if !self.failures.is_empty() {
            let names: Vec<&str> = self.failures.iter().map(|s| s.name.as_str()).collect();
            write!(f, "; failed to stop: {}", names.join(", "))?;
        }
        if let Some(e) = &self.queue_error {
            write!(f, "; queue close failed: {}", e)?;
        }
        Ok(())
    }
}
