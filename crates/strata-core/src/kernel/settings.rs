use std::time::Duration;

use crate::config::Configuration;
use crate::kernel::constants;

/// Timeouts that bound the lifecycle (`platform.lifecycle.*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Upper bound for one service's `init` or `start`.
    pub phase_timeout: Duration,
    /// Upper bound for the whole of `Kernel::start`.
    pub startup_timeout: Duration,
    /// Upper bound for one service's `stop`.
    pub stop_timeout: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        let phase = Duration::from_millis(constants::DEFAULT_PHASE_TIMEOUT_MS);
        Self {
            phase_timeout: phase,
            startup_timeout: Duration::from_millis(constants::DEFAULT_STARTUP_TIMEOUT_MS),
            stop_timeout: phase,
        }
    }
}

impl LifecycleSettings {
    pub fn from_config(configuration: &Configuration) -> Self {
        let section = configuration.scope(constants::LIFECYCLE_SECTION);
        let phase_ms = section.get_u64("phase_timeout_ms", constants::DEFAULT_PHASE_TIMEOUT_MS);
        Self {
            phase_timeout: Duration::from_millis(phase_ms),
            startup_timeout: Duration::from_millis(
                section.get_u64("startup_timeout_ms", constants::DEFAULT_STARTUP_TIMEOUT_MS),
            ),
            stop_timeout: Duration::from_millis(section.get_u64("stop_timeout_ms", phase_ms)),
        }
    }
}
