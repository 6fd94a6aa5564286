//! Platform-wide names and defaults.

/// Platform name used in logs
pub const PLATFORM_NAME: &str = "Strata";

/// Platform version from Cargo.toml
pub const PLATFORM_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix of environment overrides: `STRATA__A__B=v` sets `a.b`
pub const ENV_PREFIX: &str = "STRATA";

/// Root of per-service configuration sections (`services.<name>.*`)
pub const SERVICES_SECTION: &str = "services";

/// Lifecycle settings section
pub const LIFECYCLE_SECTION: &str = "platform.lifecycle";

/// Node identifier key
pub const NODE_ID_KEY: &str = "platform.node_id";

pub const DEFAULT_NODE_ID: &str = "strata";

pub const DEFAULT_PHASE_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 120_000;
