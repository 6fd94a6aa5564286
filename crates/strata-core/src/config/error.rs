//! # Strata Configuration Errors
//!
//! Loading is the only fallible step; once a [`Configuration`](super::Configuration)
//! exists every lookup falls back to the caller's default instead of failing.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be parsed or did not produce a key/value tree.
    #[error("Failed to load configuration from '{origin}': {reason}")]
    Load { origin: String, reason: String },

    #[error("Unsupported configuration format for path: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("I/O error reading configuration file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub(crate) fn load(origin: impl Into<String>, reason: impl ToString) -> Self {
        ConfigError::Load {
            origin: origin.into(),
            reason: reason.to_string(),
        }
    }
}
