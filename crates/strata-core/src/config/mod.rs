//! # Strata Configuration
//!
//! Layered configuration: defaults, then files, then environment overrides,
//! merged into one immutable tree. Services receive a [`Configuration`] view
//! scoped to `services.<name>`.
pub mod error;
pub mod resolver;
pub mod source;

pub use error::ConfigError;
pub use resolver::{resolve, ConfigResolver, Configuration};
pub use source::{ConfigFormat, ConfigLayer, ConfigSource};
