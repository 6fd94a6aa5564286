use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::config::error::ConfigError;
use crate::config::resolver::merge_value;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }

    /// Parse a document into a value tree.
    pub fn parse(&self, text: &str) -> Result<Value, String> {
        match self {
            ConfigFormat::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => {
                // An empty YAML document is null; treat it as an empty table.
                let value: Value = serde_yaml::from_str(text).map_err(|e| e.to_string())?;
                Ok(if value.is_null() { Value::Object(Map::new()) } else { value })
            }
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(text).map_err(|e| e.to_string()),
        }
    }
}

/// Precedence layer of a source. Later layers override earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfigLayer {
    Defaults,
    File,
    Environment,
}

impl fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigLayer::Defaults => write!(f, "defaults"),
            ConfigLayer::File => write!(f, "file"),
            ConfigLayer::Environment => write!(f, "environment"),
        }
    }
}

/// One input to the resolver.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Built-in defaults, usually assembled with `serde_json::json!`.
    Defaults(Value),
    /// A document on disk; the format comes from the extension.
    File { path: PathBuf, required: bool },
    /// A document held in memory, layered like a file.
    Inline {
        origin: String,
        format: ConfigFormat,
        text: String,
    },
    /// `<PREFIX>__A__B=value` pairs mapped onto `a.b`.
    Environment {
        prefix: String,
        vars: Vec<(String, String)>,
    },
}

impl ConfigSource {
    pub fn defaults(value: Value) -> Self {
        ConfigSource::Defaults(value)
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        ConfigSource::File {
            path: path.into(),
            required: true,
        }
    }

    pub fn optional_file(path: impl Into<PathBuf>) -> Self {
        ConfigSource::File {
            path: path.into(),
            required: false,
        }
    }

    pub fn inline(origin: impl Into<String>, format: ConfigFormat, text: impl Into<String>) -> Self {
        ConfigSource::Inline {
            origin: origin.into(),
            format,
            text: text.into(),
        }
    }

    /// Environment overrides from an explicit list of variables.
    pub fn environment<I, K, V>(prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        ConfigSource::Environment {
            prefix: prefix.to_string(),
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// Environment overrides captured from the current process.
    pub fn process_environment(prefix: &str) -> Self {
        Self::environment(prefix, std::env::vars())
    }

    pub fn layer(&self) -> ConfigLayer {
        match self {
            ConfigSource::Defaults(_) => ConfigLayer::Defaults,
            ConfigSource::File { .. } | ConfigSource::Inline { .. } => ConfigLayer::File,
            ConfigSource::Environment { .. } => ConfigLayer::Environment,
        }
    }

    /// Human readable name used in errors and logs.
    pub fn origin(&self) -> String {
        match self {
            ConfigSource::Defaults(_) => "defaults".to_string(),
            ConfigSource::File { path, .. } => path.display().to_string(),
            ConfigSource::Inline { origin, .. } => origin.clone(),
            ConfigSource::Environment { prefix, .. } => format!("environment ({}__*)", prefix),
        }
    }

    /// Read and parse the source. `Ok(None)` means an optional file was absent.
    pub(crate) fn load(&self) -> Result<Option<Map<String, Value>>, ConfigError> {
        match self {
            ConfigSource::Defaults(value) => into_table(&self.origin(), value.clone()).map(Some),
            ConfigSource::File { path, required } => {
                if !path.exists() {
                    if *required {
                        return Err(ConfigError::load(self.origin(), "required file does not exist"));
                    }
                    log::debug!("Optional configuration file {} not found, skipping", path.display());
                    return Ok(None);
                }
                let format =
                    ConfigFormat::from_path(path).ok_or_else(|| ConfigError::UnsupportedFormat(path.clone()))?;
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                let value = format.parse(&text).map_err(|reason| ConfigError::load(self.origin(), reason))?;
                log::debug!("Loaded configuration file {}", path.display());
                into_table(&self.origin(), value).map(Some)
            }
            ConfigSource::Inline { origin, format, text } => {
                let value = format.parse(text).map_err(|reason| ConfigError::load(origin.clone(), reason))?;
                into_table(origin, value).map(Some)
            }
            ConfigSource::Environment { prefix, vars } => Ok(Some(environment_table(prefix, vars))),
        }
    }
}

/// Require a top-level object and expand dotted keys into nested tables.
fn into_table(origin: &str, value: Value) -> Result<Map<String, Value>, ConfigError> {
    match value {
        Value::Object(map) => Ok(expand_dotted(map)),
        other => Err(ConfigError::load(
            origin,
            format!("top level must be a table, found {}", value_kind(&other)),
        )),
    }
}

fn expand_dotted(map: Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        let value = match value {
            Value::Object(inner) => Value::Object(expand_dotted(inner)),
            other => other,
        };
        let path: Vec<&str> = key.split('.').filter(|s| !s.is_empty()).collect();
        insert_path(&mut out, &path, value);
    }
    out
}

/// Insert `value` at `path`, merging into any tables already there.
pub(crate) fn insert_path(table: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut cursor = table;
    for segment in parents {
        let slot = cursor
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(next) = slot else {
            return;
        };
        cursor = next;
    }
    match cursor.get_mut(*last) {
        Some(existing) => merge_value(existing, value),
        None => {
            cursor.insert(last.to_string(), value);
        }
    }
}

fn environment_table(prefix: &str, vars: &[(String, String)]) -> Map<String, Value> {
    let marker = format!("{}__", prefix);
    let mut table = Map::new();
    for (key, value) in vars {
        let Some(rest) = key.strip_prefix(&marker) else {
            continue;
        };
        let segments: Vec<String> = rest
            .split("__")
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
            .collect();
        if segments.is_empty() {
            continue;
        }
        let path: Vec<&str> = segments.iter().map(String::as_str).collect();
        log::trace!("Environment override {} -> {}", key, path.join("."));
        insert_path(&mut table, &path, Value::String(value.clone()));
    }
    table
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "table",
    }
}
