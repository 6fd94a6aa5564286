use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::config::error::ConfigError;
use crate::config::source::ConfigSource;

/// Deep-merge `overlay` into `base`. Tables merge key by key; scalars and
/// lists replace whatever was there.
pub(crate) fn merge_value(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_value(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Collects sources and merges them into an immutable [`Configuration`].
#[derive(Debug, Default, Clone)]
pub struct ConfigResolver {
    sources: Vec<ConfigSource>,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: ConfigSource) -> Self {
        self.sources.push(source);
        self
    }

    pub fn add_source(&mut self, source: ConfigSource) -> &mut Self {
        self.sources.push(source);
        self
    }

    pub fn sources(&self) -> &[ConfigSource] {
        &self.sources
    }

    /// Load every source and merge them in precedence order.
    pub fn resolve(&self) -> Result<Configuration, ConfigError> {
        resolve(self.sources.clone())
    }
}

/// Merge `sources` by layer (defaults < files < environment). Inside one
/// layer, later sources win.
pub fn resolve(sources: impl IntoIterator<Item = ConfigSource>) -> Result<Configuration, ConfigError> {
    let mut sources: Vec<ConfigSource> = sources.into_iter().collect();
    // Stable: keeps the caller's order inside each layer.
    sources.sort_by_key(ConfigSource::layer);

    let mut tree = Value::Object(Map::new());
    for source in &sources {
        if let Some(table) = source.load()? {
            log::debug!("Merging configuration from {} ({} layer)", source.origin(), source.layer());
            merge_value(&mut tree, Value::Object(table));
        }
    }

    Ok(Configuration::from_value(tree))
}

/// Read-only, cheaply clonable view over the merged configuration tree.
///
/// A scoped view shares the tree with its parent; keys are looked up
/// relative to the scope. Lookups never fail: a missing or mistyped key
/// yields the caller's default.
#[derive(Clone, Default)]
pub struct Configuration {
    tree: Arc<Value>,
    base: Vec<String>,
}

impl Configuration {
    /// An empty configuration; every lookup returns its default.
    pub fn empty() -> Self {
        Self::from_value(Value::Object(Map::new()))
    }

    pub fn from_value(value: Value) -> Self {
        Self {
            tree: Arc::new(value),
            base: Vec::new(),
        }
    }

    /// View rooted at `prefix` (a dotted path relative to this view).
    pub fn scope(&self, prefix: &str) -> Configuration {
        let mut base = self.base.clone();
        base.extend(split_path(prefix).map(str::to_string));
        Configuration {
            tree: Arc::clone(&self.tree),
            base,
        }
    }

    /// Dotted path of this view's root, empty for the full tree.
    pub fn prefix(&self) -> String {
        self.base.join(".")
    }

    /// Raw value at `key`, relative to this view.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        let mut cursor = self.tree.as_ref();
        for segment in self.base.iter().map(String::as_str).chain(split_path(key)) {
            cursor = match cursor {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(cursor)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Deserialize the value at `key`.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.lookup(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => default.to_string(),
        }
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.lookup(key) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        match self.lookup(key) {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.lookup(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => true,
                "false" | "no" | "off" | "0" => false,
                _ => default,
            },
            _ => default,
        }
    }

    /// A list of strings. Accepts an array or a comma separated string.
    pub fn get_string_list(&self, key: &str, default: &[&str]) -> Vec<String> {
        match self.lookup(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => default.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Immediate child keys of the table at `key` ("" for this view's root).
    pub fn keys(&self, key: &str) -> Vec<String> {
        let node = if key.is_empty() { self.lookup_root() } else { self.lookup(key) };
        match node {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// The value tree under this view, or `Null` when the scope is absent.
    pub fn to_value(&self) -> Value {
        self.lookup_root().cloned().unwrap_or(Value::Null)
    }

    fn lookup_root(&self) -> Option<&Value> {
        self.lookup("")
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("prefix", &self.prefix())
            .field("value", &self.to_value())
            .finish()
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('.').filter(|s| !s.is_empty())
}
