//! Type-erased capability handles.
//!
//! A service exposes its API as `Arc<dyn SomeApi>`. The kernel stores it
//! erased and dependents recover it by naming the same trait object type.
use std::any::{type_name, Any};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::kernel::error::{Error, Result};

/// An erased `Arc<T>` (usually `T = dyn SomeApi`).
#[derive(Clone)]
pub struct Capability {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Capability {
    pub fn new<T>(api: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Self {
            // Arc<T> is Sized even when T is a trait object, so it can be
            // stored inside an Any.
            inner: Arc::new(api),
            type_name: type_name::<T>(),
        }
    }

    /// The wrapped `Arc<T>`, if `T` is the type the service registered.
    pub fn downcast<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.inner.downcast_ref::<Arc<T>>().cloned()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Capability").field(&self.type_name).finish()
    }
}

/// Started services' capabilities by name, in start order.
pub type CapabilityMap = IndexMap<String, Capability>;

pub(crate) fn lookup<T>(map: &CapabilityMap, service: &str) -> Result<Arc<T>>
where
    T: ?Sized + Send + Sync + 'static,
{
    let capability = map.get(service).ok_or_else(|| Error::ApiUnavailable {
        service: service.to_string(),
        reason: "service is not started or exposes no capability".to_string(),
    })?;
    capability.downcast::<T>().ok_or_else(|| Error::ApiUnavailable {
        service: service.to_string(),
        reason: format!(
            "capability is {}, not {}",
            capability.type_name(),
            type_name::<T>()
        ),
    })
}

/// What a service sees in `start`: the capabilities of its declared
/// dependencies and nothing else.
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    service: String,
    apis: CapabilityMap,
}

impl Dependencies {
    pub(crate) fn new(service: &str, declared: &[&str], started: &CapabilityMap) -> Self {
        let apis = declared
            .iter()
            .filter_map(|name| started.get(*name).map(|cap| (name.to_string(), cap.clone())))
            .collect();
        Self {
            service: service.to_string(),
            apis,
        }
    }

    /// Capability of dependency `name` as `Arc<T>`.
    pub fn api<T>(&self, name: &str) -> Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        lookup::<T>(&self.apis, name).map_err(|e| match e {
            Error::ApiUnavailable { service, reason: _ } if !self.apis.contains_key(&service) => Error::ApiUnavailable {
                reason: format!("'{}' is not a started dependency of '{}'", service, self.service),
                service,
            },
            other => other,
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.apis.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.apis.keys().map(String::as_str)
    }
}
