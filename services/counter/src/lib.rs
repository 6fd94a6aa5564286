//! Named integer counters.
//!
//! Other services reach the counters through [`CounterApi`]. Increments can
//! also arrive over the platform queue on `services.counter.topic`
//! (default `counter.increment`), either as JSON `{"key": "...", "by": n}` or
//! as a bare key, which adds one.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strata_core::kernel::error::Result as KernelResult;
use strata_core::mq::SubscriptionHandle;
use strata_core::service_system::RegistryError;
use strata_core::{
    Capability, Dependencies, Message, MessageHandler, MessageQueue, Service, ServiceContext, ServiceDescriptor,
    ServiceRegistry,
};

pub const SERVICE_NAME: &str = "counter";
pub const DEFAULT_TOPIC: &str = "counter.increment";
pub const ROUTE_PREFIX: &str = "/counter";

/// Capability exposed to dependents.
pub trait CounterApi: Send + Sync {
    /// Add `by` to `key` and return the new value.
    fn increment(&self, key: &str, by: i64) -> i64;
    /// Current value; unknown keys read as zero.
    fn get(&self, key: &str) -> i64;
    fn snapshot(&self) -> BTreeMap<String, i64>;
}

/// Body of a `counter.increment` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Increment {
    pub key: String,
    #[serde(default = "one")]
    pub by: i64,
}

fn one() -> i64 {
    1
}

impl Increment {
    /// Decode a queue payload. `None` for an empty or undecodable body.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if let Ok(increment) = serde_json::from_slice::<Increment>(payload) {
            return Some(increment);
        }
        let key = std::str::from_utf8(payload).ok()?.trim();
        if key.is_empty() || key.starts_with('{') {
            return None;
        }
        Some(Increment {
            key: key.to_string(),
            by: 1,
        })
    }
}

#[derive(Default)]
pub struct Counters {
    values: Mutex<BTreeMap<String, i64>>,
}

impl Counters {
    pub fn with_initial(initial: BTreeMap<String, i64>) -> Self {
        Self {
            values: Mutex::new(initial),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, i64>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CounterApi for Counters {
    fn increment(&self, key: &str, by: i64) -> i64 {
        let mut values = self.lock();
        let value = values.entry(key.to_string()).or_insert(0);
        *value = value.saturating_add(by);
        *value
    }

    fn get(&self, key: &str) -> i64 {
        self.lock().get(key).copied().unwrap_or(0)
    }

    fn snapshot(&self) -> BTreeMap<String, i64> {
        self.lock().clone()
    }
}

#[derive(Default)]
pub struct CounterService {
    counters: Arc<Counters>,
    topic: String,
    queue: Option<Arc<dyn MessageQueue>>,
    subscription: Option<SubscriptionHandle>,
}

#[async_trait]
impl Service for CounterService {
    async fn init(&mut self, ctx: &ServiceContext) -> KernelResult<()> {
        let initial: BTreeMap<String, i64> = ctx.config().get("initial").unwrap_or_default();
        log::info!("Counter service starting with {} preset counter(s)", initial.len());
        self.counters = Arc::new(Counters::with_initial(initial));
        self.topic = ctx.config().get_string("topic", DEFAULT_TOPIC);
        self.queue = Some(ctx.require_message_queue()?);
        Ok(())
    }

    async fn start(&mut self, _deps: &Dependencies) -> KernelResult<()> {
        let Some(queue) = self.queue.as_ref() else {
            return Ok(());
        };
        let counters = Arc::clone(&self.counters);
        let handler: MessageHandler = Arc::new(move |message: &Message| match Increment::from_payload(message.payload()) {
            Some(Increment { key, by }) => {
                let value = counters.increment(&key, by);
                log::debug!("Counter '{}' is now {}", key, value);
            }
            None => log::warn!(
                "Ignoring malformed increment on '{}': {:?}",
                message.topic(),
                message.payload_str()
            ),
        });
        self.subscription = Some(queue.subscribe(&self.topic, handler).await?);
        log::info!("Counter service listening on '{}'", self.topic);
        Ok(())
    }

    async fn stop(&mut self) -> KernelResult<()> {
        if let (Some(queue), Some(subscription)) = (self.queue.as_ref(), self.subscription.take()) {
            queue.unsubscribe(&subscription).await?;
        }
        Ok(())
    }

    fn api(&self) -> Option<Capability> {
        let api: Arc<dyn CounterApi> = self.counters.clone();
        Some(Capability::new(api))
    }
}

pub fn descriptor() -> Result<ServiceDescriptor, RegistryError> {
    Ok(ServiceDescriptor::new(SERVICE_NAME, env!("CARGO_PKG_VERSION"))?
        .with_route_prefix(ROUTE_PREFIX)
        .with_message_queue())
}

/// Register the counter service with `registry`.
pub fn register(registry: &mut ServiceRegistry) -> Result<(), RegistryError> {
    registry.register(descriptor()?, |_ctx: &ServiceContext| {
        Ok(Box::new(CounterService::default()) as Box<dyn Service>)
    })
}

#[cfg(test)]
mod tests;
