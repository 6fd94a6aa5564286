//! Push notifications.
//!
//! [`PushApi::notify`] publishes a JSON [`Notification`] on
//! `services.push.topic` (default `push.outbound`) and bumps the `push.sent`
//! counter of the counter service.
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strata_core::kernel::error::Result as KernelResult;
use strata_core::service_system::RegistryError;
use strata_core::{
    Capability, Dependencies, KernelError, MessageQueue, PublishOutcome, Service, ServiceContext, ServiceDescriptor,
    ServiceRegistry, VersionRange,
};
use strata_counter::CounterApi;

pub const SERVICE_NAME: &str = "push";
pub const DEFAULT_TOPIC: &str = "push.outbound";
pub const ROUTE_PREFIX: &str = "/push";
/// Counter bumped once per published notification.
pub const SENT_COUNTER: &str = "push.sent";
const COUNTER_REQUIREMENT: &str = "^0.1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub user: String,
    pub message: String,
}

#[async_trait]
pub trait PushApi: Send + Sync {
    async fn notify(&self, user: &str, message: &str) -> KernelResult<PublishOutcome>;
    /// Notifications published so far, as recorded by the counter service.
    fn sent(&self) -> i64;
}

struct Pusher {
    topic: String,
    queue: Arc<dyn MessageQueue>,
    counter: Arc<dyn CounterApi>,
}

#[async_trait]
impl PushApi for Pusher {
    async fn notify(&self, user: &str, message: &str) -> KernelResult<PublishOutcome> {
        if user.trim().is_empty() {
            return Err(KernelError::Service("push notification needs a user".to_string()));
        }
        let body = Notification {
            user: user.to_string(),
            message: message.to_string(),
        };
        let payload = serde_json::to_vec(&body)
            .map_err(|e| KernelError::Service(format!("cannot encode notification: {}", e)))?;
        let outcome = self.queue.publish(&self.topic, payload).await?;
        self.counter.increment(SENT_COUNTER, 1);
        log::debug!("Queued notification for '{}' on '{}'", user, self.topic);
        Ok(outcome)
    }

    fn sent(&self) -> i64 {
        self.counter.get(SENT_COUNTER)
    }
}

#[derive(Default)]
pub struct PushService {
    topic: String,
    queue: Option<Arc<dyn MessageQueue>>,
    pusher: Option<Arc<Pusher>>,
}

#[async_trait]
impl Service for PushService {
    async fn init(&mut self, ctx: &ServiceContext) -> KernelResult<()> {
        self.topic = ctx.config().get_string("topic", DEFAULT_TOPIC);
        self.queue = Some(ctx.require_message_queue()?);
        Ok(())
    }

    async fn start(&mut self, deps: &Dependencies) -> KernelResult<()> {
        let counter = deps.api::<dyn CounterApi>(strata_counter::SERVICE_NAME)?;
        let queue = self
            .queue
            .clone()
            .ok_or_else(|| KernelError::Service("push service started before init".to_string()))?;
        self.pusher = Some(Arc::new(Pusher {
            topic: self.topic.clone(),
            queue,
            counter,
        }));
        log::info!("Push service publishing to '{}'", self.topic);
        Ok(())
    }

    async fn stop(&mut self) -> KernelResult<()> {
        self.pusher = None;
        Ok(())
    }

    fn api(&self) -> Option<Capability> {
        self.pusher.clone().map(|pusher| {
            let api: Arc<dyn PushApi> = pusher;
            Capability::new(api)
        })
    }
}

pub fn descriptor() -> Result<ServiceDescriptor, RegistryError> {
    let counter = VersionRange::from_constraint(COUNTER_REQUIREMENT)?;
    Ok(ServiceDescriptor::new(SERVICE_NAME, env!("CARGO_PKG_VERSION"))?
        .depends_on_version(strata_counter::SERVICE_NAME, counter)
        .with_route_prefix(ROUTE_PREFIX)
        .with_message_queue())
}

/// Register the push service with `registry`. The counter service must be
/// registered as well for `push` to resolve.
pub fn register(registry: &mut ServiceRegistry) -> Result<(), RegistryError> {
    registry.register(descriptor()?, |_ctx: &ServiceContext| {
        Ok(Box::new(PushService::default()) as Box<dyn Service>)
    })
}
