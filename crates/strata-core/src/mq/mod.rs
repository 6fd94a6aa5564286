//! # Strata Message Queue
//!
//! A uniform publish/subscribe contract ([`MessageQueue`]) with two adapters:
//!
//! - [`LocalQueue`](local::LocalQueue): in-process, synchronous fan-out.
//! - [`BrokerQueue`](broker::BrokerQueue): talks to an external broker through a
//!   [`BrokerTransport`](transport::BrokerTransport), with endpoint failover,
//!   exponential reconnect backoff and a bounded publish buffer.
//!
//! The kernel picks one through [`build_adapter`](factory::build_adapter) from
//! the `platform.mq` configuration section.
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

pub mod backoff;
pub mod broker;
pub mod error;
pub mod factory;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod local;
pub mod memory;
pub mod transport;

pub use broker::BrokerQueue;
pub use error::{QueueError, TransportError};
pub use factory::{build_adapter, BrokerSettings, QueueSettings};
pub use local::LocalQueue;
pub use memory::MemoryBroker;
pub use transport::{BrokerLink, BrokerTransport, LinkSink};

/// A message as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    topic: String,
    payload: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as UTF-8, lossy.
    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Subscriber callback. Called once per message, in publish order per topic.
pub type MessageHandler = Arc<dyn Fn(&Message) + Send + Sync>;

/// Unique identifier for a subscription
pub type SubscriptionId = u64;

/// Returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    topic: String,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// What happened to a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PublishOutcome {
    /// Handed synchronously to this many local subscribers.
    Delivered { receivers: usize },
    /// Taken by the broker adapter, either sent or buffered for reconnect.
    Accepted,
}

/// Which adapter backs the platform queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterKind {
    Local,
    Broker,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterKind::Local => write!(f, "local"),
            AdapterKind::Broker => write!(f, "broker"),
        }
    }
}

impl FromStr for AdapterKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(AdapterKind::Local),
            "broker" => Ok(AdapterKind::Broker),
            _ => Err(QueueError::UnsupportedAdapter(s.to_string())),
        }
    }
}

/// Asynchronous publish/subscribe contract shared by every adapter.
#[async_trait]
pub trait MessageQueue: Send + Sync + fmt::Debug {
    fn kind(&self) -> AdapterKind;

    /// Prepare the adapter. Broker adapters start degraded instead of failing
    /// when no endpoint answers.
    async fn connect(&self) -> Result<(), QueueError>;

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<PublishOutcome, QueueError>;

    /// Register `handler` for messages published to `topic` from now on.
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionHandle, QueueError>;

    /// Remove a subscription. Unknown or already removed handles are ignored.
    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), QueueError>;

    async fn close(&self) -> Result<(), QueueError>;

    async fn subscriber_count(&self, topic: &str) -> usize;
}

/// The platform queue: one of the two adapters, chosen at startup.
#[derive(Debug)]
pub enum QueueAdapter {
    Local(LocalQueue),
    Broker(BrokerQueue),
}

#[async_trait]
impl MessageQueue for QueueAdapter {
    fn kind(&self) -> AdapterKind {
        match self {
            QueueAdapter::Local(_) => AdapterKind::Local,
            QueueAdapter::Broker(_) => AdapterKind::Broker,
        }
    }

    async fn connect(&self) -> Result<(), QueueError> {
        match self {
            QueueAdapter::Local(q) => q.connect().await,
            QueueAdapter::Broker(q) => q.connect().await,
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<PublishOutcome, QueueError> {
        match self {
            QueueAdapter::Local(q) => q.publish(topic, payload).await,
            QueueAdapter::Broker(q) => q.publish(topic, payload).await,
        }
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionHandle, QueueError> {
        match self {
            QueueAdapter::Local(q) => q.subscribe(topic, handler).await,
            QueueAdapter::Broker(q) => q.subscribe(topic, handler).await,
        }
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), QueueError> {
        match self {
            QueueAdapter::Local(q) => q.unsubscribe(handle).await,
            QueueAdapter::Broker(q) => q.unsubscribe(handle).await,
        }
    }

    async fn close(&self) -> Result<(), QueueError> {
        match self {
            QueueAdapter::Local(q) => q.close().await,
            QueueAdapter::Broker(q) => q.close().await,
        }
    }

    async fn subscriber_count(&self, topic: &str) -> usize {
        match self {
            QueueAdapter::Local(q) => q.subscriber_count(topic).await,
            QueueAdapter::Broker(q) => q.subscriber_count(topic).await,
        }
    }
}

/// Topic -> subscribers, shared by both adapters.
///
/// Publishers take a snapshot of the handlers and call them after the lock
/// is released, so handlers may subscribe or unsubscribe freely.
pub(crate) struct SubscriberTable {
    topics: RwLock<HashMap<String, Vec<(SubscriptionId, MessageHandler)>>>,
    next_id: AtomicU64,
}

impl SubscriberTable {
    pub(crate) fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a handler. The flag is true when it is the topic's first subscriber.
    pub(crate) async fn add(&self, topic: &str, handler: MessageHandler) -> (SubscriptionHandle, bool) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut topics = self.topics.write().await;
        let entry = topics.entry(topic.to_string()).or_default();
        let first = entry.is_empty();
        entry.push((id, handler));
        (
            SubscriptionHandle {
                id,
                topic: topic.to_string(),
            },
            first,
        )
    }

    /// Remove a handler. Returns `Some(true)` when the topic is now empty,
    /// `None` when the handle was unknown.
    pub(crate) async fn remove(&self, handle: &SubscriptionHandle) -> Option<bool> {
        let mut topics = self.topics.write().await;
        let entry = topics.get_mut(&handle.topic)?;
        let before = entry.len();
        entry.retain(|(id, _)| *id != handle.id);
        if entry.len() == before {
            return None;
        }
        let now_empty = entry.is_empty();
        if now_empty {
            topics.remove(&handle.topic);
        }
        Some(now_empty)
    }

    pub(crate) async fn handlers(&self, topic: &str) -> Vec<MessageHandler> {
        self.topics
            .read()
            .await
            .get(topic)
            .map(|entry| entry.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    pub(crate) async fn count(&self, topic: &str) -> usize {
        self.topics.read().await.get(topic).map_or(0, Vec::len)
    }

    /// Topics with at least one subscriber, sorted.
    pub(crate) async fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.read().await.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub(crate) async fn clear(&self) {
        self.topics.write().await.clear();
    }
}

impl fmt::Debug for SubscriberTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberTable")
            .field("next_id", &self.next_id.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Call every handler, isolating panics so one subscriber cannot starve the rest.
pub(crate) fn dispatch(handlers: &[MessageHandler], message: &Message) -> usize {
    let mut delivered = 0;
    for handler in handlers {
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(message)));
        match outcome {
            Ok(()) => delivered += 1,
            Err(_) => log::error!("Subscriber for topic '{}' panicked", message.topic()),
        }
    }
    delivered
}

#[cfg(test)]
mod tests;
