//! In-process broker for `memory://` endpoints.
//!
//! Several adapters can share one [`MemoryBroker`]; a message published on any
//! link is delivered to every link subscribed to its topic. The broker can be
//! taken offline, or individual endpoint hosts made unreachable, to exercise
//! the adapter's reconnect path.
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use url::Url;

use crate::mq::error::TransportError;
use crate::mq::transport::{BrokerLink, BrokerTransport, LinkSink};
use crate::mq::Message;

/// Most recent published messages kept for inspection.
const PUBLISHED_HISTORY: usize = 4096;

#[derive(Default)]
struct BrokerState {
    offline: bool,
    unreachable_hosts: HashSet<String>,
    links: Vec<LinkEntry>,
    published: VecDeque<(Url, Message)>,
    connect_attempts: Vec<Url>,
}

struct LinkEntry {
    id: u64,
    subscriptions: HashSet<String>,
    sink: LinkSink,
    alive: Arc<AtomicBool>,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    next_link: Arc<AtomicU64>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Accept (`true`) or refuse (`false`) new connections on every endpoint.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().offline = !reachable;
    }

    /// Accept or refuse new connections for one endpoint host.
    pub fn set_endpoint_reachable(&self, host: &str, reachable: bool) {
        let mut state = self.lock();
        if reachable {
            state.unreachable_hosts.remove(host);
        } else {
            state.unreachable_hosts.insert(host.to_string());
        }
    }

    /// Sever every open link. Each link reports itself closed to its adapter.
    pub fn drop_connections(&self) {
        let links = std::mem::take(&mut self.lock().links);
        for link in links {
            link.alive.store(false, Ordering::SeqCst);
            link.sink.closed();
        }
    }

    /// Take the broker down: refuse new connections and sever open ones.
    pub fn go_offline(&self) {
        self.set_reachable(false);
        self.drop_connections();
    }

    pub fn go_online(&self) {
        self.set_reachable(true);
    }

    pub fn open_links(&self) -> usize {
        self.lock().links.len()
    }

    /// Messages accepted by the broker, oldest first, with the endpoint that took them.
    pub fn published(&self) -> Vec<(Url, Message)> {
        self.lock().published.iter().cloned().collect()
    }

    /// Every endpoint a transport tried to connect to, in order.
    pub fn connect_attempts(&self) -> Vec<Url> {
        self.lock().connect_attempts.clone()
    }

    fn accept(&self, link_id: u64, endpoint: &Url, message: Message) -> Result<(), TransportError> {
        let mut state = self.lock();
        let Some(sender) = state.links.iter().find(|l| l.id == link_id) else {
            return Err(TransportError::ConnectionLost {
                endpoint: endpoint.to_string(),
            });
        };
        if !sender.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost {
                endpoint: endpoint.to_string(),
            });
        }

        for link in state.links.iter().filter(|l| l.subscriptions.contains(message.topic())) {
            link.sink.deliver(message.clone());
        }
        state.published.push_back((endpoint.clone(), message));
        if state.published.len() > PUBLISHED_HISTORY {
            state.published.pop_front();
        }
        Ok(())
    }

    fn update_subscription(&self, link_id: u64, endpoint: &Url, topic: &str, add: bool) -> Result<(), TransportError> {
        let mut state = self.lock();
        let link = state
            .links
            .iter_mut()
            .find(|l| l.id == link_id)
            .ok_or_else(|| TransportError::ConnectionLost {
                endpoint: endpoint.to_string(),
            })?;
        if add {
            link.subscriptions.insert(topic.to_string());
        } else {
            link.subscriptions.remove(topic);
        }
        Ok(())
    }

    fn release(&self, link_id: u64) {
        self.lock().links.retain(|l| l.id != link_id);
    }
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryBroker")
            .field("offline", &state.offline)
            .field("unreachable_hosts", &state.unreachable_hosts)
            .field("open_links", &state.links.len())
            .finish()
    }
}

#[async_trait]
impl BrokerTransport for MemoryBroker {
    async fn connect(&self, endpoint: &Url, sink: LinkSink) -> Result<Arc<dyn BrokerLink>, TransportError> {
        let mut state = self.lock();
        state.connect_attempts.push(endpoint.clone());

        let host = endpoint.host_str().unwrap_or_default();
        if state.offline || state.unreachable_hosts.contains(host) {
            return Err(TransportError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: "memory broker is not accepting connections".to_string(),
            });
        }

        let id = self.next_link.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        state.links.push(LinkEntry {
            id,
            subscriptions: HashSet::new(),
            sink,
            alive: Arc::clone(&alive),
        });
        log::debug!("Memory broker accepted link {} on {}", id, endpoint);

        Ok(Arc::new(MemoryLink {
            broker: self.clone(),
            id,
            endpoint: endpoint.clone(),
            alive,
        }))
    }
}

struct MemoryLink {
    broker: MemoryBroker,
    id: u64,
    endpoint: Url,
    alive: Arc<AtomicBool>,
}

impl fmt::Debug for MemoryLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLink")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint.as_str())
            .field("alive", &self.alive.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl BrokerLink for MemoryLink {
    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.broker
            .accept(self.id, &self.endpoint, Message::new(topic, payload.to_vec()))
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.broker.update_subscription(self.id, &self.endpoint, topic, true)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.broker.update_subscription(self.id, &self.endpoint, topic, false)
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.broker.release(self.id);
    }
}
