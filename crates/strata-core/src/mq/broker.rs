use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use url::Url;

use crate::mq::factory::BrokerSettings;
use crate::mq::transport::{BrokerLink, BrokerTransport, LinkEvent, LinkEventKind, LinkSink};
use crate::mq::{
    dispatch, AdapterKind, Message, MessageHandler, MessageQueue, PublishOutcome, QueueError, SubscriberTable,
    SubscriptionHandle,
};

/// The current link, if any, and messages waiting for one.
///
/// Invariant: `pending` is empty whenever `link` is `Some`. Messages are
/// flushed under the same lock that installs a link, so a publish never
/// overtakes a buffered message.
struct LinkState {
    link: Option<Arc<dyn BrokerLink>>,
    generation: u64,
    /// Index of the endpoint to try first on the next round.
    cursor: usize,
    pending: VecDeque<Message>,
}

struct Shared {
    settings: BrokerSettings,
    transport: Arc<dyn BrokerTransport>,
    subscribers: SubscriberTable,
    state: Mutex<LinkState>,
    /// Serializes connection rounds between `connect` and the reconnect task.
    connecting: Mutex<()>,
    wake: Notify,
    next_generation: AtomicU64,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: StdMutex<Option<mpsc::UnboundedReceiver<LinkEvent>>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

/// Queue adapter backed by an external broker.
///
/// Holds one link to one endpoint at a time. When the link drops, a
/// background task walks the endpoint list with exponential backoff until a
/// new link is up, re-subscribes every live topic, then flushes messages
/// published in the meantime. While disconnected, `publish` buffers up to
/// `buffer_capacity` messages and fails with `QueueUnavailable` beyond that.
pub struct BrokerQueue {
    shared: Arc<Shared>,
}

impl BrokerQueue {
    pub fn new(settings: BrokerSettings, transport: Arc<dyn BrokerTransport>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                settings,
                transport,
                subscribers: SubscriberTable::new(),
                state: Mutex::new(LinkState {
                    link: None,
                    generation: 0,
                    cursor: 0,
                    pending: VecDeque::new(),
                }),
                connecting: Mutex::new(()),
                wake: Notify::new(),
                next_generation: AtomicU64::new(0),
                events_tx,
                events_rx: StdMutex::new(Some(events_rx)),
                tasks: StdMutex::new(Vec::new()),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn settings(&self) -> &BrokerSettings {
        &self.shared.settings
    }

    /// Messages buffered while disconnected.
    pub async fn pending_len(&self) -> usize {
        self.shared.state.lock().await.pending.len()
    }

    pub async fn is_connected(&self) -> bool {
        self.shared.state.lock().await.link.is_some()
    }

    /// Endpoint of the current link.
    pub async fn connected_endpoint(&self) -> Option<Url> {
        self.shared
            .state
            .lock()
            .await
            .link
            .as_ref()
            .map(|link| link.endpoint().clone())
    }
}

impl fmt::Debug for BrokerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerQueue")
            .field("endpoints", &self.shared.settings.urls.iter().map(Url::as_str).collect::<Vec<_>>())
            .field("transport", &self.shared.transport)
            .field("closed", &self.shared.closed.load(Ordering::SeqCst))
            .finish()
    }
}

impl Drop for BrokerQueue {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.abort_tasks();
    }
}

fn lock_ignoring_poison<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn abort_tasks(&self) {
        for task in lock_ignoring_poison(&self.tasks).drain(..) {
            task.abort();
        }
    }

    /// Try each endpoint once, starting at the cursor. Returns `true` when a
    /// link is up afterwards.
    async fn connect_round(&self) -> bool {
        let _round = self.connecting.lock().await;
        let start = {
            let state = self.state.lock().await;
            if state.link.is_some() {
                return true;
            }
            state.cursor
        };

        let urls = &self.settings.urls;
        for offset in 0..urls.len() {
            if self.is_closed() {
                return false;
            }
            let idx = (start + offset) % urls.len();
            let endpoint = &urls[idx];
            let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
            let sink = LinkSink::new(generation, self.events_tx.clone());

            match tokio::time::timeout(self.settings.connect_timeout, self.transport.connect(endpoint, sink)).await {
                Ok(Ok(link)) => {
                    if self.install(link, generation, idx).await {
                        return true;
                    }
                }
                Ok(Err(e)) => log::warn!("Broker endpoint {} unavailable: {}", endpoint, e),
                Err(_) => log::warn!(
                    "Timed out after {:?} connecting to broker endpoint {}",
                    self.settings.connect_timeout,
                    endpoint
                ),
            }
            self.state.lock().await.cursor = (idx + 1) % urls.len();
        }
        false
    }

    /// Re-subscribe live topics on `link`, flush the buffer through it, then
    /// make it the current link.
    async fn install(&self, link: Arc<dyn BrokerLink>, generation: u64, idx: usize) -> bool {
        let mut state = self.state.lock().await;
        if self.is_closed() {
            link.close().await;
            return false;
        }

        for topic in self.subscribers.topics().await {
            if let Err(e) = link.subscribe(&topic).await {
                log::warn!("Failed to re-subscribe '{}' on {}: {}", topic, link.endpoint(), e);
                link.close().await;
                return false;
            }
        }

        let mut flushed = 0usize;
        while let Some(message) = state.pending.front() {
            if let Err(e) = link.publish(message.topic(), message.payload()).await {
                log::warn!(
                    "Flush to {} interrupted after {} message(s): {}",
                    link.endpoint(),
                    flushed,
                    e
                );
                link.close().await;
                return false;
            }
            state.pending.pop_front();
            flushed += 1;
        }

        log::info!(
            "Connected to broker endpoint {} (generation {}, flushed {} buffered message(s))",
            link.endpoint(),
            generation,
            flushed
        );
        state.link = Some(link);
        state.generation = generation;
        state.cursor = idx;
        true
    }

    /// Forget the current link if it is the one that reported the loss.
    async fn link_lost(&self, generation: u64) {
        let lost = {
            let mut state = self.state.lock().await;
            if state.generation != generation {
                return;
            }
            state.link.take()
        };
        if let Some(link) = lost {
            log::warn!("Lost connection to broker endpoint {}, reconnecting", link.endpoint());
            link.close().await;
            self.wake.notify_one();
        }
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<PublishOutcome, QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }

        let mut state = self.state.lock().await;
        if let Some(link) = state.link.clone() {
            match link.publish(topic, &payload).await {
                Ok(()) => return Ok(PublishOutcome::Accepted),
                Err(e) => {
                    log::warn!("Publish to {} failed, buffering: {}", link.endpoint(), e);
                    state.link = None;
                    link.close().await;
                    self.wake.notify_one();
                }
            }
        }

        let capacity = self.settings.buffer_capacity;
        if state.pending.len() >= capacity {
            return Err(QueueError::QueueUnavailable {
                topic: topic.to_string(),
                pending: state.pending.len(),
                capacity,
            });
        }
        state.pending.push_back(Message::new(topic, payload));
        log::debug!(
            "Buffered message for '{}' while disconnected ({}/{})",
            topic,
            state.pending.len(),
            capacity
        );
        Ok(PublishOutcome::Accepted)
    }
}

async fn dispatch_loop(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<LinkEvent>) {
    while let Some(event) = events.recv().await {
        match event.kind {
            LinkEventKind::Message(message) => {
                let handlers = shared.subscribers.handlers(message.topic()).await;
                dispatch(&handlers, &message);
            }
            LinkEventKind::Closed => shared.link_lost(event.generation).await,
        }
    }
}

async fn reconnect_loop(shared: Arc<Shared>) {
    let backoff = shared.settings.backoff();
    loop {
        shared.wake.notified().await;
        let mut attempt = 0u32;
        while !shared.is_closed() {
            if shared.connect_round().await {
                break;
            }
            let delay = backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            log::debug!("No broker endpoint reachable, retrying in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
        if shared.is_closed() {
            return;
        }
    }
}

#[async_trait]
impl MessageQueue for BrokerQueue {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Broker
    }

    async fn connect(&self) -> Result<(), QueueError> {
        if self.shared.is_closed() {
            return Err(QueueError::Closed);
        }
        if self.shared.settings.urls.is_empty() {
            return Err(QueueError::NoEndpoints);
        }
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(events) = lock_ignoring_poison(&self.shared.events_rx).take() {
            let task = tokio::spawn(dispatch_loop(Arc::clone(&self.shared), events));
            lock_ignoring_poison(&self.shared.tasks).push(task);
        }

        let connected = self.shared.connect_round().await;

        let task = tokio::spawn(reconnect_loop(Arc::clone(&self.shared)));
        lock_ignoring_poison(&self.shared.tasks).push(task);

        if !connected {
            log::warn!("No broker endpoint reachable; starting degraded and retrying in the background");
            self.shared.wake.notify_one();
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<PublishOutcome, QueueError> {
        self.shared.publish(topic, payload).await
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionHandle, QueueError> {
        if self.shared.is_closed() {
            return Err(QueueError::Closed);
        }
        let (handle, first) = self.shared.subscribers.add(topic, handler).await;
        if first {
            let mut state = self.shared.state.lock().await;
            // A racing unsubscribe may have emptied the topic again.
            let live = self.shared.subscribers.count(topic).await > 0;
            if let Some(link) = state.link.clone().filter(|_| live) {
                if let Err(e) = link.subscribe(topic).await {
                    // The reconnect re-subscribes every live topic.
                    log::warn!("Subscribe '{}' on {} failed: {}", topic, link.endpoint(), e);
                    state.link = None;
                    link.close().await;
                    self.shared.wake.notify_one();
                }
            }
        }
        log::debug!("Subscription {} added on broker topic '{}'", handle.id(), topic);
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), QueueError> {
        if self.shared.subscribers.remove(handle).await != Some(true) {
            return Ok(());
        }
        let state = self.shared.state.lock().await;
        // A subscribe racing this call may already own the topic on the link.
        if self.shared.subscribers.count(handle.topic()).await > 0 {
            return Ok(());
        }
        if let Some(link) = state.link.as_ref() {
            if let Err(e) = link.unsubscribe(handle.topic()).await {
                log::debug!("Unsubscribe '{}' on {} failed: {}", handle.topic(), link.endpoint(), e);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.abort_tasks();

        let (link, dropped) = {
            let mut state = self.shared.state.lock().await;
            let dropped = state.pending.len();
            state.pending.clear();
            (state.link.take(), dropped)
        };
        if let Some(link) = link {
            link.close().await;
        }
        if dropped > 0 {
            log::warn!("Broker queue closed with {} undelivered buffered message(s)", dropped);
        }
        self.shared.subscribers.clear().await;
        log::debug!("Broker message queue closed");
        Ok(())
    }

    async fn subscriber_count(&self, topic: &str) -> usize {
        self.shared.subscribers.count(topic).await
    }
}
