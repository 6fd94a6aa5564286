use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::mq::{
    dispatch, AdapterKind, Message, MessageHandler, MessageQueue, PublishOutcome, QueueError, SubscriberTable,
    SubscriptionHandle,
};

/// In-process queue. `publish` calls every current subscriber of the topic
/// before it returns; nothing is stored, so late subscribers see nothing
/// published before they joined.
#[derive(Debug)]
pub struct LocalQueue {
    subscribers: SubscriberTable,
    closed: AtomicBool,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self {
            subscribers: SubscriberTable::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for LocalQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for LocalQueue {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Local
    }

    async fn connect(&self) -> Result<(), QueueError> {
        self.ensure_open()
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<PublishOutcome, QueueError> {
        self.ensure_open()?;
        let handlers = self.subscribers.handlers(topic).await;
        let message = Message::new(topic, payload);
        let receivers = dispatch(&handlers, &message);
        log::trace!("Local publish on '{}' reached {} subscriber(s)", topic, receivers);
        Ok(PublishOutcome::Delivered { receivers })
    }

    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<SubscriptionHandle, QueueError> {
        self.ensure_open()?;
        let (handle, _) = self.subscribers.add(topic, handler).await;
        log::debug!("Subscription {} added on local topic '{}'", handle.id(), topic);
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), QueueError> {
        if self.subscribers.remove(handle).await.is_none() {
            log::trace!("Subscription {} was not active", handle.id());
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.subscribers.clear().await;
            log::debug!("Local message queue closed");
        }
        Ok(())
    }

    async fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers.count(topic).await
    }
}
