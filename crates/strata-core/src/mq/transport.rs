//! Seam between the broker adapter and a concrete broker client library.
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::mq::error::TransportError;
use crate::mq::Message;

/// Something that happened on a link, tagged with the link's generation so
/// the adapter can ignore events from links it already replaced.
#[derive(Debug)]
pub(crate) struct LinkEvent {
    pub(crate) generation: u64,
    pub(crate) kind: LinkEventKind,
}

#[derive(Debug)]
pub(crate) enum LinkEventKind {
    Message(Message),
    Closed,
}

/// Where a link reports inbound messages and its own loss.
#[derive(Debug, Clone)]
pub struct LinkSink {
    generation: u64,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl LinkSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self { generation, tx }
    }

    /// Hand an inbound message to the adapter. Returns `false` once the
    /// adapter is gone.
    pub fn deliver(&self, message: Message) -> bool {
        self.tx
            .send(LinkEvent {
                generation: self.generation,
                kind: LinkEventKind::Message(message),
            })
            .is_ok()
    }

    /// Report that the link dropped.
    pub fn closed(&self) {
        let _ = self.tx.send(LinkEvent {
            generation: self.generation,
            kind: LinkEventKind::Closed,
        });
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Opens links to broker endpoints.
#[async_trait]
pub trait BrokerTransport: Send + Sync + Debug {
    /// Establish a link to `endpoint`. Inbound traffic for topics later
    /// subscribed on the link goes to `sink`.
    async fn connect(&self, endpoint: &Url, sink: LinkSink) -> Result<Arc<dyn BrokerLink>, TransportError>;
}

/// A live connection to one broker endpoint.
#[async_trait]
pub trait BrokerLink: Send + Sync + Debug {
    fn endpoint(&self) -> &Url;

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError>;

    async fn close(&self);
}
