//! Kafka transport for `kafka://host:port` endpoints.
//!
//! One producer and one consumer per link. The consumer's subscription is
//! replaced wholesale whenever the topic set changes, which is how rdkafka
//! expresses incremental subscribe/unsubscribe.
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::Message as _;
use tokio::task::JoinHandle;
use url::Url;

use crate::mq::error::TransportError;
use crate::mq::transport::{BrokerLink, BrokerTransport, LinkSink};
use crate::mq::Message;

const METADATA_TIMEOUT: Duration = Duration::from_secs(3);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct KafkaTransport {
    group_id: String,
}

impl KafkaTransport {
    /// Fresh consumer group per process: every instance receives every message.
    pub fn new() -> Self {
        Self {
            group_id: format!("strata-{}", uuid::Uuid::new_v4()),
        }
    }
}

impl Default for KafkaTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn bootstrap_servers(endpoint: &Url) -> Result<String, TransportError> {
    let host = endpoint.host_str().ok_or_else(|| TransportError::Unreachable {
        endpoint: endpoint.to_string(),
        reason: "missing host".to_string(),
    })?;
    Ok(format!("{}:{}", host, endpoint.port().unwrap_or(9092)))
}

fn protocol(e: impl fmt::Display) -> TransportError {
    TransportError::Protocol(e.to_string())
}

#[async_trait]
impl BrokerTransport for KafkaTransport {
    async fn connect(&self, endpoint: &Url, sink: LinkSink) -> Result<Arc<dyn BrokerLink>, TransportError> {
        let servers = bootstrap_servers(endpoint)?;

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &servers)
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(protocol)?;

        // Metadata is fetched synchronously by librdkafka.
        let probe = producer.clone();
        tokio::task::spawn_blocking(move || probe.client().fetch_metadata(None, Timeout::After(METADATA_TIMEOUT)))
            .await
            .map_err(protocol)?
            .map_err(|e| TransportError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &servers)
            .set("group.id", &self.group_id)
            .set("enable.auto.commit", "true")
            .set("auto.offset.reset", "latest")
            .create()
            .map_err(protocol)?;
        let consumer = Arc::new(consumer);

        let reader = {
            let consumer = Arc::clone(&consumer);
            let sink = sink.clone();
            tokio::spawn(async move {
                loop {
                    match consumer.recv().await {
                        Ok(record) => {
                            let message = Message::new(record.topic(), record.payload().unwrap_or_default().to_vec());
                            if !sink.deliver(message) {
                                break;
                            }
                        }
                        Err(e) => {
                            log::warn!("Kafka consumer error: {}", e);
                            sink.closed();
                            break;
                        }
                    }
                }
            })
        };

        log::debug!("Kafka link established to {}", servers);
        Ok(Arc::new(KafkaLink {
            endpoint: endpoint.clone(),
            producer,
            consumer,
            topics: Mutex::new(BTreeSet::new()),
            reader: Mutex::new(Some(reader)),
        }))
    }
}

struct KafkaLink {
    endpoint: Url,
    producer: FutureProducer,
    consumer: Arc<StreamConsumer>,
    topics: Mutex<BTreeSet<String>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl KafkaLink {
    fn resubscribe(&self, topics: &BTreeSet<String>) -> Result<(), TransportError> {
        if topics.is_empty() {
            self.consumer.unsubscribe();
            return Ok(());
        }
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer.subscribe(&names).map_err(protocol)
    }
}

impl fmt::Debug for KafkaLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KafkaLink").field("endpoint", &self.endpoint.as_str()).finish()
    }
}

#[async_trait]
impl BrokerLink for KafkaLink {
    fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(topic).payload(payload);
        self.producer
            .send(record, Timeout::After(SEND_TIMEOUT))
            .await
            .map(|_| ())
            .map_err(|(e, _)| TransportError::ConnectionLost {
                endpoint: format!("{} ({})", self.endpoint, e),
            })
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let topics = {
            let mut topics = self.topics.lock().unwrap_or_else(|p| p.into_inner());
            if !topics.insert(topic.to_string()) {
                return Ok(());
            }
            topics.clone()
        };
        self.resubscribe(&topics)
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let topics = {
            let mut topics = self.topics.lock().unwrap_or_else(|p| p.into_inner());
            if !topics.remove(topic) {
                return Ok(());
            }
            topics.clone()
        };
        self.resubscribe(&topics)
    }

    async fn close(&self) {
        if let Some(reader) = self.reader.lock().unwrap_or_else(|p| p.into_inner()).take() {
            reader.abort();
        }
        self.consumer.unsubscribe();
    }
}
