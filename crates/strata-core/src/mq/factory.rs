use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::config::Configuration;
use crate::mq::backoff::Backoff;
use crate::mq::broker::BrokerQueue;
use crate::mq::error::QueueError;
use crate::mq::local::LocalQueue;
use crate::mq::memory::MemoryBroker;
use crate::mq::transport::BrokerTransport;
use crate::mq::{AdapterKind, QueueAdapter};

pub const ADAPTER_KEY: &str = "platform.mq.adapter";
pub const BROKER_SECTION: &str = "platform.mq.broker";

pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;
pub const DEFAULT_BACKOFF_INITIAL_MS: u64 = 100;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Settings for the broker adapter (`platform.mq.broker.*`).
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerSettings {
    pub urls: Vec<Url>,
    pub buffer_capacity: usize,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub connect_timeout: Duration,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            backoff_initial: Duration::from_millis(DEFAULT_BACKOFF_INITIAL_MS),
            backoff_max: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

impl BrokerSettings {
    pub fn with_urls<I, S>(urls: I) -> Result<Self, QueueError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls = urls
            .into_iter()
            .map(|u| parse_endpoint(u.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            urls,
            ..Self::default()
        })
    }

    /// Read the section rooted at `platform.mq.broker`.
    pub fn from_config(config: &Configuration) -> Result<Self, QueueError> {
        let section = config.scope(BROKER_SECTION);
        let mut settings = Self::with_urls(section.get_string_list("urls", &[]))?;
        settings.buffer_capacity =
            usize::try_from(section.get_u64("buffer_capacity", DEFAULT_BUFFER_CAPACITY as u64))
                .unwrap_or(DEFAULT_BUFFER_CAPACITY);
        settings.backoff_initial =
            Duration::from_millis(section.get_u64("backoff_initial_ms", DEFAULT_BACKOFF_INITIAL_MS));
        settings.backoff_max = Duration::from_millis(section.get_u64("backoff_max_ms", DEFAULT_BACKOFF_MAX_MS));
        settings.connect_timeout =
            Duration::from_millis(section.get_u64("connect_timeout_ms", DEFAULT_CONNECT_TIMEOUT_MS));
        Ok(settings)
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_initial, self.backoff_max)
    }
}

/// Which adapter to build and how.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    pub adapter: AdapterKind,
    pub broker: BrokerSettings,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            adapter: AdapterKind::Local,
            broker: BrokerSettings::default(),
        }
    }
}

impl QueueSettings {
    /// Read `platform.mq.*`. An unknown adapter name is an error; there is no
    /// fallback to the local adapter. Broker settings are only parsed when the
    /// broker adapter is selected.
    pub fn from_config(config: &Configuration) -> Result<Self, QueueError> {
        let adapter: AdapterKind = config.get_string(ADAPTER_KEY, "local").parse()?;
        let broker = match adapter {
            AdapterKind::Broker => BrokerSettings::from_config(config)?,
            AdapterKind::Local => BrokerSettings::default(),
        };
        Ok(Self { adapter, broker })
    }
}

fn parse_endpoint(raw: &str) -> Result<Url, QueueError> {
    Url::parse(raw.trim()).map_err(|e| QueueError::InvalidEndpoint {
        endpoint: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Transport for the scheme shared by every endpoint URL.
pub fn transport_for(urls: &[Url]) -> Result<Arc<dyn BrokerTransport>, QueueError> {
    let first = urls.first().ok_or(QueueError::NoEndpoints)?;
    let scheme = first.scheme();
    if let Some(other) = urls.iter().find(|u| u.scheme() != scheme) {
        return Err(QueueError::InvalidEndpoint {
            endpoint: other.to_string(),
            reason: format!("all endpoints must use the '{}' scheme", scheme),
        });
    }

    match scheme {
        "memory" => Ok(Arc::new(MemoryBroker::new())),
        #[cfg(feature = "kafka")]
        "kafka" => Ok(Arc::new(crate::mq::kafka::KafkaTransport::new())),
        other => Err(QueueError::TransportUnavailable {
            scheme: other.to_string(),
        }),
    }
}

/// Build (but do not connect) the adapter described by `settings`.
///
/// `transport` overrides the scheme-based transport choice for the broker
/// adapter; it is ignored for the local adapter.
pub fn build_adapter(
    settings: &QueueSettings,
    transport: Option<Arc<dyn BrokerTransport>>,
) -> Result<Arc<QueueAdapter>, QueueError> {
    match settings.adapter {
        AdapterKind::Local => {
            log::info!("Using local message queue adapter");
            Ok(Arc::new(QueueAdapter::Local(LocalQueue::new())))
        }
        AdapterKind::Broker => {
            if settings.broker.urls.is_empty() {
                return Err(QueueError::NoEndpoints);
            }
            let transport = match transport {
                Some(t) => t,
                None => transport_for(&settings.broker.urls)?,
            };
            log::info!(
                "Using broker message queue adapter with {} endpoint(s)",
                settings.broker.urls.len()
            );
            Ok(Arc::new(QueueAdapter::Broker(BrokerQueue::new(
                settings.broker.clone(),
                transport,
            ))))
        }
    }
}
