#![cfg(test)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use crate::config::Configuration;
use crate::kernel::capability::Dependencies;
use crate::kernel::component::{LifecyclePhase, Service};
use crate::kernel::context::ServiceContext;
use crate::kernel::error::{Error, Result};
use crate::kernel::{Kernel, ServiceOutcome};
use url::Url;

use crate::mq::{
    AdapterKind, BrokerLink, BrokerTransport, LinkSink, MemoryBroker, Message, MessageHandler, MessageQueue,
    PublishOutcome, QueueError, SubscriptionHandle, TransportError,
};
use crate::service_system::{ServiceDescriptor, ServiceRegistry};
use crate::tests::integration::common::{eventually, with_fast_lifecycle};

type Inbox = Arc<Mutex<Vec<String>>>;

/// Subscribes to `services.<name>.topic` on start and collects payloads.
struct Listener {
    inbox: Inbox,
    topic: String,
    queue: Option<Arc<dyn MessageQueue>>,
    subscription: Option<SubscriptionHandle>,
}

#[async_trait]
impl Service for Listener {
    async fn init(&mut self, ctx: &ServiceContext) -> Result<()> {
        self.queue = Some(ctx.require_message_queue()?);
        self.topic = ctx.config().get_string("topic", "events");
        Ok(())
    }

    async fn start(&mut self, _deps: &Dependencies) -> Result<()> {
        let queue = self.queue.clone().ok_or_else(|| Error::Service("not initialized".into()))?;
        let inbox = Arc::clone(&self.inbox);
        let handler: MessageHandler = Arc::new(move |m: &Message| {
            inbox.lock().unwrap().push(m.payload_str().into_owned());
        });
        self.subscription = Some(queue.subscribe(&self.topic, handler).await?);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if let (Some(queue), Some(subscription)) = (&self.queue, self.subscription.take()) {
            queue.unsubscribe(&subscription).await?;
        }
        Ok(())
    }
}

fn listener_kernel(inbox: &Inbox, declare_queue: bool) -> Kernel {
    let mut descriptor = ServiceDescriptor::new("listener", "1.0.0").unwrap();
    if declare_queue {
        descriptor = descriptor.with_message_queue();
    }
    let inbox = Arc::clone(inbox);
    let mut registry = ServiceRegistry::new();
    registry
        .register(descriptor, move |_ctx: &ServiceContext| {
            Ok(Box::new(Listener {
                inbox: Arc::clone(&inbox),
                topic: String::new(),
                queue: None,
                subscription: None,
            }) as Box<dyn Service>)
        })
        .unwrap();
    Kernel::new(registry)
}

fn broker_config(urls: &[&str]) -> Configuration {
    with_fast_lifecycle(json!({
        "platform": { "mq": {
            "adapter": "broker",
            "broker": {
                "urls": urls,
                "backoff_initial_ms": 5,
                "backoff_max_ms": 20,
                "connect_timeout_ms": 200
            }
        } },
        "services": { "listener": { "topic": "orders" } }
    }))
}

#[tokio::test]
async fn test_local_queue_round_trip() {
    let inbox = Inbox::default();
    let config = with_fast_lifecycle(json!({ "services": { "listener": { "topic": "orders" } } }));
    let handle = listener_kernel(&inbox, true).start(&["listener"], &config).await.unwrap();
    assert!(handle.is_ready());

    let queue = Arc::clone(handle.message_queue().unwrap());
    assert_eq!(queue.kind(), AdapterKind::Local);
    assert_eq!(
        queue.publish("orders", b"first".to_vec()).await.unwrap(),
        PublishOutcome::Delivered { receivers: 1 }
    );
    assert_eq!(
        queue.publish("other", b"ignored".to_vec()).await.unwrap(),
        PublishOutcome::Delivered { receivers: 0 }
    );
    assert_eq!(*inbox.lock().unwrap(), vec!["first"]);

    let shutdown = handle.stop().await;
    assert!(shutdown.is_clean());
    assert_eq!(queue.subscriber_count("orders").await, 0);
    assert_eq!(queue.publish("orders", b"late".to_vec()).await, Err(QueueError::Closed));
}

#[tokio::test]
async fn test_undeclared_queue_fails_init() {
    let inbox = Inbox::default();
    let handle = listener_kernel(&inbox, false)
        .start(&["listener"], &with_fast_lifecycle(json!({})))
        .await
        .unwrap();

    match handle.report().outcome("listener") {
        Some(ServiceOutcome::Failed { phase, cause }) => {
            assert_eq!(*phase, LifecyclePhase::Init);
            assert!(cause.contains("does not declare"), "{}", cause);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    handle.stop().await;
}

#[tokio::test]
async fn test_broker_queue_through_kernel() {
    let broker = MemoryBroker::new();
    let inbox = Inbox::default();
    let kernel = listener_kernel(&inbox, true).with_broker_transport(Arc::new(broker.clone()));

    let handle = kernel.start(&["listener"], &broker_config(&["memory://primary"])).await.unwrap();
    assert!(handle.is_ready());
    assert_eq!(handle.context().queue_kind(), Some(AdapterKind::Broker));
    assert_eq!(broker.open_links(), 1);

    let queue = Arc::clone(handle.message_queue().unwrap());
    assert_eq!(
        queue.publish("orders", b"o-1".to_vec()).await.unwrap(),
        PublishOutcome::Accepted
    );
    eventually("broker delivery", || {
        let inbox = Arc::clone(&inbox);
        async move { inbox.lock().unwrap().len() == 1 }
    })
    .await;
    assert_eq!(broker.published().len(), 1);
    assert_eq!(broker.published()[0].0.as_str(), "memory://primary");

    handle.stop().await;
    assert_eq!(broker.open_links(), 0);
}

#[tokio::test]
async fn test_broker_unreachable_at_startup_catches_up() {
    let broker = MemoryBroker::new();
    broker.set_reachable(false);
    let inbox = Inbox::default();
    let kernel = listener_kernel(&inbox, true).with_broker_transport(Arc::new(broker.clone()));

    // Startup does not wait for the broker.
    let handle = kernel.start(&["listener"], &broker_config(&["memory://primary"])).await.unwrap();
    assert!(handle.is_ready());

    let queue = Arc::clone(handle.message_queue().unwrap());
    queue.publish("orders", b"buffered".to_vec()).await.unwrap();
    assert!(broker.published().is_empty());

    broker.go_online();
    eventually("buffered message delivered after reconnect", || {
        let inbox = Arc::clone(&inbox);
        async move { *inbox.lock().unwrap() == vec!["buffered".to_string()] }
    })
    .await;

    handle.stop().await;
}

#[tokio::test]
async fn test_memory_scheme_selects_builtin_transport() {
    let inbox = Inbox::default();
    let handle = listener_kernel(&inbox, true)
        .start(&["listener"], &broker_config(&["memory://local"]))
        .await
        .unwrap();
    assert!(handle.is_ready());

    let queue = Arc::clone(handle.message_queue().unwrap());
    queue.publish("orders", b"self".to_vec()).await.unwrap();
    eventually("delivery through the built-in memory broker", || {
        let inbox = Arc::clone(&inbox);
        async move { inbox.lock().unwrap().len() == 1 }
    })
    .await;
    handle.stop().await;
}

#[tokio::test]
async fn test_broker_without_endpoints_fails_start() {
    let inbox = Inbox::default();
    let err = listener_kernel(&inbox, true)
        .start(&["listener"], &broker_config(&[]))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Queue(QueueError::NoEndpoints)));
}

/// Transport whose connection attempts never complete.
#[derive(Debug)]
struct StalledTransport;

#[async_trait]
impl BrokerTransport for StalledTransport {
    async fn connect(
        &self,
        _endpoint: &Url,
        _sink: LinkSink,
    ) -> std::result::Result<Arc<dyn BrokerLink>, TransportError> {
        std::future::pending().await
    }
}

#[tokio::test]
async fn test_broker_connect_counts_against_startup_deadline() {
    let inbox = Inbox::default();
    let kernel = listener_kernel(&inbox, true).with_broker_transport(Arc::new(StalledTransport));
    let config = with_fast_lifecycle(json!({
        "platform": {
            "lifecycle": { "startup_timeout_ms": 200 },
            "mq": {
                "adapter": "broker",
                "broker": {
                    "urls": ["memory://first", "memory://second"],
                    "connect_timeout_ms": 1000
                }
            }
        }
    }));

    let began = Instant::now();
    let err = kernel.start(&["listener"], &config).await.unwrap_err();
    assert!(began.elapsed() < Duration::from_millis(900), "took {:?}", began.elapsed());

    match err {
        Error::StartupTimeout { timeout, report } => {
            assert_eq!(timeout, Duration::from_millis(200));
            assert!(!report.is_ready());
            assert!(matches!(
                report.outcome("listener"),
                Some(ServiceOutcome::Unstartable { .. })
            ));
        }
        other => panic!("expected StartupTimeout, got {other}"),
    }
    assert!(inbox.lock().unwrap().is_empty());
}
