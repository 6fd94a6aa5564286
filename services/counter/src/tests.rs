use std::sync::Arc;

use serde_json::json;
use strata_core::{Configuration, Kernel, PublishOutcome, ServiceRegistry};

use super::*;

fn kernel() -> Kernel {
    let mut registry = ServiceRegistry::new();
    register(&mut registry).unwrap();
    Kernel::new(registry)
}

#[test]
fn test_increment_payloads() {
    assert_eq!(
        Increment::from_payload(br#"{"key": "hits", "by": 5}"#),
        Some(Increment { key: "hits".into(), by: 5 })
    );
    assert_eq!(
        Increment::from_payload(br#"{"key": "hits"}"#),
        Some(Increment { key: "hits".into(), by: 1 })
    );
    assert_eq!(
        Increment::from_payload(b" hits \n"),
        Some(Increment { key: "hits".into(), by: 1 })
    );
    assert_eq!(Increment::from_payload(b""), None);
    assert_eq!(Increment::from_payload(br#"{"by": 2}"#), None);
    assert_eq!(Increment::from_payload(&[0xff, 0xfe]), None);
}

#[test]
fn test_counters() {
    let counters = Counters::default();
    assert_eq!(counters.get("a"), 0);
    assert_eq!(counters.increment("a", 2), 2);
    assert_eq!(counters.increment("a", -5), -3);
    assert_eq!(counters.increment("b", i64::MAX), i64::MAX);
    assert_eq!(counters.increment("b", 1), i64::MAX);
    assert_eq!(counters.snapshot().len(), 2);
}

#[test]
fn test_descriptor() {
    let descriptor = descriptor().unwrap();
    assert_eq!(descriptor.name(), "counter");
    assert_eq!(descriptor.route_prefix(), Some("/counter"));
    assert!(descriptor.uses_message_queue());
    assert!(descriptor.dependencies().is_empty());
}

#[tokio::test]
async fn test_counts_queue_messages() {
    let config = Configuration::from_value(json!({
        "services": { "counter": { "initial": { "boot": 3 }, "topic": "hits" } }
    }));
    let handle = kernel().start(&["counter"], &config).await.unwrap();
    handle.require_ready().unwrap();

    let counter = handle.api::<dyn CounterApi>("counter").unwrap();
    assert_eq!(counter.get("boot"), 3);

    let queue = Arc::clone(handle.message_queue().unwrap());
    assert_eq!(
        queue.publish("hits", b"page".to_vec()).await.unwrap(),
        PublishOutcome::Delivered { receivers: 1 }
    );
    queue
        .publish("hits", serde_json::to_vec(&json!({"key": "page", "by": 4})).unwrap())
        .await
        .unwrap();
    queue.publish("hits", b"   ".to_vec()).await.unwrap();
    // The default topic is not subscribed when another one is configured.
    queue.publish(DEFAULT_TOPIC, b"page".to_vec()).await.unwrap();

    assert_eq!(counter.get("page"), 5);
    assert_eq!(counter.snapshot().len(), 2);

    let report = handle.stop().await;
    assert!(report.is_clean());
    assert_eq!(queue.subscriber_count("hits").await, 0);

    // The capability outlives the platform, but nothing feeds it anymore.
    assert_eq!(queue.publish("hits", b"page".to_vec()).await, Err(strata_core::QueueError::Closed));
    assert_eq!(counter.get("page"), 5);
}
