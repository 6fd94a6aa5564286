use std::time::Duration;

use serde_json::json;

use crate::config::Configuration;
use crate::mq::{build_adapter, AdapterKind, BrokerSettings, MessageQueue, QueueError, QueueSettings};

#[test]
fn test_default_is_local() {
    let settings = QueueSettings::from_config(&Configuration::empty()).unwrap();
    assert_eq!(settings.adapter, AdapterKind::Local);
}

#[test]
fn test_unknown_adapter_rejected() {
    let config = Configuration::from_value(json!({"platform": {"mq": {"adapter": "carrier-pigeon"}}}));
    let err = QueueSettings::from_config(&config).unwrap_err();
    assert_eq!(err, QueueError::UnsupportedAdapter("carrier-pigeon".to_string()));
}

#[test]
fn test_broker_settings_from_config() {
    let config = Configuration::from_value(json!({
        "platform": {"mq": {
            "adapter": "broker",
            "broker": {
                "urls": ["memory://primary", "memory://secondary"],
                "buffer_capacity": 8,
                "backoff_initial_ms": 5,
                "backoff_max_ms": 40,
                "connect_timeout_ms": 250
            }
        }}
    }));
    let settings = QueueSettings::from_config(&config).unwrap();
    assert_eq!(settings.adapter, AdapterKind::Broker);

    let broker = settings.broker;
    assert_eq!(broker.urls.len(), 2);
    assert_eq!(broker.urls[1].host_str(), Some("secondary"));
    assert_eq!(broker.buffer_capacity, 8);
    assert_eq!(broker.backoff_initial, Duration::from_millis(5));
    assert_eq!(broker.backoff_max, Duration::from_millis(40));
    assert_eq!(broker.connect_timeout, Duration::from_millis(250));
}

#[test]
fn test_broker_defaults() {
    let settings = BrokerSettings::default();
    assert_eq!(settings.buffer_capacity, 1024);
    assert_eq!(settings.backoff_initial, Duration::from_millis(100));
    assert_eq!(settings.backoff_max, Duration::from_millis(30_000));
    assert_eq!(settings.connect_timeout, Duration::from_millis(5_000));
}

#[test]
fn test_invalid_endpoint() {
    let err = BrokerSettings::with_urls(["not a url"]).unwrap_err();
    assert!(matches!(err, QueueError::InvalidEndpoint { .. }));
}

#[test]
fn test_broker_without_endpoints() {
    let settings = QueueSettings {
        adapter: AdapterKind::Broker,
        broker: BrokerSettings::default(),
    };
    assert_eq!(build_adapter(&settings, None).unwrap_err(), QueueError::NoEndpoints);
}

#[test]
fn test_unknown_scheme_has_no_transport() {
    let settings = QueueSettings {
        adapter: AdapterKind::Broker,
        broker: BrokerSettings::with_urls(["amqp://localhost:5672"]).unwrap(),
    };
    let err = build_adapter(&settings, None).unwrap_err();
    assert_eq!(
        err,
        QueueError::TransportUnavailable {
            scheme: "amqp".to_string()
        }
    );
}

#[test]
fn test_mixed_schemes_rejected() {
    let settings = QueueSettings {
        adapter: AdapterKind::Broker,
        broker: BrokerSettings::with_urls(["memory://a", "kafka://b:9092"]).unwrap(),
    };
    assert!(matches!(
        build_adapter(&settings, None).unwrap_err(),
        QueueError::InvalidEndpoint { .. }
    ));
}

#[tokio::test]
async fn test_memory_scheme_builds_broker_adapter() {
    let settings = QueueSettings {
        adapter: AdapterKind::Broker,
        broker: BrokerSettings::with_urls(["memory://local"]).unwrap(),
    };
    let adapter = build_adapter(&settings, None).unwrap();
    assert_eq!(adapter.kind(), AdapterKind::Broker);
    adapter.connect().await.unwrap();
    adapter.close().await.unwrap();
}
