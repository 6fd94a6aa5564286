#![cfg(test)]

use serde_json::json;

use crate::config::{ConfigFormat, ConfigResolver, ConfigSource};
use crate::kernel::constants::ENV_PREFIX;
use crate::kernel::{Kernel, LifecyclePhase, ServiceOutcome};
use crate::service_system::ServiceRegistry;
use crate::tests::integration::common::{fast_config, register_mock, Behavior, EchoApi, Recorder};

fn platform(recorder: &Recorder) -> Kernel {
    let mut registry = ServiceRegistry::new();
    register_mock(&mut registry, "storage", &[], Behavior::ok(), recorder);
    register_mock(&mut registry, "counter", &["storage"], Behavior::ok(), recorder);
    register_mock(&mut registry, "search", &["storage"], Behavior::ok(), recorder);
    register_mock(&mut registry, "push", &["counter"], Behavior::ok(), recorder);
    Kernel::new(registry)
}

#[tokio::test]
async fn test_layered_config_reaches_services() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("strata.json");
    std::fs::write(
        &path,
        r#"{
            "platform": { "lifecycle": { "phase_timeout_ms": 500 } },
            "services": {
                "counter": { "greeting": "from file" },
                "push": { "greeting": "from file" }
            }
        }"#,
    )
    .unwrap();

    let config = ConfigResolver::new()
        .with_source(ConfigSource::defaults(json!({
            "platform": { "node_id": "defaults-node" },
            "services": { "storage": { "greeting": "from defaults" } }
        })))
        .with_source(ConfigSource::file(&path))
        .with_source(ConfigSource::environment(
            ENV_PREFIX,
            [
                ("STRATA__SERVICES__PUSH__GREETING", "from env"),
                ("STRATA__PLATFORM__NODE_ID", "edge-7"),
                ("UNRELATED__SERVICES__PUSH__GREETING", "ignored"),
            ],
        ))
        .resolve()
        .unwrap();

    let recorder = Recorder::new();
    let handle = platform(&recorder).start(&["push"], &config).await.unwrap();
    assert!(handle.is_ready());
    assert_eq!(handle.context().node_id(), "edge-7");

    let greeting = |name: &str| handle.api::<dyn EchoApi>(name).unwrap().greeting();
    assert_eq!(greeting("storage").as_deref(), Some("from defaults"));
    assert_eq!(greeting("counter").as_deref(), Some("from file"));
    assert_eq!(greeting("push").as_deref(), Some("from env"));

    // search was not requested and nothing needs it.
    assert!(handle.report().get("search").is_none());
    handle.stop().await;
}

#[cfg(feature = "yaml-config")]
#[tokio::test]
async fn test_inline_yaml_config() {
    let yaml = r#"
platform:
  node_id: yaml-node
  lifecycle:
    phase_timeout_ms: 250
services:
  storage:
    greeting: hi
"#;
    let config = ConfigResolver::new()
        .with_source(ConfigSource::inline("inline.yaml", ConfigFormat::Yaml, yaml))
        .resolve()
        .unwrap();

    let recorder = Recorder::new();
    let handle = platform(&recorder).start(&["storage"], &config).await.unwrap();
    assert_eq!(handle.context().node_id(), "yaml-node");
    assert_eq!(
        handle.api::<dyn EchoApi>("storage").unwrap().greeting().as_deref(),
        Some("hi")
    );
    handle.stop().await;
}

#[tokio::test]
async fn test_partial_platform_keeps_serving() {
    let recorder = Recorder::new();
    let mut registry = ServiceRegistry::new();
    register_mock(&mut registry, "storage", &[], Behavior::ok(), &recorder);
    register_mock(&mut registry, "counter", &["storage"], Behavior::failing(LifecyclePhase::Start), &recorder);
    register_mock(&mut registry, "search", &["storage"], Behavior::ok(), &recorder);
    register_mock(&mut registry, "push", &["counter"], Behavior::ok(), &recorder);
    let kernel = Kernel::new(registry);

    let config = fast_config();
    let handle = kernel.start(&["push", "search"], &config).await.unwrap();
    assert!(!handle.is_ready());
    assert_eq!(handle.running(), vec!["storage", "search"]);
    assert_eq!(
        handle.report().summary(),
        "2/4 services started; not started: counter, push"
    );
    assert!(matches!(
        handle.report().outcome("push"),
        Some(ServiceOutcome::Unstartable { blocked_by }) if blocked_by == "counter"
    ));

    // The healthy branch stays usable.
    let search = handle.api::<dyn EchoApi>("search").unwrap();
    assert_eq!(search.echo("q"), "search:q");

    let shutdown = handle.stop().await;
    assert_eq!(shutdown.stopped, vec!["search", "storage"]);
}

#[tokio::test]
async fn test_plan_without_starting() {
    let recorder = Recorder::new();
    let kernel = platform(&recorder);
    let plan = kernel.plan(&["push", "search"]).unwrap();
    assert_eq!(plan.names(), vec!["storage", "counter", "search", "push"]);
    assert_eq!(plan.levels.len(), 3);
    assert!(recorder.events().is_empty());
}
