#![cfg(test)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::Configuration;
use crate::kernel::capability::{Capability, Dependencies};
use crate::kernel::component::{LifecyclePhase, Service};
use crate::kernel::context::ServiceContext;
use crate::kernel::error::{Error, Result};
use crate::service_system::{ServiceDescriptor, ServiceRegistry};

/// Shared log of lifecycle calls, e.g. `"init:db"`, `"start:web"`, `"stop:db"`.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Names of services that reached `phase`, in call order.
    pub fn calls(&self, phase: &str) -> Vec<String> {
        let prefix = format!("{}:", phase);
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// Position of `event` in the log.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

/// What a [`MockService`] does in each phase.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub fail_in: Option<LifecyclePhase>,
    pub hang_in: Option<LifecyclePhase>,
    /// Added to every `init` and `start`.
    pub delay: Duration,
}

impl Behavior {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failing(phase: LifecyclePhase) -> Self {
        Self {
            fail_in: Some(phase),
            ..Self::default()
        }
    }

    pub fn hanging(phase: LifecyclePhase) -> Self {
        Self {
            hang_in: Some(phase),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

/// Capability every mock exposes.
pub trait EchoApi: Send + Sync {
    fn owner(&self) -> String;
    fn echo(&self, input: &str) -> String;
    /// `greeting` from the service's scoped configuration, if set.
    fn greeting(&self) -> Option<String>;
}

struct Echo {
    owner: String,
    greeting: Option<String>,
}

impl EchoApi for Echo {
    fn owner(&self) -> String {
        self.owner.clone()
    }

    fn greeting(&self) -> Option<String> {
        self.greeting.clone()
    }

    fn echo(&self, input: &str) -> String {
        format!("{}:{}", self.owner, input)
    }
}

pub struct MockService {
    name: String,
    behavior: Behavior,
    recorder: Recorder,
    greeting: Option<String>,
}

impl MockService {
    pub fn new(name: &str, behavior: Behavior, recorder: Recorder) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            recorder,
            greeting: None,
        }
    }

    async fn step(&self, phase: LifecyclePhase) -> Result<()> {
        if self.behavior.hang_in == Some(phase) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if phase != LifecyclePhase::Stop && !self.behavior.delay.is_zero() {
            tokio::time::sleep(self.behavior.delay).await;
        }
        if self.behavior.fail_in == Some(phase) {
            return Err(Error::Service(format!("{} refused to {}", self.name, phase)));
        }
        self.recorder.record(format!("{}:{}", phase, self.name));
        Ok(())
    }
}

#[async_trait]
impl Service for MockService {
    async fn init(&mut self, ctx: &ServiceContext) -> Result<()> {
        self.greeting = ctx.config().get("greeting");
        self.step(LifecyclePhase::Init).await
    }

    async fn start(&mut self, deps: &Dependencies) -> Result<()> {
        // Every dependency must already be reachable through its capability.
        for dep in deps.names() {
            let api = deps.api::<dyn EchoApi>(dep)?;
            if api.owner() != dep {
                return Err(Error::Service(format!("capability of {} claims to be {}", dep, api.owner())));
            }
        }
        self.step(LifecyclePhase::Start).await
    }

    async fn stop(&mut self) -> Result<()> {
        self.step(LifecyclePhase::Stop).await
    }

    fn api(&self) -> Option<Capability> {
        let api: Arc<dyn EchoApi> = Arc::new(Echo {
            owner: self.name.clone(),
            greeting: self.greeting.clone(),
        });
        Some(Capability::new(api))
    }
}

pub fn mock_descriptor(name: &str, deps: &[&str]) -> ServiceDescriptor {
    deps.iter()
        .fold(ServiceDescriptor::new(name, "1.0.0").unwrap(), |d, dep| d.depends_on(dep))
}

/// Register a [`MockService`] named `name`.
pub fn register_mock(registry: &mut ServiceRegistry, name: &str, deps: &[&str], behavior: Behavior, recorder: &Recorder) {
    register_descriptor(registry, mock_descriptor(name, deps), behavior, recorder);
}

pub fn register_descriptor(
    registry: &mut ServiceRegistry,
    descriptor: ServiceDescriptor,
    behavior: Behavior,
    recorder: &Recorder,
) {
    let recorder = recorder.clone();
    let name = descriptor.name().to_string();
    registry
        .register(descriptor, move |_ctx: &ServiceContext| {
            Ok(Box::new(MockService::new(&name, behavior.clone(), recorder.clone())) as Box<dyn Service>)
        })
        .unwrap();
}

/// Short timeouts so failure tests finish quickly.
pub fn fast_config() -> Configuration {
    with_fast_lifecycle(json!({}))
}

/// `extra` merged over the short lifecycle timeouts.
pub fn with_fast_lifecycle(extra: serde_json::Value) -> Configuration {
    let mut tree = json!({
        "platform": {
            "node_id": "test-node",
            "lifecycle": {
                "phase_timeout_ms": 300,
                "startup_timeout_ms": 5000,
                "stop_timeout_ms": 300
            }
        }
    });
    crate::config::resolver::merge_value(&mut tree, extra);
    Configuration::from_value(tree)
}

/// Poll `check` until it holds, for up to three seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
