use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::kernel::capability::{Capability, Dependencies};
use crate::kernel::context::ServiceContext;
use crate::kernel::error::{Error, Result};

/// Lifecycle state of a service instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceState {
    Created,
    Initialized,
    Started,
    Stopped,
    Failed,
}

impl ServiceState {
    /// Legal moves: `Created -> Initialized -> Started -> Stopped`, plus
    /// `Failed` from any of the first three.
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Created, Initialized)
                | (Initialized, Started)
                | (Started, Stopped)
                | (Created | Initialized | Started, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceState::Stopped | ServiceState::Failed)
    }
}

/// A step of the service lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecyclePhase {
    /// Running the factory
    Create,
    Init,
    Start,
    Stop,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecyclePhase::Create => "create",
            LifecyclePhase::Init => "init",
            LifecyclePhase::Start => "start",
            LifecyclePhase::Stop => "stop",
        };
        f.write_str(name)
    }
}

/// Contract every hosted service implements.
///
/// `init` sees only the service's own context. `start` runs once every
/// declared dependency is started and receives their capabilities; this is
/// where subscriptions are usually set up. `api` is read right after a
/// successful `start` and handed to dependents.
#[async_trait]
pub trait Service: Send + Sync {
    async fn init(&mut self, _ctx: &ServiceContext) -> Result<()> {
        Ok(())
    }

    async fn start(&mut self, _deps: &Dependencies) -> Result<()> {
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// The capability dependents may call, if the service offers one.
    fn api(&self) -> Option<Capability> {
        None
    }
}

/// A service implementation plus its context and state. Owned by the kernel.
pub struct ServiceInstance {
    ctx: ServiceContext,
    service: Box<dyn Service>,
    state: ServiceState,
}

impl ServiceInstance {
    pub(crate) fn new(ctx: ServiceContext, service: Box<dyn Service>) -> Self {
        Self {
            ctx,
            service,
            state: ServiceState::Created,
        }
    }

    pub fn name(&self) -> &str {
        self.ctx.name()
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    pub(crate) fn api(&self) -> Option<Capability> {
        self.service.api()
    }

    fn check(&self, next: ServiceState) -> Result<()> {
        if self.state.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                service: self.name().to_string(),
                from: self.state,
                to: next,
            })
        }
    }

    pub(crate) async fn init(&mut self, budget: Duration) -> Result<()> {
        self.check(ServiceState::Initialized)?;
        let Self { ctx, service, state } = self;
        let outcome = tokio::time::timeout(budget, service.init(ctx)).await;
        settle(ctx.name(), state, LifecyclePhase::Init, ServiceState::Initialized, budget, outcome)
    }

    pub(crate) async fn start(&mut self, deps: &Dependencies, budget: Duration) -> Result<()> {
        self.check(ServiceState::Started)?;
        let Self { ctx, service, state } = self;
        let outcome = tokio::time::timeout(budget, service.start(deps)).await;
        settle(ctx.name(), state, LifecyclePhase::Start, ServiceState::Started, budget, outcome)
    }

    pub(crate) async fn stop(&mut self, budget: Duration) -> Result<()> {
        self.check(ServiceState::Stopped)?;
        let Self { ctx, service, state } = self;
        let outcome = tokio::time::timeout(budget, service.stop()).await;
        settle(ctx.name(), state, LifecyclePhase::Stop, ServiceState::Stopped, budget, outcome)
    }
}

fn settle(
    name: &str,
    state: &mut ServiceState,
    phase: LifecyclePhase,
    target: ServiceState,
    budget: Duration,
    outcome: std::result::Result<Result<()>, tokio::time::error::Elapsed>,
) -> Result<()> {
    match outcome {
        Ok(Ok(())) => {
            log::debug!("Service '{}' completed {}", name, phase);
            *state = target;
            Ok(())
        }
        Ok(Err(cause)) => {
            log::error!("Service '{}' failed during {}: {}", name, phase, cause);
            *state = ServiceState::Failed;
            Err(Error::LifecyclePhaseFailed {
                service: name.to_string(),
                phase,
                cause: Box::new(cause),
            })
        }
        Err(_) => {
            log::error!("Service '{}' timed out during {} after {:?}", name, phase, budget);
            *state = ServiceState::Failed;
            Err(Error::LifecycleTimeout {
                service: name.to_string(),
                phase,
                timeout: budget,
            })
        }
    }
}

impl fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("name", &self.name())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
