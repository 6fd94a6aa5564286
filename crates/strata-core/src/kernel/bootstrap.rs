use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;

use crate::config::Configuration;
use crate::kernel::capability::{CapabilityMap, Dependencies};
use crate::kernel::component::{LifecyclePhase, ServiceInstance, ServiceState};
use crate::kernel::constants;
use crate::kernel::context::PlatformContext;
use crate::kernel::error::{Error, Result};
use crate::kernel::handle::{teardown, PlatformHandle, RunningService};
use crate::kernel::report::{ServiceOutcome, ServiceReport, ShutdownReport, StartupReport};
use crate::kernel::settings::LifecycleSettings;
use crate::mq::{build_adapter, BrokerTransport, MessageQueue, QueueSettings};
use crate::service_system::factory::instantiate;
use crate::service_system::{ResolvedPlan, ServiceDescriptor, ServiceRegistry};

/// Blocker recorded for services that were never attempted because the
/// startup deadline passed first.
const DEADLINE_BLOCKER: &str = "<startup deadline>";

/// Drives registered services through their lifecycle.
///
/// The kernel holds no global state: everything it knows comes from the
/// [`ServiceRegistry`] it was built with and the [`Configuration`] passed to
/// [`start`](Kernel::start).
pub struct Kernel {
    registry: ServiceRegistry,
    transport: Option<Arc<dyn BrokerTransport>>,
}

/// One resolved service during startup.
struct Slot {
    descriptor: Arc<ServiceDescriptor>,
    level: usize,
    instance: Option<ServiceInstance>,
    outcome: Option<ServiceOutcome>,
}

impl Slot {
    fn name(&self) -> &str {
        self.descriptor.name()
    }

    fn is_pending(&self) -> bool {
        self.outcome.is_none() && self.instance.is_some()
    }
}

impl Kernel {
    pub fn new(registry: ServiceRegistry) -> Self {
        Self {
            registry,
            transport: None,
        }
    }

    /// Use `transport` for the broker adapter instead of choosing one from
    /// the endpoint URL scheme.
    pub fn with_broker_transport(mut self, transport: Arc<dyn BrokerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    /// Resolve `requested` without starting anything.
    pub fn plan(&self, requested: &[&str]) -> Result<ResolvedPlan> {
        Ok(self.registry.plan(requested)?)
    }

    /// Start `requested` and everything they depend on.
    ///
    /// Registry, configuration and queue adapter errors are returned before
    /// any service runs. A failing service does not fail the call: it is
    /// recorded in the report, its dependents are reported unstartable and
    /// the returned handle is not ready. Exceeding the startup deadline stops
    /// whatever already started and returns [`Error::StartupTimeout`].
    pub async fn start(&self, requested: &[&str], configuration: &Configuration) -> Result<PlatformHandle> {
        log::info!(
            "Starting {} v{} with requested services [{}]",
            constants::PLATFORM_NAME,
            constants::PLATFORM_VERSION,
            requested.join(", ")
        );

        let plan = self.registry.plan(requested)?;
        let settings = LifecycleSettings::from_config(configuration);
        let deadline = Instant::now() + settings.startup_timeout;
        // Parsed up front so a bad adapter name fails even if nothing uses the queue.
        let queue_settings = QueueSettings::from_config(configuration)?;

        let queue: Option<Arc<dyn MessageQueue>> = if plan.order.iter().any(|d| d.uses_message_queue()) {
            let adapter: Arc<dyn MessageQueue> = build_adapter(&queue_settings, self.transport.clone())?;
            self.connect_queue(&adapter, &plan, &settings, deadline).await?;
            Some(adapter)
        } else {
            None
        };
        let platform = Arc::new(PlatformContext::from_config(
            configuration,
            queue.as_ref().map(|q| q.kind()),
        ));

        log::info!(
            "Resolved {} service(s) in {} level(s): {}",
            plan.len(),
            plan.levels.len(),
            plan.names().join(" -> ")
        );

        let mut slots = self.create_instances(&plan, &platform, configuration, queue.clone());
        let mut capabilities = CapabilityMap::new();

        for level in 0..plan.levels.len() {
            for phase in [LifecyclePhase::Init, LifecyclePhase::Start] {
                block_dependents(&mut slots);

                let Some(budget) = phase_budget(&settings, deadline) else {
                    return Err(self.abort(slots, &settings, queue).await);
                };
                let clipped = budget < settings.phase_timeout;
                let timed_out = run_phase(&mut slots, level, phase, budget, &mut capabilities).await;

                if clipped && timed_out {
                    return Err(self.abort(slots, &settings, queue).await);
                }
            }
        }

        let report = build_report(&slots);
        if report.is_ready() {
            log::info!("Platform ready: {}", report.summary());
        } else {
            log::warn!("Platform degraded: {}", report.summary());
        }

        let running: Vec<RunningService> = slots
            .into_iter()
            .filter_map(|slot| {
                let level = slot.level;
                slot.instance
                    .filter(|i| i.state() == ServiceState::Started)
                    .map(|instance| RunningService { level, instance })
            })
            .collect();

        Ok(PlatformHandle::new(
            running,
            capabilities,
            report,
            platform,
            queue,
            settings.stop_timeout,
        ))
    }

    /// Stop a running platform. Equivalent to [`PlatformHandle::stop`].
    pub async fn stop(&self, handle: PlatformHandle) -> ShutdownReport {
        handle.stop().await
    }

    /// Connect the queue within what is left of the startup deadline. On
    /// expiry the adapter is closed and no service is attempted.
    async fn connect_queue(
        &self,
        adapter: &Arc<dyn MessageQueue>,
        plan: &ResolvedPlan,
        settings: &LifecycleSettings,
        deadline: Instant,
    ) -> Result<()> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, adapter.connect()).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                log::error!(
                    "Message queue connect exceeded the startup deadline of {:?}",
                    settings.startup_timeout
                );
                if let Err(e) = adapter.close().await {
                    log::error!("Error closing message queue: {}", e);
                }
                Err(Error::StartupTimeout {
                    timeout: settings.startup_timeout,
                    report: unattempted_report(plan),
                })
            }
        }
    }

    fn create_instances(
        &self,
        plan: &ResolvedPlan,
        platform: &Arc<PlatformContext>,
        configuration: &Configuration,
        queue: Option<Arc<dyn MessageQueue>>,
    ) -> Vec<Slot> {
        let levels = level_map(plan);

        plan.order
            .iter()
            .map(|descriptor| {
                let level = levels.get(descriptor.name()).copied().unwrap_or(0);
                let (instance, outcome) = match self.registry.get(descriptor.name()) {
                    Some(registration) => {
                        match instantiate(registration, Arc::clone(platform), configuration, queue.clone()) {
                            Ok(instance) => (Some(instance), None),
                            Err(e) => {
                                log::error!("Failed to create service '{}': {}", descriptor.name(), e);
                                (
                                    None,
                                    Some(ServiceOutcome::Failed {
                                        phase: LifecyclePhase::Create,
                                        cause: root_cause(&e),
                                    }),
                                )
                            }
                        }
                    }
                    // resolve_order only returns registered names.
                    None => (
                        None,
                        Some(ServiceOutcome::Failed {
                            phase: LifecyclePhase::Create,
                            cause: "descriptor vanished from registry".to_string(),
                        }),
                    ),
                };
                Slot {
                    descriptor: Arc::clone(descriptor),
                    level,
                    instance,
                    outcome,
                }
            })
            .collect()
    }

    /// Deadline passed: stop what started, close the queue, report.
    async fn abort(&self, mut slots: Vec<Slot>, settings: &LifecycleSettings, queue: Option<Arc<dyn MessageQueue>>) -> Error {
        log::error!(
            "Platform startup exceeded {:?}; stopping started services",
            settings.startup_timeout
        );
        for slot in slots.iter_mut().filter(|s| s.outcome.is_none()) {
            slot.outcome = Some(ServiceOutcome::Unstartable {
                blocked_by: DEADLINE_BLOCKER.to_string(),
            });
        }
        let report = build_report(&slots);

        let mut running: Vec<RunningService> = slots
            .into_iter()
            .filter_map(|slot| {
                let level = slot.level;
                slot.instance
                    .filter(|i| i.state() == ServiceState::Started)
                    .map(|instance| RunningService { level, instance })
            })
            .collect();
        let shutdown = teardown(&mut running, settings.stop_timeout, queue.as_ref()).await;
        log::info!("Startup aborted: {}", shutdown);

        Error::StartupTimeout {
            timeout: settings.startup_timeout,
            report,
        }
    }
}

/// Budget for the next phase: the phase timeout, shortened to what is left
/// before the deadline. `None` once the deadline has passed.
fn phase_budget(settings: &LifecycleSettings, deadline: Instant) -> Option<Duration> {
    let remaining = deadline.checked_duration_since(Instant::now())?;
    if remaining.is_zero() {
        return None;
    }
    Some(settings.phase_timeout.min(remaining))
}

/// Mark every pending service with a failed or blocked dependency as
/// unstartable, naming the service where the failure originated.
fn block_dependents(slots: &mut [Slot]) {
    let mut blockers: HashMap<String, String> = HashMap::new();
    for slot in slots.iter_mut() {
        match &slot.outcome {
            Some(ServiceOutcome::Started) => continue,
            Some(ServiceOutcome::Unstartable { blocked_by }) => {
                blockers.insert(slot.name().to_string(), blocked_by.clone());
                continue;
            }
            Some(_) => {
                blockers.insert(slot.name().to_string(), slot.name().to_string());
                continue;
            }
            None => {}
        }
        let blocked_by = slot
            .descriptor
            .dependency_names()
            .find_map(|dep| blockers.get(dep).cloned());
        if let Some(blocked_by) = blocked_by {
            log::warn!("Service '{}' is unstartable: blocked by '{}'", slot.name(), blocked_by);
            blockers.insert(slot.name().to_string(), blocked_by.clone());
            slot.outcome = Some(ServiceOutcome::Unstartable { blocked_by });
        }
    }
}

/// Run `phase` for every pending service of `level` concurrently. Returns
/// `true` if any of them timed out.
async fn run_phase(
    slots: &mut [Slot],
    level: usize,
    phase: LifecyclePhase,
    budget: Duration,
    capabilities: &mut CapabilityMap,
) -> bool {
    let snapshot = capabilities.clone();
    let batch = slots
        .iter_mut()
        .filter(|s| s.level == level && s.is_pending())
        .map(|slot| {
            let snapshot = &snapshot;
            async move {
                let Some(instance) = slot.instance.as_mut() else {
                    return;
                };
                let result = match phase {
                    LifecyclePhase::Init => instance.init(budget).await,
                    LifecyclePhase::Start => {
                        let declared: Vec<&str> = slot.descriptor.dependency_names().collect();
                        let deps = Dependencies::new(slot.descriptor.name(), &declared, snapshot);
                        instance.start(&deps, budget).await
                    }
                    LifecyclePhase::Create | LifecyclePhase::Stop => return,
                };
                match result {
                    Ok(()) if phase == LifecyclePhase::Start => {
                        slot.outcome = Some(ServiceOutcome::Started);
                    }
                    Ok(()) => {}
                    Err(Error::LifecycleTimeout { phase, timeout, .. }) => {
                        slot.outcome = Some(ServiceOutcome::TimedOut {
                            phase,
                            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        });
                    }
                    Err(e) => {
                        slot.outcome = Some(ServiceOutcome::Failed {
                            phase,
                            cause: root_cause(&e),
                        });
                    }
                }
            }
        });
    join_all(batch).await;

    let mut timed_out = false;
    for slot in slots.iter().filter(|s| s.level == level) {
        match &slot.outcome {
            Some(ServiceOutcome::Started) if phase == LifecyclePhase::Start => {
                if let Some(api) = slot.instance.as_ref().and_then(|i| i.api()) {
                    capabilities.insert(slot.name().to_string(), api);
                }
            }
            Some(ServiceOutcome::TimedOut { phase: p, .. }) if *p == phase => timed_out = true,
            _ => {}
        }
    }
    timed_out
}

/// Message of the innermost cause of a lifecycle error.
fn root_cause(error: &Error) -> String {
    match error {
        Error::LifecyclePhaseFailed { cause, .. } => root_cause(cause),
        other => other.to_string(),
    }
}

/// Depth level of each planned service, by name.
fn level_map(plan: &ResolvedPlan) -> HashMap<&str, usize> {
    plan.levels
        .iter()
        .enumerate()
        .flat_map(|(level, services)| services.iter().map(move |d| (d.name(), level)))
        .collect()
}

/// Report for a startup that ended before any service was created.
fn unattempted_report(plan: &ResolvedPlan) -> StartupReport {
    let levels = level_map(plan);
    StartupReport {
        services: plan
            .order
            .iter()
            .map(|descriptor| ServiceReport {
                name: descriptor.name().to_string(),
                version: descriptor.version().to_string(),
                level: levels.get(descriptor.name()).copied().unwrap_or(0),
                state: ServiceState::Created,
                outcome: ServiceOutcome::Unstartable {
                    blocked_by: DEADLINE_BLOCKER.to_string(),
                },
            })
            .collect(),
    }
}

fn build_report(slots: &[Slot]) -> StartupReport {
    StartupReport {
        services: slots
            .iter()
            .map(|slot| ServiceReport {
                name: slot.name().to_string(),
                version: slot.descriptor.version().to_string(),
                level: slot.level,
                state: slot
                    .instance
                    .as_ref()
                    .map(ServiceInstance::state)
                    .unwrap_or(ServiceState::Failed),
                outcome: slot.outcome.clone().unwrap_or(ServiceOutcome::Unstartable {
                    blocked_by: DEADLINE_BLOCKER.to_string(),
                }),
            })
            .collect(),
    }
}
