use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::kernel::capability::{lookup, CapabilityMap};
use crate::kernel::component::ServiceInstance;
use crate::kernel::context::PlatformContext;
use crate::kernel::error::{Error, Result};
use crate::kernel::report::{ShutdownReport, StartupReport, StopFailure};
use crate::mq::MessageQueue;

/// A started service and the depth level it was started in.
pub(crate) struct RunningService {
    pub(crate) level: usize,
    pub(crate) instance: ServiceInstance,
}

/// Stop `running` in reverse level order, each level concurrently, then close
/// the queue. Failures are collected; every service is attempted.
pub(crate) async fn teardown(
    running: &mut Vec<RunningService>,
    stop_timeout: Duration,
    queue: Option<&Arc<dyn MessageQueue>>,
) -> ShutdownReport {
    let mut report = ShutdownReport::default();

    let mut by_level: BTreeMap<usize, Vec<&mut ServiceInstance>> = BTreeMap::new();
    for service in running.iter_mut() {
        by_level.entry(service.level).or_default().push(&mut service.instance);
    }

    for (level, instances) in by_level.into_iter().rev() {
        log::debug!("Stopping {} service(s) at level {}", instances.len(), level);
        let results = join_all(instances.into_iter().map(|instance| async move {
            let name = instance.name().to_string();
            (name, instance.stop(stop_timeout).await)
        }))
        .await;

        for (name, result) in results {
            match result {
                Ok(()) => {
                    log::info!("Stopped service '{}'", name);
                    report.stopped.push(name);
                }
                Err(e) => {
                    log::error!("Error stopping service '{}': {}", name, e);
                    report.failures.push(StopFailure {
                        name,
                        cause: e.to_string(),
                    });
                }
            }
        }
    }
    running.clear();

    if let Some(queue) = queue {
        if let Err(e) = queue.close().await {
            log::error!("Error closing message queue: {}", e);
            report.queue_error = Some(e.to_string());
        }
    }
    report
}

/// A running platform: the started services' capabilities, the startup
/// report and the means to stop everything.
///
/// Dropping a handle without calling [`stop`](PlatformHandle::stop) leaves
/// services unstopped and logs a warning.
pub struct PlatformHandle {
    running: Vec<RunningService>,
    services: CapabilityMap,
    report: StartupReport,
    platform: Arc<PlatformContext>,
    queue: Option<Arc<dyn MessageQueue>>,
    stop_timeout: Duration,
    stopped: bool,
}

impl PlatformHandle {
    pub(crate) fn new(
        running: Vec<RunningService>,
        services: CapabilityMap,
        report: StartupReport,
        platform: Arc<PlatformContext>,
        queue: Option<Arc<dyn MessageQueue>>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            running,
            services,
            report,
            platform,
            queue,
            stop_timeout,
            stopped: false,
        }
    }

    /// Capabilities of every started service that exposes one.
    pub fn services(&self) -> &CapabilityMap {
        &self.services
    }

    /// Capability of `service` as `Arc<T>`.
    pub fn api<T>(&self, service: &str) -> Result<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        lookup::<T>(&self.services, service)
    }

    pub fn report(&self) -> &StartupReport {
        &self.report
    }

    pub fn is_ready(&self) -> bool {
        self.report.is_ready()
    }

    /// `Err(NotReady)` unless every resolved service started.
    pub fn require_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(Error::NotReady {
                report: self.report.clone(),
            })
        }
    }

    pub fn context(&self) -> &PlatformContext {
        &self.platform
    }

    pub fn message_queue(&self) -> Option<&Arc<dyn MessageQueue>> {
        self.queue.as_ref()
    }

    /// Names of the services currently running, in start order.
    pub fn running(&self) -> Vec<&str> {
        self.running.iter().map(|r| r.instance.name()).collect()
    }

    /// `(name, prefix)` for each started service that declares a route prefix.
    pub fn route_prefixes(&self) -> Vec<(String, String)> {
        self.running
            .iter()
            .filter_map(|r| {
                let descriptor = r.instance.context().descriptor();
                descriptor
                    .route_prefix()
                    .map(|p| (descriptor.name().to_string(), p.to_string()))
            })
            .collect()
    }

    /// Stop every started service in reverse dependency order and close the
    /// queue. Best effort: failures end up in the report.
    pub async fn stop(mut self) -> ShutdownReport {
        log::info!("Shutting down {} service(s)...", self.running.len());
        self.stopped = true;
        let report = teardown(&mut self.running, self.stop_timeout, self.queue.as_ref()).await;
        log::info!("Shutdown complete: {}", report);
        report
    }
}

impl fmt::Debug for PlatformHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformHandle")
            .field("running", &self.running())
            .field("ready", &self.is_ready())
            .field("node_id", &self.platform.node_id())
            .finish_non_exhaustive()
    }
}

impl Drop for PlatformHandle {
    fn drop(&mut self) {
        if !self.stopped && !self.running.is_empty() {
            log::warn!(
                "PlatformHandle dropped without stop(); {} service(s) were never stopped",
                self.running.len()
            );
        }
    }
}
