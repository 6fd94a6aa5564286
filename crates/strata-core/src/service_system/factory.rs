use std::sync::Arc;

use crate::config::Configuration;
use crate::kernel::component::{LifecyclePhase, Service, ServiceInstance};
use crate::kernel::constants;
use crate::kernel::context::{PlatformContext, ServiceContext};
use crate::kernel::error::{Error, Result};
use crate::mq::MessageQueue;
use crate::service_system::registry::Registration;

/// Builds the implementation object for one descriptor.
///
/// Any `Fn(&ServiceContext) -> Result<Box<dyn Service>>` closure is a factory.
pub trait ServiceFactory: Send + Sync {
    fn create(&self, ctx: &ServiceContext) -> Result<Box<dyn Service>>;
}

impl<F> ServiceFactory for F
where
    F: Fn(&ServiceContext) -> Result<Box<dyn Service>> + Send + Sync,
{
    fn create(&self, ctx: &ServiceContext) -> Result<Box<dyn Service>> {
        (self)(ctx)
    }
}

/// Build the context for `registration` and run its factory.
///
/// The configuration handed to the service is scoped to `services.<name>`.
/// The queue is only attached when the descriptor asks for it.
pub(crate) fn instantiate(
    registration: &Registration,
    platform: Arc<PlatformContext>,
    configuration: &Configuration,
    queue: Option<Arc<dyn MessageQueue>>,
) -> Result<ServiceInstance> {
    let descriptor = registration.descriptor().clone();
    let name = descriptor.name().to_string();
    let scoped = configuration.scope(&format!("{}.{}", constants::SERVICES_SECTION, name));
    let queue = if descriptor.uses_message_queue() { queue } else { None };

    let ctx = ServiceContext::new(descriptor, scoped, platform, queue);
    let service = registration
        .factory()
        .create(&ctx)
        .map_err(|cause| Error::LifecyclePhaseFailed {
            service: name.clone(),
            phase: LifecyclePhase::Create,
            cause: Box::new(cause),
        })?;

    log::debug!("Created instance of service '{}'", name);
    Ok(ServiceInstance::new(ctx, service))
}
