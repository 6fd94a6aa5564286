use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;
use uuid::Uuid;

use crate::config::Configuration;
use crate::kernel::constants;
use crate::kernel::error::{Error, Result};
use crate::mq::{AdapterKind, MessageQueue};
use crate::service_system::ServiceDescriptor;

/// Process-wide identifiers shared by every service.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformContext {
    instance_id: Uuid,
    node_id: String,
    started_at: SystemTime,
    queue_kind: Option<AdapterKind>,
}

impl PlatformContext {
    pub fn new(node_id: impl Into<String>, queue_kind: Option<AdapterKind>) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            node_id: node_id.into(),
            started_at: SystemTime::now(),
            queue_kind,
        }
    }

    /// Build from `platform.node_id`.
    pub fn from_config(configuration: &Configuration, queue_kind: Option<AdapterKind>) -> Self {
        Self::new(
            configuration.get_string(constants::NODE_ID_KEY, constants::DEFAULT_NODE_ID),
            queue_kind,
        )
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// The adapter wired into the platform, `None` when no service uses one.
    pub fn queue_kind(&self) -> Option<AdapterKind> {
        self.queue_kind
    }
}

/// Everything a service receives at creation and in `init`.
#[derive(Clone)]
pub struct ServiceContext {
    descriptor: Arc<ServiceDescriptor>,
    config: Configuration,
    platform: Arc<PlatformContext>,
    queue: Option<Arc<dyn MessageQueue>>,
}

impl ServiceContext {
    pub fn new(
        descriptor: Arc<ServiceDescriptor>,
        config: Configuration,
        platform: Arc<PlatformContext>,
        queue: Option<Arc<dyn MessageQueue>>,
    ) -> Self {
        Self {
            descriptor,
            config,
            platform,
            queue,
        }
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Configuration scoped to `services.<name>`.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn platform(&self) -> &PlatformContext {
        &self.platform
    }

    /// The platform queue; present only if the descriptor asked for it.
    pub fn message_queue(&self) -> Option<&Arc<dyn MessageQueue>> {
        self.queue.as_ref()
    }

    pub fn require_message_queue(&self) -> Result<Arc<dyn MessageQueue>> {
        self.queue.clone().ok_or_else(|| {
            Error::Service(format!(
                "service '{}' needs the message queue but its descriptor does not declare it",
                self.name()
            ))
        })
    }
}

impl fmt::Debug for ServiceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceContext")
            .field("service", &self.descriptor.name())
            .field("config_prefix", &self.config.prefix())
            .field("node_id", &self.platform.node_id())
            .field("has_queue", &self.queue.is_some())
            .finish()
    }
}
