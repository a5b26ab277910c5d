//! Per-mode execution strategies
//!
//! Every deployment mode implements the same three operations. The manager
//! never inspects what a strategy holds; it stores the returned
//! [`LiveHandle`] and gives it back on `stop` and `health_check`.

mod container;
mod endpoint;
mod native;

pub use container::ContainerStrategy;
pub use endpoint::EndpointStrategy;
pub use native::NativeStrategy;

use crate::Result;
use crate::descriptor::{DeploymentMode, ServiceDescriptor};
use crate::health::HealthStatus;
use crate::native::NativeHandle;
use async_trait::async_trait;
use std::fmt;

/// Resources a strategy holds for a started service
pub enum LiveHandle {
    /// A container managed through the container runtime
    Container {
        /// Container id
        id: String,
    },
    /// A process owned by a native launcher
    Native(Box<dyn NativeHandle>),
    /// An external endpoint the engine only probes
    Endpoint {
        /// Base URL
        url: String,
    },
}

impl LiveHandle {
    /// Endpoint URL for manual/remote handles
    pub fn url(&self) -> Option<&str> {
        match self {
            LiveHandle::Endpoint { url } => Some(url),
            _ => None,
        }
    }
}

impl fmt::Debug for LiveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiveHandle::Container { id } => f.debug_struct("Container").field("id", id).finish(),
            LiveHandle::Native(_) => f.write_str("Native(..)"),
            LiveHandle::Endpoint { url } => f.debug_struct("Endpoint").field("url", url).finish(),
        }
    }
}

/// Start, stop and probe a service in one deployment mode
#[async_trait]
pub trait ModeStrategy: Send + Sync {
    /// Mode this strategy implements
    fn mode(&self) -> DeploymentMode;

    /// Start `descriptor`; `url` is the endpoint for manual/remote modes
    async fn start(&self, descriptor: &ServiceDescriptor, url: Option<&str>)
    -> Result<LiveHandle>;

    /// Stop what `start` produced
    async fn stop(&self, descriptor: &ServiceDescriptor, handle: &LiveHandle) -> Result<()>;

    /// Probe the service once
    async fn health_check(&self, descriptor: &ServiceDescriptor, handle: &LiveHandle)
    -> HealthStatus;
}
