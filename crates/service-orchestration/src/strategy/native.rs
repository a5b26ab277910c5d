//! Native mode

use super::{LiveHandle, ModeStrategy};
use crate::Result;
use crate::descriptor::{DeploymentMode, ServiceDescriptor};
use crate::health::HealthStatus;
use crate::native::NativeLauncher;
use async_trait::async_trait;
use std::sync::Arc;

/// Delegates to a [`NativeLauncher`]
pub struct NativeStrategy {
    launcher: Arc<dyn NativeLauncher>,
}

impl NativeStrategy {
    /// Strategy over `launcher`
    pub fn new(launcher: Arc<dyn NativeLauncher>) -> Self {
        Self { launcher }
    }
}

#[async_trait]
impl ModeStrategy for NativeStrategy {
    fn mode(&self) -> DeploymentMode {
        DeploymentMode::Native
    }

    async fn start(
        &self,
        descriptor: &ServiceDescriptor,
        _url: Option<&str>,
    ) -> Result<LiveHandle> {
        let handle = self.launcher.start(descriptor).await?;
        Ok(LiveHandle::Native(handle))
    }

    async fn stop(&self, _descriptor: &ServiceDescriptor, handle: &LiveHandle) -> Result<()> {
        match handle {
            LiveHandle::Native(native) => native.stop().await,
            _ => Ok(()),
        }
    }

    async fn health_check(
        &self,
        _descriptor: &ServiceDescriptor,
        handle: &LiveHandle,
    ) -> HealthStatus {
        match handle {
            LiveHandle::Native(native) => native.probe().await,
            _ => HealthStatus::Unhealthy("not a native handle".to_string()),
        }
    }
}
