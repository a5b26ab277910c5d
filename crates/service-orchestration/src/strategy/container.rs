//! Containerized mode

use super::{LiveHandle, ModeStrategy};
use crate::container::{ContainerCreateSpec, ContainerRuntime};
use crate::descriptor::{DeploymentMode, ServiceDescriptor};
use crate::health::{DEFAULT_PROBE_TIMEOUT, HealthStatus, HttpProbe, check_http};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs services through a [`ContainerRuntime`]
pub struct ContainerStrategy {
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn HttpProbe>,
}

impl ContainerStrategy {
    /// Strategy over `runtime`, probing health URLs with `probe`
    pub fn new(runtime: Arc<dyn ContainerRuntime>, probe: Arc<dyn HttpProbe>) -> Self {
        Self { runtime, probe }
    }
}

#[async_trait]
impl ModeStrategy for ContainerStrategy {
    fn mode(&self) -> DeploymentMode {
        DeploymentMode::Containerized
    }

    async fn start(
        &self,
        descriptor: &ServiceDescriptor,
        _url: Option<&str>,
    ) -> Result<LiveHandle> {
        let config = descriptor.modes.containerized.as_ref().ok_or_else(|| {
            Error::Config(format!("'{}' has no container configuration", descriptor.name))
        })?;
        let name = descriptor.container_name();

        let existing = self
            .runtime
            .list_containers(true)
            .await?
            .into_iter()
            .find(|c| c.name == name);

        if let Some(existing) = existing {
            if existing.is_running() && existing.image == config.image {
                info!(service = %descriptor.name, container = %name, "Reusing running container");
                return Ok(LiveHandle::Container { id: existing.id });
            }
            info!(
                service = %descriptor.name,
                container = %name,
                state = %existing.state,
                "Replacing existing container"
            );
            self.runtime.remove_container(&existing.id).await?;
        }

        if !self.runtime.image_exists(&config.image).await? {
            info!(service = %descriptor.name, image = %config.image, "Pulling image");
            self.runtime.pull_image(&config.image).await?;
        }

        let spec = ContainerCreateSpec {
            name,
            image: config.image.clone(),
            ports: config.ports.clone(),
            env: config.env.clone(),
            volumes: config.volumes.clone(),
            network: config.network.clone(),
        };
        let id = self.runtime.create_container(&spec).await?;
        self.runtime.start_container(&id).await?;

        info!(service = %descriptor.name, container = %spec.name, "Container started");
        Ok(LiveHandle::Container { id })
    }

    async fn stop(&self, descriptor: &ServiceDescriptor, handle: &LiveHandle) -> Result<()> {
        let LiveHandle::Container { id } = handle else {
            warn!(service = %descriptor.name, "Container strategy given a foreign handle");
            return Ok(());
        };
        self.runtime.stop_container(id).await
    }

    async fn health_check(
        &self,
        descriptor: &ServiceDescriptor,
        handle: &LiveHandle,
    ) -> HealthStatus {
        let LiveHandle::Container { id } = handle else {
            return HealthStatus::Unhealthy("not a container handle".to_string());
        };

        let inspect = match self.runtime.inspect(id).await {
            Ok(inspect) => inspect,
            Err(e) => return HealthStatus::Unhealthy(e.to_string()),
        };
        if !inspect.running {
            let code = inspect
                .exit_code
                .map_or_else(|| "unknown".to_string(), |c| c.to_string());
            return HealthStatus::Unhealthy(format!("container exited with code {}", code));
        }
        if !inspect.is_healthy() {
            let health = inspect.health.unwrap_or_default();
            return HealthStatus::Unhealthy(format!("container health is {}", health));
        }

        let health_url = descriptor
            .modes
            .containerized
            .as_ref()
            .and_then(|c| c.health_url.as_deref());
        match health_url {
            Some(url) => check_http(self.probe.as_ref(), url, DEFAULT_PROBE_TIMEOUT).await,
            None => HealthStatus::Healthy,
        }
    }
}
