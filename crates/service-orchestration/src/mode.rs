//! Deployment mode resolution
//!
//! Picks the mode a service starts in: a persisted override when the
//! service's pin set admits it, otherwise the most capable mode the host
//! supports for which the descriptor carries configuration.

use crate::backend::ConfigBackend;
use crate::context::LifecycleContext;
use crate::descriptor::{DeploymentMode, ServiceDescriptor};
use crate::strategy::{ContainerStrategy, EndpointStrategy, ModeStrategy, NativeStrategy};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Host operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostPlatform {
    /// Linux
    Linux,
    /// macOS
    MacOs,
    /// Windows
    Windows,
    /// Anything else
    Other,
}

impl HostPlatform {
    /// Platform this binary was built for
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => HostPlatform::Linux,
            "macos" => HostPlatform::MacOs,
            "windows" => HostPlatform::Windows,
            _ => HostPlatform::Other,
        }
    }

    /// Supported modes, most capable first
    ///
    /// Containers on macOS run in a VM without GPU passthrough, so native
    /// ranks first there.
    pub fn capabilities(self) -> &'static [DeploymentMode] {
        use DeploymentMode::*;
        match self {
            HostPlatform::Linux | HostPlatform::Windows => &[Containerized, Native, Manual, Remote],
            HostPlatform::MacOs => &[Native, Containerized, Manual, Remote],
            HostPlatform::Other => &[Native, Manual, Remote],
        }
    }
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HostPlatform::Linux => "linux",
            HostPlatform::MacOs => "macos",
            HostPlatform::Windows => "windows",
            HostPlatform::Other => "other",
        };
        f.write_str(s)
    }
}

/// Resolves modes and hands out the matching strategy
pub struct ModeRouter {
    platform: HostPlatform,
    backend: Arc<dyn ConfigBackend>,
    container: Arc<ContainerStrategy>,
    native: Arc<NativeStrategy>,
    manual: Arc<EndpointStrategy>,
    remote: Arc<EndpointStrategy>,
}

impl ModeRouter {
    /// Router over the collaborators in `context`
    pub fn new(context: &LifecycleContext) -> Self {
        Self {
            platform: context.platform,
            backend: context.backend.clone(),
            container: Arc::new(ContainerStrategy::new(
                context.container_runtime.clone(),
                context.probe.clone(),
            )),
            native: Arc::new(NativeStrategy::new(context.native_launcher.clone())),
            manual: Arc::new(EndpointStrategy::new(
                DeploymentMode::Manual,
                context.probe.clone(),
            )),
            remote: Arc::new(EndpointStrategy::new(
                DeploymentMode::Remote,
                context.probe.clone(),
            )),
        }
    }

    /// Host platform used for the capability matrix
    pub fn platform(&self) -> HostPlatform {
        self.platform
    }

    /// Mode `descriptor` should start in
    pub async fn resolve_mode(&self, descriptor: &ServiceDescriptor) -> Result<DeploymentMode> {
        if let Some(mode) = self.backend.get_service_mode(&descriptor.name).await? {
            if descriptor.permits(mode) {
                debug!(service = %descriptor.name, %mode, "Using persisted mode override");
                return Ok(mode);
            }
            warn!(
                service = %descriptor.name,
                %mode,
                "Persisted mode is outside the service's allowed modes, ignoring"
            );
        }

        // Endpoint modes are only a fallback when there is somewhere to point at
        let has_url = self.resolve_url(descriptor).await?.is_some();
        self.platform
            .capabilities()
            .iter()
            .copied()
            .find(|&mode| {
                descriptor.permits(mode)
                    && if mode.is_managed() {
                        descriptor.has_config_for(mode)
                    } else {
                        has_url
                    }
            })
            .ok_or_else(|| Error::ModeNotAllowed {
                service: descriptor.name.clone(),
                reason: format!("no configured mode is supported on {}", self.platform),
            })
    }

    /// Endpoint for manual/remote modes: persisted first, then the descriptor default
    pub async fn resolve_url(&self, descriptor: &ServiceDescriptor) -> Result<Option<String>> {
        if let Some(url) = self.backend.get_service_url(&descriptor.name).await? {
            return Ok(Some(url));
        }
        Ok(descriptor.modes.endpoint_url.clone())
    }

    /// Strategy implementing `mode`
    pub fn strategy(&self, mode: DeploymentMode) -> Arc<dyn ModeStrategy> {
        match mode {
            DeploymentMode::Containerized => self.container.clone(),
            DeploymentMode::Native => self.native.clone(),
            DeploymentMode::Manual => self.manual.clone(),
            DeploymentMode::Remote => self.remote.clone(),
        }
    }

    /// Validate and persist a mode choice
    pub async fn persist_mode(
        &self,
        descriptor: &ServiceDescriptor,
        mode: DeploymentMode,
        url: Option<String>,
    ) -> Result<()> {
        if !descriptor.permits(mode) {
            return Err(Error::ModeNotAllowed {
                service: descriptor.name.clone(),
                reason: format!("{} is not among the allowed modes", mode),
            });
        }
        if !descriptor.has_config_for(mode) {
            return Err(Error::ModeNotAllowed {
                service: descriptor.name.clone(),
                reason: format!("no {} configuration", mode),
            });
        }
        if !mode.is_managed() && url.is_none() && descriptor.modes.endpoint_url.is_none() {
            return Err(Error::Config(format!(
                "{} mode for '{}' needs an endpoint URL",
                mode, descriptor.name
            )));
        }
        self.backend
            .set_service_config(&descriptor.name, mode, url)
            .await
    }
}
