//! Manual and remote modes
//!
//! The service runs somewhere the engine does not control. Starting only
//! records the endpoint; stopping does nothing; health is an HTTP probe.

use super::{LiveHandle, ModeStrategy};
use crate::descriptor::{DeploymentMode, ServiceDescriptor};
use crate::health::{DEFAULT_PROBE_TIMEOUT, HealthStatus, HttpProbe, check_http, join_url};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Reachability-only strategy for externally managed endpoints
pub struct EndpointStrategy {
    mode: DeploymentMode,
    probe: Arc<dyn HttpProbe>,
}

impl EndpointStrategy {
    /// Strategy for `mode` (manual or remote)
    pub fn new(mode: DeploymentMode, probe: Arc<dyn HttpProbe>) -> Self {
        Self { mode, probe }
    }
}

#[async_trait]
impl ModeStrategy for EndpointStrategy {
    fn mode(&self) -> DeploymentMode {
        self.mode
    }

    async fn start(&self, descriptor: &ServiceDescriptor, url: Option<&str>) -> Result<LiveHandle> {
        let url = url.ok_or_else(|| {
            Error::Config(format!(
                "{} mode for '{}' has no endpoint URL",
                self.mode, descriptor.name
            ))
        })?;
        debug!(service = %descriptor.name, mode = %self.mode, url, "Attaching to endpoint");
        Ok(LiveHandle::Endpoint {
            url: url.to_string(),
        })
    }

    async fn stop(&self, descriptor: &ServiceDescriptor, _handle: &LiveHandle) -> Result<()> {
        debug!(service = %descriptor.name, mode = %self.mode, "Detaching from endpoint");
        Ok(())
    }

    async fn health_check(
        &self,
        descriptor: &ServiceDescriptor,
        handle: &LiveHandle,
    ) -> HealthStatus {
        let Some(url) = handle.url() else {
            return HealthStatus::Unhealthy("not an endpoint handle".to_string());
        };
        let target = join_url(url, &descriptor.modes.health_path);
        check_http(self.probe.as_ref(), &target, DEFAULT_PROBE_TIMEOUT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::lock::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingProbe {
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl HttpProbe for RecordingProbe {
        async fn get(&self, url: &str, _timeout: Duration) -> Result<u16> {
            self.urls.lock().await.push(url.to_string());
            Ok(200)
        }
    }

    #[tokio::test]
    async fn test_endpoint_requires_url_and_probes_health_path() {
        let probe = Arc::new(RecordingProbe::default());
        let strategy = EndpointStrategy::new(DeploymentMode::Manual, probe.clone());
        let descriptor = ServiceDescriptor::new("n8n").health_path("/healthz");

        assert!(matches!(
            strategy.start(&descriptor, None).await,
            Err(Error::Config(_))
        ));

        let handle = strategy
            .start(&descriptor, Some("http://10.0.0.2:5678/"))
            .await
            .unwrap();
        assert_eq!(
            strategy.health_check(&descriptor, &handle).await,
            HealthStatus::Healthy
        );
        assert_eq!(
            *probe.urls.lock().await,
            vec!["http://10.0.0.2:5678/healthz".to_string()]
        );
        strategy.stop(&descriptor, &handle).await.unwrap();
    }
}
