//! Health probing
//!
//! Probes are plain HTTP GETs expecting a 2xx status. The transport sits
//! behind [`HttpProbe`] so strategies can be exercised without a network.

use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Default timeout for a single probe request
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Health status of a service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum HealthStatus {
    /// Service is healthy
    Healthy,
    /// Service is unhealthy (failed health check)
    Unhealthy(String),
}

impl HealthStatus {
    /// Whether the status counts as a pass
    pub fn is_passing(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Minimal HTTP client used for reachability probes
#[async_trait]
pub trait HttpProbe: Send + Sync {
    /// GET `url`, returning the response status code
    async fn get(&self, url: &str, timeout: Duration) -> Result<u16>;
}

/// Probe `url` and translate the outcome into a [`HealthStatus`]
pub async fn check_http(probe: &dyn HttpProbe, url: &str, timeout: Duration) -> HealthStatus {
    match probe.get(url, timeout).await {
        Ok(status) if (200..300).contains(&status) => {
            debug!(url, status, "Health probe passed");
            HealthStatus::Healthy
        }
        Ok(status) => HealthStatus::Unhealthy(format!("{} returned HTTP {}", url, status)),
        Err(e) => HealthStatus::Unhealthy(e.to_string()),
    }
}

/// Join an endpoint base URL and a health path
pub fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// [`HttpProbe`] backed by `reqwest`
#[derive(Debug, Clone, Default)]
pub struct ReqwestProbe {
    client: reqwest::Client,
}

impl ReqwestProbe {
    /// Probe with a default client
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HttpProbe for ReqwestProbe {
    async fn get(&self, url: &str, timeout: Duration) -> Result<u16> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::Probe {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(std::result::Result<u16, String>);

    #[async_trait]
    impl HttpProbe for FixedProbe {
        async fn get(&self, url: &str, _timeout: Duration) -> Result<u16> {
            self.0.clone().map_err(|reason| Error::Probe {
                url: url.to_string(),
                reason,
            })
        }
    }

    #[tokio::test]
    async fn test_check_http_status_mapping() {
        let url = "http://127.0.0.1:8091/health";
        let ok = check_http(&FixedProbe(Ok(204)), url, DEFAULT_PROBE_TIMEOUT).await;
        assert_eq!(ok, HealthStatus::Healthy);

        let bad = check_http(&FixedProbe(Ok(503)), url, DEFAULT_PROBE_TIMEOUT).await;
        assert_eq!(
            bad,
            HealthStatus::Unhealthy(format!("{} returned HTTP 503", url))
        );

        let down = check_http(
            &FixedProbe(Err("connection refused".into())),
            url,
            DEFAULT_PROBE_TIMEOUT,
        )
        .await;
        assert!(!down.is_passing());
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://h:1/", "/health"), "http://h:1/health");
        assert_eq!(join_url("http://h:1", "health"), "http://h:1/health");
        assert_eq!(join_url("http://h:1", ""), "http://h:1");
    }
}
