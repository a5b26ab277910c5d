//! Persisted mode overrides
//!
//! The engine reads and writes per-service mode choices through an opaque
//! [`ConfigBackend`]. [`MemoryConfigBackend`] keeps them in memory; the
//! `lifecycle-config` crate provides a file-backed one.

use crate::Result;
use crate::descriptor::DeploymentMode;
use async_trait::async_trait;
use futures::lock::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stored override for one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOverride {
    /// Chosen mode
    pub mode: DeploymentMode,
    /// Endpoint for manual/remote modes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Key-value store for service mode overrides
#[async_trait]
pub trait ConfigBackend: Send + Sync {
    /// Persisted mode for `service`, if any
    async fn get_service_mode(&self, service: &str) -> Result<Option<DeploymentMode>>;

    /// Persist the mode (and URL, for manual/remote) for `service`
    async fn set_service_config(
        &self,
        service: &str,
        mode: DeploymentMode,
        url: Option<String>,
    ) -> Result<()>;

    /// Persisted URL for `service`, if any
    async fn get_service_url(&self, service: &str) -> Result<Option<String>>;
}

/// In-memory [`ConfigBackend`]
#[derive(Debug, Default)]
pub struct MemoryConfigBackend {
    overrides: Mutex<HashMap<String, ServiceOverride>>,
}

impl MemoryConfigBackend {
    /// Empty backend
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigBackend for MemoryConfigBackend {
    async fn get_service_mode(&self, service: &str) -> Result<Option<DeploymentMode>> {
        Ok(self.overrides.lock().await.get(service).map(|o| o.mode))
    }

    async fn set_service_config(
        &self,
        service: &str,
        mode: DeploymentMode,
        url: Option<String>,
    ) -> Result<()> {
        self.overrides
            .lock()
            .await
            .insert(service.to_string(), ServiceOverride { mode, url });
        Ok(())
    }

    async fn get_service_url(&self, service: &str) -> Result<Option<String>> {
        Ok(self
            .overrides
            .lock()
            .await
            .get(service)
            .and_then(|o| o.url.clone()))
    }
}
