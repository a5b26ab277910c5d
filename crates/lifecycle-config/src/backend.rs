//! Mode overrides persisted to a JSON file

use crate::Result;
use async_trait::async_trait;
use futures::lock::Mutex;
use service_orchestration::{ConfigBackend, DeploymentMode, Error, ServiceOverride};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// [`ConfigBackend`] writing every change through to a JSON file
///
/// The file maps service names to `{ "mode": ..., "url": ... }`. A missing
/// file reads as no overrides.
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    overrides: Mutex<BTreeMap<String, ServiceOverride>>,
}

impl JsonFileBackend {
    /// Load overrides from `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let overrides = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), count = overrides.len(), "loaded mode overrides");

        Ok(Self {
            path,
            overrides: Mutex::new(overrides),
        })
    }

    /// File backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of all overrides
    pub async fn overrides(&self) -> BTreeMap<String, ServiceOverride> {
        self.overrides.lock().await.clone()
    }

    fn write(&self, overrides: &BTreeMap<String, ServiceOverride>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(overrides)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}

#[async_trait]
impl ConfigBackend for JsonFileBackend {
    async fn get_service_mode(
        &self,
        service: &str,
    ) -> service_orchestration::Result<Option<DeploymentMode>> {
        Ok(self.overrides.lock().await.get(service).map(|o| o.mode))
    }

    async fn set_service_config(
        &self,
        service: &str,
        mode: DeploymentMode,
        url: Option<String>,
    ) -> service_orchestration::Result<()> {
        let mut overrides = self.overrides.lock().await;
        let previous = overrides.insert(service.to_string(), ServiceOverride { mode, url });

        if let Err(e) = self.write(&overrides) {
            // Keep memory and disk in agreement.
            match previous {
                Some(previous) => overrides.insert(service.to_string(), previous),
                None => overrides.remove(service),
            };
            return Err(Error::Config(format!(
                "failed to persist override for '{}' to {}: {}",
                service,
                self.path.display(),
                e
            )));
        }

        info!(service, mode = %mode, path = %self.path.display(), "mode override saved");
        Ok(())
    }

    async fn get_service_url(&self, service: &str) -> service_orchestration::Result<Option<String>> {
        Ok(self
            .overrides
            .lock()
            .await
            .get(service)
            .and_then(|o| o.url.clone()))
    }
}
