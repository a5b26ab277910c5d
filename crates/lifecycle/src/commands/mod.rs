pub mod mode;
pub mod remote;
pub mod status;
pub mod up;
pub mod validate;

use anyhow::{Context, Result};
use lifecycle_config::{Config, JsonFileBackend, parser};
use service_orchestration::{LifecycleContext, ServiceManager};
use std::path::Path;
use std::sync::Arc;

/// Parse the services file and register every service with a fresh manager
pub async fn load_manager(config_path: &Path, state_path: &Path) -> Result<(Config, ServiceManager)> {
    let config = parser::parse_file(config_path).context("Failed to parse configuration")?;
    let backend = JsonFileBackend::open(state_path)
        .with_context(|| format!("Failed to open mode overrides at {}", state_path.display()))?;

    let context = LifecycleContext::new(Arc::new(backend));
    let manager = ServiceManager::new(context, parser::to_manager_settings(&config));

    for descriptor in parser::to_descriptors(&config)? {
        let name = descriptor.name.clone();
        let result = manager.register_service(descriptor).await;
        if !result.success {
            anyhow::bail!(
                "Failed to register '{}': {}",
                name,
                result.error.unwrap_or_default()
            );
        }
    }

    Ok((config, manager))
}
