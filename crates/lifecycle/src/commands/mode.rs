use super::load_manager;
use anyhow::{Result, anyhow};
use service_orchestration::DeploymentMode;
use std::path::Path;

pub async fn run(
    config_path: &Path,
    state_path: &Path,
    service: &str,
    mode: &str,
    url: Option<String>,
) -> Result<()> {
    let mode: DeploymentMode = mode.parse().map_err(|e: String| anyhow!(e))?;
    let (_, manager) = load_manager(config_path, state_path).await?;

    let result = manager.set_service_mode(service, mode, url).await;
    if let Some(error) = result.error {
        anyhow::bail!("Failed to set mode: {}", error);
    }

    println!("✓ '{}' will start in {} mode", service, mode);
    Ok(())
}
