use anyhow::{Context, Result};
use lifecycle_config::parser;
use service_orchestration::resolve;
use std::path::Path;

pub fn run(config_path: &Path) -> Result<()> {
    println!("Validating {}...", config_path.display());

    let config = parser::parse_file(config_path).context("Failed to parse configuration")?;
    let descriptors = parser::to_descriptors(&config)?;
    let order = resolve(&descriptors)?;

    println!("✓ Configuration valid");
    println!("  Version: {}", config.version);
    if let Some(name) = &config.name {
        println!("  Name: {}", name);
    }
    println!("  Services: {}", config.services.len());
    println!("  Start order: {}", order.join(" -> "));

    if let Some(remote) = &config.remote {
        println!("  Remote: {}@{}:{}", remote.user, remote.host, remote.port);
    }

    Ok(())
}
