use anyhow::{Context, Result, anyhow};
use command_executor::Secret;
use comfy_table::Table;
use dialoguer::Password;
use dialoguer::theme::ColorfulTheme;
use lifecycle_config::{RemoteConfig, parser};
use remote_provisioning::{HardwareProfile, OpenSshShell, RemoteProvisioner};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn remote_config(config_path: &Path) -> Result<RemoteConfig> {
    let config = parser::parse_file(config_path).context("Failed to parse configuration")?;
    config
        .remote
        .ok_or_else(|| anyhow!("{} has no `remote` section", config_path.display()))
}

/// Password from `password_env`, or an interactive prompt
fn password(remote: &RemoteConfig, password_env: Option<&str>) -> Result<Secret> {
    if let Some(var) = password_env {
        let value = std::env::var(var)
            .with_context(|| format!("Environment variable {} is not set", var))?;
        return Ok(Secret::new(value));
    }

    let value = Password::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Password for {}@{}", remote.user, remote.host))
        .interact()
        .context("Failed to read password")?;
    Ok(Secret::new(value))
}

fn provisioner(remote: &RemoteConfig) -> Result<RemoteProvisioner> {
    let shell = OpenSshShell::new()
        .context("Failed to prepare SSH control directory")?
        .with_connect_timeout(Duration::from_secs(remote.connect_timeout));
    Ok(RemoteProvisioner::new(
        Arc::new(shell),
        parser::to_deploy_settings(remote),
    ))
}

pub async fn test(config_path: &Path, password_env: Option<&str>) -> Result<()> {
    let remote = remote_config(config_path)?;
    let connection = parser::to_connection_config(&remote, password(&remote, password_env)?);

    println!("Connecting to {}@{}...", remote.user, remote.host);
    let result = provisioner(&remote)?.test_remote_setup(&connection).await;

    match (result.success, result.hardware_profile) {
        (true, Some(profile)) => {
            println!("✓ Remote host reachable");
            println!("{}", profile_table(&profile));
            Ok(())
        }
        _ => anyhow::bail!(
            "Remote setup check failed: {}",
            result.error.unwrap_or_default()
        ),
    }
}

pub async fn deploy(config_path: &Path, password_env: Option<&str>) -> Result<()> {
    let remote = remote_config(config_path)?;
    let connection = parser::to_connection_config(&remote, password(&remote, password_env)?);

    println!("Deploying to {}@{}...", remote.user, remote.host);
    let outcome = provisioner(&remote)?.deploy_remote(&connection).await;

    let method = outcome
        .deployment_method
        .map(|m| format!("{:?}", m).to_lowercase())
        .unwrap_or_else(|| "-".to_string());

    if outcome.success {
        println!("✓ Engine deployed ({})", method);
        if let Some(url) = outcome.url {
            println!("  URL: {}", url);
            println!("  Use it with: lifecycle mode <service> remote --url {}", url);
        }
        Ok(())
    } else {
        anyhow::bail!(
            "Deployment failed ({}): {}",
            method,
            outcome.error.unwrap_or_default()
        )
    }
}

fn profile_table(profile: &HardwareProfile) -> Table {
    let yes_no = |flag: bool| if flag { "yes" } else { "no" };

    let mut table = Table::new();
    table.set_header(vec!["PROPERTY", "VALUE"]);
    table.add_row(vec!["Architecture", profile.architecture.as_str()]);
    table.add_row(vec![
        "CPU",
        profile.cpu_model.as_deref().unwrap_or("unknown"),
    ]);
    table.add_row(vec!["Docker", yes_no(profile.container_runtime)]);
    table.add_row(vec!["NVIDIA", yes_no(profile.nvidia)]);
    table.add_row(vec!["ROCm", yes_no(profile.rocm)]);
    table.add_row(vec!["Vulkan", yes_no(profile.vulkan)]);
    table.add_row(vec!["Recommended", profile.recommended.as_str()]);
    table.add_row(vec![
        "Confidence".to_string(),
        format!("{:?}", profile.confidence).to_lowercase(),
    ]);
    if let Some(reason) = &profile.fallback_reason {
        table.add_row(vec!["Fallback reason", reason.as_str()]);
    }
    table
}
