use super::load_manager;
use anyhow::Result;
use comfy_table::{Cell, Color, Table};
use service_orchestration::{ServiceDescriptor, ServiceState, ServiceStatus};
use std::path::Path;

/// One row of the status table
struct Row {
    name: String,
    mode: std::result::Result<String, String>,
    state: ServiceState,
    critical: bool,
    dependencies: Vec<String>,
}

pub async fn run(config_path: &Path, state_path: &Path, format: &str) -> Result<()> {
    if format != "table" && format != "json" {
        anyhow::bail!("Invalid format: {}. Must be 'table' or 'json'", format);
    }

    let (_, manager) = load_manager(config_path, state_path).await?;
    let statuses = manager.get_services_status().await;

    let mut rows = Vec::new();
    for descriptor in manager.descriptors().await {
        let mode = manager
            .resolve_mode(&descriptor.name)
            .await
            .map(|m| m.to_string())
            .map_err(|e| e.to_string());
        rows.push(row(&descriptor, statuses.get(&descriptor.name), mode));
    }

    if format == "json" {
        let json: Vec<_> = rows
            .iter()
            .map(|r| {
                serde_json::json!({
                    "service": r.name,
                    "mode": r.mode.as_ref().ok(),
                    "mode_error": r.mode.as_ref().err(),
                    "state": r.state,
                    "critical": r.critical,
                    "dependencies": r.dependencies,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json)?);
    } else {
        println!("{}", render_table(&rows));
    }
    Ok(())
}

fn row(
    descriptor: &ServiceDescriptor,
    status: Option<&ServiceStatus>,
    mode: std::result::Result<String, String>,
) -> Row {
    Row {
        name: descriptor.name.clone(),
        mode,
        state: status.map(|s| s.state).unwrap_or(ServiceState::Stopped),
        critical: descriptor.critical,
        dependencies: descriptor.dependencies.clone(),
    }
}

fn render_table(rows: &[Row]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["SERVICE", "MODE", "STATE", "CRITICAL", "DEPENDENCIES"]);

    for row in rows {
        let mode = match &row.mode {
            Ok(mode) => Cell::new(mode),
            Err(e) => Cell::new(format!("unavailable: {}", e)).fg(Color::Red),
        };
        let state_color = match row.state {
            ServiceState::Running => Color::Green,
            ServiceState::Starting | ServiceState::Restarting | ServiceState::Stopping => {
                Color::Yellow
            }
            ServiceState::Error => Color::Red,
            ServiceState::Stopped => Color::DarkGrey,
        };
        let dependencies = if row.dependencies.is_empty() {
            "-".to_string()
        } else {
            row.dependencies.join(", ")
        };

        table.add_row(vec![
            Cell::new(&row.name),
            mode,
            Cell::new(row.state).fg(state_color),
            Cell::new(if row.critical { "yes" } else { "no" }),
            Cell::new(dependencies),
        ]);
    }

    table
}
