use super::load_manager;
use crate::power;
use anyhow::{Context, Result};
use service_orchestration::LifecycleEvent;
use std::path::Path;
use tracing::{error, info, warn};

pub async fn run(config_path: &Path, state_path: &Path) -> Result<()> {
    let (_, manager) = load_manager(config_path, state_path).await?;

    let events = manager.subscribe().await;
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            log_event(&event);
        }
    });

    let started = manager.start_all_services().await;
    if !started.success {
        error!(
            "Startup failed: {}",
            started.error.as_deref().unwrap_or("unknown error")
        );
        manager.shutdown().await;
        printer.abort();
        anyhow::bail!("startup failed");
    }

    let sampler = tokio::spawn(power::watch(manager.clone()));

    info!("All services started, press Ctrl-C to stop");
    let interrupted = tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C");
    sampler.abort();
    interrupted?;

    info!("Stopping services...");
    let stopped = manager.shutdown().await;
    printer.abort();

    match stopped.error {
        Some(e) => anyhow::bail!("shutdown incomplete: {}", e),
        None => Ok(()),
    }
}

fn log_event(event: &LifecycleEvent) {
    match event {
        LifecycleEvent::ServiceStateChanged { service, from, to } => {
            info!(service = %service, "{} -> {}", from, to)
        }
        LifecycleEvent::ServiceStarted { service, mode, url } => match url {
            Some(url) => info!(service = %service, mode = %mode, "started at {}", url),
            None => info!(service = %service, mode = %mode, "started"),
        },
        LifecycleEvent::ServiceUnhealthy { service, error } => {
            warn!(service = %service, "unhealthy: {}", error)
        }
        LifecycleEvent::StartupFailed { service, error } => {
            error!(service = %service, "startup failed: {}", error)
        }
        other => tracing::debug!(event = ?other, "lifecycle event"),
    }
}
