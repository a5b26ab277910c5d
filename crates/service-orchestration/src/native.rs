//! Native launcher collaborator
//!
//! A [`NativeLauncher`] turns a descriptor into a running host process and
//! hands back a [`NativeHandle`] that knows how to probe and stop it.
//! [`ProcessLauncher`] is the default: it spawns the configured binary and
//! probes its health URL.

use crate::descriptor::ServiceDescriptor;
use crate::health::{DEFAULT_PROBE_TIMEOUT, HealthStatus, HttpProbe, check_http};
use crate::{Error, Result};
use async_process::{Child, Stdio};
use async_trait::async_trait;
use command_executor::Command;
use futures::lock::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Live native process
#[async_trait]
pub trait NativeHandle: Send + Sync {
    /// Check the process is up and serving
    async fn probe(&self) -> HealthStatus;

    /// Stop the process
    async fn stop(&self) -> Result<()>;
}

/// Starts services as host processes
#[async_trait]
pub trait NativeLauncher: Send + Sync {
    /// Start `descriptor` natively
    async fn start(&self, descriptor: &ServiceDescriptor) -> Result<Box<dyn NativeHandle>>;
}

/// [`NativeLauncher`] that spawns the descriptor's binary directly
pub struct ProcessLauncher {
    probe: Arc<dyn HttpProbe>,
}

impl ProcessLauncher {
    /// Launcher probing health URLs through `probe`
    pub fn new(probe: Arc<dyn HttpProbe>) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl NativeLauncher for ProcessLauncher {
    async fn start(&self, descriptor: &ServiceDescriptor) -> Result<Box<dyn NativeHandle>> {
        let config = descriptor
            .modes
            .native
            .as_ref()
            .ok_or_else(|| Error::Native {
                service: descriptor.name.clone(),
                reason: "no native configuration".to_string(),
            })?;

        let mut command = Command::new(&config.binary);
        command.args(&config.args);
        for (key, value) in &config.env {
            command.env(key, value);
        }
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        info!(service = %descriptor.name, command = %command.display(), "Spawning native process");

        let mut cmd = command.prepare();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = cmd.spawn().map_err(|e| Error::Native {
            service: descriptor.name.clone(),
            reason: format!("failed to spawn {}: {}", config.binary, e),
        })?;

        Ok(Box::new(ProcessHandle {
            service: descriptor.name.clone(),
            pid: child.id(),
            child: Mutex::new(Some(child)),
            health_url: config.health_url.clone(),
            probe: self.probe.clone(),
        }))
    }
}

/// Handle to a spawned child process
struct ProcessHandle {
    service: String,
    pid: u32,
    /// `None` once stopped
    child: Mutex<Option<Child>>,
    health_url: Option<String>,
    probe: Arc<dyn HttpProbe>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("service", &self.service)
            .field("pid", &self.pid)
            .finish()
    }
}

#[async_trait]
impl NativeHandle for ProcessHandle {
    async fn probe(&self) -> HealthStatus {
        {
            let mut guard = self.child.lock().await;
            let Some(child) = guard.as_mut() else {
                return HealthStatus::Unhealthy("process was stopped".to_string());
            };
            match child.try_status() {
                Ok(Some(status)) => {
                    return HealthStatus::Unhealthy(format!("process exited with {}", status));
                }
                Ok(None) => {}
                Err(e) => return HealthStatus::Unhealthy(e.to_string()),
            }
        }

        match &self.health_url {
            Some(url) => check_http(self.probe.as_ref(), url, DEFAULT_PROBE_TIMEOUT).await,
            None => HealthStatus::Healthy,
        }
    }

    async fn stop(&self) -> Result<()> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        debug!(service = %self.service, pid = self.pid, "Stopping native process");
        if let Err(e) = child.kill() {
            // Already exited is fine.
            warn!(service = %self.service, pid = self.pid, "Kill failed: {}", e);
        }
        child.status().await.map_err(|e| Error::Native {
            service: self.service.clone(),
            reason: format!("failed to reap process: {}", e),
        })?;
        Ok(())
    }
}
