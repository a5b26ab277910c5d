//! Remote deployment flow
//!
//! `Connect -> DetectHardware -> (Containerized | Native) -> Verify -> Cleanup`.
//! The flow runs inside one overall timeout. The session it opens is
//! recorded in a [`Progress`] cell owned by the caller, so the session is
//! closed exactly once whether the flow finished, failed or was dropped by
//! the timeout.

use crate::error::{Error, Result};
use crate::hardware::{self, Accelerator, HardwareProfile};
use crate::secret::{SecretGuard, SecretSlot};
use crate::session::{ConnectionConfig, RemoteShell, SessionId};
use async_runtime_compat::{sleep, timeout};
use command_executor::{Command, CommandOutput, sudo};
use futures::lock::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const DOCKER_INSTALL: &str = "curl -fsSL https://get.docker.com | sh";

const NVIDIA_TOOLKIT_INSTALL: &str = "curl -fsSL https://nvidia.github.io/libnvidia-container/gpgkey \
     | gpg --dearmor --yes -o /usr/share/keyrings/nvidia-container-toolkit-keyring.gpg \
     && curl -fsSL https://nvidia.github.io/libnvidia-container/stable/deb/nvidia-container-toolkit.list \
     | sed 's#deb https://#deb [signed-by=/usr/share/keyrings/nvidia-container-toolkit-keyring.gpg] https://#g' \
     > /etc/apt/sources.list.d/nvidia-container-toolkit.list \
     && apt-get update && apt-get install -y nvidia-container-toolkit";

const INSTALL_SCRIPT_PATH: &str = "/tmp/lifecycle-install-engine.sh";

/// Install path taken on the remote host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMethod {
    /// GPU container
    Containerized,
    /// systemd unit installed by script
    Native,
}

impl From<Accelerator> for DeploymentMethod {
    fn from(accelerator: Accelerator) -> Self {
        match accelerator {
            Accelerator::Cuda => DeploymentMethod::Containerized,
            Accelerator::Rocm | Accelerator::Vulkan | Accelerator::Cpu => DeploymentMethod::Native,
        }
    }
}

/// What gets deployed and how long each phase may take
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteDeploySettings {
    /// Image for the containerized path
    pub image: String,
    /// Container name; an existing one is replaced
    pub container_name: String,
    /// Docker network the container joins
    pub network: String,
    /// Extra arguments after the image
    pub container_args: Vec<String>,
    /// Port the engine listens on inside the container
    pub container_port: u16,
    /// Port published on the remote host
    pub service_port: u16,
    /// Path of the engine's health endpoint
    pub health_path: String,
    /// Provisioning script for the native path
    pub install_script_url: Option<String>,
    /// systemd unit created by the script
    pub service_unit: String,
    /// Bound on the entire deployment
    pub deploy_timeout: Duration,
    /// Health probes before giving up
    pub health_retries: u32,
    /// Pause between health probes
    pub health_retry_delay: Duration,
    /// `systemctl is-active` polls per round
    pub unit_wait_retries: u32,
    /// Pause between unit polls
    pub unit_wait_delay: Duration,
}

impl Default for RemoteDeploySettings {
    fn default() -> Self {
        Self {
            image: "ghcr.io/ggml-org/llama.cpp:server-cuda".to_string(),
            container_name: "llama-engine".to_string(),
            network: "lifecycle-net".to_string(),
            container_args: Vec::new(),
            container_port: 8080,
            service_port: 8091,
            health_path: "/health".to_string(),
            install_script_url: None,
            service_unit: "llama-engine".to_string(),
            deploy_timeout: Duration::from_secs(15 * 60),
            health_retries: 30,
            health_retry_delay: Duration::from_secs(2),
            unit_wait_retries: 10,
            unit_wait_delay: Duration::from_secs(2),
        }
    }
}

/// Outcome of [`RemoteProvisioner::test_remote_setup`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSetupResult {
    /// Connected and detected a supported machine
    pub success: bool,
    /// Detected hardware
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_profile: Option<HardwareProfile>,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of [`RemoteProvisioner::deploy_remote`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployOutcome {
    /// Engine deployed and healthy
    pub success: bool,
    /// Base URL of the deployed engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Install path, once chosen
    pub deployment_method: Option<DeploymentMethod>,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// State the deployment flow leaves behind for cleanup
#[derive(Debug, Default)]
struct Progress {
    session: Option<SessionId>,
    method: Option<DeploymentMethod>,
}

/// Connects to a remote host and installs the inference engine
pub struct RemoteProvisioner {
    shell: Arc<dyn RemoteShell>,
    settings: RemoteDeploySettings,
    secret: SecretSlot,
}

impl RemoteProvisioner {
    /// Create a provisioner over `shell`
    pub fn new(shell: Arc<dyn RemoteShell>, settings: RemoteDeploySettings) -> Self {
        Self {
            shell,
            settings,
            secret: SecretSlot::new(),
        }
    }

    /// Deployment settings
    pub fn settings(&self) -> &RemoteDeploySettings {
        &self.settings
    }

    /// Whether a deployment currently holds the credential
    pub fn deployment_in_progress(&self) -> bool {
        self.secret.is_held()
    }

    /// Connect, fingerprint the hardware, disconnect
    pub async fn test_remote_setup(&self, config: &ConnectionConfig) -> RemoteSetupResult {
        let session = match self.connect(config).await {
            Ok(session) => session,
            Err(e) => {
                warn!(host = %config.host, "remote setup check failed: {}", e);
                return RemoteSetupResult {
                    success: false,
                    hardware_profile: None,
                    error: Some(e.to_string()),
                };
            }
        };

        let detected = hardware::detect(self.shell.as_ref(), &session).await;
        self.close(&session).await;

        match detected {
            Ok(profile) => RemoteSetupResult {
                success: true,
                hardware_profile: Some(profile),
                error: None,
            },
            Err(e) => {
                warn!(host = %config.host, "remote setup check failed: {}", e);
                RemoteSetupResult {
                    success: false,
                    hardware_profile: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Deploy the engine to `config.host`
    ///
    /// Only one deployment may run at a time. The credential is held for
    /// the duration of the call and cleared on every exit path.
    pub async fn deploy_remote(&self, config: &ConnectionConfig) -> DeployOutcome {
        let guard = match self.secret.acquire(config.auth.secret().clone()) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(host = %config.host, "{}", e);
                return DeployOutcome {
                    success: false,
                    url: None,
                    deployment_method: None,
                    error: Some(e.to_string()),
                };
            }
        };

        info!(host = %config.host, user = %config.user, "starting remote deployment");
        let progress = Mutex::new(Progress::default());
        let after = self.settings.deploy_timeout;

        let result = match timeout(after, self.deploy_flow(config, &guard, &progress)).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeploymentTimeout { after }),
        };

        let Progress { session, method } = std::mem::take(&mut *progress.lock().await);
        if let Some(session) = session {
            self.close(&session).await;
        }
        drop(guard);

        match result {
            Ok(url) => {
                info!(host = %config.host, %url, method = ?method, "remote deployment complete");
                DeployOutcome {
                    success: true,
                    url: Some(url),
                    deployment_method: method,
                    error: None,
                }
            }
            Err(e) => {
                error!(host = %config.host, method = ?method, "remote deployment failed: {}", e);
                DeployOutcome {
                    success: false,
                    url: None,
                    deployment_method: method,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn deploy_flow(
        &self,
        config: &ConnectionConfig,
        guard: &SecretGuard<'_>,
        progress: &Mutex<Progress>,
    ) -> Result<String> {
        let session = self.connect(config).await?;
        progress.lock().await.session = Some(session);

        let profile = hardware::detect(self.shell.as_ref(), &session).await?;
        let method = DeploymentMethod::from(profile.recommended);
        progress.lock().await.method = Some(method);
        info!(
            host = %config.host,
            accelerator = %profile.recommended,
            method = ?method,
            "selected install path"
        );

        let remote = Remote {
            shell: self.shell.as_ref(),
            session,
            guard,
        };
        match method {
            DeploymentMethod::Containerized => self.deploy_container(&remote, &profile).await?,
            DeploymentMethod::Native => self.deploy_native(&remote, &profile).await?,
        }

        Ok(format!("http://{}:{}", config.host, self.settings.service_port))
    }

    async fn deploy_container(&self, remote: &Remote<'_>, profile: &HardwareProfile) -> Result<()> {
        let settings = &self.settings;

        if !profile.container_runtime {
            info!("installing Docker on remote host");
            remote.privileged(&sh(DOCKER_INSTALL)).await?;
        }

        let toolkit = remote.run(&sh("command -v nvidia-ctk")).await?;
        if !toolkit.success() {
            info!("installing NVIDIA container toolkit on remote host");
            remote.privileged(&sh(NVIDIA_TOOLKIT_INSTALL)).await?;
            let configure = Command::builder("nvidia-ctk")
                .args(["runtime", "configure", "--runtime=docker"])
                .build();
            remote.privileged(&configure).await?;
            remote
                .privileged(&Command::builder("systemctl").args(["restart", "docker"]).build())
                .await?;
        }

        let network = remote
            .run(&remote.sudo(&docker(&["network", "inspect", &settings.network])))
            .await?;
        if !network.success() {
            remote
                .privileged(&docker(&["network", "create", &settings.network]))
                .await?;
        }

        // Missing container is fine; `rm -f` makes redeploys idempotent.
        let removed = remote
            .run(&remote.sudo(&docker(&["rm", "-f", &settings.container_name])))
            .await?;
        debug!(exit_code = ?removed.exit_code, "removed stale container");

        remote.privileged(&docker(&["pull", &settings.image])).await?;

        let publish = format!("{}:{}", settings.service_port, settings.container_port);
        let mut run = docker(&[
            "run",
            "-d",
            "--name",
            &settings.container_name,
            "--network",
            &settings.network,
            "--restart",
            "unless-stopped",
            "--gpus",
            "all",
            "-p",
            &publish,
            &settings.image,
        ]);
        run.args(&settings.container_args);
        remote.privileged(&run).await?;

        if let Err(e) = self.verify(remote).await {
            let logs = remote
                .run(&remote.sudo(&docker(&["logs", "--tail", "50", &settings.container_name])))
                .await
                .map(|out| format!("{}{}", out.stdout, out.stderr))
                .unwrap_or_default();
            return Err(with_logs(e, "container logs", &logs));
        }
        Ok(())
    }

    async fn deploy_native(&self, remote: &Remote<'_>, profile: &HardwareProfile) -> Result<()> {
        let settings = &self.settings;
        let Some(script_url) = settings.install_script_url.as_deref() else {
            return Err(Error::Config(format!(
                "no install script configured for the {} backend",
                profile.recommended
            )));
        };

        remote
            .checked(
                &Command::builder("curl")
                    .args(["-fsSL", "-o", INSTALL_SCRIPT_PATH, script_url])
                    .build(),
            )
            .await?;

        let port = settings.service_port.to_string();
        let install = Command::builder("bash")
            .args([INSTALL_SCRIPT_PATH, "--backend", profile.recommended.as_str()])
            .args(["--port", port.as_str()])
            .build();
        remote.privileged(&install).await?;

        let outcome = match self.wait_for_unit(remote).await {
            Ok(()) => self.verify(remote).await,
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            let journal = remote
                .run(&remote.sudo(
                    &Command::builder("journalctl")
                        .args(["-u", &settings.service_unit, "-n", "50", "--no-pager"])
                        .build(),
                ))
                .await
                .map(|out| out.stdout)
                .unwrap_or_default();
            return Err(with_logs(e, "journal", &journal));
        }
        Ok(())
    }

    /// Wait for the unit to report active, starting it by hand once
    async fn wait_for_unit(&self, remote: &Remote<'_>) -> Result<()> {
        let unit = &self.settings.service_unit;
        let is_active = Command::builder("systemctl")
            .args(["is-active", unit.as_str()])
            .build();

        for round in 0..2 {
            if round == 1 {
                warn!(unit = %unit, "unit not active, starting it manually");
                remote
                    .privileged(&Command::builder("systemctl").args(["start", unit.as_str()]).build())
                    .await?;
            }
            for attempt in 0..self.settings.unit_wait_retries {
                let output = remote.run(&is_active).await?;
                if output.stdout_trimmed() == "active" {
                    debug!(unit = %unit, round, attempt, "unit active");
                    return Ok(());
                }
                sleep(self.settings.unit_wait_delay).await;
            }
        }

        Err(Error::HealthCheck(format!("unit {} never became active", unit)))
    }

    /// Poll the engine's health endpoint from the remote host
    async fn verify(&self, remote: &Remote<'_>) -> Result<()> {
        let url = format!(
            "http://127.0.0.1:{}{}",
            self.settings.service_port, self.settings.health_path
        );
        let probe = Command::builder("curl")
            .args(["-fsS", "-o", "/dev/null", "--max-time", "5", url.as_str()])
            .build();

        let attempts = self.settings.health_retries.max(1);
        for attempt in 1..=attempts {
            let output = remote.run(&probe).await?;
            if output.success() {
                info!(%url, attempt, "remote engine healthy");
                return Ok(());
            }
            debug!(%url, attempt, "remote engine not healthy yet");
            if attempt < attempts {
                sleep(self.settings.health_retry_delay).await;
            }
        }

        Err(Error::HealthCheck(format!(
            "{} did not answer after {} attempts",
            url, attempts
        )))
    }

    async fn connect(&self, config: &ConnectionConfig) -> Result<SessionId> {
        let connecting = self
            .shell
            .connect(&config.host, config.port, &config.user, &config.auth);
        match timeout(config.connect_timeout, connecting).await {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectTimeout {
                host: config.host.clone(),
                after: config.connect_timeout,
            }),
        }
    }

    async fn close(&self, session: &SessionId) {
        if let Err(e) = self.shell.close(session).await {
            warn!(session = %session, "failed to close remote session: {}", e);
        }
    }
}

/// A session plus the credential for privileged commands
struct Remote<'a> {
    shell: &'a dyn RemoteShell,
    session: SessionId,
    guard: &'a SecretGuard<'a>,
}

impl Remote<'_> {
    async fn run(&self, command: &Command) -> Result<CommandOutput> {
        self.shell.exec(&self.session, command).await
    }

    async fn checked(&self, command: &Command) -> Result<CommandOutput> {
        let output = self.run(command).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(Error::CommandFailed {
                command: command.display(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    fn sudo(&self, command: &Command) -> Command {
        sudo(command, &self.guard.secret())
    }

    async fn privileged(&self, command: &Command) -> Result<CommandOutput> {
        self.checked(&self.sudo(command)).await
    }
}

fn sh(script: &str) -> Command {
    Command::builder("sh").arg("-c").arg(script).build()
}

fn docker(args: &[&str]) -> Command {
    Command::builder("docker").args(args).build()
}

fn with_logs(error: Error, label: &str, logs: &str) -> Error {
    let logs = logs.trim();
    if logs.is_empty() {
        return error;
    }
    match error {
        Error::HealthCheck(reason) => {
            Error::HealthCheck(format!("{}\n--- {} ---\n{}", reason, label, logs))
        }
        other => other,
    }
}
