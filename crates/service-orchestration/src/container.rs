//! Container runtime collaborator
//!
//! The engine only sees [`ContainerRuntime`]. [`DockerCli`] implements it
//! by shelling out to the `docker` binary through `command-executor`.

use crate::descriptor::PortBinding;
use crate::{Error, Result};
use async_trait::async_trait;
use command_executor::{Command, CommandOutput, Executor};
use std::collections::BTreeMap;
use tracing::debug;

/// Container listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    /// Full container id
    pub id: String,
    /// Container name (without leading slash)
    pub name: String,
    /// Image reference
    pub image: String,
    /// Runtime state, e.g. `running` or `exited`
    pub state: String,
}

impl ContainerSummary {
    /// Whether the container is running
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

/// Everything needed to create a container
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerCreateSpec {
    /// Container name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Port bindings
    pub ports: Vec<PortBinding>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Volume mounts in `host:container` form
    pub volumes: Vec<String>,
    /// Network to attach to
    pub network: Option<String>,
}

/// Inspected container state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInspect {
    /// Full container id
    pub id: String,
    /// Whether the main process is running
    pub running: bool,
    /// Health status reported by the image's own healthcheck, if it has one
    pub health: Option<String>,
    /// Exit code of the last run
    pub exit_code: Option<i64>,
}

impl ContainerInspect {
    /// Running and not reported unhealthy by its own healthcheck
    pub fn is_healthy(&self) -> bool {
        self.running && self.health.as_deref().is_none_or(|h| h == "healthy")
    }
}

/// Opaque container runtime client
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List containers; stopped ones too when `all`
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>>;

    /// Create (but do not start) a container, returning its id
    async fn create_container(&self, spec: &ContainerCreateSpec) -> Result<String>;

    /// Start a created container
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stop a running container
    async fn stop_container(&self, id: &str) -> Result<()>;

    /// Restart a container
    async fn restart_container(&self, id: &str) -> Result<()>;

    /// Remove a container, stopping it first if needed
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Inspect a container
    async fn inspect(&self, id: &str) -> Result<ContainerInspect>;

    /// Last `tail` lines of a container's logs
    async fn logs(&self, id: &str, tail: usize) -> Result<String>;

    /// Whether `image` is present locally
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Pull `image`
    async fn pull_image(&self, image: &str) -> Result<()>;
}

/// [`ContainerRuntime`] backed by the `docker` CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    executor: Executor,
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerCli {
    /// Use `docker` from `PATH`
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use a specific CLI binary (e.g. `podman`)
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            executor: Executor::new("docker-cli"),
            binary: binary.into(),
        }
    }

    async fn output<I, S>(&self, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        Ok(self.executor.execute(cmd).await?)
    }

    async fn run<I, S>(&self, operation: &str, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let output = self.output(args).await?;
        if !output.success() {
            return Err(Error::Container {
                operation: operation.to_string(),
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

/// Arguments for `docker create`
pub fn create_args(spec: &ContainerCreateSpec) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), spec.name.clone()];
    for port in &spec.ports {
        args.push("-p".to_string());
        args.push(format!("{}:{}", port.host, port.container));
    }
    for (key, value) in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }
    for volume in &spec.volumes {
        args.push("-v".to_string());
        args.push(volume.clone());
    }
    if let Some(network) = &spec.network {
        args.push("--network".to_string());
        args.push(network.clone());
    }
    args.push(spec.image.clone());
    args
}

const PS_FORMAT: &str = "{{.ID}}|{{.Names}}|{{.Image}}|{{.State}}";
const INSPECT_FORMAT: &str =
    "{{.Id}}|{{.State.Running}}|{{if .State.Health}}{{.State.Health.Status}}{{end}}|{{.State.ExitCode}}";

/// Parse one line of `docker ps --format` output
fn parse_ps_line(line: &str) -> Option<ContainerSummary> {
    let mut parts = line.trim().splitn(4, '|');
    let id = parts.next()?.to_string();
    let name = parts.next()?.trim_start_matches('/').to_string();
    let image = parts.next()?.to_string();
    let state = parts.next()?.to_string();
    if id.is_empty() {
        return None;
    }
    Some(ContainerSummary {
        id,
        name,
        image,
        state,
    })
}

/// Parse `docker inspect --format` output
fn parse_inspect(output: &str) -> Option<ContainerInspect> {
    let mut parts = output.trim().splitn(4, '|');
    let id = parts.next()?.to_string();
    let running = parts.next()? == "true";
    let health = Some(parts.next()?.to_string()).filter(|h| !h.is_empty());
    let exit_code = parts.next().and_then(|c| c.parse().ok());
    Some(ContainerInspect {
        id,
        running,
        health,
        exit_code,
    })
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        let mut args = vec!["ps", "--no-trunc", "--format", PS_FORMAT];
        if all {
            args.insert(1, "-a");
        }
        let stdout = self.run("list", args).await?;
        Ok(stdout.lines().filter_map(parse_ps_line).collect())
    }

    async fn create_container(&self, spec: &ContainerCreateSpec) -> Result<String> {
        debug!(name = %spec.name, image = %spec.image, "Creating container");
        let stdout = self.run("create", create_args(spec)).await?;
        Ok(stdout.trim().to_string())
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.run("start", ["start", id]).await.map(drop)
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        self.run("stop", ["stop", id]).await.map(drop)
    }

    async fn restart_container(&self, id: &str) -> Result<()> {
        self.run("restart", ["restart", id]).await.map(drop)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.run("remove", ["rm", "-f", id]).await.map(drop)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInspect> {
        let stdout = self
            .run("inspect", ["inspect", "--format", INSPECT_FORMAT, id])
            .await?;
        parse_inspect(&stdout).ok_or_else(|| Error::Container {
            operation: "inspect".to_string(),
            reason: format!("unexpected inspect output: {}", stdout.trim()),
        })
    }

    async fn logs(&self, id: &str, tail: usize) -> Result<String> {
        let tail = tail.to_string();
        let output = self.output(["logs", "--tail", tail.as_str(), id]).await?;
        if !output.success() {
            return Err(Error::Container {
                operation: "logs".to_string(),
                reason: output.stderr.trim().to_string(),
            });
        }
        // Containers log to both streams.
        Ok(format!("{}{}", output.stdout, output.stderr))
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let output = self.output(["image", "inspect", image]).await?;
        Ok(output.success())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.run("pull", ["pull", image]).await.map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ps_line() {
        let line = "abc123|/clara-comfyui|clara/comfyui:latest|running";
        let summary = parse_ps_line(line).unwrap();
        assert_eq!(summary.name, "clara-comfyui");
        assert!(summary.is_running());

        assert!(parse_ps_line("").is_none());
        assert!(parse_ps_line("abc|name").is_none());
    }

    #[test]
    fn test_parse_inspect() {
        let inspect = parse_inspect("abc|true||0\n").unwrap();
        assert!(inspect.running);
        assert_eq!(inspect.health, None);
        assert!(inspect.is_healthy());

        let starting = parse_inspect("abc|true|starting|0").unwrap();
        assert!(!starting.is_healthy());

        let exited = parse_inspect("abc|false||137").unwrap();
        assert_eq!(exited.exit_code, Some(137));
        assert!(!exited.is_healthy());
    }

    #[test]
    fn test_create_args() {
        let mut env = BTreeMap::new();
        env.insert("N8N_PORT".to_string(), "5678".to_string());
        let spec = ContainerCreateSpec {
            name: "lifecycle-n8n".to_string(),
            image: "n8nio/n8n".to_string(),
            ports: vec![PortBinding {
                host: 5678,
                container: 5678,
            }],
            env,
            volumes: vec!["/data/n8n:/home/node/.n8n".to_string()],
            network: Some("lifecycle".to_string()),
        };

        let args = create_args(&spec);
        assert_eq!(args.first().unwrap(), "create");
        assert_eq!(args.last().unwrap(), "n8nio/n8n");
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "5678:5678"));
        assert!(args.windows(2).any(|w| w[0] == "-e" && w[1] == "N8N_PORT=5678"));
        assert!(args.windows(2).any(|w| w[0] == "--network" && w[1] == "lifecycle"));
    }
}
