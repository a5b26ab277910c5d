//! Service descriptors: the static table of everything the engine manages.
//!
//! Descriptors are built once at startup, either in code through the
//! builder methods below or from a services file, and are never mutated
//! afterwards. Everything that changes at runtime lives in
//! [`crate::manager::ServiceManager`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Execution strategy bound to a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Run in a container through the container runtime
    Containerized,
    /// Run as a host process through a native launcher
    Native,
    /// User-supplied endpoint the engine only probes
    Manual,
    /// Endpoint on another machine (e.g. provisioned remotely)
    Remote,
}

impl DeploymentMode {
    /// All modes, most capable first
    pub const ALL: [DeploymentMode; 4] = [
        DeploymentMode::Containerized,
        DeploymentMode::Native,
        DeploymentMode::Manual,
        DeploymentMode::Remote,
    ];

    /// Whether the engine owns the process lifecycle in this mode
    pub fn is_managed(self) -> bool {
        matches!(self, DeploymentMode::Containerized | DeploymentMode::Native)
    }

    /// Stable lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentMode::Containerized => "containerized",
            DeploymentMode::Native => "native",
            DeploymentMode::Manual => "manual",
            DeploymentMode::Remote => "remote",
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "containerized" | "docker" | "container" => Ok(DeploymentMode::Containerized),
            "native" => Ok(DeploymentMode::Native),
            "manual" => Ok(DeploymentMode::Manual),
            "remote" => Ok(DeploymentMode::Remote),
            other => Err(format!("unknown deployment mode '{}'", other)),
        }
    }
}

/// Host-to-container port binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Port on the host
    pub host: u16,
    /// Port inside the container
    pub container: u16,
}

impl FromStr for PortBinding {
    type Err = String;

    /// Parses `"8080:80"` or `"8080"` (same port on both sides)
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parse = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|e| format!("invalid port '{}': {}", p, e))
        };
        match s.split_once(':') {
            Some((host, container)) => Ok(PortBinding {
                host: parse(host)?,
                container: parse(container)?,
            }),
            None => {
                let port = parse(s)?;
                Ok(PortBinding {
                    host: port,
                    container: port,
                })
            }
        }
    }
}

/// Container configuration for the containerized mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Image reference
    pub image: String,
    /// Container name; defaults to `lifecycle-<service>`
    #[serde(default)]
    pub container_name: Option<String>,
    /// Port bindings
    #[serde(default)]
    pub ports: Vec<PortBinding>,
    /// Environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Volume mounts in `host:container` form
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Network to attach to
    #[serde(default)]
    pub network: Option<String>,
    /// HTTP endpoint probed for health once the container runs
    #[serde(default)]
    pub health_url: Option<String>,
}

impl ContainerConfig {
    /// Container config for `image` with no bindings
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            container_name: None,
            ports: Vec::new(),
            env: BTreeMap::new(),
            volumes: Vec::new(),
            network: None,
            health_url: None,
        }
    }
}

/// Process configuration for the native mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeConfig {
    /// Binary to execute
    pub binary: String,
    /// Command line arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory
    #[serde(default)]
    pub working_dir: Option<String>,
    /// HTTP endpoint probed for health
    #[serde(default)]
    pub health_url: Option<String>,
}

impl NativeConfig {
    /// Native config for `binary` with no arguments
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            health_url: None,
        }
    }
}

/// Per-mode configuration carried by a descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeConfigs {
    /// Containerized configuration, if the service can run in a container
    #[serde(default)]
    pub containerized: Option<ContainerConfig>,
    /// Native configuration, if the service can run as a host process
    #[serde(default)]
    pub native: Option<NativeConfig>,
    /// Default endpoint for manual/remote modes when none is persisted
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Path appended to manual/remote endpoints for reachability probes
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

fn default_health_path() -> String {
    "/health".to_string()
}

impl Default for ModeConfigs {
    fn default() -> Self {
        Self {
            containerized: None,
            native: None,
            endpoint_url: None,
            health_path: default_health_path(),
        }
    }
}

/// Immutable description of a managed service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Unique service name
    pub name: String,
    /// Services that must be running (or have failed) before this one starts
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Capabilities this service provides, e.g. `chat` or `image-generation`
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// A critical service's startup failure aborts the whole batch
    #[serde(default)]
    pub critical: bool,
    /// Mode-specific configuration
    #[serde(default)]
    pub modes: ModeConfigs,
    /// Hard pin: when set, only these modes may ever be resolved
    #[serde(default)]
    pub allowed_modes: Option<Vec<DeploymentMode>>,
}

impl ServiceDescriptor {
    /// New non-critical descriptor with no dependencies or mode config
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            capabilities: BTreeSet::new(),
            critical: false,
            modes: ModeConfigs::default(),
            allowed_modes: None,
        }
    }

    /// Add a dependency
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// Mark as critical
    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    /// Add a capability
    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Configure the containerized mode
    pub fn containerized(mut self, config: ContainerConfig) -> Self {
        self.modes.containerized = Some(config);
        self
    }

    /// Configure the native mode
    pub fn native(mut self, config: NativeConfig) -> Self {
        self.modes.native = Some(config);
        self
    }

    /// Set the default manual/remote endpoint
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.modes.endpoint_url = Some(url.into());
        self
    }

    /// Set the path probed on manual/remote endpoints
    pub fn health_path(mut self, path: impl Into<String>) -> Self {
        self.modes.health_path = path.into();
        self
    }

    /// Restrict the service to `modes`
    pub fn pinned_to(mut self, modes: impl IntoIterator<Item = DeploymentMode>) -> Self {
        self.allowed_modes = Some(modes.into_iter().collect());
        self
    }

    /// Whether the pin set (if any) admits `mode`
    pub fn permits(&self, mode: DeploymentMode) -> bool {
        self.allowed_modes
            .as_ref()
            .is_none_or(|allowed| allowed.contains(&mode))
    }

    /// Whether the descriptor carries what `mode` needs to start
    ///
    /// Manual and remote modes only need a URL, which may also come from the
    /// config backend, so they are judged at start time instead.
    pub fn has_config_for(&self, mode: DeploymentMode) -> bool {
        match mode {
            DeploymentMode::Containerized => self.modes.containerized.is_some(),
            DeploymentMode::Native => self.modes.native.is_some(),
            DeploymentMode::Manual | DeploymentMode::Remote => true,
        }
    }

    /// Container name used for the containerized mode
    pub fn container_name(&self) -> String {
        self.modes
            .containerized
            .as_ref()
            .and_then(|c| c.container_name.clone())
            .unwrap_or_else(|| format!("lifecycle-{}", self.name))
    }
}
