//! # Lifecycle configuration
//!
//! YAML services file for the lifecycle engine.
//!
//! This crate parses `services.yaml` files, validates them and converts them
//! into [`ServiceDescriptor`](service_orchestration::ServiceDescriptor)s,
//! [`ManagerSettings`](service_orchestration::ManagerSettings) and remote
//! deployment settings. [`JsonFileBackend`] persists per-service mode
//! overrides between runs.

#![warn(missing_docs)]

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use service_orchestration::DeploymentMode;
use std::collections::BTreeMap;
use thiserror::Error;

pub mod backend;
pub mod parser;

pub use backend::JsonFileBackend;
pub use parser::{
    parse_file, parse_str, substitute_env_vars, to_connection_config, to_deploy_settings,
    to_descriptors, to_manager_settings,
};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse YAML
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Failed to read or write the overrides file
    #[error("Failed to parse overrides: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Invalid substitution pattern
    #[error("Invalid pattern: {0}")]
    PatternError(#[from] regex::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Environment variable not found
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    /// Service reference not found
    #[error("Service '{0}' not found")]
    ServiceNotFound(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// Optional deployment name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Global settings
    #[serde(default, skip_serializing_if = "Settings::is_default")]
    pub settings: Settings,

    /// Service definitions, in declaration order
    pub services: IndexMap<String, Service>,

    /// Remote deployment target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,
}

/// Global settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Base health check interval in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check_interval: Option<u64>,

    /// Startup timeout in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_timeout: Option<u64>,

    /// Poll interval while waiting for a service to become healthy, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_poll_interval_ms: Option<u64>,

    /// Restarts allowed before a service is left in error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_max_attempts: Option<u32>,

    /// First restart delay in milliseconds; doubles per attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_base_delay_ms: Option<u64>,

    /// Services polled even while sleeping on battery
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub always_checked: Vec<String>,
}

impl Settings {
    /// Check if settings are default
    fn is_default(&self) -> bool {
        self == &Settings::default()
    }
}

/// Service definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Service {
    /// Service dependencies
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Startup failure aborts the batch
    #[serde(default)]
    pub critical: bool,

    /// Capabilities the service provides
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Hard pin on the modes this service may use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_modes: Option<Vec<DeploymentMode>>,

    /// Container definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub containerized: Option<ContainerService>,

    /// Host process definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native: Option<NativeService>,

    /// Default endpoint for manual/remote modes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// Health path appended to manual/remote endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_path: Option<String>,
}

/// Container definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerService {
    /// Container image
    pub image: String,
    /// Container name override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Port mappings
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    /// Volume mounts
    #[serde(default)]
    pub volumes: Vec<String>,
    /// Environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Docker network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// HTTP health endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_url: Option<String>,
}

/// Host process definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeService {
    /// Binary to execute
    pub binary: String,
    /// Command line arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// HTTP health endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_url: Option<String>,
}

/// Port mapping for containers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PortMapping {
    /// Same port on host and container
    Simple(u16),
    /// Full mapping "host:container"
    Full(String),
}

/// How the remote session authenticates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemoteAuth {
    /// Password authentication
    #[default]
    Password,
    /// Keyboard-interactive prompt
    KeyboardInteractive,
}

/// Remote deployment target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Remote host
    pub host: String,
    /// SSH user
    pub user: String,
    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Authentication method
    #[serde(default)]
    pub auth: RemoteAuth,
    /// Connect timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Deployment overrides
    #[serde(default)]
    pub deploy: RemoteDeploy,
}

/// Overrides for the remote deployment defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteDeploy {
    /// Container image for the CUDA path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Container name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,
    /// Docker network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Extra container arguments
    #[serde(default)]
    pub container_args: Vec<String>,
    /// Port the engine listens on inside the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<u16>,
    /// Port published on the remote host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_port: Option<u16>,
    /// Install script for the native path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_script_url: Option<String>,
    /// systemd unit name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_unit: Option<String>,
    /// Overall deployment timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Health probes before giving up
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_retries: Option<u32>,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    15
}
