//! Configuration parser with environment variable substitution

use crate::{Config, ConfigError, PortMapping, RemoteAuth, RemoteConfig, Result, Service};
use command_executor::Secret;
use regex::Regex;
use remote_provisioning::{AuthMethod, ConnectionConfig, RemoteDeploySettings};
use service_orchestration::{
    ContainerConfig, DependencyGraph, ManagerSettings, NativeConfig, PortBinding,
    ServiceDescriptor,
};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Parse a YAML configuration file
pub fn parse_file(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    debug!(path = %path.display(), "reading services file");
    let content = std::fs::read_to_string(path)?;
    parse_str(&content)
}

/// Parse YAML configuration from a string
///
/// `${VAR}` and `${VAR:-default}` are substituted before parsing; comment
/// lines are left alone.
pub fn parse_str(content: &str) -> Result<Config> {
    let substituted = content
        .lines()
        .map(|line| {
            if line.trim_start().starts_with('#') {
                Ok(line.to_string())
            } else {
                substitute_env_vars(line)
            }
        })
        .collect::<Result<Vec<_>>>()?
        .join("\n");

    let config: Config = serde_yaml::from_str(&substituted)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.version != "1.0" {
        return Err(ConfigError::ValidationError(format!(
            "Unsupported version: {}, expected 1.0",
            config.version
        )));
    }

    for (name, service) in &config.services {
        if name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "Service names must not be empty".to_string(),
            ));
        }

        for dep in &service.dependencies {
            if !config.services.contains_key(dep) {
                return Err(ConfigError::ValidationError(format!(
                    "Service '{}' depends on unknown service '{}'",
                    name, dep
                )));
            }
        }

        if let Some(modes) = &service.allowed_modes {
            if modes.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Service '{}' has an empty allowed_modes list",
                    name
                )));
            }
        }

        if let Some(container) = &service.containerized {
            if container.image.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Service '{}' has an empty container image",
                    name
                )));
            }
            for port in &container.ports {
                port_binding(port).map_err(|e| {
                    ConfigError::ValidationError(format!("Service '{}': {}", name, e))
                })?;
            }
        }
    }

    for name in &config.settings.always_checked {
        if !config.services.contains_key(name) {
            return Err(ConfigError::ServiceNotFound(name.clone()));
        }
    }

    // Cycles are reported with the service that closes them.
    let descriptors = to_descriptors(config)?;
    DependencyGraph::new(&descriptors)
        .and_then(|graph| graph.start_order())
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    Ok(())
}

/// Substitute environment variables in a string
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([^}]+)\}")?;
    let mut result = input.to_string();
    let mut errors = Vec::new();

    for cap in re.captures_iter(input) {
        let full_match = &cap[0];
        let var_expr = &cap[1];

        // Handle default values: ${VAR:-default}
        let (var_name, default_value) = match var_expr.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (var_expr, None),
        };

        match std::env::var(var_name) {
            Ok(value) => result = result.replace(full_match, &value),
            Err(_) => match default_value {
                Some(default) => result = result.replace(full_match, default),
                None => errors.push(var_name.to_string()),
            },
        }
    }

    if !errors.is_empty() {
        return Err(ConfigError::EnvVarNotFound(errors.join(", ")));
    }

    Ok(result)
}

fn port_binding(port: &PortMapping) -> std::result::Result<PortBinding, String> {
    match port {
        PortMapping::Simple(port) => Ok(PortBinding {
            host: *port,
            container: *port,
        }),
        PortMapping::Full(mapping) => mapping.parse(),
    }
}

fn to_descriptor(name: &str, service: &Service) -> Result<ServiceDescriptor> {
    let mut descriptor = ServiceDescriptor::new(name).critical(service.critical);
    descriptor.dependencies = service.dependencies.clone();
    descriptor.capabilities = service.capabilities.iter().cloned().collect();
    descriptor.allowed_modes = service.allowed_modes.clone();

    if let Some(container) = &service.containerized {
        let ports = container
            .ports
            .iter()
            .map(port_binding)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ConfigError::ValidationError(format!("Service '{}': {}", name, e)))?;

        let mut config = ContainerConfig::new(&container.image);
        config.container_name = container.container_name.clone();
        config.ports = ports;
        config.env = container.env.clone();
        config.volumes = container.volumes.clone();
        config.network = container.network.clone();
        config.health_url = container.health_url.clone();
        descriptor = descriptor.containerized(config);
    }

    if let Some(native) = &service.native {
        let mut config = NativeConfig::new(&native.binary);
        config.args = native.args.clone();
        config.env = native.env.clone();
        config.working_dir = native.working_dir.clone();
        config.health_url = native.health_url.clone();
        descriptor = descriptor.native(config);
    }

    if let Some(endpoint) = &service.endpoint {
        descriptor = descriptor.endpoint(endpoint);
    }
    if let Some(path) = &service.health_path {
        descriptor = descriptor.health_path(path);
    }

    Ok(descriptor)
}

/// Convert every service into a descriptor, in declaration order
pub fn to_descriptors(config: &Config) -> Result<Vec<ServiceDescriptor>> {
    config
        .services
        .iter()
        .map(|(name, service)| to_descriptor(name, service))
        .collect()
}

/// Manager settings with file values over the defaults
pub fn to_manager_settings(config: &Config) -> ManagerSettings {
    let settings = &config.settings;
    let defaults = ManagerSettings::default();

    ManagerSettings {
        health_check_interval: settings
            .health_check_interval
            .map(Duration::from_secs)
            .unwrap_or(defaults.health_check_interval),
        startup_timeout: settings
            .startup_timeout
            .map(Duration::from_secs)
            .unwrap_or(defaults.startup_timeout),
        health_poll_interval: settings
            .health_poll_interval_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.health_poll_interval),
        restart_max_attempts: settings
            .restart_max_attempts
            .unwrap_or(defaults.restart_max_attempts),
        restart_base_delay: settings
            .restart_base_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.restart_base_delay),
        always_checked: settings.always_checked.clone(),
    }
}

/// Connection parameters for `remote`, authenticating with `password`
pub fn to_connection_config(remote: &RemoteConfig, password: Secret) -> ConnectionConfig {
    let auth = match remote.auth {
        RemoteAuth::Password => AuthMethod::Password(password),
        RemoteAuth::KeyboardInteractive => AuthMethod::KeyboardInteractive(password),
    };
    ConnectionConfig {
        host: remote.host.clone(),
        port: remote.port,
        user: remote.user.clone(),
        auth,
        connect_timeout: Duration::from_secs(remote.connect_timeout),
    }
}

/// Deployment settings with file values over the defaults
pub fn to_deploy_settings(remote: &RemoteConfig) -> RemoteDeploySettings {
    let deploy = &remote.deploy;
    let defaults = RemoteDeploySettings::default();

    RemoteDeploySettings {
        image: deploy.image.clone().unwrap_or(defaults.image),
        container_name: deploy
            .container_name
            .clone()
            .unwrap_or(defaults.container_name),
        network: deploy.network.clone().unwrap_or(defaults.network),
        container_args: deploy.container_args.clone(),
        container_port: deploy.container_port.unwrap_or(defaults.container_port),
        service_port: deploy.service_port.unwrap_or(defaults.service_port),
        install_script_url: deploy
            .install_script_url
            .clone()
            .or(defaults.install_script_url),
        service_unit: deploy.service_unit.clone().unwrap_or(defaults.service_unit),
        deploy_timeout: deploy
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(defaults.deploy_timeout),
        health_retries: deploy.health_retries.unwrap_or(defaults.health_retries),
        ..defaults
    }
}
