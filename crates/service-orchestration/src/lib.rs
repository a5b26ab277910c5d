//! # Service orchestration
//!
//! Lifecycle engine for a set of interdependent local and remote services:
//! registration, dependency-ordered start and stop, per-mode execution
//! strategies, exponential-backoff restarts and adaptive health polling.
//!
//! ## Example
//!
//! ```no_run
//! use service_orchestration::{
//!     LifecycleContext, ManagerSettings, MemoryConfigBackend, NativeConfig, ServiceDescriptor,
//!     ServiceManager,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let context = LifecycleContext::new(Arc::new(MemoryConfigBackend::new()));
//! let manager = ServiceManager::new(context, ManagerSettings::default());
//!
//! let mut native = NativeConfig::new("llama-server");
//! native.health_url = Some("http://127.0.0.1:8091/health".to_string());
//! manager
//!     .register_service(ServiceDescriptor::new("llama-engine").critical(true).native(native))
//!     .await;
//!
//! let result = manager.start_all_services().await;
//! assert!(result.success, "{:?}", result.error);
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod adaptive;
pub mod backend;
pub mod container;
pub mod context;
pub mod descriptor;
pub mod events;
pub mod health;
pub mod manager;
pub mod mode;
pub mod native;
pub mod resolver;
pub mod state;
pub mod strategy;

pub use adaptive::{AdaptiveHealthMonitor, AdaptiveMode, Clock, SystemClock};
pub use backend::{ConfigBackend, MemoryConfigBackend, ServiceOverride};
pub use container::{
    ContainerCreateSpec, ContainerInspect, ContainerRuntime, ContainerSummary, DockerCli,
};
pub use context::LifecycleContext;
pub use descriptor::{
    ContainerConfig, DeploymentMode, ModeConfigs, NativeConfig, PortBinding, ServiceDescriptor,
};
pub use events::{EventBus, EventKind, LifecycleEvent};
pub use health::{HealthStatus, HttpProbe, ReqwestProbe};
pub use manager::{ManagerSettings, ServiceManager, ServiceStatus};
pub use mode::{HostPlatform, ModeRouter};
pub use native::{NativeHandle, NativeLauncher, ProcessLauncher};
pub use resolver::{DependencyGraph, resolve, shutdown_order};
pub use state::{ServiceRuntime, ServiceState, Transition};
pub use strategy::{ContainerStrategy, EndpointStrategy, LiveHandle, ModeStrategy, NativeStrategy};

use serde::{Deserialize, Serialize};

/// Error types for orchestration operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Descriptor rejected at registration or resolution
    #[error("Registration error: {0}")]
    Registration(String),

    /// Dependency cycle
    #[error("Dependency cycle detected at service '{node}'")]
    Cycle {
        /// A service on the cycle
        node: String,
    },

    /// Illegal state transition; logged, never returned by public operations
    #[error("Invalid transition for '{service}': {from} -> {to}")]
    InvalidTransition {
        /// Service name
        service: String,
        /// Current state
        from: ServiceState,
        /// Requested state
        to: ServiceState,
    },

    /// Service did not pass a health check within the startup timeout
    #[error("Service '{service}' did not become healthy: {last_error}")]
    HealthTimeout {
        /// Service name
        service: String,
        /// Last probe failure
        last_error: String,
    },

    /// Restart budget exhausted
    #[error("Service '{service}' exceeded {attempts} restart attempts")]
    MaxRestartsExceeded {
        /// Service name
        service: String,
        /// Configured maximum
        attempts: u32,
    },

    /// Service not found
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// No acceptable deployment mode
    #[error("Mode not allowed for '{service}': {reason}")]
    ModeNotAllowed {
        /// Service name
        service: String,
        /// Why
        reason: String,
    },

    /// Container runtime failure
    #[error("Container {operation} failed: {reason}")]
    Container {
        /// Runtime operation
        operation: String,
        /// Runtime error output
        reason: String,
    },

    /// Native launcher failure
    #[error("Native launch of '{service}' failed: {reason}")]
    Native {
        /// Service name
        service: String,
        /// Why
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP probe transport failure
    #[error("Probe of {url} failed: {reason}")]
    Probe {
        /// Probed URL
        url: String,
        /// Transport error
        reason: String,
    },

    /// Command executor errors
    #[error("Command execution error: {0}")]
    CommandExecutor(#[from] command_executor::Error),
}

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a public manager operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    /// Whether the operation succeeded
    pub success: bool,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OperationResult {
    /// Successful outcome
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// Failed outcome
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
        }
    }

    /// Translate an internal result
    pub fn from_result<T>(result: Result<T>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}
