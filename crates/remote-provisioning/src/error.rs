//! Error types for remote provisioning

use std::time::Duration;
use thiserror::Error;

/// Errors raised while connecting to or deploying on a remote host
#[derive(Error, Debug)]
pub enum Error {
    /// The host could not be reached or the SSH session broke
    #[error("Connection to {host} failed: {reason}")]
    Connection {
        /// Remote host
        host: String,
        /// ssh diagnostics
        reason: String,
    },

    /// Credentials were rejected
    #[error("Authentication failed for {user}@{host}")]
    Authentication {
        /// Remote user
        user: String,
        /// Remote host
        host: String,
    },

    /// The connect phase exceeded its bound
    #[error("Connecting to {host} timed out after {after:?}")]
    ConnectTimeout {
        /// Remote host
        host: String,
        /// Configured bound
        after: Duration,
    },

    /// The whole deployment exceeded its bound
    #[error("Deployment timed out after {after:?}")]
    DeploymentTimeout {
        /// Configured bound
        after: Duration,
    },

    /// The remote machine cannot run the engine
    #[error("Unsupported hardware: {0}")]
    UnsupportedHardware(String),

    /// A remote command exited unsuccessfully
    #[error("Remote command `{command}` failed (exit code {exit_code:?}): {stderr}")]
    CommandFailed {
        /// Printable command line, never containing secrets
        command: String,
        /// Exit code, `None` if killed
        exit_code: Option<i32>,
        /// Trimmed standard error
        stderr: String,
    },

    /// The deployed engine never answered its health endpoint
    #[error("Health check failed: {0}")]
    HealthCheck(String),

    /// Another deployment currently holds the credentials
    #[error("A deployment is already in progress")]
    DeploymentInProgress,

    /// Unknown session handle
    #[error("Unknown remote session {0}")]
    UnknownSession(u64),

    /// Deployment settings are incomplete
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local command execution failure
    #[error("Command execution error: {0}")]
    CommandExecutor(#[from] command_executor::Error),

    /// Local I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for provisioning operations
pub type Result<T> = std::result::Result<T, Error>;
