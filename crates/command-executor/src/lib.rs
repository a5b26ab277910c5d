//! Runtime-agnostic command execution library
//!
//! Builds commands once and runs them locally, through an OpenSSH client, or
//! under `sudo`. Secrets destined for a child process travel over its stdin
//! via [`Secret`] and never appear in argument vectors or log output.

#![warn(missing_docs)]

pub mod command;
pub mod error;
pub mod executor;
pub mod secret;
pub mod ssh;
pub mod sudo;

pub use command::{Command, CommandBuilder};
pub use error::{Error, Result};
pub use executor::{CommandOutput, Executor};
pub use secret::Secret;
pub use ssh::{SshConfig, format_remote_command, shell_escape};
pub use sudo::sudo;
