//! One-shot command execution

use crate::command::Command;
use crate::error::{Error, Result};
use async_process::Stdio;
use futures::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
    /// Exit code, `None` when terminated by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Returns true if the command exited with code 0
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Trimmed stdout, the common case for probe commands
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Runs commands on the local host and captures their output
#[derive(Debug, Clone)]
pub struct Executor {
    /// Name used to tag log lines
    name: String,
}

impl Executor {
    /// Create a new executor tagged with `name` in logs
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Get the executor name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute a command to completion
    ///
    /// A stdin secret, if present, is written followed by a newline and stdin
    /// is closed before output is collected. Dropping the returned future
    /// kills the child.
    pub async fn execute(&self, mut command: Command) -> Result<CommandOutput> {
        let secret = command.take_stdin_secret();
        let shown = command.display();
        debug!(executor = %self.name, command = %shown, "executing");

        let mut cmd = command.prepare();
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(if secret.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::CommandNotFound {
                    command: command.get_program().to_string_lossy().into_owned(),
                }
            } else {
                Error::spawn_failed(format!("{}: {}", shown, e))
            }
        })?;

        if let (Some(secret), Some(mut stdin)) = (secret, child.stdin.take()) {
            // A child that exits without reading stdin surfaces through its exit code.
            let written = async {
                stdin.write_all(secret.expose().as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await
            }
            .await;
            if let Err(e) = written {
                warn!(executor = %self.name, command = %shown, "stdin write failed: {}", e);
            }
        }

        let output = child.output().await?;
        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };

        debug!(
            executor = %self.name,
            command = %shown,
            exit_code = ?result.exit_code,
            "finished"
        );
        Ok(result)
    }
}
