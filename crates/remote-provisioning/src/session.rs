//! Remote shell sessions
//!
//! [`RemoteShell`] is the seam between provisioning logic and the transport.
//! [`OpenSshShell`] drives the OpenSSH client: `connect` authenticates a
//! ControlMaster connection once, later commands reuse its socket, and
//! `close` asks the master to exit.

use crate::error::{Error, Result};
use async_trait::async_trait;
use command_executor::{Command, CommandOutput, Executor, Secret, SshConfig};
use futures::lock::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// How to authenticate the SSH session
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// Plain password authentication
    Password(Secret),
    /// Answer the keyboard-interactive prompt with the password
    KeyboardInteractive(Secret),
}

impl AuthMethod {
    /// The credential, also used for `sudo` on the remote host
    pub fn secret(&self) -> &Secret {
        match self {
            AuthMethod::Password(secret) | AuthMethod::KeyboardInteractive(secret) => secret,
        }
    }
}

/// Remote endpoint plus credentials
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Hostname or IP
    pub host: String,
    /// SSH port
    pub port: u16,
    /// Remote user
    pub user: String,
    /// Credential
    pub auth: AuthMethod,
    /// Bound on the connect phase
    pub connect_timeout: Duration,
}

impl ConnectionConfig {
    /// Password login on port 22 with a 15s connect bound
    pub fn new(host: impl Into<String>, user: impl Into<String>, password: Secret) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            auth: AuthMethod::Password(password),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// Opaque handle to an open session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Executes commands on a remote host
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Open an authenticated session
    async fn connect(&self, host: &str, port: u16, user: &str, auth: &AuthMethod)
    -> Result<SessionId>;

    /// Run `command` to completion in `session`
    ///
    /// A stdin secret on `command` is delivered over the session's stdin.
    async fn exec(&self, session: &SessionId, command: &Command) -> Result<CommandOutput>;

    /// Tear the session down
    async fn close(&self, session: &SessionId) -> Result<()>;
}

/// [`RemoteShell`] backed by the `ssh` (and `sshpass`) binaries
pub struct OpenSshShell {
    executor: Executor,
    control_dir: TempDir,
    next_id: AtomicU64,
    connect_timeout: Option<Duration>,
    sessions: Mutex<HashMap<SessionId, SshConfig>>,
}

impl OpenSshShell {
    /// Create a shell with a private directory for control sockets
    pub fn new() -> Result<Self> {
        let control_dir = tempfile::Builder::new()
            .prefix("lifecycle-ssh-")
            .tempdir()?;
        Ok(Self {
            executor: Executor::new("ssh"),
            control_dir,
            next_id: AtomicU64::new(1),
            connect_timeout: None,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Hand `timeout` to ssh as its own `ConnectTimeout`
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    async fn config(&self, session: &SessionId) -> Result<SshConfig> {
        self.sessions
            .lock()
            .await
            .get(session)
            .cloned()
            .ok_or(Error::UnknownSession(session.0))
    }
}

/// Map a failed master start to a typed error
///
/// sshpass exits 5 on a rejected password; ssh itself exits 255.
fn classify_connect_failure(host: &str, user: &str, output: &CommandOutput) -> Error {
    let stderr = output.stderr.trim();
    if output.exit_code == Some(5) || stderr.contains("Permission denied") {
        return Error::Authentication {
            user: user.to_string(),
            host: host.to_string(),
        };
    }
    let reason = if stderr.is_empty() {
        format!("ssh exited with {:?}", output.exit_code)
    } else {
        stderr.to_string()
    };
    Error::Connection {
        host: host.to_string(),
        reason,
    }
}

#[async_trait]
impl RemoteShell for OpenSshShell {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        user: &str,
        auth: &AuthMethod,
    ) -> Result<SessionId> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let socket = self.control_dir.path().join(format!("{}.sock", id.0));

        // The stored config never carries the password; the master socket
        // authenticates every later command.
        let mut config = SshConfig::new(host)
            .with_user(user)
            .with_port(port)
            .with_control_path(socket);
        if let Some(timeout) = self.connect_timeout {
            config = config.with_connect_timeout(timeout);
        }
        let authenticated = match auth {
            AuthMethod::Password(secret) => config.clone().with_password(secret.clone()),
            AuthMethod::KeyboardInteractive(secret) => {
                config.clone().with_keyboard_interactive(secret.clone())
            }
        };

        debug!(host, port, user, session = %id, "opening SSH master connection");
        let output = self
            .executor
            .execute(authenticated.master_command())
            .await
            .map_err(|e| match e {
                command_executor::Error::CommandNotFound { command } => Error::Connection {
                    host: host.to_string(),
                    reason: format!("{} is not installed", command),
                },
                other => Error::CommandExecutor(other),
            })?;

        if !output.success() {
            return Err(classify_connect_failure(host, user, &output));
        }

        info!(host, user, session = %id, "SSH session established");
        self.sessions.lock().await.insert(id, config);
        Ok(id)
    }

    async fn exec(&self, session: &SessionId, command: &Command) -> Result<CommandOutput> {
        let config = self.config(session).await?;
        let output = self.executor.execute(config.wrap(command)).await?;

        // 255 is ssh's own failure code, not the remote command's.
        if output.exit_code == Some(255) {
            return Err(Error::Connection {
                host: config.host().to_string(),
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    async fn close(&self, session: &SessionId) -> Result<()> {
        let Some(config) = self.sessions.lock().await.remove(session) else {
            return Ok(());
        };

        let output = self.executor.execute(config.exit_command()).await?;
        if !output.success() {
            warn!(
                host = config.host(),
                session = %session,
                "SSH master did not exit cleanly: {}",
                output.stderr.trim()
            );
        }
        debug!(host = config.host(), session = %session, "SSH session closed");
        Ok(())
    }
}
