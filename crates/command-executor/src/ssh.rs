//! SSH remote execution using the OpenSSH CLI
//!
//! Commands are wrapped into `ssh` invocations. A control socket lets one
//! authenticated master connection carry every subsequent command, so the
//! password is only needed once per session. Password authentication goes
//! through `sshpass -e`, which reads it from the `SSHPASS` environment
//! variable rather than the command line.

use crate::command::Command;
use crate::secret::Secret;
use std::path::PathBuf;
use std::time::Duration;

/// SSH connection configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Target host (hostname or IP)
    host: String,
    /// SSH user (optional, uses system default if not specified)
    user: Option<String>,
    /// SSH port (optional, defaults to 22)
    port: Option<u16>,
    /// Control socket shared by the master and its commands
    control_path: Option<PathBuf>,
    /// TCP connect timeout handed to ssh
    connect_timeout: Option<Duration>,
    /// Password for password/keyboard-interactive authentication
    password: Option<Secret>,
    /// Prefer keyboard-interactive over plain password auth
    keyboard_interactive: bool,
}

impl SshConfig {
    /// Create a new SSH configuration for the given host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            control_path: None,
            connect_timeout: None,
            password: None,
            keyboard_interactive: false,
        }
    }

    /// Set the SSH user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Multiplex commands over a control socket at `path`
    pub fn with_control_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.control_path = Some(path.into());
        self
    }

    /// Bound the TCP connect phase
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Authenticate with a password
    pub fn with_password(mut self, password: Secret) -> Self {
        self.password = Some(password);
        self.keyboard_interactive = false;
        self
    }

    /// Authenticate by answering the keyboard-interactive prompt
    pub fn with_keyboard_interactive(mut self, password: Secret) -> Self {
        self.password = Some(password);
        self.keyboard_interactive = true;
        self
    }

    /// Remote host
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Remote user, if set
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Get the host string (user@host if user is specified)
    pub fn host_string(&self) -> String {
        if let Some(user) = &self.user {
            format!("{}@{}", user, self.host)
        } else {
            self.host.clone()
        }
    }

    /// Command that opens a background master connection on the control socket
    pub fn master_command(&self) -> Command {
        let mut ssh = self.base_command();
        ssh.args(["-M", "-f", "-N", "-o", "ControlPersist=yes"]);
        ssh.arg(self.host_string());
        self.authenticated(ssh)
    }

    /// Command that asks the master connection to exit
    pub fn exit_command(&self) -> Command {
        let mut ssh = self.base_command();
        ssh.args(["-O", "exit"]);
        ssh.arg(self.host_string());
        ssh
    }

    /// Wrap `remote` so it runs on the configured host
    ///
    /// Arguments are shell-escaped for the remote shell. A stdin secret
    /// carried by `remote` moves to the ssh process, which forwards it.
    pub fn wrap(&self, remote: &Command) -> Command {
        let mut remote = remote.clone();
        let secret = remote.take_stdin_secret();

        let mut ssh = self.base_command();
        ssh.arg(self.host_string());
        ssh.arg(format_remote_command(&remote));
        if let Some(secret) = secret {
            ssh.stdin_secret(secret);
        }

        // With a live master the password is never needed again.
        if self.control_path.is_some() {
            ssh
        } else {
            self.authenticated(ssh)
        }
    }

    fn base_command(&self) -> Command {
        let mut ssh = Command::new("ssh");

        if let Some(port) = self.port {
            ssh.arg("-p").arg(port.to_string());
        }

        if let Some(control) = &self.control_path {
            ssh.arg("-S").arg(control.to_string_lossy().to_string());
        }

        if let Some(timeout) = self.connect_timeout {
            ssh.arg("-o")
                .arg(format!("ConnectTimeout={}", timeout.as_secs().max(1)));
        }

        ssh.args(["-o", "StrictHostKeyChecking=accept-new"]);

        if self.password.is_some() {
            let method = if self.keyboard_interactive {
                "keyboard-interactive"
            } else {
                "password"
            };
            ssh.arg("-o")
                .arg(format!("PreferredAuthentications={}", method));
            ssh.args(["-o", "NumberOfPasswordPrompts=1"]);
        } else {
            ssh.args(["-o", "BatchMode=yes"]);
        }

        ssh
    }

    /// Route through `sshpass -e` when a password is configured
    fn authenticated(&self, ssh: Command) -> Command {
        let Some(password) = &self.password else {
            return ssh;
        };

        let mut ssh = ssh;
        let secret = ssh.take_stdin_secret();

        let mut wrapped = Command::new("sshpass");
        wrapped.arg("-e");
        wrapped.arg(ssh.get_program());
        wrapped.args(ssh.get_args());
        wrapped.env("SSHPASS", password.expose());
        if let Some(secret) = secret {
            wrapped.stdin_secret(secret);
        }
        wrapped
    }
}

/// Format a command for remote execution via SSH
pub fn format_remote_command(cmd: &Command) -> String {
    let program = cmd.get_program().to_string_lossy();
    let args: Vec<String> = cmd
        .get_args()
        .iter()
        .map(|arg| shell_escape(&arg.to_string_lossy()))
        .collect();

    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Escape a string for safe inclusion in a POSIX shell command
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.contains(|c: char| c.is_whitespace() || "\"'\\$`!*?<>|&;()[]{}#~".contains(c)) {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    } else {
        s.to_string()
    }
}
