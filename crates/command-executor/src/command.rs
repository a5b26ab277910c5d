//! Command type for building executable commands

use crate::secret::Secret;
use async_process::Command as AsyncCommand;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::PathBuf;

/// A command to be executed
///
/// This is a builder that is converted to an `async_process::Command` only
/// when it runs. Unlike `AsyncCommand` it is `Clone`, can be inspected, and
/// can be wrapped by [`crate::ssh::SshConfig::wrap`] or [`crate::sudo`].
#[derive(Clone)]
pub struct Command {
    program: OsString,
    args: Vec<OsString>,
    env: HashMap<OsString, OsString>,
    current_dir: Option<PathBuf>,
    /// Written to the child's stdin followed by a newline, then stdin closes
    stdin_secret: Option<Secret>,
}

impl Command {
    /// Create a new command for the given program
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: Vec::new(),
            env: HashMap::new(),
            current_dir: None,
            stdin_secret: None,
        }
    }

    /// Add an argument to the command
    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    /// Add multiple arguments to the command
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self.arg(arg);
        }
        self
    }

    /// Set an environment variable
    pub fn env<K, V>(&mut self, key: K, val: V) -> &mut Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.env
            .insert(key.as_ref().to_owned(), val.as_ref().to_owned());
        self
    }

    /// Set the working directory for the command
    pub fn current_dir<P: AsRef<std::path::Path>>(&mut self, dir: P) -> &mut Self {
        self.current_dir = Some(dir.as_ref().to_owned());
        self
    }

    /// Feed a secret to the process over stdin
    pub fn stdin_secret(&mut self, secret: Secret) -> &mut Self {
        self.stdin_secret = Some(secret);
        self
    }

    /// Get the program name
    pub fn get_program(&self) -> &OsStr {
        &self.program
    }

    /// Get the arguments
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Get the environment variables
    pub fn get_envs(&self) -> &HashMap<OsString, OsString> {
        &self.env
    }

    /// Get the current directory
    pub fn get_current_dir(&self) -> Option<&std::path::Path> {
        self.current_dir.as_deref()
    }

    /// Check if this command carries a stdin secret
    pub fn has_stdin_secret(&self) -> bool {
        self.stdin_secret.is_some()
    }

    /// Take the stdin secret, leaving `None`
    pub fn take_stdin_secret(&mut self) -> Option<Secret> {
        self.stdin_secret.take()
    }

    /// Printable form for logs: program and arguments only
    ///
    /// Environment values and the stdin secret are never included.
    pub fn display(&self) -> String {
        let mut out = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            out.push(' ');
            out.push_str(&arg.to_string_lossy());
        }
        out
    }

    /// Prepare this command for execution by converting to an `async_process::Command`
    ///
    /// The child is killed if its handle is dropped, so an abandoned
    /// (timed out) execution never outlives its caller.
    pub fn prepare(&self) -> AsyncCommand {
        let mut cmd = AsyncCommand::new(&self.program);
        cmd.args(&self.args);
        for (key, val) in &self.env {
            cmd.env(key, val);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(true);
        cmd
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Environment values may carry credentials (e.g. SSHPASS); show keys only.
        let env_keys: Vec<_> = self.env.keys().collect();
        f.debug_struct("Command")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env_keys", &env_keys)
            .field("current_dir", &self.current_dir)
            .field("stdin_secret", &self.stdin_secret)
            .finish()
    }
}

/// Builder pattern helper
impl Command {
    /// Create a builder for this command (for chaining)
    pub fn builder<S: AsRef<OsStr>>(program: S) -> CommandBuilder {
        CommandBuilder(Command::new(program))
    }
}

/// Builder wrapper for more ergonomic command construction
pub struct CommandBuilder(Command);

impl CommandBuilder {
    /// Add an argument
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.0.arg(arg);
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.0.args(args);
        self
    }

    /// Set an environment variable
    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.0.env(key, val);
        self
    }

    /// Set the working directory
    pub fn current_dir<P: AsRef<std::path::Path>>(mut self, dir: P) -> Self {
        self.0.current_dir(dir);
        self
    }

    /// Feed a secret over stdin
    pub fn stdin_secret(mut self, secret: Secret) -> Self {
        self.0.stdin_secret(secret);
        self
    }

    /// Build the command
    pub fn build(self) -> Command {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_with_args() {
        let mut cmd = Command::new("ls");
        cmd.arg("-la").arg("/tmp");

        assert_eq!(cmd.get_program(), "ls");
        assert_eq!(cmd.get_args().len(), 2);
        assert_eq!(cmd.get_args()[0], "-la");
        assert_eq!(cmd.get_args()[1], "/tmp");
    }

    #[test]
    fn test_command_builder() {
        let cmd = Command::builder("echo")
            .arg("hello")
            .arg("world")
            .env("TEST_VAR", "test_value")
            .current_dir("/tmp")
            .build();

        assert_eq!(cmd.get_args().len(), 2);
        assert_eq!(
            cmd.get_envs().get(OsStr::new("TEST_VAR")),
            Some(&OsString::from("test_value"))
        );
        assert_eq!(cmd.get_current_dir(), Some(std::path::Path::new("/tmp")));
    }

    #[test]
    fn test_display_omits_secret_and_env() {
        let cmd = Command::builder("sudo")
            .args(["-S", "systemctl", "restart", "llama"])
            .env("SSHPASS", "hunter2")
            .stdin_secret(Secret::new("hunter2"))
            .build();

        assert_eq!(cmd.display(), "sudo -S systemctl restart llama");
        assert!(cmd.has_stdin_secret());

        let debug = format!("{:?}", cmd);
        assert!(debug.contains("SSHPASS"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_take_stdin_secret() {
        let mut cmd = Command::builder("cat")
            .stdin_secret(Secret::new("pw"))
            .build();

        let secret = cmd.take_stdin_secret().unwrap();
        assert_eq!(secret.expose(), "pw");
        assert!(!cmd.has_stdin_secret());
    }
}
