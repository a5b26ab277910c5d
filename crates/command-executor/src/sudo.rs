//! Privilege escalation through `sudo`
//!
//! `sudo -S` reads the password from stdin, so the secret rides the
//! command's stdin channel instead of its argument list. The empty prompt
//! (`-p ''`) keeps sudo from writing a prompt into captured stderr.

use crate::{Command, Secret};

/// Wrap `command` to run under `sudo`, answering the password prompt from `password`
///
/// Environment and working directory carry over to the wrapper.
pub fn sudo(command: &Command, password: &Secret) -> Command {
    let mut wrapped = Command::new("sudo");
    wrapped.args(["-S", "-p", ""]);
    wrapped.arg(command.get_program());
    wrapped.args(command.get_args());

    for (key, val) in command.get_envs() {
        wrapped.env(key, val);
    }
    if let Some(dir) = command.get_current_dir() {
        wrapped.current_dir(dir);
    }

    wrapped.stdin_secret(password.clone());
    wrapped
}
