//! Scripted remote shell for provisioning tests

#![allow(dead_code)]

use async_trait::async_trait;
use command_executor::{Command, CommandOutput};
use remote_provisioning::{AuthMethod, Error, RemoteDeploySettings, RemoteShell, Result, SessionId};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

pub const PASSWORD: &str = "s3cr3t-deploy-pw";

/// How the fake answers `connect`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    Accept,
    RejectAuth,
    Hang,
}

#[derive(Debug, Clone)]
pub enum Reply {
    Output(CommandOutput),
    Hang,
}

pub fn ok(stdout: &str) -> Reply {
    Reply::Output(CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(0),
    })
}

pub fn fail(code: i32, stderr: &str) -> Reply {
    Reply::Output(CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code: Some(code),
    })
}

struct Rule {
    needle: String,
    replies: VecDeque<Reply>,
}

/// One executed command as the shell saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub display: String,
    pub debug: String,
    pub secret: Option<String>,
}

/// Matches commands by substring; the most recently added rule wins
///
/// A rule's replies are consumed in order and the last one repeats.
/// Unmatched commands succeed with empty output.
pub struct FakeShell {
    rules: Mutex<Vec<Rule>>,
    log: Mutex<Vec<Recorded>>,
    connect_mode: Mutex<ConnectMode>,
    next_id: AtomicU64,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
}

impl FakeShell {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            connect_mode: Mutex::new(ConnectMode::Accept),
            next_id: AtomicU64::new(1),
            connects: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn on(&self, needle: &str, replies: Vec<Reply>) -> &Self {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            replies: replies.into(),
        });
        self
    }

    pub fn set_connect_mode(&self, mode: ConnectMode) {
        *self.connect_mode.lock().unwrap() = mode;
    }

    pub fn commands(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    pub fn displays(&self) -> Vec<String> {
        self.commands().into_iter().map(|c| c.display).collect()
    }

    pub fn position(&self, needle: &str) -> Option<usize> {
        self.displays().iter().position(|d| d.contains(needle))
    }

    pub fn count(&self, needle: &str) -> usize {
        self.displays().iter().filter(|d| d.contains(needle)).count()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn reply_for(&self, display: &str) -> Reply {
        let mut rules = self.rules.lock().unwrap();
        let Some(rule) = rules.iter_mut().rev().find(|r| display.contains(&r.needle)) else {
            return ok("");
        };
        if rule.replies.len() > 1 {
            rule.replies.pop_front().unwrap()
        } else {
            rule.replies.front().cloned().unwrap_or_else(|| ok(""))
        }
    }
}

/// Hardware the fake host reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gpu {
    Nvidia,
    Amd,
    None,
}

impl FakeShell {
    pub fn with_host(arch: &str, gpu: Gpu) -> Self {
        let shell = Self::new();
        let yes = |on: bool| if on { ok("") } else { fail(127, "not found") };

        shell
            .on("uname -m", vec![ok(&format!("{}\n", arch))])
            .on(
                "/proc/cpuinfo",
                vec![ok("model name\t: AMD EPYC 7443P 24-Core Processor\n")],
            )
            .on("command -v docker", vec![yes(true)])
            .on("nvidia-smi", vec![yes(gpu == Gpu::Nvidia)])
            .on("/dev/nvidia0", vec![yes(gpu == Gpu::Nvidia)])
            .on("rocminfo", vec![yes(gpu == Gpu::Amd)])
            .on("/dev/kfd", vec![yes(gpu == Gpu::Amd)])
            .on("vulkaninfo", vec![yes(false)])
            .on("/dev/dri", vec![yes(gpu != Gpu::None)])
            .on("systemctl is-active", vec![ok("active\n")]);
        shell
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn connect(
        &self,
        host: &str,
        _port: u16,
        user: &str,
        _auth: &AuthMethod,
    ) -> Result<SessionId> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let mode = *self.connect_mode.lock().unwrap();
        match mode {
            ConnectMode::Accept => Ok(SessionId(self.next_id.fetch_add(1, Ordering::SeqCst))),
            ConnectMode::RejectAuth => Err(Error::Authentication {
                user: user.to_string(),
                host: host.to_string(),
            }),
            ConnectMode::Hang => futures::future::pending().await,
        }
    }

    async fn exec(&self, _session: &SessionId, command: &Command) -> Result<CommandOutput> {
        let mut owned = command.clone();
        let secret = owned.take_stdin_secret().map(|s| s.expose().to_string());
        let display = command.display();
        self.log.lock().unwrap().push(Recorded {
            display: display.clone(),
            debug: format!("{:?}", command),
            secret,
        });

        match self.reply_for(&display) {
            Reply::Output(output) => Ok(output),
            Reply::Hang => futures::future::pending().await,
        }
    }

    async fn close(&self, _session: &SessionId) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn fast_settings() -> RemoteDeploySettings {
    RemoteDeploySettings {
        install_script_url: Some("https://downloads.example.org/install-engine.sh".to_string()),
        deploy_timeout: Duration::from_secs(5),
        health_retries: 3,
        health_retry_delay: Duration::from_millis(5),
        unit_wait_retries: 2,
        unit_wait_delay: Duration::from_millis(5),
        ..Default::default()
    }
}
