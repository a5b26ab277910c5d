//! Lifecycle context
//!
//! Carries the runtime spawner and every external collaborator the engine
//! talks to. It is built once at startup and handed to
//! [`crate::manager::ServiceManager`]; nothing in the crate reaches for
//! process-wide state.

use crate::adaptive::{Clock, SystemClock};
use crate::backend::ConfigBackend;
use crate::container::{ContainerRuntime, DockerCli};
use crate::events::EventBus;
use crate::health::{HttpProbe, ReqwestProbe};
use crate::mode::HostPlatform;
use crate::native::{NativeLauncher, ProcessLauncher};
use async_runtime_compat::Spawner;
use std::sync::Arc;

/// Collaborators and runtime hooks for the engine
#[derive(Clone)]
pub struct LifecycleContext {
    /// Runtime spawner for the health loop
    pub spawner: Arc<dyn Spawner>,

    /// Persisted mode overrides
    pub backend: Arc<dyn ConfigBackend>,

    /// Container runtime client
    pub container_runtime: Arc<dyn ContainerRuntime>,

    /// Native process launcher
    pub native_launcher: Arc<dyn NativeLauncher>,

    /// HTTP client for reachability probes
    pub probe: Arc<dyn HttpProbe>,

    /// Lifecycle event fan-out
    pub events: Arc<EventBus>,

    /// Host platform for the mode capability matrix
    pub platform: HostPlatform,

    /// Time source for idle tracking and health scheduling
    pub clock: Arc<dyn Clock>,
}

impl LifecycleContext {
    /// Context with the default collaborators
    ///
    /// The spawner comes from the runtime feature selected at compile time;
    /// containers go through the `docker` CLI and native services are
    /// spawned as child processes.
    pub fn new(backend: Arc<dyn ConfigBackend>) -> Self {
        let probe: Arc<dyn HttpProbe> = Arc::new(ReqwestProbe::new());
        Self {
            spawner: async_runtime_compat::default_spawner(),
            backend,
            container_runtime: Arc::new(DockerCli::new()),
            native_launcher: Arc::new(ProcessLauncher::new(probe.clone())),
            probe,
            events: Arc::new(EventBus::new()),
            platform: HostPlatform::current(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the spawner
    pub fn with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Self {
        self.spawner = spawner;
        self
    }

    /// Replace the container runtime
    pub fn with_container_runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.container_runtime = runtime;
        self
    }

    /// Replace the native launcher
    pub fn with_native_launcher(mut self, launcher: Arc<dyn NativeLauncher>) -> Self {
        self.native_launcher = launcher;
        self
    }

    /// Replace the HTTP probe
    pub fn with_probe(mut self, probe: Arc<dyn HttpProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Override the detected platform
    pub fn with_platform(mut self, platform: HostPlatform) -> Self {
        self.platform = platform;
        self
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
