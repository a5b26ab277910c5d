//! In-memory collaborators for manager tests

#![allow(dead_code)]

use async_trait::async_trait;
use service_orchestration::{
    Clock, ContainerCreateSpec, ContainerInspect, ContainerRuntime, ContainerSummary, Error,
    HealthStatus, HostPlatform, HttpProbe, LifecycleContext, LifecycleEvent, ManagerSettings,
    MemoryConfigBackend, NativeConfig, NativeHandle, NativeLauncher, Result, ServiceDescriptor,
    ServiceManager,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Shared state behind [`FakeLauncher`] and its handles
#[derive(Default)]
pub struct LauncherState {
    pub starts: Mutex<Vec<(String, Instant)>>,
    pub stops: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    unhealthy: Mutex<HashSet<String>>,
    flaky: Mutex<HashSet<String>>,
    probes: Mutex<HashMap<String, usize>>,
}

/// Native launcher that records calls and fails on demand
#[derive(Default)]
pub struct FakeLauncher {
    pub state: Arc<LauncherState>,
    pub delay: Duration,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::default(),
            delay,
        })
    }

    pub fn fail(&self, service: &str) {
        self.state.failing.lock().unwrap().insert(service.to_string());
    }

    pub fn heal(&self, service: &str) {
        self.state.failing.lock().unwrap().remove(service);
        self.state.unhealthy.lock().unwrap().remove(service);
    }

    pub fn set_unhealthy(&self, service: &str) {
        self.state.unhealthy.lock().unwrap().insert(service.to_string());
    }

    /// Fail the next probe only
    pub fn fail_next_probe(&self, service: &str) {
        self.state.flaky.lock().unwrap().insert(service.to_string());
    }

    pub fn started(&self) -> Vec<String> {
        self.state
            .starts
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn start_times(&self, service: &str) -> Vec<Instant> {
        self.state
            .starts
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == service)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state.stops.lock().unwrap().clone()
    }

    /// Health probes answered for `service` so far
    pub fn probe_count(&self, service: &str) -> usize {
        self.state
            .probes
            .lock()
            .unwrap()
            .get(service)
            .copied()
            .unwrap_or(0)
    }

    /// Wait until `service` has answered at least `count` probes
    pub async fn wait_for_probes(&self, service: &str, count: usize, within: Duration) -> bool {
        tokio::time::timeout(within, async {
            while self.probe_count(service) < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }
}

#[async_trait]
impl NativeLauncher for FakeLauncher {
    async fn start(&self, descriptor: &ServiceDescriptor) -> Result<Box<dyn NativeHandle>> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.state
            .starts
            .lock()
            .unwrap()
            .push((descriptor.name.clone(), Instant::now()));

        if self.state.failing.lock().unwrap().contains(&descriptor.name) {
            return Err(Error::Native {
                service: descriptor.name.clone(),
                reason: "exec format error".to_string(),
            });
        }
        Ok(Box::new(FakeHandle {
            service: descriptor.name.clone(),
            state: self.state.clone(),
        }))
    }
}

struct FakeHandle {
    service: String,
    state: Arc<LauncherState>,
}

#[async_trait]
impl NativeHandle for FakeHandle {
    async fn probe(&self) -> HealthStatus {
        *self
            .state
            .probes
            .lock()
            .unwrap()
            .entry(self.service.clone())
            .or_default() += 1;
        if self.state.flaky.lock().unwrap().remove(&self.service) {
            return HealthStatus::Unhealthy("connection reset".to_string());
        }
        if self.state.unhealthy.lock().unwrap().contains(&self.service) {
            return HealthStatus::Unhealthy("connection refused".to_string());
        }
        HealthStatus::Healthy
    }

    async fn stop(&self) -> Result<()> {
        self.state.stops.lock().unwrap().push(self.service.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct FakeContainer {
    name: String,
    image: String,
    running: bool,
}

/// Container runtime keeping containers in a map
#[derive(Default)]
pub struct FakeContainerRuntime {
    containers: Mutex<HashMap<String, FakeContainer>>,
    images: Mutex<HashSet<String>>,
    pub pulls: Mutex<Vec<String>>,
    pub stops: Mutex<Vec<String>>,
}

impl FakeContainerRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn running_names(&self) -> Vec<String> {
        self.containers
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.running)
            .map(|c| c.name.clone())
            .collect()
    }

    fn with<R>(&self, id: &str, f: impl FnOnce(&mut FakeContainer) -> R) -> Result<R> {
        self.containers
            .lock()
            .unwrap()
            .get_mut(id)
            .map(f)
            .ok_or_else(|| Error::Container {
                operation: "lookup".to_string(),
                reason: format!("no such container: {}", id),
            })
    }
}

#[async_trait]
impl ContainerRuntime for FakeContainerRuntime {
    async fn list_containers(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| all || c.running)
            .map(|(id, c)| ContainerSummary {
                id: id.clone(),
                name: c.name.clone(),
                image: c.image.clone(),
                state: if c.running { "running" } else { "exited" }.to_string(),
            })
            .collect())
    }

    async fn create_container(&self, spec: &ContainerCreateSpec) -> Result<String> {
        let mut containers = self.containers.lock().unwrap();
        let id = format!("c{}", containers.len() + 1);
        containers.insert(
            id.clone(),
            FakeContainer {
                name: spec.name.clone(),
                image: spec.image.clone(),
                running: false,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.with(id, |c| c.running = true)
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        self.stops.lock().unwrap().push(id.to_string());
        self.with(id, |c| c.running = false)
    }

    async fn restart_container(&self, id: &str) -> Result<()> {
        self.with(id, |c| c.running = true)
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.containers.lock().unwrap().remove(id);
        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInspect> {
        self.with(id, |c| ContainerInspect {
            id: id.to_string(),
            running: c.running,
            health: None,
            exit_code: if c.running { None } else { Some(0) },
        })
    }

    async fn logs(&self, _id: &str, _tail: usize) -> Result<String> {
        Ok(String::new())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.images.lock().unwrap().contains(image))
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        self.pulls.lock().unwrap().push(image.to_string());
        self.images.lock().unwrap().insert(image.to_string());
        Ok(())
    }
}

/// HTTP probe whose answer can be flipped
pub struct ToggleProbe {
    healthy: AtomicBool,
}

impl ToggleProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(true),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl HttpProbe for ToggleProbe {
    async fn get(&self, _url: &str, _timeout: Duration) -> Result<u16> {
        Ok(if self.healthy.load(Ordering::SeqCst) {
            200
        } else {
            503
        })
    }
}

/// Clock that only moves past real time when told to
#[derive(Default)]
pub struct ManualClock {
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        Instant::now() + *self.offset.lock().unwrap()
    }
}

/// Collaborators wired into a manager
pub struct Harness {
    pub manager: ServiceManager,
    pub launcher: Arc<FakeLauncher>,
    pub containers: Arc<FakeContainerRuntime>,
    pub probe: Arc<ToggleProbe>,
    pub backend: Arc<MemoryConfigBackend>,
    pub clock: Arc<ManualClock>,
}

pub fn fast_settings() -> ManagerSettings {
    ManagerSettings {
        health_check_interval: Duration::from_secs(1),
        startup_timeout: Duration::from_millis(300),
        health_poll_interval: Duration::from_millis(10),
        restart_max_attempts: 3,
        restart_base_delay: Duration::from_millis(20),
        always_checked: Vec::new(),
    }
}

pub fn harness_with(launcher: Arc<FakeLauncher>, settings: ManagerSettings) -> Harness {
    let containers = FakeContainerRuntime::new();
    let probe = ToggleProbe::new();
    let backend = Arc::new(MemoryConfigBackend::new());
    let clock = ManualClock::new();
    let context = LifecycleContext::new(backend.clone())
        .with_native_launcher(launcher.clone())
        .with_container_runtime(containers.clone())
        .with_probe(probe.clone())
        .with_platform(HostPlatform::Linux)
        .with_clock(clock.clone());

    Harness {
        manager: ServiceManager::new(context, settings),
        launcher,
        containers,
        probe,
        backend,
        clock,
    }
}

pub fn harness() -> Harness {
    harness_with(FakeLauncher::new(), fast_settings())
}

/// Native service named `name` depending on `deps`
pub fn native_service(name: &str, deps: &[&str]) -> ServiceDescriptor {
    deps.iter().fold(
        ServiceDescriptor::new(name).native(NativeConfig::new(format!("{}-server", name))),
        |d, dep| d.depends_on(*dep),
    )
}

/// Wait for the first event matching `pred`
pub async fn wait_for_event(
    events: &async_channel::Receiver<LifecycleEvent>,
    within: Duration,
    pred: impl Fn(&LifecycleEvent) -> bool,
) -> Option<LifecycleEvent> {
    tokio::time::timeout(within, async {
        while let Ok(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}
