//! Service manager
//!
//! Owns every service's runtime record and drives it through the state
//! machine: ordered batch start and stop, single-service operations,
//! exponential-backoff restarts and the adaptive health loop.
//!
//! Public operations return [`OperationResult`]; errors are logged and
//! translated at that boundary. Internal locks are never held across a
//! strategy call.

use crate::adaptive::{AdaptiveHealthMonitor, AdaptiveMode};
use crate::context::LifecycleContext;
use crate::descriptor::{DeploymentMode, ServiceDescriptor};
use crate::events::{EventKind, LifecycleEvent};
use crate::health::HealthStatus;
use crate::mode::ModeRouter;
use crate::resolver;
use crate::state::{ServiceRuntime, ServiceState, Transition};
use crate::strategy::{LiveHandle, ModeStrategy};
use crate::{Error, OperationResult, Result};
use async_channel::{Receiver, Sender};
use async_runtime_compat::{sleep, timeout};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Either, FutureExt, Shared, select};
use futures::lock::Mutex;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Shortest sleep between health loop wake-ups
const HEALTH_LOOP_FLOOR: Duration = Duration::from_secs(1);

/// Tunables for the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Base health check interval
    pub health_check_interval: Duration,
    /// How long a start may take to pass its first health check
    pub startup_timeout: Duration,
    /// Poll interval while waiting for the first health check
    pub health_poll_interval: Duration,
    /// Restarts allowed before giving up
    pub restart_max_attempts: u32,
    /// Delay before the first restart; doubles on each further attempt
    pub restart_base_delay: Duration,
    /// Services polled even in sleep mode on battery
    pub always_checked: Vec<String>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            startup_timeout: Duration::from_secs(30),
            health_poll_interval: Duration::from_secs(1),
            restart_max_attempts: 3,
            restart_base_delay: Duration::from_secs(2),
            always_checked: Vec::new(),
        }
    }
}

impl ManagerSettings {
    /// Backoff before restart attempt `attempt` (1-based)
    pub fn restart_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.restart_base_delay.saturating_mul(factor)
    }
}

/// Snapshot of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Lifecycle state
    pub state: ServiceState,
    /// Mode of the current (or last) start
    pub mode: Option<DeploymentMode>,
    /// Endpoint for manual/remote services
    pub url: Option<String>,
    /// Consecutive restart attempts
    pub restart_attempts: u32,
    /// Most recent failure
    pub last_error: Option<String>,
    /// Last passing health check
    pub last_health_check: Option<DateTime<Utc>>,
    /// Whether the service is critical
    pub critical: bool,
}

struct Entry {
    descriptor: Arc<ServiceDescriptor>,
    runtime: ServiceRuntime,
}

/// Control channels of the running health loop
struct HealthLoop {
    /// Closed to ask the loop to exit
    shutdown: Sender<()>,
    /// Closed by the loop when it has exited
    done: Receiver<()>,
}

type StartAllFuture = Shared<BoxFuture<'static, std::result::Result<(), Arc<Error>>>>;

struct Inner {
    context: LifecycleContext,
    settings: ManagerSettings,
    router: ModeRouter,
    /// Registration order is the resolver's tie-break
    services: Mutex<IndexMap<String, Entry>>,
    monitor: Mutex<AdaptiveHealthMonitor>,
    start_all: Mutex<Option<StartAllFuture>>,
    health_loop: Mutex<Option<HealthLoop>>,
    /// Nudges the health loop to reschedule after an activity signal
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

/// Orchestrates registered services
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ServiceManager {
    inner: Arc<Inner>,
}

impl ServiceManager {
    /// Manager over the collaborators in `context`
    pub fn new(context: LifecycleContext, settings: ManagerSettings) -> Self {
        let router = ModeRouter::new(&context);
        let monitor =
            AdaptiveHealthMonitor::new(context.clock.now(), settings.always_checked.clone());
        let (wake_tx, wake_rx) = async_channel::bounded(1);
        Self {
            inner: Arc::new(Inner {
                context,
                settings,
                router,
                services: Mutex::new(IndexMap::new()),
                monitor: Mutex::new(monitor),
                start_all: Mutex::new(None),
                health_loop: Mutex::new(None),
                wake_tx,
                wake_rx,
            }),
        }
    }

    /// Settings in use
    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    /// Subscribe to every lifecycle event
    pub async fn subscribe(&self) -> Receiver<LifecycleEvent> {
        self.inner.context.events.subscribe_all().await
    }

    /// Subscribe to some lifecycle events
    pub async fn subscribe_to(
        &self,
        kinds: impl IntoIterator<Item = EventKind>,
    ) -> Receiver<LifecycleEvent> {
        self.inner.context.events.subscribe(kinds).await
    }

    /// Register a service in `Stopped`
    pub async fn register_service(&self, descriptor: ServiceDescriptor) -> OperationResult {
        OperationResult::from_result(self.register(descriptor).await)
    }

    /// Start every service in dependency order
    ///
    /// Concurrent callers share one in-flight batch.
    pub async fn start_all_services(&self) -> OperationResult {
        let batch = {
            let mut slot = self.inner.start_all.lock().await;
            match slot.as_ref() {
                Some(batch) => {
                    debug!("Start batch already in flight, joining it");
                    batch.clone()
                }
                None => {
                    let this = self.clone();
                    let batch = async move { this.start_all().await.map_err(Arc::new) }
                        .boxed()
                        .shared();
                    *slot = Some(batch.clone());
                    batch
                }
            }
        };

        let result = batch.clone().await;

        {
            let mut slot = self.inner.start_all.lock().await;
            if slot.as_ref().is_some_and(|b| b.peek().is_some()) {
                *slot = None;
            }
        }

        match result {
            Ok(()) => OperationResult::ok(),
            Err(e) => OperationResult::failed(e.to_string()),
        }
    }

    /// Start one service
    pub async fn start_service(&self, name: &str) -> OperationResult {
        OperationResult::from_result(self.start_one(name).await)
    }

    /// Stop every service in reverse dependency order
    pub async fn stop_all_services(&self) -> OperationResult {
        OperationResult::from_result(self.stop_all().await)
    }

    /// Stop one service
    pub async fn stop_service(&self, name: &str) -> OperationResult {
        OperationResult::from_result(self.stop_one(name).await)
    }

    /// Restart one service with exponential backoff
    pub async fn restart_service(&self, name: &str) -> OperationResult {
        OperationResult::from_result(self.restart_one(name).await)
    }

    /// Persist a new mode for `name`, stopping it if live
    ///
    /// The service is left `Stopped` with its URL and resolved mode cleared;
    /// the next start resolves the new mode.
    pub async fn set_service_mode(
        &self,
        name: &str,
        mode: DeploymentMode,
        url: Option<String>,
    ) -> OperationResult {
        OperationResult::from_result(self.switch_mode(name, mode, url).await)
    }

    /// Snapshot of every service
    pub async fn get_services_status(&self) -> BTreeMap<String, ServiceStatus> {
        let services = self.inner.services.lock().await;
        services
            .iter()
            .map(|(name, entry)| {
                let runtime = &entry.runtime;
                let status = ServiceStatus {
                    state: runtime.state,
                    mode: runtime.mode,
                    url: runtime.url.clone(),
                    restart_attempts: runtime.restart_attempts,
                    last_error: runtime.last_error.clone(),
                    last_health_check: runtime.last_health_check,
                    critical: entry.descriptor.critical,
                };
                (name.clone(), status)
            })
            .collect()
    }

    /// Snapshot of one service
    pub async fn get_service_status(&self, name: &str) -> Option<ServiceStatus> {
        self.get_services_status().await.remove(name)
    }

    /// Registered descriptors in registration order
    pub async fn descriptors(&self) -> Vec<Arc<ServiceDescriptor>> {
        let services = self.inner.services.lock().await;
        services.values().map(|e| e.descriptor.clone()).collect()
    }

    /// Mode `name` would start in right now
    pub async fn resolve_mode(&self, name: &str) -> Result<DeploymentMode> {
        let descriptor = self.descriptor(name).await?;
        self.inner.router.resolve_mode(&descriptor).await
    }

    /// Current adaptive polling mode
    pub async fn adaptive_mode(&self) -> AdaptiveMode {
        let now = self.now();
        self.inner.monitor.lock().await.refresh(now)
    }

    /// A service was invoked by a user
    ///
    /// The activity signals below are fed by the embedding application;
    /// each one wakes the health loop so its schedule is recomputed.
    pub async fn record_service_activity(&self, name: &str) {
        let now = self.now();
        self.inner
            .monitor
            .lock()
            .await
            .record_service_activity(name, now);
        self.wake_health_loop();
    }

    /// The user did something
    pub async fn record_user_activity(&self) {
        let now = self.now();
        self.inner.monitor.lock().await.record_user_activity(now);
        self.wake_health_loop();
    }

    /// The host resumed from sleep
    pub async fn notify_resume(&self) {
        let now = self.now();
        self.inner.monitor.lock().await.notify_resume(now);
        self.wake_health_loop();
    }

    /// The OS reported user idle time
    pub async fn report_os_idle(&self, idle: Duration) {
        let now = self.now();
        self.inner.monitor.lock().await.report_os_idle(idle, now);
        self.wake_health_loop();
    }

    /// The host switched power source
    pub async fn set_on_battery(&self, on_battery: bool) {
        let now = self.now();
        self.inner
            .monitor
            .lock()
            .await
            .set_on_battery(on_battery, now);
        self.wake_health_loop();
    }

    /// Stop the health loop and every service
    pub async fn shutdown(&self) -> OperationResult {
        info!("Shutting down service manager");
        self.stop_all_services().await
    }

    async fn register(&self, descriptor: ServiceDescriptor) -> Result<()> {
        let name = descriptor.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Registration("service name is empty".to_string()));
        }
        if name != descriptor.name {
            return Err(Error::Registration(format!(
                "service name '{}' has surrounding whitespace",
                descriptor.name
            )));
        }

        {
            let mut services = self.inner.services.lock().await;
            if services.contains_key(&name) {
                return Err(Error::Registration(format!(
                    "service '{}' is already registered",
                    name
                )));
            }
            services.insert(
                name.clone(),
                Entry {
                    descriptor: Arc::new(descriptor),
                    runtime: ServiceRuntime::new(),
                },
            );
        }

        info!(service = %name, "Registered service");
        self.emit(LifecycleEvent::ServiceRegistered { service: name })
            .await;
        Ok(())
    }

    async fn start_all(&self) -> Result<()> {
        let order = {
            let services = self.inner.services.lock().await;
            resolver::resolve(services.values().map(|e| e.descriptor.as_ref()))?
        };
        info!(order = ?order, "Starting all services");

        for name in &order {
            let critical = self.descriptor(name).await?.critical;
            if let Err(e) = self.start_one(name).await {
                if critical {
                    error!(service = %name, "Critical service failed to start: {}", e);
                    self.emit(LifecycleEvent::StartupFailed {
                        service: name.clone(),
                        error: e.to_string(),
                    })
                    .await;
                    return Err(e);
                }
                warn!(service = %name, "Service failed to start, continuing: {}", e);
            }
        }

        self.emit(LifecycleEvent::AllServicesStarted).await;
        self.start_health_loop().await;
        Ok(())
    }

    async fn start_one(&self, name: &str) -> Result<()> {
        let (descriptor, generation, transition) = {
            let mut services = self.inner.services.lock().await;
            let entry = services
                .get_mut(name)
                .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
            if entry.runtime.state == ServiceState::Running {
                debug!(service = name, "Already running");
                return Ok(());
            }
            let transition = entry.runtime.transition(name, ServiceState::Starting);
            (entry.descriptor.clone(), entry.runtime.generation, transition)
        };
        let Some(transition) = transition else {
            // Another operation owns the service right now.
            return Ok(());
        };
        self.emit_transition(name, Some(transition)).await;
        self.run_start(name, &descriptor, generation).await
    }

    /// Launch a service that is already `Starting` and record the outcome
    ///
    /// A stop or mode switch landing while the launch is in flight changes
    /// the runtime's generation; the fresh instance is then released again
    /// instead of being recorded.
    async fn run_start(
        &self,
        name: &str,
        descriptor: &ServiceDescriptor,
        generation: u64,
    ) -> Result<()> {
        match self.launch(descriptor).await {
            Ok((mode, handle, url)) => {
                let handle = Arc::new(handle);
                let recorded = self
                    .update(name, |rt| {
                        if rt.generation != generation || rt.state != ServiceState::Starting {
                            return None;
                        }
                        rt.mode = Some(mode);
                        rt.handle = Some(handle.clone());
                        rt.url = url.clone();
                        rt.last_error = None;
                        rt.restart_attempts = 0;
                        rt.last_health_check = Some(Utc::now());
                        Some(rt.transition(name, ServiceState::Running))
                    })
                    .await
                    .flatten();
                let Some(transition) = recorded else {
                    info!(service = name, %mode, "Start superseded by a stop, releasing instance");
                    let strategy = self.inner.router.strategy(mode);
                    if let Err(e) = strategy.stop(descriptor, &handle).await {
                        warn!(service = name, "Releasing superseded instance failed: {}", e);
                    }
                    return Ok(());
                };
                self.emit_transition(name, transition).await;
                info!(service = name, %mode, "Service running");
                self.emit(LifecycleEvent::ServiceStarted {
                    service: name.to_string(),
                    mode,
                    url,
                })
                .await;
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                let transition = self
                    .update(name, |rt| {
                        if rt.generation != generation {
                            return None;
                        }
                        rt.handle = None;
                        rt.last_error = Some(message);
                        rt.transition(name, ServiceState::Error)
                    })
                    .await
                    .flatten();
                self.emit_transition(name, transition).await;
                Err(e)
            }
        }
    }

    /// Resolve the mode, start the strategy and wait for it to pass a probe
    async fn launch(
        &self,
        descriptor: &ServiceDescriptor,
    ) -> Result<(DeploymentMode, LiveHandle, Option<String>)> {
        let mode = self.inner.router.resolve_mode(descriptor).await?;
        let url = if mode.is_managed() {
            None
        } else {
            self.inner.router.resolve_url(descriptor).await?
        };
        let strategy = self.inner.router.strategy(mode);

        info!(service = %descriptor.name, %mode, "Starting service");
        let handle = strategy.start(descriptor, url.as_deref()).await?;

        if let Err(e) = self
            .wait_for_healthy(strategy.as_ref(), descriptor, &handle)
            .await
        {
            if let Err(stop_err) = strategy.stop(descriptor, &handle).await {
                warn!(service = %descriptor.name, "Cleanup after failed start failed: {}", stop_err);
            }
            return Err(e);
        }
        Ok((mode, handle, url))
    }

    async fn wait_for_healthy(
        &self,
        strategy: &dyn ModeStrategy,
        descriptor: &ServiceDescriptor,
        handle: &LiveHandle,
    ) -> Result<()> {
        let poll = self.inner.settings.health_poll_interval;
        let mut last_error = String::from("no health check completed");

        let waited = timeout(self.inner.settings.startup_timeout, async {
            loop {
                match strategy.health_check(descriptor, handle).await {
                    HealthStatus::Unhealthy(reason) => {
                        debug!(service = %descriptor.name, "Not healthy yet: {}", reason);
                        last_error = reason;
                    }
                    HealthStatus::Healthy => return,
                }
                sleep(poll).await;
            }
        })
        .await;

        waited.map_err(|_| Error::HealthTimeout {
            service: descriptor.name.clone(),
            last_error,
        })
    }

    async fn stop_all(&self) -> Result<()> {
        self.stop_health_loop().await;

        let order = {
            let services = self.inner.services.lock().await;
            match resolver::shutdown_order(services.values().map(|e| e.descriptor.as_ref())) {
                Ok(order) => order,
                Err(e) => {
                    warn!("Falling back to reverse registration order: {}", e);
                    services.keys().rev().cloned().collect()
                }
            }
        };
        info!(order = ?order, "Stopping all services");

        let mut first_error = None;
        for name in &order {
            if let Err(e) = self.stop_one(name).await {
                warn!(service = %name, "Failed to stop: {}", e);
                first_error.get_or_insert(e);
            }
        }

        self.emit(LifecycleEvent::AllServicesStopped).await;
        first_error.map_or(Ok(()), Err)
    }

    async fn stop_one(&self, name: &str) -> Result<()> {
        let (descriptor, mode, handle, transition) = {
            let mut services = self.inner.services.lock().await;
            let entry = services
                .get_mut(name)
                .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
            if entry.runtime.state == ServiceState::Stopped {
                return Ok(());
            }
            let transition = entry.runtime.transition(name, ServiceState::Stopping);
            if transition.is_none() {
                return Ok(());
            }
            (
                entry.descriptor.clone(),
                entry.runtime.mode,
                entry.runtime.handle.take(),
                transition,
            )
        };
        self.emit_transition(name, transition).await;

        let stopped = match (mode, handle) {
            (Some(mode), Some(handle)) => {
                self.inner
                    .router
                    .strategy(mode)
                    .stop(&descriptor, &handle)
                    .await
            }
            _ => Ok(()),
        };

        match stopped {
            Ok(()) => {
                let transition = self
                    .update(name, |rt| rt.transition(name, ServiceState::Stopped))
                    .await
                    .flatten();
                self.emit_transition(name, transition).await;
                info!(service = name, "Service stopped");
                self.emit(LifecycleEvent::ServiceStopped {
                    service: name.to_string(),
                })
                .await;
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                let transition = self
                    .update(name, |rt| {
                        rt.last_error = Some(message);
                        rt.transition(name, ServiceState::Error)
                    })
                    .await
                    .flatten();
                self.emit_transition(name, transition).await;
                Err(e)
            }
        }
    }

    async fn restart_one(&self, name: &str) -> Result<()> {
        let max = self.inner.settings.restart_max_attempts;
        let (descriptor, attempts, generation, mode, handle, transition) = {
            let mut services = self.inner.services.lock().await;
            let entry = services
                .get_mut(name)
                .ok_or_else(|| Error::ServiceNotFound(name.to_string()))?;
            let runtime = &mut entry.runtime;
            if runtime.state == ServiceState::Stopped {
                drop(services);
                debug!(service = name, "Nothing to restart, starting instead");
                return self.start_one(name).await;
            }

            let attempts = runtime.restart_attempts.saturating_add(1);
            if attempts > max {
                runtime.restart_attempts = attempts;
                let err = Error::MaxRestartsExceeded {
                    service: name.to_string(),
                    attempts: max,
                };
                runtime.last_error = Some(err.to_string());
                let transition = if runtime.state == ServiceState::Error {
                    None
                } else {
                    runtime.handle = None;
                    runtime.transition(name, ServiceState::Error)
                };
                drop(services);
                error!(service = name, attempts = max, "Giving up on restarts");
                self.emit_transition(name, transition).await;
                return Err(err);
            }

            let Some(transition) = runtime.transition(name, ServiceState::Restarting) else {
                // Mid start or stop; that operation owns the service.
                return Ok(());
            };
            runtime.restart_attempts = attempts;
            (
                entry.descriptor.clone(),
                attempts,
                runtime.generation,
                runtime.mode,
                runtime.handle.take(),
                transition,
            )
        };
        self.emit_transition(name, Some(transition)).await;

        if let (Some(mode), Some(handle)) = (mode, handle) {
            if let Err(e) = self
                .inner
                .router
                .strategy(mode)
                .stop(&descriptor, &handle)
                .await
            {
                warn!(service = name, "Stop before restart failed: {}", e);
            }
        }

        let delay = self.inner.settings.restart_delay(attempts);
        info!(service = name, attempt = attempts, delay = ?delay, "Restarting service");
        sleep(delay).await;

        let resumed = self
            .update(name, |rt| {
                if rt.generation != generation || rt.state != ServiceState::Restarting {
                    return None;
                }
                rt.transition(name, ServiceState::Starting)
            })
            .await
            .flatten();
        let Some(transition) = resumed else {
            info!(service = name, "Restart abandoned, service was stopped during backoff");
            return Ok(());
        };
        self.emit_transition(name, Some(transition)).await;
        self.run_start(name, &descriptor, generation).await
    }

    async fn switch_mode(
        &self,
        name: &str,
        mode: DeploymentMode,
        url: Option<String>,
    ) -> Result<()> {
        let descriptor = self.descriptor(name).await?;
        self.inner
            .router
            .persist_mode(&descriptor, mode, url)
            .await?;

        let live = {
            let services = self.inner.services.lock().await;
            services
                .get(name)
                .is_some_and(|e| e.runtime.state != ServiceState::Stopped)
        };
        if live {
            if let Err(e) = self.stop_one(name).await {
                warn!(service = name, "Stop during mode switch failed: {}", e);
            }
        }

        let transition = self
            .update(name, |rt| {
                rt.url = None;
                rt.mode = None;
                rt.restart_attempts = 0;
                rt.force_stopped(name)
            })
            .await
            .flatten();
        self.emit_transition(name, transition).await;
        info!(service = name, %mode, "Deployment mode changed");
        Ok(())
    }

    async fn start_health_loop(&self) {
        let mut slot = self.inner.health_loop.lock().await;
        if slot.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = async_channel::bounded::<()>(1);
        let (done_tx, done_rx) = async_channel::bounded::<()>(1);
        *slot = Some(HealthLoop {
            shutdown: shutdown_tx,
            done: done_rx,
        });
        drop(slot);

        info!("Starting health loop");
        let this = self.clone();
        self.inner.context.spawner.spawn(Box::pin(async move {
            this.health_loop(shutdown_rx).await;
            drop(done_tx);
        }));
    }

    async fn stop_health_loop(&self) {
        let Some(health_loop) = self.inner.health_loop.lock().await.take() else {
            return;
        };
        health_loop.shutdown.close();
        // Resolves once the loop drops its end, after any in-flight tick.
        let _ = health_loop.done.recv().await;
        info!("Health loop stopped");
    }

    async fn health_loop(&self, shutdown: Receiver<()>) {
        let base = self.inner.settings.health_check_interval;
        let floor = base.min(HEALTH_LOOP_FLOOR);
        let wake = self.inner.wake_rx.clone();
        let mut last_checked: HashMap<String, Instant> = HashMap::new();

        loop {
            let candidates = self.health_candidates().await;
            let due: Vec<String> = {
                let now = self.now();
                let monitor = self.inner.monitor.lock().await;
                candidates
                    .iter()
                    .filter(|name| {
                        last_checked.get(*name).is_none_or(|last| {
                            *last + monitor.interval_for(name, base, now) <= now
                        })
                    })
                    .cloned()
                    .collect()
            };

            for name in &due {
                if shutdown.is_closed() {
                    return;
                }
                self.health_tick(name).await;
                last_checked.insert(name.clone(), self.now());
            }
            last_checked.retain(|name, _| candidates.contains(name));

            let wait = {
                let now = self.now();
                let monitor = self.inner.monitor.lock().await;
                last_checked
                    .iter()
                    .map(|(name, last)| {
                        let due = *last + monitor.interval_for(name, base, now);
                        due.saturating_duration_since(now)
                    })
                    .min()
                    .unwrap_or(base)
                    .clamp(floor, base)
            };

            let stop = std::pin::pin!(shutdown.recv());
            let woken = std::pin::pin!(wake.recv());
            let tick = std::pin::pin!(sleep(wait));
            match select(stop, select(woken, tick)).await {
                Either::Left(_) => return,
                Either::Right((Either::Left(_), _)) => {
                    debug!("Health loop woken by an activity signal");
                }
                Either::Right((Either::Right(_), _)) => {}
            }
        }
    }

    /// Services the loop should look at: running ones, plus managed ones
    /// that failed a restart and still have attempts left
    async fn health_candidates(&self) -> Vec<String> {
        let max = self.inner.settings.restart_max_attempts;
        let services = self.inner.services.lock().await;
        services
            .iter()
            .filter(|(_, e)| match e.runtime.state {
                ServiceState::Running => true,
                ServiceState::Error => {
                    e.runtime.mode.is_some_and(DeploymentMode::is_managed)
                        && (1..=max).contains(&e.runtime.restart_attempts)
                }
                _ => false,
            })
            .map(|(name, _)| name.clone())
            .collect()
    }

    async fn health_tick(&self, name: &str) {
        let now = self.now();
        let skip = self.inner.monitor.lock().await.should_skip(name, now);
        if skip {
            debug!(service = name, "Skipping health check while asleep on battery");
            return;
        }

        let snapshot = {
            let services = self.inner.services.lock().await;
            services.get(name).map(|e| {
                (
                    e.descriptor.clone(),
                    e.runtime.state,
                    e.runtime.mode,
                    e.runtime.handle.clone(),
                )
            })
        };
        let Some((descriptor, state, mode, handle)) = snapshot else {
            return;
        };

        if state == ServiceState::Error {
            if let Err(e) = self.restart_one(name).await {
                warn!(service = name, "Retrying restart failed: {}", e);
            }
            return;
        }

        let (Some(mode), Some(handle)) = (mode, handle) else {
            return;
        };
        let strategy = self.inner.router.strategy(mode);
        match strategy.health_check(&descriptor, &handle).await {
            HealthStatus::Unhealthy(reason) => {
                warn!(service = name, %mode, "Health check failed: {}", reason);
                self.emit(LifecycleEvent::ServiceUnhealthy {
                    service: name.to_string(),
                    error: reason.clone(),
                })
                .await;

                if mode.is_managed() {
                    self.update(name, |rt| rt.last_error = Some(reason)).await;
                    if let Err(e) = self.restart_one(name).await {
                        warn!(service = name, "Automatic restart failed: {}", e);
                    }
                } else {
                    let transition = self
                        .update(name, |rt| {
                            rt.last_error = Some(reason);
                            rt.transition(name, ServiceState::Error)
                        })
                        .await
                        .flatten();
                    self.emit_transition(name, transition).await;
                }
            }
            HealthStatus::Healthy => {
                self.update(name, |rt| rt.last_health_check = Some(Utc::now()))
                    .await;
            }
        }
    }

    fn now(&self) -> Instant {
        self.inner.context.clock.now()
    }

    fn wake_health_loop(&self) {
        // A full channel already holds a pending wake.
        let _ = self.inner.wake_tx.try_send(());
    }

    async fn descriptor(&self, name: &str) -> Result<Arc<ServiceDescriptor>> {
        let services = self.inner.services.lock().await;
        services
            .get(name)
            .map(|e| e.descriptor.clone())
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))
    }

    /// Mutate `name`'s runtime under the lock
    async fn update<R>(&self, name: &str, f: impl FnOnce(&mut ServiceRuntime) -> R) -> Option<R> {
        let mut services = self.inner.services.lock().await;
        services.get_mut(name).map(|e| f(&mut e.runtime))
    }

    async fn emit_transition(&self, name: &str, transition: Option<Transition>) {
        let Some(Transition { from, to }) = transition else {
            return;
        };
        self.emit(LifecycleEvent::ServiceStateChanged {
            service: name.to_string(),
            from,
            to,
        })
        .await;
    }

    async fn emit(&self, event: LifecycleEvent) {
        self.inner.context.events.emit(event).await;
    }
}
