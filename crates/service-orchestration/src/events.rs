//! Lifecycle events
//!
//! A fixed set of typed events fanned out to subscribers over unbounded
//! `async-channel` queues. Subscribers pick the kinds they care about; a
//! subscriber whose receiver was dropped is pruned on the next emit.

use crate::descriptor::DeploymentMode;
use crate::state::ServiceState;
use async_channel::{Receiver, Sender};
use futures::lock::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::trace;

/// Events emitted by the service manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum LifecycleEvent {
    /// A descriptor was registered
    ServiceRegistered {
        /// Service name
        service: String,
    },
    /// A state transition was applied
    ServiceStateChanged {
        /// Service name
        service: String,
        /// Previous state
        from: ServiceState,
        /// New state
        to: ServiceState,
    },
    /// A service passed its first health check after starting
    ServiceStarted {
        /// Service name
        service: String,
        /// Mode it was started in
        mode: DeploymentMode,
        /// Endpoint for manual/remote services
        url: Option<String>,
    },
    /// A service was stopped
    ServiceStopped {
        /// Service name
        service: String,
    },
    /// A steady-state health check failed
    ServiceUnhealthy {
        /// Service name
        service: String,
        /// Probe failure
        error: String,
    },
    /// A start batch finished
    AllServicesStarted,
    /// A stop batch finished
    AllServicesStopped,
    /// A critical service failed and aborted the start batch
    StartupFailed {
        /// Service that failed
        service: String,
        /// Failure
        error: String,
    },
}

/// Discriminant of [`LifecycleEvent`], used for subscription filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// [`LifecycleEvent::ServiceRegistered`]
    ServiceRegistered,
    /// [`LifecycleEvent::ServiceStateChanged`]
    ServiceStateChanged,
    /// [`LifecycleEvent::ServiceStarted`]
    ServiceStarted,
    /// [`LifecycleEvent::ServiceStopped`]
    ServiceStopped,
    /// [`LifecycleEvent::ServiceUnhealthy`]
    ServiceUnhealthy,
    /// [`LifecycleEvent::AllServicesStarted`]
    AllServicesStarted,
    /// [`LifecycleEvent::AllServicesStopped`]
    AllServicesStopped,
    /// [`LifecycleEvent::StartupFailed`]
    StartupFailed,
}

impl EventKind {
    /// Every kind
    pub const ALL: [EventKind; 8] = [
        EventKind::ServiceRegistered,
        EventKind::ServiceStateChanged,
        EventKind::ServiceStarted,
        EventKind::ServiceStopped,
        EventKind::ServiceUnhealthy,
        EventKind::AllServicesStarted,
        EventKind::AllServicesStopped,
        EventKind::StartupFailed,
    ];
}

impl LifecycleEvent {
    /// Kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            LifecycleEvent::ServiceRegistered { .. } => EventKind::ServiceRegistered,
            LifecycleEvent::ServiceStateChanged { .. } => EventKind::ServiceStateChanged,
            LifecycleEvent::ServiceStarted { .. } => EventKind::ServiceStarted,
            LifecycleEvent::ServiceStopped { .. } => EventKind::ServiceStopped,
            LifecycleEvent::ServiceUnhealthy { .. } => EventKind::ServiceUnhealthy,
            LifecycleEvent::AllServicesStarted => EventKind::AllServicesStarted,
            LifecycleEvent::AllServicesStopped => EventKind::AllServicesStopped,
            LifecycleEvent::StartupFailed { .. } => EventKind::StartupFailed,
        }
    }
}

struct Subscriber {
    kinds: HashSet<EventKind>,
    sender: Sender<LifecycleEvent>,
}

/// Fan-out of lifecycle events to subscribers
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl EventBus {
    /// Bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event
    pub async fn subscribe_all(&self) -> Receiver<LifecycleEvent> {
        self.subscribe(EventKind::ALL).await
    }

    /// Receive events of the given kinds
    pub async fn subscribe(
        &self,
        kinds: impl IntoIterator<Item = EventKind>,
    ) -> Receiver<LifecycleEvent> {
        let (sender, receiver) = async_channel::unbounded();
        self.subscribers.lock().await.push(Subscriber {
            kinds: kinds.into_iter().collect(),
            sender,
        });
        receiver
    }

    /// Deliver `event` to interested subscribers
    pub async fn emit(&self, event: LifecycleEvent) {
        let kind = event.kind();
        trace!(?kind, "Emitting lifecycle event");

        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|sub| {
            if !sub.kinds.contains(&kind) {
                return !sub.sender.is_closed();
            }
            sub.sender.try_send(event.clone()).is_ok()
        });
    }

    /// Number of live subscribers
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}
