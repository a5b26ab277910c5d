//! Lifecycle state machine
//!
//! Each registered service has exactly one [`ServiceState`]. Transitions
//! are validated against a fixed table; an illegal request is logged and
//! ignored rather than surfaced to the caller, so a late health tick racing
//! a stop can never wedge a service.

use crate::Error;
use crate::descriptor::DeploymentMode;
use crate::strategy::LiveHandle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Lifecycle state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// Not running
    Stopped,
    /// Start requested, waiting for the first passing health check
    Starting,
    /// Started and passed a health check
    Running,
    /// Stop in progress
    Stopping,
    /// Restart in progress (between stop and the next start)
    Restarting,
    /// Failed; see the runtime's last error
    Error,
}

impl ServiceState {
    /// Whether moving from `self` to `next` is legal
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running | Error | Stopping)
                | (Running, Stopping | Restarting | Error)
                | (Stopping, Stopped | Error)
                | (Restarting, Starting | Error | Stopping)
                | (Error, Starting | Stopping | Restarting | Stopped)
        )
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Restarting => "restarting",
            ServiceState::Error => "error",
        };
        f.write_str(s)
    }
}

/// A transition that was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before
    pub from: ServiceState,
    /// State after
    pub to: ServiceState,
}

/// Mutable per-service runtime record
///
/// Owned by the [`crate::manager::ServiceManager`]; callers only ever see
/// [`crate::manager::ServiceStatus`] snapshots.
#[derive(Debug)]
pub struct ServiceRuntime {
    /// Current lifecycle state
    pub state: ServiceState,
    /// Consecutive restart attempts since the last successful start
    pub restart_attempts: u32,
    /// Most recent failure
    pub last_error: Option<String>,
    /// Time of the last passing health check
    pub last_health_check: Option<DateTime<Utc>>,
    /// Mode resolved for the current (or last) start
    pub mode: Option<DeploymentMode>,
    /// Live resources held by the mode strategy
    pub handle: Option<Arc<LiveHandle>>,
    /// Endpoint for manual and remote modes
    pub url: Option<String>,
    /// Bumped whenever a stop begins or the runtime is reset; a start or
    /// restart that sees it change has been superseded
    pub generation: u64,
}

impl Default for ServiceRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceRuntime {
    /// Fresh runtime in `Stopped`
    pub fn new() -> Self {
        Self {
            state: ServiceState::Stopped,
            restart_attempts: 0,
            last_error: None,
            last_health_check: None,
            mode: None,
            handle: None,
            url: None,
            generation: 0,
        }
    }

    /// Move to `target` if legal
    ///
    /// Returns the applied transition, or `None` (after a warning) when the
    /// table forbids it. The state is unchanged in that case.
    pub fn transition(&mut self, service: &str, target: ServiceState) -> Option<Transition> {
        let from = self.state;
        if !from.can_transition_to(target) {
            let err = Error::InvalidTransition {
                service: service.to_string(),
                from,
                to: target,
            };
            warn!(service, %from, to = %target, "{}", err);
            return None;
        }

        self.state = target;
        if target == ServiceState::Stopping {
            self.generation = self.generation.wrapping_add(1);
        }
        debug!(service, %from, to = %target, "State transition");
        Some(Transition { from, to: target })
    }

    /// Reset to `Stopped` from any state
    ///
    /// Only used when the deployment mode changes, which invalidates
    /// whatever the previous strategy was doing.
    pub fn force_stopped(&mut self, service: &str) -> Option<Transition> {
        let from = self.state;
        self.handle = None;
        self.generation = self.generation.wrapping_add(1);
        if from == ServiceState::Stopped {
            return None;
        }
        warn!(service, %from, "Forcing service to stopped");
        self.state = ServiceState::Stopped;
        Some(Transition {
            from,
            to: ServiceState::Stopped,
        })
    }
}
