//! Adaptive health polling
//!
//! Health checks slow down as the user goes idle and, on battery, some are
//! skipped entirely. Everything here is a pure function of recorded
//! timestamps and flags; callers pass `now` explicitly and the health loop
//! in [`crate::manager`] owns the timers.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const MINUTE: Duration = Duration::from_secs(60);

/// A service touched this recently is always polled at its base interval
pub const RECENT_SERVICE_ACTIVITY: Duration = Duration::from_secs(2 * 60);

/// OS-reported idle time below this counts as user activity
pub const OS_IDLE_ACTIVITY_THRESHOLD: Duration = MINUTE;

/// Source of `Instant`s for the activity ledger and health scheduling
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;
}

/// [`Clock`] reading the monotonic system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Polling regime derived from user idle time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdaptiveMode {
    /// User active within the last minute
    Active,
    /// Idle over 1 minute
    LightIdle,
    /// Idle over 5 minutes (2.5 on battery)
    MediumIdle,
    /// Idle over 15 minutes (7.5 on battery)
    DeepIdle,
    /// Idle over 30 minutes
    Sleep,
}

impl AdaptiveMode {
    /// Derive the mode from user idle time
    ///
    /// Battery power halves the medium and deep boundaries. The sleep
    /// boundary stays at 30 minutes either way.
    pub fn from_idle(idle: Duration, on_battery: bool) -> Self {
        let (medium, deep) = if on_battery {
            (MINUTE * 5 / 2, MINUTE * 15 / 2)
        } else {
            (MINUTE * 5, MINUTE * 15)
        };

        if idle > MINUTE * 30 {
            AdaptiveMode::Sleep
        } else if idle > deep {
            AdaptiveMode::DeepIdle
        } else if idle > medium {
            AdaptiveMode::MediumIdle
        } else if idle > MINUTE {
            AdaptiveMode::LightIdle
        } else {
            AdaptiveMode::Active
        }
    }

    /// Health check interval for this mode
    pub fn interval(self) -> Duration {
        match self {
            AdaptiveMode::Active => Duration::from_secs(30),
            AdaptiveMode::LightIdle => MINUTE * 2,
            AdaptiveMode::MediumIdle => MINUTE * 5,
            AdaptiveMode::DeepIdle => MINUTE * 10,
            AdaptiveMode::Sleep => MINUTE * 30,
        }
    }
}

impl fmt::Display for AdaptiveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdaptiveMode::Active => "active",
            AdaptiveMode::LightIdle => "light-idle",
            AdaptiveMode::MediumIdle => "medium-idle",
            AdaptiveMode::DeepIdle => "deep-idle",
            AdaptiveMode::Sleep => "sleep",
        };
        f.write_str(s)
    }
}

/// Activity ledger and polling policy
#[derive(Debug)]
pub struct AdaptiveHealthMonitor {
    /// Baseline for services with no recorded activity
    started: Instant,
    last_user_activity: Instant,
    service_activity: HashMap<String, Instant>,
    on_battery: bool,
    always_checked: HashSet<String>,
    mode: AdaptiveMode,
}

impl AdaptiveHealthMonitor {
    /// Monitor starting in `Active` at `now`
    pub fn new(now: Instant, always_checked: impl IntoIterator<Item = String>) -> Self {
        Self {
            started: now,
            last_user_activity: now,
            service_activity: HashMap::new(),
            on_battery: false,
            always_checked: always_checked.into_iter().collect(),
            mode: AdaptiveMode::Active,
        }
    }

    /// Mode as of the last recompute
    pub fn current_mode(&self) -> AdaptiveMode {
        self.mode
    }

    /// Whether the host reported battery power
    pub fn on_battery(&self) -> bool {
        self.on_battery
    }

    /// Mode implied by the ledger at `now`
    pub fn mode_at(&self, now: Instant) -> AdaptiveMode {
        AdaptiveMode::from_idle(
            now.saturating_duration_since(self.last_user_activity),
            self.on_battery,
        )
    }

    /// Recompute and store the current mode
    pub fn refresh(&mut self, now: Instant) -> AdaptiveMode {
        let mode = self.mode_at(now);
        if mode != self.mode {
            info!(from = %self.mode, to = %mode, on_battery = self.on_battery, "Adaptive mode changed");
            self.mode = mode;
        }
        mode
    }

    /// A service was invoked or passed a health check
    pub fn record_service_activity(&mut self, service: &str, now: Instant) {
        self.service_activity.insert(service.to_string(), now);
        self.record_user_activity(now);
    }

    /// The user did something
    pub fn record_user_activity(&mut self, now: Instant) {
        self.last_user_activity = now;
        self.refresh(now);
    }

    /// The host resumed from sleep
    pub fn notify_resume(&mut self, now: Instant) {
        debug!("Resume from sleep");
        self.record_user_activity(now);
    }

    /// The OS reported how long the user has been idle
    pub fn report_os_idle(&mut self, idle: Duration, now: Instant) {
        if idle < OS_IDLE_ACTIVITY_THRESHOLD {
            self.record_user_activity(now);
        } else {
            self.refresh(now);
        }
    }

    /// Switch between mains and battery power
    pub fn set_on_battery(&mut self, on_battery: bool, now: Instant) {
        if self.on_battery != on_battery {
            info!(on_battery, "Power source changed");
            self.on_battery = on_battery;
        }
        self.refresh(now);
    }

    /// How long `service` has gone without activity
    pub fn service_idle(&self, service: &str, now: Instant) -> Duration {
        let last = self
            .service_activity
            .get(service)
            .copied()
            .unwrap_or(self.started);
        now.saturating_duration_since(last)
    }

    /// Polling interval for `service` given its configured base interval
    pub fn interval_for(&self, service: &str, base: Duration, now: Instant) -> Duration {
        if self.service_idle(service, now) < RECENT_SERVICE_ACTIVITY {
            return base;
        }

        let interval = self.mode_at(now).interval().max(base);
        if self.on_battery {
            interval * 2
        } else {
            interval
        }
    }

    /// Whether to skip the health check for `service` entirely
    pub fn should_skip(&self, service: &str, now: Instant) -> bool {
        if self.service_idle(service, now) < RECENT_SERVICE_ACTIVITY {
            return false;
        }
        self.on_battery
            && self.mode_at(now) == AdaptiveMode::Sleep
            && !self.always_checked.contains(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mins(m: u64) -> Duration {
        MINUTE * m as u32
    }

    #[test]
    fn test_mode_thresholds() {
        assert_eq!(AdaptiveMode::from_idle(mins(0), false), AdaptiveMode::Active);
        assert_eq!(AdaptiveMode::from_idle(mins(1), false), AdaptiveMode::Active);
        assert_eq!(AdaptiveMode::from_idle(mins(2), false), AdaptiveMode::LightIdle);
        assert_eq!(AdaptiveMode::from_idle(mins(6), false), AdaptiveMode::MediumIdle);
        assert_eq!(AdaptiveMode::from_idle(mins(12), false), AdaptiveMode::MediumIdle);
        assert_eq!(AdaptiveMode::from_idle(mins(16), false), AdaptiveMode::DeepIdle);
        assert_eq!(AdaptiveMode::from_idle(mins(45), false), AdaptiveMode::Sleep);
    }

    #[test]
    fn test_battery_escalates_middle_boundaries_only() {
        assert_eq!(AdaptiveMode::from_idle(mins(3), true), AdaptiveMode::MediumIdle);
        assert_eq!(AdaptiveMode::from_idle(mins(12), true), AdaptiveMode::DeepIdle);
        assert_eq!(AdaptiveMode::from_idle(mins(1), true), AdaptiveMode::Active);
        assert_eq!(AdaptiveMode::from_idle(mins(29), true), AdaptiveMode::DeepIdle);
        assert_eq!(AdaptiveMode::from_idle(mins(45), true), AdaptiveMode::Sleep);
    }

    #[test]
    fn test_interval_for() {
        let start = Instant::now();
        let mut monitor = AdaptiveHealthMonitor::new(start, Vec::new());
        let base = Duration::from_secs(30);

        // Fresh service: base interval
        assert_eq!(monitor.interval_for("n8n", base, start + mins(1)), base);

        // User idle 6 minutes, service idle too
        let now = start + mins(6);
        assert_eq!(monitor.interval_for("n8n", base, now), mins(5));

        // Recent service activity overrides the idle mode
        monitor.service_activity.insert("n8n".to_string(), now);
        assert_eq!(monitor.interval_for("n8n", base, now + mins(1)), base);

        // A larger base wins over the mode interval
        assert_eq!(monitor.interval_for("comfyui", mins(20), now), mins(20));

        // Battery: 6 minutes is past the 2.5 minute boundary but not 7.5
        monitor.set_on_battery(true, now);
        assert_eq!(monitor.current_mode(), AdaptiveMode::MediumIdle);
        assert_eq!(monitor.interval_for("comfyui", base, now), mins(5) * 2);
        assert_eq!(
            monitor.interval_for("comfyui", base, start + mins(12)),
            mins(10) * 2
        );
    }

    #[test]
    fn test_should_skip() {
        let start = Instant::now();
        let mut monitor = AdaptiveHealthMonitor::new(start, vec!["llama-engine".to_string()]);
        let now = start + mins(45);

        assert!(!monitor.should_skip("comfyui", now));

        monitor.set_on_battery(true, now);
        assert_eq!(monitor.current_mode(), AdaptiveMode::Sleep);
        assert!(monitor.should_skip("comfyui", now));
        assert!(!monitor.should_skip("llama-engine", now));

        // Own recent activity protects the service even in sleep on battery
        monitor.service_activity.insert("comfyui".to_string(), now);
        assert!(!monitor.should_skip("comfyui", now + Duration::from_secs(90)));
    }

    #[test]
    fn test_activity_signals_reset_mode() {
        let start = Instant::now();
        let mut monitor = AdaptiveHealthMonitor::new(start, Vec::new());

        let idle = start + mins(20);
        assert_eq!(monitor.refresh(idle), AdaptiveMode::DeepIdle);

        monitor.report_os_idle(mins(20), idle);
        assert_eq!(monitor.current_mode(), AdaptiveMode::DeepIdle);

        monitor.report_os_idle(Duration::from_secs(10), idle);
        assert_eq!(monitor.current_mode(), AdaptiveMode::Active);

        let later = idle + mins(40);
        monitor.refresh(later);
        assert_eq!(monitor.current_mode(), AdaptiveMode::Sleep);
        monitor.notify_resume(later);
        assert_eq!(monitor.current_mode(), AdaptiveMode::Active);

        monitor.record_service_activity("mcp", later + mins(10));
        assert_eq!(monitor.service_idle("mcp", later + mins(11)), mins(1));
        assert_eq!(monitor.mode_at(later + mins(11)), AdaptiveMode::Active);
    }
}
