//! Host power signals
//!
//! Samples the kernel's power-supply class for the battery state and
//! compares wall and monotonic clocks to spot a suspend. Both feed the
//! manager's adaptive health monitor while `up` is running.

use service_orchestration::ServiceManager;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info};

const POWER_SUPPLY_DIR: &str = "/sys/class/power_supply";

/// How often the power source is sampled
pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(60);

/// Wall-clock time beyond monotonic time that counts as a suspend
const RESUME_GAP: Duration = Duration::from_secs(30);

/// Whether the host is running on battery
///
/// `None` when `root` lists no battery.
pub fn on_battery(root: &Path) -> Option<bool> {
    let entries = fs::read_dir(root).ok()?;

    let mut found = false;
    for entry in entries.flatten() {
        if !entry.file_name().to_string_lossy().starts_with("BAT") {
            continue;
        }
        found = true;

        let status = fs::read_to_string(entry.path().join("status"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "Unknown".to_string());
        if status == "Discharging" {
            return Some(true);
        }
    }

    found.then_some(false)
}

/// Whether a sample gap means the host was asleep
///
/// The monotonic clock stops during suspend while the wall clock keeps going.
pub fn resumed(wall: Duration, monotonic: Duration) -> bool {
    wall.saturating_sub(monotonic) > RESUME_GAP
}

/// Feed power source changes and resumes to `manager` until aborted
pub async fn watch(manager: ServiceManager) {
    let root = Path::new(POWER_SUPPLY_DIR);
    let mut last_battery = None;

    loop {
        let battery = on_battery(root);
        if battery.is_some() && battery != last_battery {
            let on_battery = battery == Some(true);
            info!(on_battery, "Power source sampled");
            manager.set_on_battery(on_battery).await;
            last_battery = battery;
        }

        let wall_before = SystemTime::now();
        let mono_before = Instant::now();
        tokio::time::sleep(SAMPLE_INTERVAL).await;

        let wall = SystemTime::now()
            .duration_since(wall_before)
            .unwrap_or_default();
        if resumed(wall, mono_before.elapsed()) {
            info!(gap = ?wall, "Host resumed from sleep");
            manager.notify_resume().await;
        } else {
            debug!("No suspend since last power sample");
        }
    }
}
