// Hearth - Live telemetry synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! System snapshot data model
//!
//! This module defines:
//! - [`Snapshot`]: the latest known value of every metric
//! - [`PartialSnapshot`]: an update carrying only some metrics
//! - Merge rules (absent keys preserve prior values, percentages clamped)
//! - Display formatting, recomputed on every read

use serde::{Deserialize, Serialize};

/// Marker rendered when a value is unknown
pub const PLACEHOLDER: &str = "--";

/// Marker rendered when the hardware behind a category is absent
pub const UNAVAILABLE: &str = "N/A";

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// UPS / battery status. Every field is optional: the appliance may lack a UPS.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerState {
    /// Battery charge (0-100)
    pub battery_percent: Option<f64>,
    /// Whether power reporting hardware is present
    pub available: Option<bool>,
    /// Battery currently charging
    pub charging: Option<bool>,
    /// Running from battery (mains lost)
    pub on_battery: Option<bool>,
}

/// Wireless access point status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiState {
    /// Whether an access point is present
    pub available: Option<bool>,
    /// Number of associated clients
    pub client_count: Option<u32>,
}

/// Latest known system metrics
///
/// `None` means "never reported", which is distinct from zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub hostname: Option<String>,
    /// Seconds since boot
    pub uptime_secs: Option<u64>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    /// Bytes
    pub memory_used: Option<u64>,
    /// Bytes
    pub memory_total: Option<u64>,
    pub disk_percent: Option<f64>,
    /// Bytes
    pub disk_used: Option<u64>,
    /// Bytes
    pub disk_total: Option<u64>,
    /// Degrees Celsius
    pub temperature_cpu: Option<f64>,
    pub power: PowerState,
    pub wifi: WifiState,
}

/// A set of metric updates; only supplied fields overwrite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialSnapshot {
    pub hostname: Option<String>,
    pub uptime_secs: Option<u64>,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub memory_used: Option<u64>,
    pub memory_total: Option<u64>,
    pub disk_percent: Option<f64>,
    pub disk_used: Option<u64>,
    pub disk_total: Option<u64>,
    pub temperature_cpu: Option<f64>,
    pub power: PowerState,
    pub wifi: WifiState,
}

impl PartialSnapshot {
    /// Create an empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the update carries no field at all
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge another update on top of this one (later fields win)
    pub fn extend(&mut self, other: PartialSnapshot) {
        take(&mut self.hostname, other.hostname);
        take(&mut self.uptime_secs, other.uptime_secs);
        take(&mut self.cpu_percent, other.cpu_percent);
        take(&mut self.memory_percent, other.memory_percent);
        take(&mut self.memory_used, other.memory_used);
        take(&mut self.memory_total, other.memory_total);
        take(&mut self.disk_percent, other.disk_percent);
        take(&mut self.disk_used, other.disk_used);
        take(&mut self.disk_total, other.disk_total);
        take(&mut self.temperature_cpu, other.temperature_cpu);
        take(&mut self.power.battery_percent, other.power.battery_percent);
        take(&mut self.power.available, other.power.available);
        take(&mut self.power.charging, other.power.charging);
        take(&mut self.power.on_battery, other.power.on_battery);
        take(&mut self.wifi.available, other.wifi.available);
        take(&mut self.wifi.client_count, other.wifi.client_count);
    }
}

/// Overwrite `slot` if `value` is present; returns whether it was written
fn take<T>(slot: &mut Option<T>, value: Option<T>) -> bool {
    if value.is_some() {
        *slot = value;
        true
    } else {
        false
    }
}

impl From<Snapshot> for PartialSnapshot {
    fn from(full: Snapshot) -> Self {
        Self {
            hostname: full.hostname,
            uptime_secs: full.uptime_secs,
            cpu_percent: full.cpu_percent,
            memory_percent: full.memory_percent,
            memory_used: full.memory_used,
            memory_total: full.memory_total,
            disk_percent: full.disk_percent,
            disk_used: full.disk_used,
            disk_total: full.disk_total,
            temperature_cpu: full.temperature_cpu,
            power: full.power,
            wifi: full.wifi,
        }
    }
}

/// Clamp a percentage to [0, 100]; non-finite values are treated as absent
pub fn clamp_percent(value: f64) -> Option<f64> {
    value.is_finite().then(|| value.clamp(0.0, 100.0))
}

fn non_negative(value: f64) -> Option<f64> {
    value.is_finite().then(|| value.max(0.0))
}

fn percent_of(used: Option<u64>, total: Option<u64>) -> Option<f64> {
    match (used, total) {
        (Some(used), Some(total)) if total > 0 => clamp_percent(used as f64 / total as f64 * 100.0),
        _ => None,
    }
}

fn gib_pair(used: Option<u64>, total: Option<u64>) -> String {
    match total {
        Some(total) if total > 0 => format!(
            "{:.1} / {:.1} GB",
            used.unwrap_or(0) as f64 / GIB,
            total as f64 / GIB
        ),
        _ => PLACEHOLDER.to_string(),
    }
}

impl Snapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if nothing has been reported yet
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge an update into this snapshot
    ///
    /// Supplied fields overwrite, absent fields keep their prior value.
    /// Percentages are clamped at this point rather than trusted from the
    /// source. When byte counts change without an explicit percentage, the
    /// percentage is derived from the merged counts.
    ///
    /// Returns true if at least one field was written. Values dropped as
    /// non-finite do not count.
    pub fn merge(&mut self, partial: &PartialSnapshot) -> bool {
        let mut written = take(&mut self.hostname, partial.hostname.clone());
        written |= take(&mut self.uptime_secs, partial.uptime_secs);
        written |= take(
            &mut self.cpu_percent,
            partial.cpu_percent.and_then(clamp_percent),
        );

        let memory_bytes = take(&mut self.memory_used, partial.memory_used)
            | take(&mut self.memory_total, partial.memory_total);
        written |= memory_bytes;
        match partial.memory_percent.and_then(clamp_percent) {
            Some(percent) => {
                self.memory_percent = Some(percent);
                written = true;
            }
            None if memory_bytes => {
                if let Some(percent) = percent_of(self.memory_used, self.memory_total) {
                    self.memory_percent = Some(percent);
                }
            }
            None => {}
        }

        let disk_bytes = take(&mut self.disk_used, partial.disk_used)
            | take(&mut self.disk_total, partial.disk_total);
        written |= disk_bytes;
        match partial.disk_percent.and_then(clamp_percent) {
            Some(percent) => {
                self.disk_percent = Some(percent);
                written = true;
            }
            None if disk_bytes => {
                if let Some(percent) = percent_of(self.disk_used, self.disk_total) {
                    self.disk_percent = Some(percent);
                }
            }
            None => {}
        }

        written |= take(
            &mut self.temperature_cpu,
            partial.temperature_cpu.and_then(non_negative),
        );

        written |= take(
            &mut self.power.battery_percent,
            partial.power.battery_percent.and_then(clamp_percent),
        );
        written |= take(&mut self.power.available, partial.power.available);
        written |= take(&mut self.power.charging, partial.power.charging);
        written |= take(&mut self.power.on_battery, partial.power.on_battery);

        written |= take(&mut self.wifi.available, partial.wifi.available);
        written |= take(&mut self.wifi.client_count, partial.wifi.client_count);

        written
    }

    /// CPU usage, e.g. `"42.0%"`
    pub fn cpu_formatted(&self) -> String {
        match self.cpu_percent {
            Some(cpu) => format!("{:.1}%", cpu),
            None => PLACEHOLDER.to_string(),
        }
    }

    /// Memory usage in GiB, e.g. `"3.5 / 8.0 GB"`
    ///
    /// Returns [`PLACEHOLDER`] when the total is unknown or zero.
    pub fn memory_formatted(&self) -> String {
        gib_pair(self.memory_used, self.memory_total)
    }

    /// Disk usage in GiB, same rules as [`Snapshot::memory_formatted`]
    pub fn disk_formatted(&self) -> String {
        gib_pair(self.disk_used, self.disk_total)
    }

    /// Uptime, e.g. `"3d 4h 12m"`, `"4h 12m"` or `"12m"`
    pub fn uptime_formatted(&self) -> String {
        let Some(secs) = self.uptime_secs else {
            return PLACEHOLDER.to_string();
        };
        let days = secs / 86_400;
        let hours = (secs % 86_400) / 3_600;
        let minutes = (secs % 3_600) / 60;
        if days > 0 {
            format!("{}d {}h {}m", days, hours, minutes)
        } else if hours > 0 {
            format!("{}h {}m", hours, minutes)
        } else {
            format!("{}m", minutes)
        }
    }

    /// CPU temperature, e.g. `"47.5°C"`
    pub fn temperature_formatted(&self) -> String {
        match self.temperature_cpu {
            Some(temp) => format!("{:.1}°C", temp),
            None => PLACEHOLDER.to_string(),
        }
    }

    /// Battery status, e.g. `"85%"`, `"85% (charging)"`, or `"N/A"` without a UPS
    pub fn battery_formatted(&self) -> String {
        if self.power.available == Some(false) {
            return UNAVAILABLE.to_string();
        }
        let Some(percent) = self.power.battery_percent else {
            return PLACEHOLDER.to_string();
        };
        if self.power.charging == Some(true) {
            format!("{:.0}% (charging)", percent)
        } else if self.power.on_battery == Some(true) {
            format!("{:.0}% (on battery)", percent)
        } else {
            format!("{:.0}%", percent)
        }
    }

    /// Associated wireless clients, or `"N/A"` without an access point
    pub fn wifi_clients_formatted(&self) -> String {
        if self.wifi.available == Some(false) {
            return UNAVAILABLE.to_string();
        }
        match self.wifi.client_count {
            Some(count) => count.to_string(),
            None => PLACEHOLDER.to_string(),
        }
    }
}
