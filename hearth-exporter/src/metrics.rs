// Hearth Exporter - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for Hearth monitoring.
//!
//! This module defines all Prometheus metrics exposed by the exporter
//! and provides functions to update them from the session state.

use hearth::{
    ActiveSource, ConnectivityState, HealthStatus, MetricsReport, Snapshot, SyncHealth,
};
use lazy_static::lazy_static;
use prometheus::{register_gauge, register_gauge_vec, Encoder, Gauge, GaugeVec, TextEncoder};

lazy_static! {
    // ============================================================
    // Appliance Metrics (from the telemetry store)
    // ============================================================

    /// CPU usage (0-100).
    pub static ref CPU_PERCENT: Gauge = register_gauge!(
        "hearth_cpu_percent",
        "CPU usage in percent"
    ).unwrap();

    /// Memory usage, labeled by kind (used, total).
    pub static ref MEMORY_BYTES: GaugeVec = register_gauge_vec!(
        "hearth_memory_bytes",
        "Memory in bytes",
        &["kind"]
    ).unwrap();

    /// Disk usage, labeled by kind (used, total).
    pub static ref DISK_BYTES: GaugeVec = register_gauge_vec!(
        "hearth_disk_bytes",
        "Disk space in bytes",
        &["kind"]
    ).unwrap();

    pub static ref MEMORY_PERCENT: Gauge = register_gauge!(
        "hearth_memory_percent",
        "Memory usage in percent"
    ).unwrap();

    pub static ref DISK_PERCENT: Gauge = register_gauge!(
        "hearth_disk_percent",
        "Disk usage in percent"
    ).unwrap();

    pub static ref TEMPERATURE_CPU: Gauge = register_gauge!(
        "hearth_temperature_cpu_celsius",
        "CPU temperature in degrees Celsius"
    ).unwrap();

    pub static ref UPTIME_SECONDS: Gauge = register_gauge!(
        "hearth_uptime_seconds",
        "Appliance uptime in seconds"
    ).unwrap();

    /// Battery charge; absent hardware reports -1.
    pub static ref BATTERY_PERCENT: Gauge = register_gauge!(
        "hearth_battery_percent",
        "UPS battery charge in percent (-1 = no UPS)"
    ).unwrap();

    pub static ref ON_BATTERY: Gauge = register_gauge!(
        "hearth_on_battery",
        "Running from battery (1=yes, 0=no)"
    ).unwrap();

    /// Wireless clients; absent hardware reports -1.
    pub static ref WIFI_CLIENTS: Gauge = register_gauge!(
        "hearth_wifi_clients",
        "Associated wireless clients (-1 = no access point)"
    ).unwrap();

    // ============================================================
    // Sync Metrics (from the session)
    // ============================================================

    /// Connectivity: 0 = Disconnected, 1 = Connecting, 2 = Connected.
    pub static ref CONNECTIVITY: Gauge = register_gauge!(
        "hearth_push_connectivity",
        "Push channel state (0=Disconnected, 1=Connecting, 2=Connected)"
    ).unwrap();

    /// Active source: 0 = Idle, 1 = Poll, 2 = Push.
    pub static ref ACTIVE_SOURCE: Gauge = register_gauge!(
        "hearth_active_source",
        "Source feeding the store (0=Idle, 1=Poll, 2=Push)"
    ).unwrap();

    /// Health: 0 = Healthy, 1 = Degraded, 2 = Unhealthy, 3 = Unknown.
    pub static ref HEALTH_STATUS: Gauge = register_gauge!(
        "hearth_health_status",
        "Sync health (0=Healthy, 1=Degraded, 2=Unhealthy, 3=Unknown)"
    ).unwrap();

    pub static ref DATA_AGE_SECONDS: Gauge = register_gauge!(
        "hearth_data_age_seconds",
        "Seconds since the last store update (-1 = never)"
    ).unwrap();

    /// Sync counters, labeled by event.
    pub static ref SYNC_EVENTS_TOTAL: GaugeVec = register_gauge_vec!(
        "hearth_sync_events_total",
        "Sync layer events since start",
        &["event"]
    ).unwrap();
}

fn set_opt(gauge: &Gauge, value: Option<f64>, missing: f64) {
    gauge.set(value.unwrap_or(missing));
}

/// Update appliance metrics from a snapshot.
pub fn update_snapshot_metrics(snapshot: &Snapshot) {
    set_opt(&CPU_PERCENT, snapshot.cpu_percent, 0.0);
    set_opt(&MEMORY_PERCENT, snapshot.memory_percent, 0.0);
    set_opt(&DISK_PERCENT, snapshot.disk_percent, 0.0);
    set_opt(&TEMPERATURE_CPU, snapshot.temperature_cpu, 0.0);
    set_opt(
        &UPTIME_SECONDS,
        snapshot.uptime_secs.map(|secs| secs as f64),
        0.0,
    );

    for (kind, value) in [
        ("used", snapshot.memory_used),
        ("total", snapshot.memory_total),
    ] {
        MEMORY_BYTES
            .with_label_values(&[kind])
            .set(value.unwrap_or(0) as f64);
    }
    for (kind, value) in [("used", snapshot.disk_used), ("total", snapshot.disk_total)] {
        DISK_BYTES
            .with_label_values(&[kind])
            .set(value.unwrap_or(0) as f64);
    }

    let battery = match snapshot.power.available {
        Some(false) => None,
        _ => snapshot.power.battery_percent,
    };
    set_opt(&BATTERY_PERCENT, battery, -1.0);
    ON_BATTERY.set(if snapshot.power.on_battery == Some(true) {
        1.0
    } else {
        0.0
    });

    let clients = match snapshot.wifi.available {
        Some(false) => None,
        _ => snapshot.wifi.client_count.map(f64::from),
    };
    set_opt(&WIFI_CLIENTS, clients, -1.0);
}

/// Update connectivity and health metrics.
pub fn update_health_metrics(health: &SyncHealth) {
    CONNECTIVITY.set(match health.connectivity {
        ConnectivityState::Disconnected => 0.0,
        ConnectivityState::Connecting => 1.0,
        ConnectivityState::Connected => 2.0,
    });
    ACTIVE_SOURCE.set(match health.source {
        ActiveSource::Idle => 0.0,
        ActiveSource::Poll => 1.0,
        ActiveSource::Push => 2.0,
    });
    HEALTH_STATUS.set(match health.status {
        HealthStatus::Healthy => 0.0,
        HealthStatus::Degraded => 1.0,
        HealthStatus::Unhealthy => 2.0,
        HealthStatus::Unknown => 3.0,
    });
    DATA_AGE_SECONDS.set(
        health
            .age_ms
            .map(|ms| ms as f64 / 1000.0)
            .unwrap_or(-1.0),
    );
}

/// Update sync counters.
pub fn update_sync_metrics(report: &MetricsReport) {
    let events = [
        ("push_applied", report.push_applied),
        ("push_dropped", report.push_dropped),
        ("refreshes", report.refreshes),
        ("refreshes_discarded", report.refreshes_discarded),
        ("fetch_failures_info", report.fetch_failures_info),
        ("fetch_failures_stats", report.fetch_failures_stats),
        ("fetch_failures_power", report.fetch_failures_power),
        (
            "fetch_failures_wifi_clients",
            report.fetch_failures_wifi_clients,
        ),
        ("connect_attempts", report.connect_attempts),
        ("connect_failures", report.connect_failures),
        ("connections_lost", report.connections_lost),
    ];
    for (event, count) in events {
        SYNC_EVENTS_TOTAL
            .with_label_values(&[event])
            .set(count as f64);
    }
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
