// Hearth - Live telemetry synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Pull-side data sources
//!
//! The appliance exposes four idempotent read endpoints. Each one may fail
//! on its own (a box without a UPS has no power endpoint), so a refresh
//! collects four independent results into a [`RefreshReport`].

use crate::error::FetchError;
use crate::snapshot::PartialSnapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// One of the pull endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Info,
    Stats,
    Power,
    WifiClients,
}

impl Endpoint {
    /// All endpoints, in refresh order
    pub const ALL: [Endpoint; 4] = [
        Endpoint::Info,
        Endpoint::Stats,
        Endpoint::Power,
        Endpoint::WifiClients,
    ];

    /// Core endpoints must succeed for a refresh to count as healthy.
    /// The others report optional hardware.
    pub fn is_core(&self) -> bool {
        matches!(self, Endpoint::Info | Endpoint::Stats)
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            Endpoint::Info => 0,
            Endpoint::Stats => 1,
            Endpoint::Power => 2,
            Endpoint::WifiClients => 3,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Info => write!(f, "info"),
            Endpoint::Stats => write!(f, "stats"),
            Endpoint::Power => write!(f, "power"),
            Endpoint::WifiClients => write!(f, "wifi-clients"),
        }
    }
}

/// System identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoReport {
    pub hostname: String,
    pub uptime_secs: u64,
}

/// Resource usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub cpu_percent: f64,
    pub memory_used: u64,
    pub memory_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
    #[serde(default)]
    pub temperature_cpu: Option<f64>,
}

/// UPS status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerReport {
    #[serde(default)]
    pub battery_percent: Option<f64>,
    #[serde(default)]
    pub charging: Option<bool>,
    #[serde(default)]
    pub on_battery: Option<bool>,
}

/// A client associated with the access point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiClient {
    pub mac: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub signal_dbm: Option<i32>,
}

/// Access point client list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WifiClientsReport {
    pub clients: Vec<WifiClient>,
}

impl From<InfoReport> for PartialSnapshot {
    fn from(report: InfoReport) -> Self {
        PartialSnapshot {
            hostname: Some(report.hostname),
            uptime_secs: Some(report.uptime_secs),
            ..Default::default()
        }
    }
}

impl From<StatsReport> for PartialSnapshot {
    fn from(report: StatsReport) -> Self {
        // Percentages are derived from the byte counts during merge
        PartialSnapshot {
            cpu_percent: Some(report.cpu_percent),
            memory_used: Some(report.memory_used),
            memory_total: Some(report.memory_total),
            disk_used: Some(report.disk_used),
            disk_total: Some(report.disk_total),
            temperature_cpu: report.temperature_cpu,
            ..Default::default()
        }
    }
}

impl From<PowerReport> for PartialSnapshot {
    fn from(report: PowerReport) -> Self {
        let mut partial = PartialSnapshot::new();
        partial.power.available = Some(true);
        partial.power.battery_percent = report.battery_percent;
        partial.power.charging = report.charging;
        partial.power.on_battery = report.on_battery;
        partial
    }
}

impl From<WifiClientsReport> for PartialSnapshot {
    fn from(report: WifiClientsReport) -> Self {
        let mut partial = PartialSnapshot::new();
        partial.wifi.available = Some(true);
        partial.wifi.client_count = u32::try_from(report.clients.len()).ok();
        partial
    }
}

/// The four pull endpoints of the appliance
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// System identity and uptime
    async fn fetch_info(&self) -> Result<InfoReport, FetchError>;

    /// Resource usage
    async fn fetch_stats(&self) -> Result<StatsReport, FetchError>;

    /// UPS status
    async fn fetch_power(&self) -> Result<PowerReport, FetchError>;

    /// Wireless access point clients
    async fn fetch_wifi_clients(&self) -> Result<WifiClientsReport, FetchError>;
}

/// Combined outcome of one refresh
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshReport {
    /// Fields from every endpoint that succeeded, plus unavailable markers
    pub partial: PartialSnapshot,
    /// Endpoints that failed
    pub failures: Vec<(Endpoint, FetchError)>,
}

impl RefreshReport {
    /// Combine the four sub-fetch results
    ///
    /// A failed optional endpoint is turned into an "unavailable" marker for
    /// its category. A failed core endpoint contributes nothing; the store
    /// keeps the previous values and records the failure.
    pub fn assemble(
        info: Result<InfoReport, FetchError>,
        stats: Result<StatsReport, FetchError>,
        power: Result<PowerReport, FetchError>,
        wifi: Result<WifiClientsReport, FetchError>,
    ) -> Self {
        let mut report = Self::default();

        match info {
            Ok(info) => report.partial.extend(info.into()),
            Err(err) => report.failures.push((Endpoint::Info, err)),
        }
        match stats {
            Ok(stats) => report.partial.extend(stats.into()),
            Err(err) => report.failures.push((Endpoint::Stats, err)),
        }
        match power {
            Ok(power) => report.partial.extend(power.into()),
            Err(err) => {
                report.partial.power.available = Some(false);
                report.failures.push((Endpoint::Power, err));
            }
        }
        match wifi {
            Ok(wifi) => report.partial.extend(wifi.into()),
            Err(err) => {
                report.partial.wifi.available = Some(false);
                report.failures.push((Endpoint::WifiClients, err));
            }
        }

        report
    }

    /// Check if every endpoint answered
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Check if every endpoint failed
    pub fn is_total_failure(&self) -> bool {
        self.failures.len() == Endpoint::ALL.len()
    }

    /// Check if a given endpoint failed
    pub fn failed(&self, endpoint: Endpoint) -> bool {
        self.failures.iter().any(|(e, _)| *e == endpoint)
    }

    /// Human-readable summary of core endpoint failures, if any
    pub fn core_error(&self) -> Option<String> {
        let messages: Vec<String> = self
            .failures
            .iter()
            .filter(|(endpoint, _)| endpoint.is_core())
            .map(|(endpoint, err)| format!("{}: {}", endpoint, err))
            .collect();
        if messages.is_empty() {
            None
        } else {
            Some(messages.join("; "))
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An in-memory data provider for testing and local simulation
///
/// Every endpoint returns whatever was last stored for it.
#[derive(Debug)]
pub struct MemoryDataProvider {
    info: Mutex<Result<InfoReport, FetchError>>,
    stats: Mutex<Result<StatsReport, FetchError>>,
    power: Mutex<Result<PowerReport, FetchError>>,
    wifi: Mutex<Result<WifiClientsReport, FetchError>>,
    calls: [AtomicU64; 4],
}

impl MemoryDataProvider {
    /// Create a provider answering with a small, healthy appliance
    pub fn new() -> Self {
        Self {
            info: Mutex::new(Ok(InfoReport {
                hostname: "hearth".to_string(),
                uptime_secs: 3_600,
            })),
            stats: Mutex::new(Ok(StatsReport {
                cpu_percent: 5.0,
                memory_used: 1 << 30,
                memory_total: 4 << 30,
                disk_used: 100 << 30,
                disk_total: 1000 << 30,
                temperature_cpu: Some(45.0),
            })),
            power: Mutex::new(Ok(PowerReport {
                battery_percent: Some(100.0),
                charging: Some(false),
                on_battery: Some(false),
            })),
            wifi: Mutex::new(Ok(WifiClientsReport::default())),
            calls: Default::default(),
        }
    }

    /// Set the info endpoint result
    pub fn set_info(&self, result: Result<InfoReport, FetchError>) {
        *lock(&self.info) = result;
    }

    /// Set the stats endpoint result
    pub fn set_stats(&self, result: Result<StatsReport, FetchError>) {
        *lock(&self.stats) = result;
    }

    /// Set the power endpoint result
    pub fn set_power(&self, result: Result<PowerReport, FetchError>) {
        *lock(&self.power) = result;
    }

    /// Set the wifi clients endpoint result
    pub fn set_wifi_clients(&self, result: Result<WifiClientsReport, FetchError>) {
        *lock(&self.wifi) = result;
    }

    /// Make every endpoint fail with the same error
    pub fn fail_all(&self, err: FetchError) {
        self.set_info(Err(err.clone()));
        self.set_stats(Err(err.clone()));
        self.set_power(Err(err.clone()));
        self.set_wifi_clients(Err(err));
    }

    /// Number of times an endpoint was fetched
    pub fn calls(&self, endpoint: Endpoint) -> u64 {
        self.calls[endpoint.index()].load(Ordering::SeqCst)
    }

    fn record(&self, endpoint: Endpoint) {
        self.calls[endpoint.index()].fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for MemoryDataProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataProvider for MemoryDataProvider {
    async fn fetch_info(&self) -> Result<InfoReport, FetchError> {
        self.record(Endpoint::Info);
        lock(&self.info).clone()
    }

    async fn fetch_stats(&self) -> Result<StatsReport, FetchError> {
        self.record(Endpoint::Stats);
        lock(&self.stats).clone()
    }

    async fn fetch_power(&self) -> Result<PowerReport, FetchError> {
        self.record(Endpoint::Power);
        lock(&self.power).clone()
    }

    async fn fetch_wifi_clients(&self) -> Result<WifiClientsReport, FetchError> {
        self.record(Endpoint::WifiClients);
        lock(&self.wifi).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unavailable(endpoint: &str) -> FetchError {
        FetchError::Unavailable {
            endpoint: endpoint.to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_provider_defaults() {
        let provider = MemoryDataProvider::new();
        let info = provider.fetch_info().await.unwrap();
        assert_eq!(info.hostname, "hearth");
        assert_eq!(provider.calls(Endpoint::Info), 1);
        assert_eq!(provider.calls(Endpoint::Stats), 0);
    }

    #[tokio::test]
    async fn test_assemble_degrades_optional_endpoints() {
        let provider = MemoryDataProvider::new();
        provider.set_power(Err(unavailable("power")));

        let report = RefreshReport::assemble(
            provider.fetch_info().await,
            provider.fetch_stats().await,
            provider.fetch_power().await,
            provider.fetch_wifi_clients().await,
        );

        assert!(!report.is_complete());
        assert!(report.failed(Endpoint::Power));
        assert_eq!(report.partial.power.available, Some(false));
        assert_eq!(report.partial.power.battery_percent, None);
        assert_eq!(report.partial.hostname.as_deref(), Some("hearth"));
        assert_eq!(report.partial.cpu_percent, Some(5.0));
        assert_eq!(report.partial.wifi.client_count, Some(0));
        assert_eq!(report.core_error(), None);
    }

    #[tokio::test]
    async fn test_assemble_core_failure() {
        let provider = MemoryDataProvider::new();
        provider.set_stats(Err(FetchError::Http {
            endpoint: "stats".to_string(),
            status: 502,
        }));

        let report = RefreshReport::assemble(
            provider.fetch_info().await,
            provider.fetch_stats().await,
            provider.fetch_power().await,
            provider.fetch_wifi_clients().await,
        );

        assert_eq!(report.partial.cpu_percent, None);
        let error = report.core_error().unwrap();
        assert!(error.contains("stats"));
        assert!(error.contains("502"));
        assert!(!report.is_total_failure());
    }

    #[tokio::test]
    async fn test_assemble_total_failure() {
        let provider = MemoryDataProvider::new();
        provider.fail_all(FetchError::Unauthorized);

        let report = RefreshReport::assemble(
            provider.fetch_info().await,
            provider.fetch_stats().await,
            provider.fetch_power().await,
            provider.fetch_wifi_clients().await,
        );

        assert!(report.is_total_failure());
        assert_eq!(report.failures.len(), 4);
    }

    #[test]
    fn test_stats_report_deserialize() {
        let report: StatsReport = serde_json::from_str(
            r#"{"cpuPercent": 3.5, "memoryUsed": 1, "memoryTotal": 2, "diskUsed": 3, "diskTotal": 4}"#,
        )
        .unwrap();
        assert_eq!(report.temperature_cpu, None);
        assert_eq!(report.disk_total, 4);
    }
}
