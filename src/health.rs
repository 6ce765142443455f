//! Sync health
//!
//! Classifies how trustworthy the displayed telemetry is, from the
//! connectivity state and the age of the last update.

use crate::store::TelemetryState;
use crate::supervisor::ConnectivityState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Health status of the sync layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Live push with fresh data
    Healthy,
    /// Data is flowing, but through the fallback or with errors
    Degraded,
    /// Data is too old to be trusted
    Unhealthy,
    /// Nothing received yet
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Check if the status is operational (healthy or degraded)
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    /// Check if the status is healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Which source is feeding the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveSource {
    Push,
    Poll,
    Idle,
}

/// Health thresholds
#[derive(Debug, Clone, PartialEq)]
pub struct HealthConfig {
    /// Data older than this is no longer considered fresh
    pub stale_after: Duration,
    /// Data older than this is considered unusable
    pub unhealthy_after: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self::for_poll_interval(Duration::from_secs(5))
    }
}

impl HealthConfig {
    /// Thresholds scaled to a polling interval
    ///
    /// Fresh means within three intervals; unusable after twelve, but never
    /// sooner than one minute.
    pub fn for_poll_interval(interval: Duration) -> Self {
        Self {
            stale_after: interval * 3,
            unhealthy_after: (interval * 12).max(Duration::from_secs(60)),
        }
    }
}

/// Result of a health assessment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncHealth {
    pub status: HealthStatus,
    pub source: ActiveSource,
    pub connectivity: ConnectivityState,
    /// Milliseconds since the last update
    pub age_ms: Option<u64>,
    pub message: String,
}

impl SyncHealth {
    /// One-line human-readable summary
    pub fn report(&self) -> String {
        let age = match self.age_ms {
            Some(ms) => format!("{:.1}s ago", ms as f64 / 1000.0),
            None => "never".to_string(),
        };
        format!(
            "{:?} via {:?} ({}), updated {}: {}",
            self.status, self.source, self.connectivity, age, self.message
        )
    }
}

/// Assess the sync layer at `now`
pub fn assess(
    state: &TelemetryState,
    poller_running: bool,
    config: &HealthConfig,
    now: DateTime<Utc>,
) -> SyncHealth {
    let source = if state.connectivity == ConnectivityState::Connected {
        ActiveSource::Push
    } else if poller_running {
        ActiveSource::Poll
    } else {
        ActiveSource::Idle
    };

    // Clock skew can make the age negative; treat it as fresh
    let age = state
        .last_updated
        .map(|at| (now - at).to_std().unwrap_or(Duration::ZERO));

    let (status, message) = match age {
        None => (HealthStatus::Unknown, "no data received".to_string()),
        Some(age) if age > config.unhealthy_after => (
            HealthStatus::Unhealthy,
            format!("no update for {}s", age.as_secs()),
        ),
        Some(age) => match (&state.error, source) {
            (Some(error), _) => (HealthStatus::Degraded, error.clone()),
            (None, ActiveSource::Push) if age <= config.stale_after => {
                (HealthStatus::Healthy, "OK".to_string())
            }
            (None, ActiveSource::Push) => {
                (HealthStatus::Degraded, "push channel quiet".to_string())
            }
            (None, ActiveSource::Poll) => {
                (HealthStatus::Degraded, "polling fallback".to_string())
            }
            (None, ActiveSource::Idle) => (HealthStatus::Degraded, "no active source".to_string()),
        },
    };

    SyncHealth {
        status,
        source,
        connectivity: state.connectivity,
        age_ms: age.map(|age| age.as_millis() as u64),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(connectivity: ConnectivityState, age_secs: Option<i64>, now: DateTime<Utc>) -> TelemetryState {
        TelemetryState {
            connectivity,
            last_updated: age_secs.map(|secs| now - chrono::Duration::seconds(secs)),
            ..Default::default()
        }
    }

    #[test]
    fn test_health_status_is_ok() {
        assert!(HealthStatus::Healthy.is_ok());
        assert!(HealthStatus::Degraded.is_ok());
        assert!(!HealthStatus::Unhealthy.is_ok());
        assert!(!HealthStatus::Unknown.is_ok());
    }

    #[test]
    fn test_no_data_is_unknown() {
        let now = Utc::now();
        let health = assess(
            &state(ConnectivityState::Connected, None, now),
            false,
            &HealthConfig::default(),
            now,
        );
        assert_eq!(health.status, HealthStatus::Unknown);
        assert_eq!(health.source, ActiveSource::Push);
        assert_eq!(health.age_ms, None);
    }

    #[test]
    fn test_fresh_push_is_healthy() {
        let now = Utc::now();
        let health = assess(
            &state(ConnectivityState::Connected, Some(2), now),
            false,
            &HealthConfig::default(),
            now,
        );
        assert!(health.status.is_healthy());
        assert_eq!(health.age_ms, Some(2_000));
    }

    #[test]
    fn test_polling_is_degraded() {
        let now = Utc::now();
        let health = assess(
            &state(ConnectivityState::Disconnected, Some(2), now),
            true,
            &HealthConfig::default(),
            now,
        );
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.source, ActiveSource::Poll);
    }

    #[test]
    fn test_error_is_degraded() {
        let now = Utc::now();
        let mut s = state(ConnectivityState::Connected, Some(1), now);
        s.error = Some("stats: Not authorized".to_string());
        let health = assess(&s, false, &HealthConfig::default(), now);
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(health.message.contains("Not authorized"));
    }

    #[test]
    fn test_old_data_is_unhealthy() {
        let now = Utc::now();
        let health = assess(
            &state(ConnectivityState::Disconnected, Some(600), now),
            true,
            &HealthConfig::default(),
            now,
        );
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert!(health.report().starts_with("Unhealthy via Poll"));
    }

    #[test]
    fn test_thresholds_scale_with_interval() {
        let config = HealthConfig::for_poll_interval(Duration::from_secs(10));
        assert_eq!(config.stale_after, Duration::from_secs(30));
        assert_eq!(config.unhealthy_after, Duration::from_secs(120));
        assert_eq!(
            HealthConfig::default().unhealthy_after,
            Duration::from_secs(60)
        );
    }
}
