// Hearth - Live telemetry synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for the synchronization layer

use crate::error::{HearthError, Result};
use crate::protocol::Topic;
use serde::Deserialize;
use std::time::Duration;

/// Session-level configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Fallback polling interval in milliseconds (default: 5000)
    pub poll_interval_ms: u64,

    /// Upper bound on a single push connect attempt in milliseconds
    pub connect_timeout_ms: u64,

    /// Upper bound on each pull endpoint during a refresh in milliseconds;
    /// an endpoint that does not answer in time counts as failed
    pub fetch_timeout_ms: u64,

    /// Topics subscribed on every connection, regardless of handlers
    pub baseline_topics: Vec<Topic>,

    /// Reconnect policy for the push channel
    pub reconnect: ReconnectConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            connect_timeout_ms: 10_000,
            fetch_timeout_ms: 10_000,
            baseline_topics: vec![Topic::Stats],
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl TelemetryConfig {
    /// Create a configuration with a custom polling interval
    pub fn with_poll_interval_ms(poll_interval_ms: u64) -> Self {
        Self {
            poll_interval_ms,
            ..Default::default()
        }
    }

    /// Create a configuration that never reconnects on its own
    pub fn without_reconnect() -> Self {
        Self {
            reconnect: ReconnectConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Polling interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Per-endpoint fetch timeout as a duration
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(HearthError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(HearthError::Config(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(HearthError::Config(
                "fetch_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.reconnect.validate()
    }
}

/// Push channel reconnect policy
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Reconnect automatically after a failure or connection loss
    pub enabled: bool,

    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,

    /// Ceiling for any single delay in milliseconds
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays
    pub multiplier: f64,

    /// Relative random spread applied to each delay (0.0 - 1.0)
    pub jitter: f64,

    /// Give up after this many consecutive failures (`None` = never)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
            max_attempts: None,
        }
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.initial_delay_ms == 0 || self.initial_delay_ms > self.max_delay_ms {
            return Err(HearthError::Config(format!(
                "reconnect delays must satisfy 0 < initial ({}) <= max ({})",
                self.initial_delay_ms, self.max_delay_ms
            )));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(HearthError::Config(format!(
                "reconnect multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(HearthError::Config(format!(
                "reconnect jitter must be within [0, 1], got {}",
                self.jitter
            )));
        }
        Ok(())
    }
}
