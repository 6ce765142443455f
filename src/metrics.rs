//! Sync counters
//!
//! This module provides statistics about push delivery, fallback
//! refreshes and connection churn.

use crate::provider::Endpoint;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the supervisor and the poller
#[derive(Debug, Default)]
pub struct SyncMetrics {
    push_applied: AtomicU64,
    push_dropped: AtomicU64,
    refreshes: AtomicU64,
    refreshes_discarded: AtomicU64,
    fetch_failures: [AtomicU64; 4],
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    connections_lost: AtomicU64,
}

/// Point-in-time copy of [`SyncMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsReport {
    pub push_applied: u64,
    pub push_dropped: u64,
    pub refreshes: u64,
    pub refreshes_discarded: u64,
    pub fetch_failures_info: u64,
    pub fetch_failures_stats: u64,
    pub fetch_failures_power: u64,
    pub fetch_failures_wifi_clients: u64,
    pub connect_attempts: u64,
    pub connect_failures: u64,
    pub connections_lost: u64,
}

impl SyncMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_push(&self, applied: bool) {
        if applied {
            self.push_applied.fetch_add(1, Ordering::Relaxed);
        } else {
            self.push_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_refresh(&self, applied: bool) {
        if applied {
            self.refreshes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.refreshes_discarded.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_fetch_failure(&self, endpoint: Endpoint) {
        self.fetch_failures[endpoint.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect(&self, success: bool) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.connect_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
    }

    /// Failures recorded for one endpoint
    pub fn fetch_failures(&self, endpoint: Endpoint) -> u64 {
        self.fetch_failures[endpoint.index()].load(Ordering::Relaxed)
    }

    /// Copy every counter
    pub fn snapshot(&self) -> MetricsReport {
        MetricsReport {
            push_applied: self.push_applied.load(Ordering::Relaxed),
            push_dropped: self.push_dropped.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refreshes_discarded: self.refreshes_discarded.load(Ordering::Relaxed),
            fetch_failures_info: self.fetch_failures(Endpoint::Info),
            fetch_failures_stats: self.fetch_failures(Endpoint::Stats),
            fetch_failures_power: self.fetch_failures(Endpoint::Power),
            fetch_failures_wifi_clients: self.fetch_failures(Endpoint::WifiClients),
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            connections_lost: self.connections_lost.load(Ordering::Relaxed),
        }
    }

    /// Generate a human-readable report
    pub fn report(&self) -> String {
        let m = self.snapshot();
        let mut report = String::new();

        report.push_str("=== Hearth Sync Metrics ===\n\n");

        report.push_str(&format!("Push messages applied: {}\n", m.push_applied));
        report.push_str(&format!("Push messages dropped: {}\n", m.push_dropped));
        report.push_str(&format!("Refreshes applied: {}\n", m.refreshes));
        report.push_str(&format!(
            "Refreshes discarded: {}\n\n",
            m.refreshes_discarded
        ));

        report.push_str("Fetch failures:\n");
        for endpoint in Endpoint::ALL {
            report.push_str(&format!(
                "  {}: {}\n",
                endpoint,
                self.fetch_failures(endpoint)
            ));
        }

        report.push_str(&format!(
            "\nConnect attempts: {} ({} failed)\n",
            m.connect_attempts, m.connect_failures
        ));
        report.push_str(&format!("Connections lost: {}\n", m.connections_lost));

        report
    }
}
