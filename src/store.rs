// Hearth - Live telemetry synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Telemetry store
//!
//! Single source of truth for the latest snapshot and the push channel's
//! connectivity. Every write is one atomic `watch` update, so observers
//! never see a half-merged snapshot and cannot mutate the state.
//!
//! # Session epochs
//!
//! [`TelemetryStore::clear`] advances the store's [`Epoch`]. Work dispatched
//! before the clear (a refresh in flight, a push message already queued)
//! carries the old epoch and is discarded when it tries to write.

use crate::provider::RefreshReport;
use crate::snapshot::{PartialSnapshot, Snapshot};
use crate::supervisor::ConnectivityState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

/// Store session generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(u64);

impl Epoch {
    fn next(self) -> Self {
        Epoch(self.0.wrapping_add(1))
    }
}

/// Everything the store holds
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryState {
    /// Latest known metrics
    pub snapshot: Snapshot,
    /// Push channel lifecycle phase
    pub connectivity: ConnectivityState,
    /// Time of the last successful write
    pub last_updated: Option<DateTime<Utc>>,
    /// Display error from the last refresh, if any
    pub error: Option<String>,
    #[serde(skip)]
    pub(crate) epoch: Epoch,
}

impl TelemetryState {
    /// Session generation this state belongs to
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }
}

/// The telemetry store
#[derive(Debug)]
pub struct TelemetryStore {
    state: watch::Sender<TelemetryState>,
}

impl TelemetryStore {
    /// Create an empty store
    pub fn new() -> Self {
        let (state, _) = watch::channel(TelemetryState::default());
        Self { state }
    }

    /// Merge a push update into the current snapshot
    ///
    /// Returns true if the update carried at least one field.
    pub fn apply_push_update(&self, partial: &PartialSnapshot) -> bool {
        self.state.send_if_modified(|state| {
            if !state.snapshot.merge(partial) {
                return false;
            }
            state.last_updated = Some(Utc::now());
            true
        })
    }

    /// Merge a push update dispatched during `epoch`
    ///
    /// Returns false without writing if the store was cleared since.
    pub fn apply_push_update_at(&self, epoch: Epoch, partial: &PartialSnapshot) -> bool {
        self.state.send_if_modified(|state| {
            if state.epoch != epoch {
                debug!("Dropping push update from a previous session");
                return false;
            }
            if !state.snapshot.merge(partial) {
                return false;
            }
            state.last_updated = Some(Utc::now());
            true
        })
    }

    /// Apply a complete snapshot, clearing any recorded error
    pub fn apply_full_snapshot(&self, full: Snapshot) {
        let partial = PartialSnapshot::from(full);
        self.state.send_modify(|state| {
            state.snapshot.merge(&partial);
            state.error = None;
            state.last_updated = Some(Utc::now());
        });
    }

    /// Apply the outcome of a pull refresh dispatched during `epoch`
    ///
    /// Successful categories are merged, failed optional categories are
    /// already marked unavailable by the report. A core failure sets the
    /// error and keeps the previous values. When every endpoint failed the
    /// update time is left untouched.
    ///
    /// Returns false without writing if the store was cleared since.
    pub fn apply_refresh(&self, epoch: Epoch, report: &RefreshReport) -> bool {
        let mut applied = false;
        self.state.send_if_modified(|state| {
            if state.epoch != epoch {
                debug!("Discarding refresh from a previous session");
                return false;
            }
            applied = true;
            let mut modified = state.snapshot.merge(&report.partial);
            let error = report.core_error();
            if state.error != error {
                state.error = error;
                modified = true;
            }
            if !report.is_total_failure() {
                state.last_updated = Some(Utc::now());
                modified = true;
            }
            modified
        });
        applied
    }

    /// Record a display error; current values are kept
    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.state.send_modify(|state| state.error = Some(message));
    }

    /// Reset to empty and start a new epoch
    ///
    /// Connectivity is owned by the supervisor and left as is.
    pub fn clear(&self) {
        self.state.send_modify(|state| {
            state.snapshot = Snapshot::default();
            state.error = None;
            state.last_updated = None;
            state.epoch = state.epoch.next();
        });
    }

    pub(crate) fn set_connectivity(&self, connectivity: ConnectivityState) -> bool {
        self.state.send_if_modified(|state| {
            if state.connectivity == connectivity {
                return false;
            }
            state.connectivity = connectivity;
            true
        })
    }

    /// Copy of the current snapshot
    pub fn snapshot(&self) -> Snapshot {
        self.state.borrow().snapshot.clone()
    }

    /// Copy of the full state
    pub fn state(&self) -> TelemetryState {
        self.state.borrow().clone()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.state.borrow().connectivity
    }

    /// Check if the push channel is live
    pub fn is_connected(&self) -> bool {
        self.connectivity() == ConnectivityState::Connected
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.state.borrow().last_updated
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    /// Current session generation
    pub fn epoch(&self) -> Epoch {
        self.state.borrow().epoch
    }

    /// Observe every change to the store
    pub fn watch(&self) -> watch::Receiver<TelemetryState> {
        self.state.subscribe()
    }

    pub fn cpu_formatted(&self) -> String {
        self.state.borrow().snapshot.cpu_formatted()
    }

    pub fn memory_formatted(&self) -> String {
        self.state.borrow().snapshot.memory_formatted()
    }

    pub fn disk_formatted(&self) -> String {
        self.state.borrow().snapshot.disk_formatted()
    }

    pub fn uptime_formatted(&self) -> String {
        self.state.borrow().snapshot.uptime_formatted()
    }

    pub fn temperature_formatted(&self) -> String {
        self.state.borrow().snapshot.temperature_formatted()
    }

    pub fn battery_formatted(&self) -> String {
        self.state.borrow().snapshot.battery_formatted()
    }

    pub fn wifi_clients_formatted(&self) -> String {
        self.state.borrow().snapshot.wifi_clients_formatted()
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}
