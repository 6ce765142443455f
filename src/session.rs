// Hearth - Live telemetry synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Session gate
//!
//! Starts the synchronization layer when a user signs in and tears all of
//! it down when they sign out. The gate owns every component; nothing runs
//! outside a session.
//!
//! # Example
//!
//! ```rust,no_run
//! use hearth::{MemoryDataProvider, MemoryTransport, SessionGate, TelemetryConfig};
//! use std::sync::Arc;
//!
//! # async fn demo() -> hearth::Result<()> {
//! let gate = SessionGate::new(
//!     TelemetryConfig::default(),
//!     Arc::new(MemoryDataProvider::new()),
//!     Arc::new(MemoryTransport::new()),
//! )?;
//!
//! gate.on_login().await;
//! println!("CPU {}", gate.store().cpu_formatted());
//! gate.on_logout().await;
//! # Ok(())
//! # }
//! ```

use crate::arbiter::TransportArbiter;
use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::health::{self, HealthConfig, SyncHealth};
use crate::metrics::SyncMetrics;
use crate::poller::FallbackPoller;
use crate::protocol::{PushMessage, Topic};
use crate::provider::DataProvider;
use crate::store::TelemetryStore;
use crate::supervisor::{ConnectionSupervisor, SubscriptionId};
use crate::transport::PushTransport;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::info;

/// Authentication state reported by the auth provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthState {
    #[default]
    SignedOut,
    SignedIn {
        user: String,
    },
}

/// Owns the synchronization layer for one signed-in session at a time
#[derive(Debug)]
pub struct SessionGate {
    config: TelemetryConfig,
    health_config: HealthConfig,
    store: Arc<TelemetryStore>,
    metrics: Arc<SyncMetrics>,
    supervisor: ConnectionSupervisor,
    poller: FallbackPoller,
    arbiter: Mutex<Option<TransportArbiter>>,
}

impl SessionGate {
    /// Build every component; nothing starts until [`SessionGate::on_login`]
    pub fn new(
        config: TelemetryConfig,
        provider: Arc<dyn DataProvider>,
        transport: Arc<dyn PushTransport>,
    ) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(TelemetryStore::new());
        let metrics = Arc::new(SyncMetrics::new());
        let supervisor =
            ConnectionSupervisor::new(transport, store.clone(), metrics.clone(), config.clone());
        let poller = FallbackPoller::new(provider, store.clone(), metrics.clone())
            .with_fetch_timeout(config.fetch_timeout());

        Ok(Self {
            health_config: HealthConfig::for_poll_interval(config.poll_interval()),
            config,
            store,
            metrics,
            supervisor,
            poller,
            arbiter: Mutex::new(None),
        })
    }

    fn arbiter(&self) -> MutexGuard<'_, Option<TransportArbiter>> {
        self.arbiter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the session
    ///
    /// Attaches the arbiter, runs one full refresh so the display has data
    /// right away, then opens the push channel. Returns false if a session
    /// is already active.
    pub async fn on_login(&self) -> bool {
        {
            let mut arbiter = self.arbiter();
            if arbiter.is_some() {
                return false;
            }
            *arbiter = Some(TransportArbiter::attach(
                &self.supervisor,
                self.poller.clone(),
                self.config.poll_interval(),
            ));
        }
        info!("Session started");

        self.poller.refresh().await;
        // Signed out while the first refresh was in flight
        if !self.is_active() {
            return false;
        }
        self.supervisor.connect().await;
        true
    }

    /// End the session
    ///
    /// Detaches the arbiter first so the teardown's own disconnect does not
    /// restart polling. Returns false if no session was active.
    pub async fn on_logout(&self) -> bool {
        let Some(arbiter) = self.arbiter().take() else {
            return false;
        };
        drop(arbiter);

        self.supervisor.disconnect().await;
        self.poller.stop();
        self.store.clear();
        info!("Session ended");
        true
    }

    /// Follow the auth provider until its channel closes, then tear down
    pub async fn run(&self, mut auth: watch::Receiver<AuthState>) {
        loop {
            let current = auth.borrow_and_update().clone();
            match current {
                AuthState::SignedIn { user } => {
                    if self.on_login().await {
                        info!("Signed in as {}", user);
                    }
                }
                AuthState::SignedOut => {
                    self.on_logout().await;
                }
            }
            if auth.changed().await.is_err() {
                break;
            }
        }
        self.shutdown().await;
    }

    /// Release everything; same as signing out
    pub async fn shutdown(&self) {
        self.on_logout().await;
    }

    /// Check if a session is active
    pub fn is_active(&self) -> bool {
        self.arbiter().is_some()
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.store
    }

    pub fn supervisor(&self) -> &ConnectionSupervisor {
        &self.supervisor
    }

    pub fn poller(&self) -> &FallbackPoller {
        &self.poller
    }

    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }

    /// Current sync health
    pub fn health(&self) -> SyncHealth {
        health::assess(
            &self.store.state(),
            self.poller.is_running(),
            &self.health_config,
            Utc::now(),
        )
    }

    /// Register a push topic handler
    pub async fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&PushMessage) + Send + Sync + 'static,
    {
        self.supervisor.subscribe(topic, handler).await
    }

    /// Remove a push topic handler
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.supervisor.unsubscribe(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MemoryDataProvider;
    use crate::supervisor::ConnectivityState;
    use crate::transport::MemoryTransport;

    fn gate() -> (SessionGate, MemoryTransport) {
        let transport = MemoryTransport::new();
        let gate = SessionGate::new(
            TelemetryConfig::default(),
            Arc::new(MemoryDataProvider::new()),
            Arc::new(transport.clone()),
        )
        .unwrap();
        (gate, transport)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = SessionGate::new(
            TelemetryConfig::with_poll_interval_ms(0),
            Arc::new(MemoryDataProvider::new()),
            Arc::new(MemoryTransport::new()),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_login_refreshes_then_connects() {
        let (gate, transport) = gate();
        assert!(gate.on_login().await);
        assert!(!gate.on_login().await);

        assert!(gate.is_active());
        assert_eq!(gate.supervisor().state(), ConnectivityState::Connected);
        assert!(!gate.poller().is_running());
        assert_eq!(gate.store().snapshot().hostname.as_deref(), Some("hearth"));
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_logout_tears_down() {
        let (gate, transport) = gate();
        gate.on_login().await;
        assert!(gate.on_logout().await);
        assert!(!gate.on_logout().await);

        assert!(!gate.is_active());
        assert!(!transport.is_connected());
        assert!(!gate.poller().is_running());
        assert!(gate.store().snapshot().is_empty());
        assert_eq!(gate.store().connectivity(), ConnectivityState::Disconnected);
    }

    #[tokio::test]
    async fn test_health_after_login() {
        let (gate, _) = gate();
        assert_eq!(gate.health().status, crate::health::HealthStatus::Unknown);

        gate.on_login().await;
        assert!(gate.health().status.is_healthy());
    }
}
