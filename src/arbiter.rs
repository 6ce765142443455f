//! Single active source
//!
//! The arbiter watches connectivity and keeps exactly one writer feeding the
//! store: push delivery while the channel is connected, the fallback poller
//! otherwise.

use crate::poller::FallbackPoller;
use crate::supervisor::{ConnectionSupervisor, ConnectivityState, SubscriptionId};
use std::time::Duration;
use tracing::info;

/// Hands the store between push delivery and polling
///
/// Dropping the arbiter removes its observer; the poller is left as is.
#[derive(Debug)]
pub struct TransportArbiter {
    supervisor: ConnectionSupervisor,
    observer: SubscriptionId,
    interval: Duration,
}

impl TransportArbiter {
    /// Register with the supervisor and start arbitrating
    pub fn attach(
        supervisor: &ConnectionSupervisor,
        poller: FallbackPoller,
        interval: Duration,
    ) -> Self {
        let observer = supervisor.on_transition(move |state| arbitrate(&poller, interval, state));
        Self {
            supervisor: supervisor.clone(),
            observer,
            interval,
        }
    }

    /// Polling interval used while the push channel is down
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

fn arbitrate(poller: &FallbackPoller, interval: Duration, state: ConnectivityState) {
    match state {
        ConnectivityState::Connected => {
            if poller.stop() {
                info!("Push channel live, polling suspended");
            }
        }
        ConnectivityState::Connecting | ConnectivityState::Disconnected => {
            if poller.start(interval) {
                info!("Push channel {}, falling back to polling", state);
            }
        }
    }
}

impl Drop for TransportArbiter {
    fn drop(&mut self) {
        self.supervisor.remove_observer(self.observer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::metrics::SyncMetrics;
    use crate::provider::MemoryDataProvider;
    use crate::store::TelemetryStore;
    use crate::transport::MemoryTransport;
    use std::sync::Arc;

    fn setup() -> (ConnectionSupervisor, FallbackPoller, MemoryTransport) {
        let transport = MemoryTransport::new();
        let store = Arc::new(TelemetryStore::new());
        let metrics = Arc::new(SyncMetrics::new());
        let supervisor = ConnectionSupervisor::new(
            Arc::new(transport.clone()),
            store.clone(),
            metrics.clone(),
            TelemetryConfig::without_reconnect(),
        );
        let poller = FallbackPoller::new(Arc::new(MemoryDataProvider::new()), store, metrics);
        (supervisor, poller, transport)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_poller_runs_iff_not_connected() {
        let (supervisor, poller, transport) = setup();
        let _arbiter = TransportArbiter::attach(&supervisor, poller.clone(), Duration::from_secs(5));

        supervisor.connect().await;
        assert!(!poller.is_running());

        transport.drop_connection("link down");
        settle().await;
        assert!(poller.is_running());
        assert_eq!(poller.interval(), Some(Duration::from_secs(5)));

        supervisor.connect().await;
        assert!(!poller.is_running());

        supervisor.disconnect().await;
        assert!(poller.is_running());
    }

    #[tokio::test]
    async fn test_failed_connect_starts_polling() {
        let (supervisor, poller, transport) = setup();
        let _arbiter = TransportArbiter::attach(&supervisor, poller.clone(), Duration::from_secs(5));
        transport.refuse_connections(Some("offline"));

        supervisor.connect().await;
        assert!(poller.is_running());
    }

    #[tokio::test]
    async fn test_dropped_arbiter_stops_arbitrating() {
        let (supervisor, poller, _) = setup();
        let arbiter = TransportArbiter::attach(&supervisor, poller.clone(), Duration::from_secs(5));
        drop(arbiter);

        supervisor.connect().await;
        supervisor.disconnect().await;
        assert!(!poller.is_running());
    }
}
