// Hearth - Live telemetry synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Fallback polling
//!
//! Pulls a full snapshot from the four data endpoints on a fixed interval
//! while the push channel is unavailable.

use crate::error::FetchError;
use crate::metrics::SyncMetrics;
use crate::provider::{DataProvider, Endpoint, RefreshReport};
use crate::store::TelemetryStore;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

struct Timer {
    handle: JoinHandle<()>,
    interval: Duration,
}

struct PollerInner {
    provider: Arc<dyn DataProvider>,
    store: Arc<TelemetryStore>,
    metrics: Arc<SyncMetrics>,
    timer: Mutex<Option<Timer>>,
    ticks: AtomicU64,
}

/// Interval-driven refresh of the telemetry store
///
/// Cheap to clone; clones drive the same timer.
#[derive(Clone)]
pub struct FallbackPoller {
    inner: Arc<PollerInner>,
    fetch_timeout: Duration,
}

impl FallbackPoller {
    pub fn new(
        provider: Arc<dyn DataProvider>,
        store: Arc<TelemetryStore>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                provider,
                store,
                metrics,
                timer: Mutex::new(None),
                ticks: AtomicU64::new(0),
            }),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Bound each endpoint of a refresh to `timeout`
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    /// Start refreshing every `interval`
    ///
    /// The first refresh happens one interval from now. Returns false if
    /// the timer was already running, in which case nothing changes.
    pub fn start(&self, interval: Duration) -> bool {
        let mut timer = self.inner.timer();
        if timer.is_some() {
            return false;
        }

        let interval = interval.max(Duration::from_millis(1));
        let weak = Arc::downgrade(&self.inner);
        let fetch_timeout = self.fetch_timeout;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.ticks.fetch_add(1, Ordering::Relaxed);
                // Detached so stopping the timer never cancels a refresh
                tokio::spawn(async move {
                    inner.refresh(fetch_timeout).await;
                });
            }
        });

        *timer = Some(Timer { handle, interval });
        info!("Fallback polling started ({:?})", interval);
        true
    }

    /// Stop the timer; returns false if it was not running
    ///
    /// Refreshes already dispatched are allowed to complete.
    pub fn stop(&self) -> bool {
        let Some(timer) = self.inner.timer().take() else {
            return false;
        };
        timer.handle.abort();
        info!("Fallback polling stopped");
        true
    }

    /// Fetch all four endpoints concurrently and apply the result
    ///
    /// Each endpoint is bounded by the fetch timeout, so one that hangs only
    /// degrades its own category. Returns false if the store was cleared
    /// while the fetch was in flight.
    pub async fn refresh(&self) -> bool {
        self.inner.refresh(self.fetch_timeout).await
    }

    pub fn is_running(&self) -> bool {
        self.inner.timer().is_some()
    }

    /// Interval of the running timer
    pub fn interval(&self) -> Option<Duration> {
        self.inner.timer().as_ref().map(|timer| timer.interval)
    }

    /// Timer ticks since creation
    pub fn ticks(&self) -> u64 {
        self.inner.ticks.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for FallbackPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackPoller")
            .field("interval", &self.interval())
            .field("ticks", &self.ticks())
            .finish()
    }
}

impl PollerInner {
    fn timer(&self) -> MutexGuard<'_, Option<Timer>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn refresh(&self, limit: Duration) -> bool {
        let epoch = self.store.epoch();
        let (info, stats, power, wifi) = tokio::join!(
            bounded(Endpoint::Info, limit, self.provider.fetch_info()),
            bounded(Endpoint::Stats, limit, self.provider.fetch_stats()),
            bounded(Endpoint::Power, limit, self.provider.fetch_power()),
            bounded(Endpoint::WifiClients, limit, self.provider.fetch_wifi_clients()),
        );
        let report = RefreshReport::assemble(info, stats, power, wifi);

        for (endpoint, err) in &report.failures {
            self.metrics.record_fetch_failure(*endpoint);
            if endpoint.is_core() {
                warn!("Refresh of {} failed: {}", endpoint, err);
            } else {
                debug!("{} unavailable: {}", endpoint, err);
            }
        }

        let applied = self.store.apply_refresh(epoch, &report);
        if !applied {
            debug!("Refresh finished after the session ended");
        }
        self.metrics.record_refresh(applied);
        applied
    }
}

async fn bounded<T>(
    endpoint: Endpoint,
    limit: Duration,
    fetch: impl Future<Output = Result<T, FetchError>>,
) -> Result<T, FetchError> {
    match tokio::time::timeout(limit, fetch).await {
        Ok(result) => result,
        Err(_) => Err(FetchError::Timeout {
            endpoint: endpoint.to_string(),
            timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

impl Drop for PollerInner {
    fn drop(&mut self) {
        let timer = self
            .timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(timer) = timer {
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{
        InfoReport, MemoryDataProvider, PowerReport, StatsReport, WifiClientsReport,
    };
    use async_trait::async_trait;

    /// Provider whose power endpoint never answers
    struct StuckPower(MemoryDataProvider);

    #[async_trait]
    impl DataProvider for StuckPower {
        async fn fetch_info(&self) -> Result<InfoReport, FetchError> {
            self.0.fetch_info().await
        }

        async fn fetch_stats(&self) -> Result<StatsReport, FetchError> {
            self.0.fetch_stats().await
        }

        async fn fetch_power(&self) -> Result<PowerReport, FetchError> {
            std::future::pending().await
        }

        async fn fetch_wifi_clients(&self) -> Result<WifiClientsReport, FetchError> {
            self.0.fetch_wifi_clients().await
        }
    }

    fn setup() -> (FallbackPoller, Arc<MemoryDataProvider>, Arc<TelemetryStore>) {
        let provider = Arc::new(MemoryDataProvider::new());
        let store = Arc::new(TelemetryStore::new());
        let poller = FallbackPoller::new(
            provider.clone(),
            store.clone(),
            Arc::new(SyncMetrics::new()),
        );
        (poller, provider, store)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_refresh_populates_store() {
        let (poller, provider, store) = setup();
        assert!(poller.refresh().await);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.hostname.as_deref(), Some("hearth"));
        assert_eq!(snapshot.memory_percent, Some(25.0));
        assert_eq!(snapshot.power.available, Some(true));
        assert_eq!(snapshot.wifi.client_count, Some(0));
        for endpoint in Endpoint::ALL {
            assert_eq!(provider.calls(endpoint), 1);
        }
    }

    #[tokio::test]
    async fn test_power_failure_marks_unavailable() {
        let (poller, provider, store) = setup();
        provider.set_power(Err(FetchError::Http {
            endpoint: "power".to_string(),
            status: 404,
        }));
        poller.refresh().await;

        let snapshot = store.snapshot();
        assert_eq!(snapshot.power.available, Some(false));
        assert_eq!(snapshot.cpu_percent, Some(5.0));
        assert_eq!(store.battery_formatted(), "N/A");
        assert_eq!(store.error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_endpoint_degrades_only_its_category() {
        let store = Arc::new(TelemetryStore::new());
        let metrics = Arc::new(SyncMetrics::new());
        let poller = FallbackPoller::new(
            Arc::new(StuckPower(MemoryDataProvider::new())),
            store.clone(),
            metrics.clone(),
        )
        .with_fetch_timeout(Duration::from_secs(2));

        let started = Instant::now();
        assert!(poller.refresh().await);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_secs(3));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.cpu_percent, Some(5.0));
        assert_eq!(snapshot.hostname.as_deref(), Some("hearth"));
        assert_eq!(snapshot.power.available, Some(false));
        assert_eq!(store.error(), None);
        assert!(store.last_updated().is_some());
        assert_eq!(metrics.fetch_failures(Endpoint::Power), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_runs_one_timer() {
        let (poller, provider, _) = setup();
        assert!(poller.start(Duration::from_secs(5)));
        assert!(!poller.start(Duration::from_secs(5)));
        assert_eq!(poller.interval(), Some(Duration::from_secs(5)));

        tokio::time::sleep(Duration::from_millis(12_500)).await;
        settle().await;
        assert_eq!(poller.ticks(), 2);
        assert_eq!(provider.calls(Endpoint::Stats), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let (poller, provider, _) = setup();
        assert!(!poller.stop());

        poller.start(Duration::from_secs(5));
        assert!(poller.is_running());
        assert!(poller.stop());
        assert!(!poller.stop());
        assert!(!poller.is_running());

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(poller.ticks(), 0);
        assert_eq!(provider.calls(Endpoint::Info), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let (poller, _, _) = setup();
        poller.start(Duration::from_secs(5));
        poller.stop();
        assert!(poller.start(Duration::from_secs(1)));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        settle().await;
        assert_eq!(poller.ticks(), 3);
    }

    #[tokio::test]
    async fn test_refresh_after_clear_uses_new_epoch() {
        let (poller, _, store) = setup();
        let stale = store.epoch();
        store.clear();
        assert_ne!(stale, store.epoch());

        assert!(poller.refresh().await);
        assert!(!store.snapshot().is_empty());
    }
}
