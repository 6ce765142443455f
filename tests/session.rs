//! Session lifecycle tests
//!
//! Login/logout teardown and protection of the next session against work
//! still in flight from the previous one.

use async_trait::async_trait;
use hearth::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Provider whose every endpoint takes `delay` to answer
struct SlowProvider {
    inner: MemoryDataProvider,
    delay: Duration,
}

#[async_trait]
impl DataProvider for SlowProvider {
    async fn fetch_info(&self) -> std::result::Result<InfoReport, FetchError> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_info().await
    }

    async fn fetch_stats(&self) -> std::result::Result<StatsReport, FetchError> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_stats().await
    }

    async fn fetch_power(&self) -> std::result::Result<PowerReport, FetchError> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_power().await
    }

    async fn fetch_wifi_clients(&self) -> std::result::Result<WifiClientsReport, FetchError> {
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_wifi_clients().await
    }
}

/// Provider whose power endpoint never answers
struct StuckPower(MemoryDataProvider);

#[async_trait]
impl DataProvider for StuckPower {
    async fn fetch_info(&self) -> std::result::Result<InfoReport, FetchError> {
        self.0.fetch_info().await
    }

    async fn fetch_stats(&self) -> std::result::Result<StatsReport, FetchError> {
        self.0.fetch_stats().await
    }

    async fn fetch_power(&self) -> std::result::Result<PowerReport, FetchError> {
        std::future::pending().await
    }

    async fn fetch_wifi_clients(&self) -> std::result::Result<WifiClientsReport, FetchError> {
        self.0.fetch_wifi_clients().await
    }
}

fn slow_session(delay: Duration) -> (Arc<SessionGate>, MemoryTransport) {
    let transport = MemoryTransport::new();
    let provider = SlowProvider {
        inner: MemoryDataProvider::new(),
        delay,
    };
    let gate = SessionGate::new(
        TelemetryConfig::default(),
        Arc::new(provider),
        Arc::new(transport.clone()),
    )
    .unwrap();
    (Arc::new(gate), transport)
}

#[tokio::test]
async fn test_logout_while_connected() {
    let transport = MemoryTransport::new();
    let gate = SessionGate::new(
        TelemetryConfig::default(),
        Arc::new(MemoryDataProvider::new()),
        Arc::new(transport.clone()),
    )
    .unwrap();

    gate.on_login().await;
    assert!(transport.is_connected());

    gate.on_logout().await;
    assert!(!transport.is_connected());
    assert!(!gate.poller().is_running());
    assert!(gate.store().snapshot().is_empty());
    assert!(gate.store().last_updated().is_none());

    // A message already in flight when the channel closed
    transport.inject(PushEvent::Message(PushMessage::new(
        Topic::Stats,
        json!({"cpuPercent": 88.0}),
    )));
    settle().await;
    assert!(gate.store().snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_logout_during_initial_refresh() {
    let (gate, transport) = slow_session(Duration::from_secs(2));

    let login = tokio::spawn({
        let gate = gate.clone();
        async move { gate.on_login().await }
    });

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(gate.on_logout().await);

    // The initial refresh finishes after the logout and must not land
    assert!(!login.await.unwrap());
    assert!(gate.store().snapshot().is_empty());
    assert_eq!(transport.connect_count(), 0);
    assert_eq!(gate.metrics().snapshot().refreshes_discarded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_poll_in_flight_during_logout_is_discarded() {
    let (gate, transport) = slow_session(Duration::from_secs(2));
    transport.refuse_connections(Some("offline"));

    // Initial refresh done at 2s, polling every 5s from there
    gate.on_login().await;
    assert!(gate.poller().is_running());
    assert_eq!(gate.metrics().snapshot().refreshes, 1);

    // Tick at 7s dispatches a refresh that completes at 9s
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(gate.poller().ticks(), 1);
    gate.on_logout().await;

    tokio::time::sleep(Duration::from_secs(3)).await;
    settle().await;
    assert!(gate.store().snapshot().is_empty());
    assert!(gate.store().last_updated().is_none());
    assert_eq!(gate.metrics().snapshot().refreshes_discarded, 1);
}

#[tokio::test]
async fn test_new_session_after_logout() {
    let transport = MemoryTransport::new();
    let gate = SessionGate::new(
        TelemetryConfig::default(),
        Arc::new(MemoryDataProvider::new()),
        Arc::new(transport.clone()),
    )
    .unwrap();

    gate.on_login().await;
    gate.on_logout().await;
    assert!(gate.on_login().await);

    assert!(gate.store().is_connected());
    assert_eq!(gate.store().snapshot().hostname.as_deref(), Some("hearth"));
    assert_eq!(transport.connect_count(), 2);

    transport.publish(PushMessage::new(Topic::Stats, json!({"cpuPercent": 12.0})));
    settle().await;
    assert_eq!(gate.store().cpu_formatted(), "12.0%");
}

#[tokio::test]
async fn test_run_follows_auth_state() {
    let transport = MemoryTransport::new();
    let gate = Arc::new(
        SessionGate::new(
            TelemetryConfig::default(),
            Arc::new(MemoryDataProvider::new()),
            Arc::new(transport.clone()),
        )
        .unwrap(),
    );

    let (auth, rx) = watch::channel(AuthState::SignedOut);
    let runner = tokio::spawn({
        let gate = gate.clone();
        async move { gate.run(rx).await }
    });

    settle().await;
    assert!(!gate.is_active());

    auth.send(AuthState::SignedIn {
        user: "admin".to_string(),
    })
    .unwrap();
    settle().await;
    assert!(gate.is_active());
    assert!(transport.is_connected());

    auth.send(AuthState::SignedOut).unwrap();
    settle().await;
    assert!(!gate.is_active());
    assert!(!transport.is_connected());

    auth.send(AuthState::SignedIn {
        user: "admin".to_string(),
    })
    .unwrap();
    settle().await;
    assert!(gate.is_active());

    // Auth provider going away ends the session
    drop(auth);
    runner.await.unwrap();
    assert!(!gate.is_active());
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_topic_handlers_through_gate() {
    let transport = MemoryTransport::new();
    let gate = SessionGate::new(
        TelemetryConfig::default(),
        Arc::new(MemoryDataProvider::new()),
        Arc::new(transport.clone()),
    )
    .unwrap();
    gate.on_login().await;

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let id = gate
        .subscribe(Topic::WifiClients, move |message| {
            if let Some(clients) = message.data.as_array() {
                counter.fetch_add(clients.len(), Ordering::SeqCst);
            }
        })
        .await;
    assert!(transport.is_subscribed(&Topic::WifiClients));

    transport.publish(PushMessage::new(
        Topic::WifiClients,
        json!([{"mac": "aa:bb:cc:dd:ee:01"}, {"mac": "aa:bb:cc:dd:ee:02"}]),
    ));
    settle().await;
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(gate.store().wifi_clients_formatted(), "2");

    assert!(gate.unsubscribe(id).await);
    assert!(!transport.is_subscribed(&Topic::WifiClients));
    gate.on_logout().await;
}

#[tokio::test(start_paused = true)]
async fn test_stuck_endpoint_does_not_block_login() {
    let transport = MemoryTransport::new();
    let config = TelemetryConfig {
        fetch_timeout_ms: 3_000,
        ..Default::default()
    };
    let gate = SessionGate::new(
        config,
        Arc::new(StuckPower(MemoryDataProvider::new())),
        Arc::new(transport.clone()),
    )
    .unwrap();

    assert!(gate.on_login().await);
    assert_eq!(transport.connect_count(), 1);
    assert!(gate.store().is_connected());
    assert_eq!(gate.store().snapshot().hostname.as_deref(), Some("hearth"));
    assert_eq!(gate.store().cpu_formatted(), "5.0%");
    assert_eq!(gate.store().battery_formatted(), "N/A");

    // Fallback refreshes keep completing while the endpoint stays stuck
    transport.refuse_connections(Some("offline"));
    transport.drop_connection("offline");
    settle().await;
    assert!(gate.poller().is_running());

    tokio::time::sleep(Duration::from_secs(30)).await;
    settle().await;
    let ticks = gate.poller().ticks();
    assert!(ticks >= 5);
    // Every tick but possibly the last has finished its refresh
    assert!(gate.metrics().snapshot().refreshes >= ticks);
    gate.on_logout().await;
}
