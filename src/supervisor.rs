// Hearth - Live telemetry synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Push channel supervision
//!
//! The [`ConnectionSupervisor`] is the only component that changes
//! connectivity. It owns the push channel lifecycle:
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──ok──► Connected
//!       ▲                         │                  │
//!       └──── failure/timeout ────┘                  │
//!       └────────── drop / error / disconnect() ─────┘
//! ```
//!
//! Each connect attempt gets a generation number. `disconnect()` advances
//! it, so a connect that completes late, or an event already queued by a
//! torn-down connection, is recognized and dropped.
//!
//! Transitions are serialized: the state change, the store update and the
//! synchronous observer callbacks of one transition finish before the next
//! transition starts. Observers must not call back into `connect`,
//! `disconnect` or `reconnect`.

use crate::config::TelemetryConfig;
use crate::error::TransportError;
use crate::metrics::SyncMetrics;
use crate::protocol::{PushMessage, Topic};
use crate::recovery::{Backoff, RetryStrategy};
use crate::store::{Epoch, TelemetryStore};
use crate::transport::{PushEvent, PushEvents, PushTransport};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Push channel lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectivityState::Disconnected => write!(f, "disconnected"),
            ConnectivityState::Connecting => write!(f, "connecting"),
            ConnectivityState::Connected => write!(f, "connected"),
        }
    }
}

/// Opaque handle returned by observer and topic registrations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Connectivity observer
pub type TransitionCallback = Arc<dyn Fn(ConnectivityState) + Send + Sync>;

/// Handler for messages on one topic
pub type TopicHandler = Arc<dyn Fn(&PushMessage) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Link {
    state: ConnectivityState,
    generation: u64,
    pump: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    backoff: Backoff,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    // Ordered so observers are notified in registration order
    observers: BTreeMap<SubscriptionId, TransitionCallback>,
    handlers: HashMap<SubscriptionId, (Topic, TopicHandler)>,
    topic_refs: HashMap<Topic, usize>,
}

impl Registry {
    fn next_id(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }
}

struct Inner {
    transport: Arc<dyn PushTransport>,
    store: Arc<TelemetryStore>,
    metrics: Arc<SyncMetrics>,
    config: TelemetryConfig,
    link: Mutex<Link>,
    registry: Mutex<Registry>,
    transitions: Mutex<()>,
}

/// Owns the push channel and the connectivity state machine
#[derive(Clone)]
pub struct ConnectionSupervisor {
    inner: Arc<Inner>,
}

impl ConnectionSupervisor {
    /// Create a supervisor writing into `store`
    pub fn new(
        transport: Arc<dyn PushTransport>,
        store: Arc<TelemetryStore>,
        metrics: Arc<SyncMetrics>,
        config: TelemetryConfig,
    ) -> Self {
        let backoff = Backoff::new(RetryStrategy::from(&config.reconnect));
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                metrics,
                config,
                link: Mutex::new(Link {
                    state: ConnectivityState::Disconnected,
                    generation: 0,
                    pump: None,
                    reconnect: None,
                    backoff,
                }),
                registry: Mutex::new(Registry::default()),
                transitions: Mutex::new(()),
            }),
        }
    }

    /// Open the push channel
    ///
    /// No-op while connecting or connected. Failures leave the supervisor
    /// `Disconnected` and consult the reconnect policy.
    pub async fn connect(&self) {
        self.inner.connect().await
    }

    /// Tear down the push channel; idempotent
    ///
    /// Cancels any pending reconnect and always ends `Disconnected`.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await
    }

    /// Drop the current connection and try again immediately
    pub async fn reconnect(&self) {
        info!("Manual reconnect requested");
        self.inner.disconnect().await;
        self.inner.connect().await;
    }

    /// Current connectivity
    pub fn state(&self) -> ConnectivityState {
        lock(&self.inner.link).state
    }

    /// Check if a reconnect is scheduled
    pub fn reconnect_pending(&self) -> bool {
        lock(&self.inner.link).reconnect.is_some()
    }

    /// Consecutive reconnect delays handed out since the last success
    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.inner.link).backoff.attempts()
    }

    /// Register a connectivity observer
    ///
    /// The callback runs synchronously on every transition, in order.
    pub fn on_transition<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(ConnectivityState) + Send + Sync + 'static,
    {
        let mut registry = lock(&self.inner.registry);
        let id = registry.next_id();
        registry.observers.insert(id, Arc::new(callback));
        id
    }

    /// Remove a connectivity observer
    pub fn remove_observer(&self, id: SubscriptionId) -> bool {
        lock(&self.inner.registry).observers.remove(&id).is_some()
    }

    /// Register a handler for one topic
    ///
    /// The transport is asked for the topic when its first handler arrives.
    pub async fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&PushMessage) + Send + Sync + 'static,
    {
        let (id, first) = {
            let mut registry = lock(&self.inner.registry);
            let id = registry.next_id();
            registry
                .handlers
                .insert(id, (topic.clone(), Arc::new(handler)));
            let refs = registry.topic_refs.entry(topic.clone()).or_insert(0);
            *refs += 1;
            (id, *refs == 1)
        };

        if first && !self.inner.is_baseline(&topic) && self.is_connected() {
            if let Err(e) = self.inner.transport.subscribe(&topic).await {
                warn!("Failed to subscribe to {}: {}", topic, e);
            }
        }
        id
    }

    /// Remove a topic handler
    ///
    /// Returns false if the id is unknown. The transport is told to stop the
    /// topic after its last handler goes, unless it is a baseline topic.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let released = {
            let mut registry = lock(&self.inner.registry);
            let Some((topic, _)) = registry.handlers.remove(&id) else {
                return false;
            };
            let last = match registry.topic_refs.get_mut(&topic) {
                Some(refs) if *refs > 1 => {
                    *refs -= 1;
                    false
                }
                _ => {
                    registry.topic_refs.remove(&topic);
                    true
                }
            };
            last.then_some(topic)
        };

        if let Some(topic) = released {
            if !self.inner.is_baseline(&topic) && self.is_connected() {
                if let Err(e) = self.inner.transport.unsubscribe(&topic).await {
                    debug!("Failed to unsubscribe from {}: {}", topic, e);
                }
            }
        }
        true
    }

    /// Topics the channel asks for: baseline topics plus every handled topic
    pub fn topics(&self) -> Vec<Topic> {
        self.inner.topics()
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectivityState::Connected
    }
}

impl fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("state", &self.state())
            .field("topics", &self.topics())
            .finish()
    }
}

impl Inner {
    fn is_baseline(&self, topic: &Topic) -> bool {
        self.config.baseline_topics.contains(topic)
    }

    fn topics(&self) -> Vec<Topic> {
        let mut topics = self.config.baseline_topics.clone();
        let registry = lock(&self.registry);
        for topic in registry.topic_refs.keys() {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }
        topics
    }

    /// Write the new state to the store and notify observers
    ///
    /// Callers hold the transition lock.
    fn publish(&self, state: ConnectivityState) {
        self.store.set_connectivity(state);
        let observers: Vec<TransitionCallback> =
            lock(&self.registry).observers.values().cloned().collect();
        for observer in observers {
            observer(state);
        }
    }

    async fn connect(self: &Arc<Self>) {
        let generation = {
            let _order = lock(&self.transitions);
            let generation = {
                let mut link = lock(&self.link);
                if link.state != ConnectivityState::Disconnected {
                    return;
                }
                if let Some(pending) = link.reconnect.take() {
                    pending.abort();
                }
                link.generation += 1;
                link.state = ConnectivityState::Connecting;
                link.generation
            };
            self.publish(ConnectivityState::Connecting);
            generation
        };

        info!("Connecting push channel");
        let timeout = self.config.connect_timeout();
        let result = match tokio::time::timeout(timeout, self.transport.connect()).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                timeout_ms: self.config.connect_timeout_ms,
            }),
        };

        let events = match result {
            Ok(events) => events,
            Err(e) => {
                warn!("Push connection failed: {}", e);
                self.metrics.record_connect(false);
                if self.fail(generation) {
                    self.schedule_reconnect();
                }
                return;
            }
        };

        let sent = self.topics();
        for topic in &sent {
            if let Err(e) = self.transport.subscribe(topic).await {
                warn!("Failed to subscribe to {}: {}", topic, e);
            }
        }

        let superseded = {
            let _order = lock(&self.transitions);
            let mut link = lock(&self.link);
            if link.generation != generation || link.state != ConnectivityState::Connecting {
                // Torn down while connecting; close only if nothing newer is running
                Some(link.state == ConnectivityState::Disconnected)
            } else {
                link.state = ConnectivityState::Connected;
                link.backoff.reset();
                let epoch = self.store.epoch();
                link.pump = Some(tokio::spawn(pump(
                    Arc::downgrade(self),
                    generation,
                    epoch,
                    events,
                )));
                drop(link);
                self.publish(ConnectivityState::Connected);
                self.metrics.record_connect(true);
                info!("Push channel connected");
                None
            }
        };

        match superseded {
            None => self.sync_topics(&sent).await,
            Some(close) => {
                debug!("Discarding connection from a superseded attempt");
                if close {
                    self.transport.close().await;
                }
            }
        }
    }

    /// Catch up on handlers added or removed while the channel was opening
    async fn sync_topics(&self, sent: &[Topic]) {
        let current = self.topics();
        for topic in current.iter().filter(|topic| !sent.contains(topic)) {
            if let Err(e) = self.transport.subscribe(topic).await {
                warn!("Failed to subscribe to {}: {}", topic, e);
            }
        }
        for topic in sent.iter().filter(|topic| !current.contains(topic)) {
            if let Err(e) = self.transport.unsubscribe(topic).await {
                debug!("Failed to unsubscribe from {}: {}", topic, e);
            }
        }
    }

    /// Move a failed attempt back to `Disconnected`
    fn fail(&self, generation: u64) -> bool {
        let _order = lock(&self.transitions);
        {
            let mut link = lock(&self.link);
            if link.generation != generation || link.state != ConnectivityState::Connecting {
                return false;
            }
            link.state = ConnectivityState::Disconnected;
        }
        self.publish(ConnectivityState::Disconnected);
        true
    }

    async fn disconnect(&self) {
        let (pump, pending) = {
            let _order = lock(&self.transitions);
            let (pump, pending, changed) = {
                let mut link = lock(&self.link);
                link.generation += 1;
                link.backoff.reset();
                let changed = link.state != ConnectivityState::Disconnected;
                link.state = ConnectivityState::Disconnected;
                (link.pump.take(), link.reconnect.take(), changed)
            };
            if changed {
                self.publish(ConnectivityState::Disconnected);
                info!("Push channel disconnected");
            }
            (pump, pending)
        };

        if let Some(pump) = pump {
            pump.abort();
        }
        if let Some(pending) = pending {
            pending.abort();
        }
        self.transport.close().await;
    }

    async fn connection_lost(self: &Arc<Self>, generation: u64, reason: &str) {
        let closing = {
            let mut link = lock(&self.link);
            if link.generation != generation || link.state != ConnectivityState::Connected {
                return;
            }
            link.generation += 1;
            // Called from the pump itself; detach rather than abort
            link.pump = None;
            link.generation
        };

        warn!("Push channel lost: {}", reason);
        self.metrics.record_connection_lost();

        // Close before leaving `Connected` so a new connect cannot be torn
        // down by this close
        self.transport.close().await;

        {
            let _order = lock(&self.transitions);
            {
                let mut link = lock(&self.link);
                if link.generation != closing || link.state != ConnectivityState::Connected {
                    return;
                }
                link.state = ConnectivityState::Disconnected;
            }
            self.publish(ConnectivityState::Disconnected);
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        if !self.config.reconnect.enabled {
            return;
        }
        let mut link = lock(&self.link);
        if link.state != ConnectivityState::Disconnected || link.reconnect.is_some() {
            return;
        }
        let Some(delay) = link.backoff.next_delay() else {
            warn!(
                "Giving up on push channel after {} attempts",
                link.backoff.attempts()
            );
            return;
        };

        debug!("Reconnecting in {:?}", delay);
        let expected = link.generation;
        let weak = Arc::downgrade(self);
        link.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            {
                let mut link = lock(&inner.link);
                if link.generation != expected {
                    return;
                }
                link.reconnect = None;
            }
            inner.connect().await;
        }));
    }

    fn dispatch(&self, generation: u64, epoch: Epoch, message: &PushMessage) {
        if lock(&self.link).generation != generation {
            debug!("Dropping message from a closed connection");
            self.metrics.record_push(false);
            return;
        }

        let handlers: Vec<TopicHandler> = lock(&self.registry)
            .handlers
            .values()
            .filter(|(topic, _)| *topic == message.topic)
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(message);
        }

        if message.topic.is_metric() {
            let applied = self
                .store
                .apply_push_update_at(epoch, &message.to_partial());
            self.metrics.record_push(applied);
        }
    }
}

async fn pump(inner: Weak<Inner>, generation: u64, epoch: Epoch, mut events: PushEvents) {
    let reason = loop {
        let Some(event) = events.recv().await else {
            break "event stream closed".to_string();
        };
        let Some(strong) = inner.upgrade() else {
            return;
        };
        match event {
            PushEvent::Message(message) => strong.dispatch(generation, epoch, &message),
            PushEvent::Disconnected { reason } => break reason,
            PushEvent::Error(e) => break e.to_string(),
        }
    };

    if let Some(strong) = inner.upgrade() {
        strong.connection_lost(generation, &reason).await;
    }
}
