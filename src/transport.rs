// Hearth - Live telemetry synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Push channel abstraction
//!
//! This module provides the trait a push transport implements and an
//! in-memory implementation for tests and local simulation.

use crate::error::TransportError;
use crate::protocol::{PushMessage, Topic};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

/// Capacity of the in-memory event queue
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Events delivered by an open push connection
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Inbound metric message
    Message(PushMessage),
    /// The remote end closed the connection
    Disconnected { reason: String },
    /// The connection failed
    Error(TransportError),
}

/// Stream of events for one connection; ends when the connection is gone
pub type PushEvents = mpsc::Receiver<PushEvent>;

/// Trait for push channel providers
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Open the channel
    async fn connect(&self) -> Result<PushEvents, TransportError>;

    /// Ask the remote end to start sending a topic
    async fn subscribe(&self, topic: &Topic) -> Result<(), TransportError>;

    /// Ask the remote end to stop sending a topic
    async fn unsubscribe(&self, topic: &Topic) -> Result<(), TransportError>;

    /// Close the channel; must be idempotent
    async fn close(&self);
}

#[derive(Debug, Default)]
struct MemoryTransportState {
    sender: Option<mpsc::Sender<PushEvent>>,
    /// Last sender handed out, kept after close to simulate in-flight strays
    last_sender: Option<mpsc::Sender<PushEvent>>,
    refuse: Option<String>,
    topics: HashSet<Topic>,
    connects: u64,
    closes: u64,
}

/// A push transport living entirely in memory
///
/// Cloning yields another handle onto the same simulated channel, so a test
/// can keep one handle while the supervisor owns the other.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryTransportState>>,
    buffer: usize,
}

impl MemoryTransport {
    /// Create a new memory transport
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_EVENT_BUFFER)
    }

    /// Create with custom event buffer size
    pub fn with_buffer_size(buffer: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryTransportState::default())),
            buffer: buffer.max(1),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryTransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse further connection attempts (`None` accepts again)
    pub fn refuse_connections(&self, reason: Option<&str>) {
        self.state().refuse = reason.map(str::to_string);
    }

    /// Deliver a message if connected and its topic is subscribed
    ///
    /// Returns true if the message was queued.
    pub fn publish(&self, message: PushMessage) -> bool {
        let state = self.state();
        if !state.topics.contains(&message.topic) {
            return false;
        }
        match &state.sender {
            Some(sender) => sender.try_send(PushEvent::Message(message)).is_ok(),
            None => false,
        }
    }

    /// Push a raw event onto the most recent connection, even after close
    ///
    /// Simulates an event already in flight when the channel was torn down.
    pub fn inject(&self, event: PushEvent) -> bool {
        match &self.state().last_sender {
            Some(sender) => sender.try_send(event).is_ok(),
            None => false,
        }
    }

    /// Simulate the remote end dropping the connection
    pub fn drop_connection(&self, reason: &str) -> bool {
        let mut state = self.state();
        match state.sender.take() {
            Some(sender) => {
                state.topics.clear();
                sender
                    .try_send(PushEvent::Disconnected {
                        reason: reason.to_string(),
                    })
                    .is_ok()
            }
            None => false,
        }
    }

    /// Check if a connection is open
    pub fn is_connected(&self) -> bool {
        self.state().sender.is_some()
    }

    /// Check if a topic is currently subscribed
    pub fn is_subscribed(&self, topic: &Topic) -> bool {
        self.state().topics.contains(topic)
    }

    /// Number of successful connects
    pub fn connect_count(&self) -> u64 {
        self.state().connects
    }

    /// Number of close calls
    pub fn close_count(&self) -> u64 {
        self.state().closes
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PushTransport for MemoryTransport {
    async fn connect(&self) -> Result<PushEvents, TransportError> {
        let mut state = self.state();
        if let Some(reason) = &state.refuse {
            return Err(TransportError::Refused {
                reason: reason.clone(),
            });
        }
        let (sender, receiver) = mpsc::channel(self.buffer);
        state.sender = Some(sender.clone());
        state.last_sender = Some(sender);
        state.topics.clear();
        state.connects += 1;
        Ok(receiver)
    }

    async fn subscribe(&self, topic: &Topic) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.sender.is_none() {
            return Err(TransportError::Closed);
        }
        state.topics.insert(topic.clone());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &Topic) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.sender.is_none() {
            return Err(TransportError::Closed);
        }
        state.topics.remove(topic);
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state();
        state.sender = None;
        state.topics.clear();
        state.closes += 1;
    }
}
