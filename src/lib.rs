//! # Hearth - Live telemetry synchronization
//!
//! Keeps a live view of a home server's metrics (CPU, memory, disk, power,
//! wireless clients) fresh for an administration console.
//!
//! ## Key Features
//!
//! - **Push first**: a persistent channel delivers partial metric updates
//! - **Transparent fallback**: interval polling takes over while the channel is down
//! - **Single active source**: push and polling never feed the store at the same time
//! - **Session scoped**: everything starts at sign-in and is torn down at sign-out
//!
//! ## Quick Start
//!
//! ```rust
//! use hearth::{MemoryDataProvider, MemoryTransport, SessionGate, TelemetryConfig};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let transport = MemoryTransport::new();
//! let gate = SessionGate::new(
//!     TelemetryConfig::default(),
//!     Arc::new(MemoryDataProvider::new()),
//!     Arc::new(transport.clone()),
//! )
//! .unwrap();
//!
//! // Initial refresh, then the push channel takes over
//! gate.on_login().await;
//! assert!(gate.store().is_connected());
//! assert!(!gate.poller().is_running());
//!
//! // Losing the channel hands the store to the poller
//! transport.drop_connection("link lost");
//! # for _ in 0..10 { tokio::task::yield_now().await; }
//! assert!(gate.poller().is_running());
//!
//! gate.on_logout().await;
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`snapshot`]: Metric data model, merge rules and display formatting
//! - [`protocol`]: Push message schema
//! - [`provider`]: Pull endpoints abstraction
//! - [`transport`]: Push channel abstraction
//! - [`store`]: Telemetry store
//! - [`supervisor`]: Push channel lifecycle
//! - [`poller`]: Fallback polling
//! - [`arbiter`]: Single-active-source rule
//! - [`session`]: Login/logout driven lifecycle
//! - [`health`]: Sync health assessment
//! - [`metrics`]: Sync counters

// Modules
pub mod arbiter;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod poller;
pub mod protocol;
pub mod provider;
pub mod recovery;
pub mod session;
pub mod snapshot;
pub mod store;
pub mod supervisor;
pub mod transport;

// Re-exports for convenient access
pub use arbiter::TransportArbiter;
pub use config::{ReconnectConfig, TelemetryConfig};
pub use error::{FetchError, HearthError, Result, TransportError};
pub use health::{ActiveSource, HealthConfig, HealthStatus, SyncHealth};
pub use metrics::{MetricsReport, SyncMetrics};
pub use poller::FallbackPoller;
pub use protocol::{PushMessage, Topic};
pub use provider::{
    DataProvider, Endpoint, InfoReport, MemoryDataProvider, PowerReport, RefreshReport,
    StatsReport, WifiClient, WifiClientsReport,
};
pub use recovery::{Backoff, RetryStrategy};
pub use session::{AuthState, SessionGate};
pub use snapshot::{PartialSnapshot, PowerState, Snapshot, WifiState};
pub use store::{Epoch, TelemetryState, TelemetryStore};
pub use supervisor::{ConnectionSupervisor, ConnectivityState, SubscriptionId};
pub use transport::{MemoryTransport, PushEvent, PushEvents, PushTransport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
