// Hearth Exporter - Prometheus exporter for Hearth telemetry
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # Hearth Exporter
//!
//! Prometheus exporter for Hearth telemetry. Runs a session against a
//! simulated appliance and exposes the live snapshot and sync state.
//!
//! ## Usage
//!
//! ```bash
//! # Push link drops every minute for 20 seconds
//! hearth-exporter --flap-every-secs 60 --outage-secs 20
//!
//! # Box without UPS, on a custom port
//! hearth-exporter --no-ups --port 9090
//! ```

mod metrics;
mod simulator;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use clap::Parser;
use hearth::{AuthState, HearthError, MetricsReport, SessionGate, TelemetryConfig};
use metrics::{encode_metrics, update_health_metrics, update_snapshot_metrics, update_sync_metrics};
use serde::Serialize;
use simulator::{SimulatedAppliance, SimulationConfig, SimulationState, SimulationStatus};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// Hearth Prometheus Exporter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "9100")]
    port: u16,

    /// Fallback polling interval in milliseconds
    #[arg(long, default_value = "5000")]
    poll_interval_ms: u64,

    /// Interval between simulated push messages in milliseconds
    #[arg(long, default_value = "1000")]
    push_interval_ms: u64,

    /// Drop the simulated push link this often (0 = never)
    #[arg(long, default_value = "60")]
    flap_every_secs: u64,

    /// How long the push link stays down after a drop
    #[arg(long, default_value = "20")]
    outage_secs: u64,

    /// Simulate a box without a UPS
    #[arg(long)]
    no_ups: bool,

    /// Simulate a box without a wireless access point
    #[arg(long)]
    no_access_point: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Error)]
enum ExporterError {
    #[error("invalid configuration: {0}")]
    Config(#[from] HearthError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application state shared across handlers.
struct AppState {
    gate: Arc<SessionGate>,
    simulation: Arc<SimulationState>,
    start_time: std::time::Instant,
}

#[tokio::main]
async fn main() -> Result<(), ExporterError> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Hearth Exporter v{}", env!("CARGO_PKG_VERSION"));

    let appliance = Arc::new(SimulatedAppliance::new(SimulationConfig {
        push_interval_ms: args.push_interval_ms,
        flap_every: (args.flap_every_secs > 0).then(|| Duration::from_secs(args.flap_every_secs)),
        outage: Duration::from_secs(args.outage_secs),
        ups: !args.no_ups,
        access_point: !args.no_access_point,
        ..Default::default()
    }));

    let config = TelemetryConfig::with_poll_interval_ms(args.poll_interval_ms);
    let gate = Arc::new(SessionGate::new(
        config,
        appliance.provider(),
        Arc::new(appliance.transport()),
    )?);

    // Start simulation in background
    tokio::spawn({
        let appliance = appliance.clone();
        async move { appliance.run().await }
    });

    // The exporter is its own signed-in user
    let (auth, auth_rx) = watch::channel(AuthState::SignedIn {
        user: "exporter".to_string(),
    });
    let session = tokio::spawn({
        let gate = gate.clone();
        async move { gate.run(auth_rx).await }
    });

    // Create app state
    let state = Arc::new(AppState {
        gate: gate.clone(),
        simulation: appliance.state(),
        start_time: std::time::Instant::now(),
    });

    // Build router
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/status", get(status_handler))
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("Starting server on http://{}", addr);
    info!("Metrics endpoint: http://{}/metrics", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    info!("Shutting down");
    appliance.stop();
    drop(auth);
    if let Err(e) = session.await {
        error!("Session task failed: {}", e);
    }
    Ok(())
}

/// Root handler - shows a simple HTML page.
async fn root_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Hearth Exporter</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 800px; margin: 50px auto; padding: 20px; }
        h1 { color: #2c3e50; }
        a { color: #3498db; text-decoration: none; }
        a:hover { text-decoration: underline; }
        .endpoints { background: #f8f9fa; padding: 20px; border-radius: 8px; margin: 20px 0; }
        .endpoint { margin: 10px 0; }
        code { background: #e9ecef; padding: 2px 6px; border-radius: 4px; }
    </style>
</head>
<body>
    <h1>Hearth Exporter</h1>
    <p>Prometheus exporter for Hearth home-server telemetry.</p>

    <div class="endpoints">
        <h2>Endpoints</h2>
        <div class="endpoint"><a href="/metrics">/metrics</a> - Prometheus metrics</div>
        <div class="endpoint"><a href="/health">/health</a> - Sync health (JSON)</div>
        <div class="endpoint"><a href="/ready">/ready</a> - Readiness check</div>
        <div class="endpoint"><a href="/status">/status</a> - Status information (JSON)</div>
    </div>

    <h2>Metrics</h2>
    <ul>
        <li><code>hearth_cpu_percent</code> - CPU usage</li>
        <li><code>hearth_memory_bytes</code> / <code>hearth_disk_bytes</code> - Used and total bytes</li>
        <li><code>hearth_battery_percent</code> - UPS charge (-1 = no UPS)</li>
        <li><code>hearth_wifi_clients</code> - Wireless clients (-1 = no access point)</li>
        <li><code>hearth_push_connectivity</code> - Push channel (0=Disconnected, 1=Connecting, 2=Connected)</li>
        <li><code>hearth_active_source</code> - Source feeding the store (0=Idle, 1=Poll, 2=Push)</li>
        <li><code>hearth_health_status</code> - Sync health</li>
        <li><code>hearth_sync_events_total</code> - Sync event counters</li>
    </ul>
</body>
</html>"#,
    )
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    update_snapshot_metrics(&state.gate.store().snapshot());
    update_health_metrics(&state.gate.health());
    update_sync_metrics(&state.gate.metrics().snapshot());

    match encode_metrics() {
        Ok(metrics) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; charset=utf-8")],
            metrics,
        ),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("Content-Type", "text/plain; charset=utf-8")],
                e.to_string(),
            )
        }
    }
}

/// Health handler - 503 once the displayed data can no longer be trusted.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.gate.health();
    let code = if health.status.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health))
}

/// Readiness check handler.
async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.gate.is_active() && state.gate.store().last_updated().is_some() {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Not ready")
    }
}

/// Formatted values as a dashboard would show them.
#[derive(Serialize)]
struct DisplayValues {
    cpu: String,
    memory: String,
    disk: String,
    uptime: String,
    temperature: String,
    battery: String,
    wifi_clients: String,
}

/// Status information response.
#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    session_active: bool,
    connectivity: String,
    polling: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    display: DisplayValues,
    sync: MetricsReport,
    simulation: SimulationStatus,
}

/// Status handler - returns JSON status information.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let gate = &state.gate;
    let store = gate.store();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        session_active: gate.is_active(),
        connectivity: store.connectivity().to_string(),
        polling: gate.poller().is_running(),
        last_error: store.error(),
        display: DisplayValues {
            cpu: store.cpu_formatted(),
            memory: store.memory_formatted(),
            disk: store.disk_formatted(),
            uptime: store.uptime_formatted(),
            temperature: store.temperature_formatted(),
            battery: store.battery_formatted(),
            wifi_clients: store.wifi_clients_formatted(),
        },
        sync: gate.metrics().snapshot(),
        simulation: state.simulation.status(),
    })
}
