//! Push/poll handover demonstration
//!
//! This example walks a session through a push channel outage and shows
//! which source feeds the store at each step.
//!
//! Run with: `cargo run --example handover`

use hearth::{
    MemoryDataProvider, MemoryTransport, PushMessage, SessionGate, StatsReport, TelemetryConfig,
    Topic,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn print_row(step: &str, gate: &SessionGate) {
    let store = gate.store();
    println!(
        "{:<22} {:<13} {:<8} {:<8} {:<16} {:<10}",
        step,
        store.connectivity().to_string(),
        if gate.poller().is_running() { "yes" } else { "no" },
        store.cpu_formatted(),
        store.memory_formatted(),
        format!("{:?}", gate.health().status),
    );
}

#[tokio::main]
async fn main() -> hearth::Result<()> {
    println!("=== Hearth Handover Demo ===\n");

    let provider = Arc::new(MemoryDataProvider::new());
    let transport = MemoryTransport::new();
    let config = TelemetryConfig::with_poll_interval_ms(500);
    let gate = SessionGate::new(config, provider.clone(), Arc::new(transport.clone()))?;

    println!(
        "{:<22} {:<13} {:<8} {:<8} {:<16} {:<10}",
        "Step", "Push", "Polling", "CPU", "Memory", "Health"
    );
    println!("{}", "-".repeat(80));

    print_row("before login", &gate);

    gate.on_login().await;
    print_row("login", &gate);

    transport.publish(PushMessage::new(
        Topic::Stats,
        json!({"cpuPercent": 37.5, "memoryUsed": 3_758_096_384u64, "memoryTotal": 8_589_934_592u64}),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    print_row("push update", &gate);

    // Appliance restarts its push service
    transport.refuse_connections(Some("restarting"));
    transport.drop_connection("restarting");
    tokio::time::sleep(Duration::from_millis(50)).await;
    print_row("channel lost", &gate);

    provider.set_stats(Ok(StatsReport {
        cpu_percent: 61.0,
        memory_used: 5 << 30,
        memory_total: 8 << 30,
        disk_used: 200 << 30,
        disk_total: 1000 << 30,
        temperature_cpu: Some(52.5),
    }));
    tokio::time::sleep(Duration::from_millis(600)).await;
    print_row("poll tick", &gate);

    transport.refuse_connections(None);
    gate.supervisor().reconnect().await;
    print_row("channel back", &gate);

    gate.on_logout().await;
    print_row("logout", &gate);

    println!("\n{}", gate.metrics().report());
    Ok(())
}
