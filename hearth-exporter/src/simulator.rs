// Hearth Exporter - Simulated appliance
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Simulated home-server appliance.
//!
//! Generates plausible readings, serves them on the pull endpoints of a
//! [`MemoryDataProvider`] and publishes them on a [`MemoryTransport`].
//! The push link can be made to flap so the exporter shows the handover
//! between push delivery and polling.

use hearth::{
    InfoReport, MemoryDataProvider, MemoryTransport, PowerReport, PushMessage, StatsReport,
    Topic, WifiClient, WifiClientsReport,
};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

const GIB: u64 = 1 << 30;

/// Configuration for the simulated appliance.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Interval between push messages in milliseconds.
    pub push_interval_ms: u64,
    /// Drop the push link this often (`None` = never).
    pub flap_every: Option<Duration>,
    /// How long the push link stays down after a drop.
    pub outage: Duration,
    /// Whether a UPS is attached.
    pub ups: bool,
    /// Whether a wireless access point is present.
    pub access_point: bool,
    /// Reported hostname.
    pub hostname: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            push_interval_ms: 1_000,
            flap_every: Some(Duration::from_secs(60)),
            outage: Duration::from_secs(20),
            ups: true,
            access_point: true,
            hostname: "hearth-sim".to_string(),
        }
    }
}

/// Live state of the simulation.
#[derive(Debug, Default)]
pub struct SimulationState {
    /// Whether the simulation loop is running.
    pub running: AtomicBool,
    /// Whether the push link is currently up.
    pub link_up: AtomicBool,
    /// Push messages accepted by the transport.
    pub messages_published: AtomicU64,
    /// Link outages so far.
    pub outages: AtomicU64,
}

/// Serializable view of [`SimulationState`].
#[derive(Debug, Clone, Serialize)]
pub struct SimulationStatus {
    pub running: bool,
    pub link_up: bool,
    pub messages_published: u64,
    pub outages: u64,
}

impl SimulationState {
    pub fn status(&self) -> SimulationStatus {
        SimulationStatus {
            running: self.running.load(Ordering::SeqCst),
            link_up: self.link_up.load(Ordering::SeqCst),
            messages_published: self.messages_published.load(Ordering::SeqCst),
            outages: self.outages.load(Ordering::SeqCst),
        }
    }
}

/// One set of appliance readings.
#[derive(Debug, Clone, PartialEq)]
pub struct Readings {
    pub uptime_secs: u64,
    pub cpu_percent: f64,
    pub memory_used: u64,
    pub memory_total: u64,
    pub disk_used: u64,
    pub disk_total: u64,
    pub temperature_cpu: f64,
    pub battery_percent: f64,
    pub on_battery: bool,
    pub wifi_clients: u32,
}

impl Default for Readings {
    fn default() -> Self {
        Self {
            uptime_secs: 86_400,
            cpu_percent: 8.0,
            memory_used: 3 * GIB,
            memory_total: 8 * GIB,
            disk_used: 420 * GIB,
            disk_total: 2_000 * GIB,
            temperature_cpu: 44.0,
            battery_percent: 100.0,
            on_battery: false,
            wifi_clients: 4,
        }
    }
}

impl Readings {
    /// Advance the readings by one step of `elapsed`.
    pub fn step<R: Rng + ?Sized>(&mut self, elapsed: Duration, rng: &mut R) {
        self.uptime_secs += elapsed.as_secs().max(1);

        self.cpu_percent = (self.cpu_percent + rng.gen_range(-6.0..=6.0)).clamp(1.0, 100.0);

        let memory_delta = rng.gen_range(-64..=64) as i64 * (1 << 20);
        self.memory_used = (self.memory_used as i64 + memory_delta)
            .clamp(GIB as i64, self.memory_total as i64) as u64;

        // Disks only fill up
        self.disk_used = (self.disk_used + rng.gen_range(0..=8) * (1 << 20)).min(self.disk_total);

        // Temperature follows load
        let target = 38.0 + self.cpu_percent * 0.35;
        self.temperature_cpu += (target - self.temperature_cpu) * 0.2;

        // Short mains failures now and then
        if rng.gen_bool(0.01) {
            self.on_battery = !self.on_battery;
        }
        self.battery_percent = if self.on_battery {
            (self.battery_percent - 0.5).max(0.0)
        } else {
            (self.battery_percent + 1.0).min(100.0)
        };

        if rng.gen_bool(0.1) {
            self.wifi_clients = match self.wifi_clients {
                0 => 1,
                n if rng.gen_bool(0.5) => n - 1,
                n => (n + 1).min(32),
            };
        }
    }
}

/// Simulated appliance feeding both sides of a session.
pub struct SimulatedAppliance {
    config: SimulationConfig,
    provider: Arc<MemoryDataProvider>,
    transport: MemoryTransport,
    state: Arc<SimulationState>,
}

impl SimulatedAppliance {
    pub fn new(config: SimulationConfig) -> Self {
        let appliance = Self {
            config,
            provider: Arc::new(MemoryDataProvider::new()),
            transport: MemoryTransport::new(),
            state: Arc::new(SimulationState::default()),
        };
        appliance.state.link_up.store(true, Ordering::SeqCst);
        appliance.serve(&Readings::default());
        appliance
    }

    /// Pull endpoints of the appliance.
    pub fn provider(&self) -> Arc<MemoryDataProvider> {
        self.provider.clone()
    }

    /// Push channel of the appliance.
    pub fn transport(&self) -> MemoryTransport {
        self.transport.clone()
    }

    pub fn state(&self) -> Arc<SimulationState> {
        self.state.clone()
    }

    /// Make the pull endpoints answer with `readings`.
    pub fn serve(&self, readings: &Readings) {
        self.provider.set_info(Ok(InfoReport {
            hostname: self.config.hostname.clone(),
            uptime_secs: readings.uptime_secs,
        }));
        self.provider.set_stats(Ok(StatsReport {
            cpu_percent: readings.cpu_percent,
            memory_used: readings.memory_used,
            memory_total: readings.memory_total,
            disk_used: readings.disk_used,
            disk_total: readings.disk_total,
            temperature_cpu: Some(readings.temperature_cpu),
        }));

        if self.config.ups {
            self.provider.set_power(Ok(PowerReport {
                battery_percent: Some(readings.battery_percent),
                charging: Some(!readings.on_battery && readings.battery_percent < 100.0),
                on_battery: Some(readings.on_battery),
            }));
        } else {
            self.provider.set_power(Err(hearth::FetchError::Unavailable {
                endpoint: "power".to_string(),
            }));
        }

        if self.config.access_point {
            let clients = (0..readings.wifi_clients)
                .map(|i| WifiClient {
                    mac: format!("02:00:00:00:00:{:02x}", i),
                    hostname: None,
                    signal_dbm: Some(-40 - (i as i32 % 40)),
                })
                .collect();
            self.provider
                .set_wifi_clients(Ok(WifiClientsReport { clients }));
        } else {
            self.provider
                .set_wifi_clients(Err(hearth::FetchError::Unavailable {
                    endpoint: "wifi-clients".to_string(),
                }));
        }
    }

    /// Publish `readings` on the push channel.
    ///
    /// Returns the number of messages the transport accepted.
    pub fn publish(&self, readings: &Readings) -> u64 {
        let mut messages = vec![
            PushMessage::new(
                Topic::Stats,
                json!({
                    "cpuPercent": readings.cpu_percent,
                    "memoryUsed": readings.memory_used,
                    "memoryTotal": readings.memory_total,
                    "diskUsed": readings.disk_used,
                    "diskTotal": readings.disk_total,
                    "temperatureCpu": readings.temperature_cpu,
                }),
            ),
            PushMessage::new(Topic::Info, json!({ "uptime": readings.uptime_secs })),
        ];
        if self.config.ups {
            messages.push(PushMessage::new(
                Topic::Power,
                json!({
                    "batteryPercent": readings.battery_percent,
                    "onBattery": readings.on_battery,
                    "charging": !readings.on_battery && readings.battery_percent < 100.0,
                }),
            ));
        }
        if self.config.access_point {
            messages.push(PushMessage::new(
                Topic::WifiClients,
                json!({ "wifiClientCount": readings.wifi_clients }),
            ));
        }

        let accepted = messages
            .into_iter()
            .filter(|message| self.transport.publish(message.clone()))
            .count() as u64;
        self.state
            .messages_published
            .fetch_add(accepted, Ordering::SeqCst);
        accepted
    }

    /// Take the push link down until `restore_link` is called.
    pub fn drop_link(&self) {
        self.transport.refuse_connections(Some("simulated outage"));
        self.transport.drop_connection("simulated outage");
        self.state.link_up.store(false, Ordering::SeqCst);
        self.state.outages.fetch_add(1, Ordering::SeqCst);
        info!("Simulated push link outage");
    }

    pub fn restore_link(&self) {
        self.transport.refuse_connections(None);
        self.state.link_up.store(true, Ordering::SeqCst);
        info!("Simulated push link restored");
    }

    /// Run the simulation until `stop` is called.
    pub async fn run(&self) {
        self.state.running.store(true, Ordering::SeqCst);

        let step = Duration::from_millis(self.config.push_interval_ms.max(1));
        let mut ticker = interval(step);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut readings = Readings::default();
        let mut next_flap = self.config.flap_every.map(|every| Instant::now() + every);
        let mut restore_at: Option<Instant> = None;

        while self.state.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            let now = Instant::now();

            readings.step(step, &mut rand::thread_rng());
            self.serve(&readings);
            let published = self.publish(&readings);
            debug!("Published {} messages", published);

            if restore_at.is_some_and(|at| now >= at) {
                self.restore_link();
                restore_at = None;
            }
            if let (Some(at), Some(every)) = (next_flap, self.config.flap_every) {
                if now >= at {
                    self.drop_link();
                    restore_at = Some(now + self.config.outage);
                    next_flap = Some(at + every);
                }
            }
        }
    }

    pub fn stop(&self) {
        self.state.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth::{Endpoint, SessionGate, TelemetryConfig};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_readings_stay_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut readings = Readings::default();
        for _ in 0..10_000 {
            readings.step(Duration::from_secs(1), &mut rng);
            assert!((1.0..=100.0).contains(&readings.cpu_percent));
            assert!(readings.memory_used <= readings.memory_total);
            assert!(readings.disk_used <= readings.disk_total);
            assert!((0.0..=100.0).contains(&readings.battery_percent));
            assert!(readings.wifi_clients <= 32);
        }
        assert_eq!(readings.uptime_secs, 86_400 + 10_000);
    }

    #[tokio::test]
    async fn test_missing_hardware_is_unavailable() {
        let appliance = SimulatedAppliance::new(SimulationConfig {
            ups: false,
            access_point: false,
            ..Default::default()
        });
        let gate = SessionGate::new(
            TelemetryConfig::default(),
            appliance.provider(),
            std::sync::Arc::new(appliance.transport()),
        )
        .unwrap();

        gate.on_login().await;
        assert_eq!(gate.store().battery_formatted(), "N/A");
        assert_eq!(gate.store().wifi_clients_formatted(), "N/A");
        assert_eq!(appliance.provider().calls(Endpoint::Power), 1);
        gate.on_logout().await;
    }

    #[tokio::test]
    async fn test_publish_reaches_session() {
        let appliance = SimulatedAppliance::new(SimulationConfig::default());
        let gate = SessionGate::new(
            TelemetryConfig::default(),
            appliance.provider(),
            std::sync::Arc::new(appliance.transport()),
        )
        .unwrap();
        gate.on_login().await;

        let readings = Readings {
            cpu_percent: 73.0,
            ..Default::default()
        };
        // Only the baseline stats topic is subscribed
        assert_eq!(appliance.publish(&readings), 1);
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(gate.store().snapshot().cpu_percent, Some(73.0));
        gate.on_logout().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_flaps_and_recovers() {
        let appliance = Arc::new(SimulatedAppliance::new(SimulationConfig {
            push_interval_ms: 1_000,
            flap_every: Some(Duration::from_secs(10)),
            outage: Duration::from_secs(5),
            ..Default::default()
        }));
        let gate = SessionGate::new(
            TelemetryConfig::default(),
            appliance.provider(),
            Arc::new(appliance.transport()),
        )
        .unwrap();
        gate.on_login().await;

        let runner = tokio::spawn({
            let appliance = appliance.clone();
            async move { appliance.run().await }
        });

        tokio::time::sleep(Duration::from_millis(12_500)).await;
        assert!(!appliance.state().status().link_up);
        assert!(gate.poller().is_running());

        tokio::time::sleep(Duration::from_secs(40)).await;
        let status = appliance.state().status();
        assert!(status.outages >= 1);
        assert!(status.messages_published > 0);

        appliance.stop();
        runner.await.unwrap();
        gate.on_logout().await;
    }
}
