// Hearth - Live telemetry synchronization
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Push channel message schema
//!
//! Only the minimal schema needed to update metrics is defined here:
//! a topic tag and a JSON object of camelCase metric keys.
//!
//! ```json
//! {"topic": "stats", "data": {"cpuPercent": 12.5, "memoryUsed": 3758096384}}
//! ```
//!
//! Decoding is lenient: a key with the wrong type is treated as absent,
//! never as an error.

use crate::snapshot::PartialSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Category of a push message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Topic {
    /// Resource usage (cpu, memory, disk, temperature)
    Stats,
    /// Identity and uptime
    Info,
    /// UPS / battery
    Power,
    /// Wireless clients
    WifiClients,
    /// Anything else; forwarded to topic handlers, never applied to the store
    Other(String),
}

impl Topic {
    /// Wire name of the topic
    pub fn as_str(&self) -> &str {
        match self {
            Topic::Stats => "stats",
            Topic::Info => "info",
            Topic::Power => "power",
            Topic::WifiClients => "wifi-clients",
            Topic::Other(name) => name,
        }
    }

    /// Check if messages on this topic carry snapshot metrics
    pub fn is_metric(&self) -> bool {
        !matches!(self, Topic::Other(_))
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        match name {
            "stats" => Topic::Stats,
            "info" => Topic::Info,
            "power" => Topic::Power,
            "wifi-clients" => Topic::WifiClients,
            other => Topic::Other(other.to_string()),
        }
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Topic::from(name.as_str())
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.as_str().to_string()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inbound message from the push channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    pub topic: Topic,
    #[serde(default)]
    pub data: Value,
}

impl PushMessage {
    /// Create a new message
    pub fn new(topic: impl Into<Topic>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            data,
        }
    }

    /// Decode a message envelope from JSON text
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Encode to JSON text
    pub fn encode(&self) -> String {
        // Value and Topic always serialize
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Extract the metric fields carried by this message
    ///
    /// Messages on non-metric topics yield an empty update.
    pub fn to_partial(&self) -> PartialSnapshot {
        if !self.topic.is_metric() {
            return PartialSnapshot::new();
        }
        match (&self.topic, &self.data) {
            // A bare client list is accepted on the wifi topic
            (Topic::WifiClients, Value::Array(clients)) => {
                let mut partial = PartialSnapshot::new();
                partial.wifi.available = Some(true);
                partial.wifi.client_count = u32::try_from(clients.len()).ok();
                partial
            }
            (_, Value::Object(map)) => partial_from_map(map),
            _ => PartialSnapshot::new(),
        }
    }
}

/// Decode metric keys from a JSON object, ignoring anything malformed
pub fn partial_from_value(value: &Value) -> PartialSnapshot {
    match value {
        Value::Object(map) => partial_from_map(map),
        _ => PartialSnapshot::new(),
    }
}

fn partial_from_map(map: &Map<String, Value>) -> PartialSnapshot {
    let mut partial = PartialSnapshot::new();

    partial.hostname = string_field(map, "hostname");
    partial.uptime_secs = u64_field(map, "uptime");
    partial.cpu_percent = f64_field(map, "cpuPercent");
    partial.memory_percent = f64_field(map, "memoryPercent");
    partial.memory_used = u64_field(map, "memoryUsed");
    partial.memory_total = u64_field(map, "memoryTotal");
    partial.disk_percent = f64_field(map, "diskPercent");
    partial.disk_used = u64_field(map, "diskUsed");
    partial.disk_total = u64_field(map, "diskTotal");
    partial.temperature_cpu = f64_field(map, "temperatureCpu");

    partial.power.battery_percent = f64_field(map, "batteryPercent");
    partial.power.available = bool_field(map, "powerAvailable");
    partial.power.charging = bool_field(map, "charging");
    partial.power.on_battery = bool_field(map, "onBattery");

    partial.wifi.available = bool_field(map, "wifiAvailable");
    partial.wifi.client_count =
        u64_field(map, "wifiClientCount").and_then(|count| u32::try_from(count).ok());

    partial
}

fn f64_field(map: &Map<String, Value>, key: &str) -> Option<f64> {
    map.get(key)?.as_f64().filter(|v| v.is_finite())
}

fn u64_field(map: &Map<String, Value>, key: &str) -> Option<u64> {
    let value = map.get(key)?;
    value.as_u64().or_else(|| {
        // Large counters sometimes arrive as floats
        value
            .as_f64()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v as u64)
    })
}

fn bool_field(map: &Map<String, Value>, key: &str) -> Option<bool> {
    map.get(key)?.as_bool()
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)?.as_str().map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::from("stats"), Topic::Stats);
        assert_eq!(Topic::from("wifi-clients"), Topic::WifiClients);
        assert_eq!(Topic::from("docker"), Topic::Other("docker".to_string()));
        assert_eq!(Topic::Power.to_string(), "power");
        assert!(Topic::Info.is_metric());
        assert!(!Topic::Other("docker".to_string()).is_metric());
    }

    #[test]
    fn test_decode_envelope() {
        let msg = PushMessage::decode(r#"{"topic":"stats","data":{"cpuPercent":42}}"#).unwrap();
        assert_eq!(msg.topic, Topic::Stats);
        assert_eq!(msg.to_partial().cpu_percent, Some(42.0));

        assert!(PushMessage::decode("not json").is_err());
    }

    #[test]
    fn test_malformed_fields_are_absent() {
        let msg = PushMessage::new(
            Topic::Stats,
            json!({
                "cpuPercent": "high",
                "memoryUsed": -5,
                "memoryTotal": 8589934592u64,
                "temperatureCpu": null,
                "charging": "yes",
                "hostname": 7
            }),
        );
        let partial = msg.to_partial();

        assert_eq!(partial.cpu_percent, None);
        assert_eq!(partial.memory_used, None);
        assert_eq!(partial.memory_total, Some(8_589_934_592));
        assert_eq!(partial.temperature_cpu, None);
        assert_eq!(partial.power.charging, None);
        assert_eq!(partial.hostname, None);
    }

    #[test]
    fn test_float_counters_accepted() {
        let partial = partial_from_value(&json!({"diskTotal": 1.5e12, "uptime": 3600.0}));
        assert_eq!(partial.disk_total, Some(1_500_000_000_000));
        assert_eq!(partial.uptime_secs, Some(3600));
    }

    #[test]
    fn test_wifi_client_list() {
        let msg = PushMessage::new(
            Topic::WifiClients,
            json!([{"mac": "aa:bb"}, {"mac": "cc:dd"}, {"mac": "ee:ff"}]),
        );
        let partial = msg.to_partial();
        assert_eq!(partial.wifi.client_count, Some(3));
        assert_eq!(partial.wifi.available, Some(true));
    }

    #[test]
    fn test_other_topic_carries_no_metrics() {
        let msg = PushMessage::new("containers", json!({"cpuPercent": 99}));
        assert!(msg.to_partial().is_empty());
    }

    #[test]
    fn test_encode_decode() {
        let msg = PushMessage::new(Topic::Power, json!({"batteryPercent": 77.0}));
        let decoded = PushMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }
}
