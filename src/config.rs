//! Station configuration and the persisted registry snapshot.
//!
//! The same JSON document serves both purposes: it is read once at startup
//! and rewritten in full, with the current device list, after every registry
//! mutation.
//!
//! ```json
//! {
//!     "id": "S1",
//!     "devices": ["AA:BB:CC:DD:EE:01", { "mac": "AA:BB:CC:DD:EE:02", "name": "desk" }],
//!     "broker_ip": "127.0.0.1",
//!     "publish_topic": "rssi",
//!     "subscribe_topic": "station/S1",
//!     "scan_interval": 1.0,
//!     "send_interval": 5.0
//! }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mac::MacAddress;
use crate::registry::BeaconEntry;

/// Default MQTT broker port when the config omits `broker_port`.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One `devices` element as it appears on disk.
///
/// The address-only form comes from stations tracking anonymous tags; the
/// object form carries the display name reported in the measurement map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceRecord {
    Address(MacAddress),
    Named { mac: MacAddress, name: String },
}

impl From<&BeaconEntry> for DeviceRecord {
    fn from(entry: &BeaconEntry) -> Self {
        match &entry.label {
            Some(name) => DeviceRecord::Named {
                mac: entry.address,
                name: name.clone(),
            },
            None => DeviceRecord::Address(entry.address),
        }
    }
}

impl From<DeviceRecord> for BeaconEntry {
    fn from(record: DeviceRecord) -> Self {
        match record {
            DeviceRecord::Address(address) => BeaconEntry::new(address, None),
            DeviceRecord::Named { mac, name } => BeaconEntry::new(mac, Some(name)),
        }
    }
}

/// Station identity, transport endpoint, intervals, and the tracked devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    pub id: String,
    #[serde(default)]
    pub devices: Vec<DeviceRecord>,
    pub broker_ip: String,
    #[serde(default = "default_broker_port", skip_serializing_if = "is_default_port")]
    pub broker_port: u16,
    pub publish_topic: String,
    pub subscribe_topic: String,
    /// Seconds per scan round of the radio collaborator.
    pub scan_interval: f64,
    /// Seconds between two flushes.
    #[serde(alias = "send-interval")]
    pub send_interval: f64,
    /// Publish a report even when nothing was heard during the interval.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub publish_empty: bool,
}

fn default_broker_port() -> u16 {
    DEFAULT_BROKER_PORT
}

fn is_default_port(port: &u16) -> bool {
    *port == DEFAULT_BROKER_PORT
}

fn default_true() -> bool {
    true
}

fn is_true(v: &bool) -> bool {
    *v
}

/// Longest accepted `send_interval` / `scan_interval`.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

fn interval(key: &str, secs: f64) -> Result<Duration, ConfigError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if d <= MAX_INTERVAL => Ok(d),
        _ => Err(ConfigError::Invalid(format!(
            "`{key}` must be between 0 and {} seconds, got {secs}",
            MAX_INTERVAL.as_secs()
        ))),
    }
}

// Fields are public, so a config mutated after validation still converts.
fn clamp_interval(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).map_or(MAX_INTERVAL, |d| d.min(MAX_INTERVAL))
}

impl StationConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: StationConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::Invalid("`id` must not be empty".into()));
        }
        if self.broker_ip.trim().is_empty() {
            return Err(ConfigError::Invalid("`broker_ip` must not be empty".into()));
        }
        if self.publish_topic.is_empty() || self.subscribe_topic.is_empty() {
            return Err(ConfigError::Invalid(
                "`publish_topic` and `subscribe_topic` must not be empty".into(),
            ));
        }
        let send = interval("send_interval", self.send_interval)?;
        if send.is_zero() {
            return Err(ConfigError::Invalid("`send_interval` must be positive".into()));
        }
        interval("scan_interval", self.scan_interval)?;
        Ok(())
    }

    pub fn send_interval(&self) -> Duration {
        clamp_interval(self.send_interval)
    }

    pub fn scan_interval(&self) -> Duration {
        clamp_interval(self.scan_interval)
    }

    /// Device list as registry entries, keeping the first of any duplicated
    /// address.
    pub fn beacon_entries(&self) -> Vec<BeaconEntry> {
        let mut entries: Vec<BeaconEntry> = Vec::with_capacity(self.devices.len());
        for record in &self.devices {
            let entry = BeaconEntry::from(record.clone());
            if entries.iter().any(|e| e.address == entry.address) {
                log::warn!("Duplicate device {} in configuration ignored", entry.address);
                continue;
            }
            entries.push(entry);
        }
        entries
    }

    /// Copy of this config carrying `entries` as its device list.
    pub fn with_devices(&self, entries: &[BeaconEntry]) -> Self {
        Self {
            devices: entries.iter().map(DeviceRecord::from).collect(),
            ..self.clone()
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: &str = r#"{
        "id": "S1",
        "devices": ["aa:bb:cc:dd:ee:01", { "mac": "AA:BB:CC:DD:EE:02", "name": "desk" }],
        "broker_ip": "127.0.0.1",
        "publish_topic": "rssi",
        "subscribe_topic": "station/S1",
        "scan_interval": 1,
        "send_interval": 2.5
    }"#;

    #[test]
    fn loads_both_device_forms() {
        let cfg = StationConfig::from_json(BASIC).unwrap();
        assert_eq!(cfg.id, "S1");
        assert_eq!(cfg.broker_port, DEFAULT_BROKER_PORT);
        assert!(cfg.publish_empty);
        assert_eq!(cfg.send_interval(), Duration::from_millis(2500));

        let entries = cfg.beacon_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].address.to_string(), "AA:BB:CC:DD:EE:01");
        assert_eq!(entries[0].label, None);
        assert_eq!(entries[1].label.as_deref(), Some("desk"));
    }

    #[test]
    fn accepts_dashed_send_interval_key() {
        let text = BASIC.replace("\"send_interval\"", "\"send-interval\"");
        let cfg = StationConfig::from_json(&text).unwrap();
        assert_eq!(cfg.send_interval, 2.5);
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let text = BASIC.replace("\"broker_ip\": \"127.0.0.1\",", "");
        assert!(matches!(
            StationConfig::from_json(&text),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn zero_send_interval_is_rejected() {
        let text = BASIC.replace("2.5", "0");
        assert!(matches!(
            StationConfig::from_json(&text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn oversized_intervals_are_rejected() {
        for bad in ["1e30", "1e19", "86401", "-1"] {
            let text = BASIC.replace("2.5", bad);
            assert!(
                matches!(StationConfig::from_json(&text), Err(ConfigError::Invalid(_))),
                "send_interval {bad} accepted"
            );
            let text = BASIC.replace("\"scan_interval\": 1", &format!("\"scan_interval\": {bad}"));
            assert!(
                matches!(StationConfig::from_json(&text), Err(ConfigError::Invalid(_))),
                "scan_interval {bad} accepted"
            );
        }

        let text = BASIC.replace("2.5", "86400");
        let cfg = StationConfig::from_json(&text).unwrap();
        assert_eq!(cfg.send_interval(), MAX_INTERVAL);
    }

    #[test]
    fn interval_accessors_never_panic() {
        let mut cfg = StationConfig::from_json(BASIC).unwrap();
        cfg.send_interval = 1e30;
        cfg.scan_interval = f64::NAN;
        assert_eq!(cfg.send_interval(), MAX_INTERVAL);
        assert_eq!(cfg.scan_interval(), MAX_INTERVAL);
    }

    #[test]
    fn invalid_device_address_is_rejected() {
        let text = BASIC.replace("aa:bb:cc:dd:ee:01", "not-a-mac");
        assert!(StationConfig::from_json(&text).is_err());
    }

    #[test]
    fn empty_id_is_rejected() {
        let text = BASIC.replace("\"S1\"", "\"  \"");
        assert!(matches!(
            StationConfig::from_json(&text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn duplicate_devices_collapse_to_first() {
        let text = BASIC.replace("AA:BB:CC:DD:EE:02", "AA:BB:CC:DD:EE:01");
        let cfg = StationConfig::from_json(&text).unwrap();
        let entries = cfg.beacon_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].label, None);
    }

    #[test]
    fn snapshot_roundtrip_preserves_entries() {
        let cfg = StationConfig::from_json(BASIC).unwrap();
        let entries = cfg.beacon_entries();
        let json = cfg.with_devices(&entries).to_json_pretty().unwrap();
        let reloaded = StationConfig::from_json(&json).unwrap();
        assert_eq!(reloaded.beacon_entries(), entries);
        assert_eq!(reloaded, cfg);
    }

    #[test]
    fn default_extensions_are_not_written() {
        let cfg = StationConfig::from_json(BASIC).unwrap();
        let json = cfg.to_json_pretty().unwrap();
        assert!(!json.contains("broker_port"));
        assert!(!json.contains("publish_empty"));
        assert!(json.contains(r#""send_interval": 2.5"#));
    }

    #[test]
    fn read_error_names_path() {
        let err = StationConfig::load(Path::new("/nonexistent/station.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/station.json"));
    }
}
