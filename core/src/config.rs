//! Telemetry configuration
//!
//! Every field has a built-in default. `/config.json` may override any of
//! them; a missing file, a malformed section or an out-of-range value logs a
//! warning and keeps the default. Configuration problems are never fatal.
//!
//! ```json
//! {
//!   "time": { "ntp_server": "pool.ntp.org", "timezone": "CET-1CEST",
//!             "sync_timeout_seconds": 5, "confidence_window_hours": 24 },
//!   "tcp_logging": { "server_host": "collector.local", "server_port": 5000,
//!                    "ack_timeout_ms": 2000, "heartbeat_interval_ms": 1000,
//!                    "retry_backoff_ms": [5000, 10000, 30000] },
//!   "ledger": { "rotation_threshold_pct": 80 }
//! }
//! ```

use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

use hal_abstractions::Storage;
use serde::Deserialize;
use serde_json::Value;

use crate::calendar::{self, CivilTime, UtcOffset};

/// Default location of the configuration file
pub const CONFIG_PATH: &str = "/config.json";

/// Ledger (Log Store) configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Rotate once the ledger exceeds this share of filesystem capacity
    pub rotation_threshold_pct: u8,
    /// Longest wait for the ledger lock before a write is dropped
    pub lock_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rotation_threshold_pct: 80,
            lock_timeout_ms: 1000,
        }
    }
}

/// Time Authority configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeConfig {
    /// SNTP server handed to the wall clock
    pub ntp_server: String,
    /// POSIX `TZ` string for local-time display; only its standard offset
    /// is used
    pub timezone: String,
    /// Give up on a sync attempt after this long
    pub sync_timeout_ms: u64,
    /// How long a successful sync keeps the clock trusted
    pub confidence_window_ms: u64,
    /// Calendar time reported while unsynchronized
    pub fallback_unix_secs: u64,
    /// Synchronization anchors retained (one per boot generation)
    pub max_boot_history: usize,
    /// Longest wait for the time-state and anchor locks
    pub lock_timeout_ms: u64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            ntp_server: "pool.ntp.org".to_string(),
            timezone: "UTC0".to_string(),
            sync_timeout_ms: 5_000,
            confidence_window_ms: 24 * 3_600_000,
            fallback_unix_secs: calendar::unix_from_civil(CivilTime {
                year: 2025,
                month: 1,
                day: 1,
                hour: 0,
                minute: 0,
                second: 0,
            }),
            max_boot_history: 10,
            lock_timeout_ms: 100,
        }
    }
}

/// Log Shipper configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipperConfig {
    /// Collector hostname or IP
    pub server_host: String,
    pub server_port: u16,
    /// Wait for `{"ack":1}` after each line
    pub ack_timeout_ms: u64,
    /// Bound on connection establishment
    pub connect_timeout_ms: u64,
    /// Idle time before a heartbeat is sent
    pub heartbeat_interval_ms: u64,
    /// Escalating retry delays; the last one repeats
    pub retry_backoff_ms: Vec<u64>,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            server_host: "collector.local".to_string(),
            server_port: 5000,
            ack_timeout_ms: 2_000,
            connect_timeout_ms: 5_000,
            heartbeat_interval_ms: 1_000,
            retry_backoff_ms: vec![5_000, 10_000, 30_000],
        }
    }
}

/// All telemetry configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TelemetryConfig {
    pub ledger: LedgerConfig,
    pub time: TimeConfig,
    pub shipper: ShipperConfig,
}

// Raw on-disk shape. Every field optional so partial files are fine.

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TimeSection {
    ntp_server: Option<String>,
    timezone: Option<String>,
    sync_timeout_seconds: Option<u64>,
    confidence_window_hours: Option<u64>,
    fallback_unix_secs: Option<u64>,
    max_boot_history: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TcpLoggingSection {
    server_host: Option<String>,
    server_port: Option<u16>,
    ack_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    heartbeat_interval_ms: Option<u64>,
    retry_backoff_ms: Option<Vec<u64>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LedgerSection {
    rotation_threshold_pct: Option<u8>,
    lock_timeout_ms: Option<u64>,
}

impl TelemetryConfig {
    /// Load from `path`, falling back to defaults on any problem
    pub fn load<S: Storage>(storage: &mut S, path: &str) -> Self {
        let mut raw = Vec::new();
        match storage.read(path, &mut raw) {
            Ok(true) => Self::from_json(&raw),
            Ok(false) => {
                warn!("Config file not found, using defaults");
                Self::default()
            }
            Err(_) => {
                warn!("Config file unreadable, using defaults");
                Self::default()
            }
        }
    }

    /// Parse a configuration document, falling back to defaults per section
    pub fn from_json(raw: &[u8]) -> Self {
        let mut config = Self::default();

        let doc: Value = match serde_json::from_slice(raw) {
            Ok(doc) => doc,
            Err(_) => {
                warn!("Config JSON parse error, using defaults");
                return config;
            }
        };

        if let Some(section) = section::<TimeSection>(&doc, "time") {
            config.time.apply(section);
        }
        if let Some(section) = section::<TcpLoggingSection>(&doc, "tcp_logging") {
            config.shipper.apply(section);
        }
        if let Some(section) = section::<LedgerSection>(&doc, "ledger") {
            config.ledger.apply(section);
        }

        info!("Configuration loaded");
        config
    }
}

fn section<T>(doc: &Value, name: &str) -> Option<T>
where
    T: for<'de> Deserialize<'de>,
{
    let value = doc.get(name)?;
    match T::deserialize(value) {
        Ok(section) => Some(section),
        Err(_) => {
            warn!("Config section '{}' malformed, using defaults", name);
            None
        }
    }
}

impl TimeConfig {
    fn apply(&mut self, s: TimeSection) {
        if let Some(server) = s.ntp_server {
            if server.is_empty() {
                warn!("time.ntp_server empty, keeping default");
            } else {
                self.ntp_server = server;
            }
        }
        if let Some(tz) = s.timezone {
            if UtcOffset::from_posix_tz(&tz).is_none() {
                warn!("time.timezone not a POSIX TZ string, keeping default");
            } else {
                self.timezone = tz;
            }
        }
        if let Some(secs) = s.sync_timeout_seconds {
            if secs == 0 {
                warn!("time.sync_timeout_seconds must be positive, keeping default");
            } else {
                self.sync_timeout_ms = secs.saturating_mul(1000);
            }
        }
        if let Some(hours) = s.confidence_window_hours {
            if hours == 0 {
                warn!("time.confidence_window_hours must be positive, keeping default");
            } else {
                self.confidence_window_ms = hours.saturating_mul(3_600_000);
            }
        }
        if let Some(fallback) = s.fallback_unix_secs {
            self.fallback_unix_secs = fallback;
        }
        if let Some(max) = s.max_boot_history {
            if max == 0 {
                warn!("time.max_boot_history must be positive, keeping default");
            } else {
                self.max_boot_history = max;
            }
        }
    }
}

impl ShipperConfig {
    fn apply(&mut self, s: TcpLoggingSection) {
        if let Some(host) = s.server_host {
            if host.is_empty() {
                warn!("tcp_logging.server_host empty, keeping default");
            } else {
                self.server_host = host;
            }
        }
        if let Some(port) = s.server_port {
            if port == 0 {
                warn!("tcp_logging.server_port must be nonzero, keeping default");
            } else {
                self.server_port = port;
            }
        }
        if let Some(ms) = s.ack_timeout_ms {
            if ms == 0 {
                warn!("tcp_logging.ack_timeout_ms must be positive, keeping default");
            } else {
                self.ack_timeout_ms = ms;
            }
        }
        if let Some(ms) = s.connect_timeout_ms {
            if ms == 0 {
                warn!("tcp_logging.connect_timeout_ms must be positive, keeping default");
            } else {
                self.connect_timeout_ms = ms;
            }
        }
        if let Some(ms) = s.heartbeat_interval_ms {
            self.heartbeat_interval_ms = ms;
        }
        if let Some(table) = s.retry_backoff_ms {
            if table.is_empty() {
                warn!("tcp_logging.retry_backoff_ms empty, keeping default");
            } else {
                self.retry_backoff_ms = table;
            }
        }
    }
}

impl LedgerConfig {
    fn apply(&mut self, s: LedgerSection) {
        if let Some(pct) = s.rotation_threshold_pct {
            if pct == 0 || pct > 100 {
                warn!("ledger.rotation_threshold_pct out of range, keeping default");
            } else {
                self.rotation_threshold_pct = pct;
            }
        }
        if let Some(ms) = s.lock_timeout_ms {
            if ms == 0 {
                warn!("ledger.lock_timeout_ms must be positive, keeping default");
            } else {
                self.lock_timeout_ms = ms;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal_abstractions::mock::MemStorage;

    #[test]
    fn defaults_match_firmware_values() {
        let config = TelemetryConfig::default();
        assert_eq!(config.time.ntp_server, "pool.ntp.org");
        assert_eq!(config.time.timezone, "UTC0");
        assert_eq!(config.time.sync_timeout_ms, 5_000);
        assert_eq!(config.time.fallback_unix_secs, 1_735_689_600);
        assert_eq!(config.shipper.server_port, 5000);
        assert_eq!(config.shipper.retry_backoff_ms, vec![5_000, 10_000, 30_000]);
        assert_eq!(config.ledger.rotation_threshold_pct, 80);
    }

    #[test]
    fn partial_document_overrides_only_given_fields() {
        let raw = br#"{
            "time": {"ntp_server": "time.example.org", "confidence_window_hours": 2},
            "tcp_logging": {"server_port": 6000, "retry_backoff_ms": [100, 200]}
        }"#;
        let config = TelemetryConfig::from_json(raw);
        assert_eq!(config.time.ntp_server, "time.example.org");
        assert_eq!(config.time.confidence_window_ms, 7_200_000);
        assert_eq!(config.time.sync_timeout_ms, 5_000);
        assert_eq!(config.shipper.server_port, 6000);
        assert_eq!(config.shipper.server_host, "collector.local");
        assert_eq!(config.shipper.retry_backoff_ms, vec![100, 200]);
        assert_eq!(config.ledger, LedgerConfig::default());
    }

    #[test]
    fn malformed_section_falls_back_without_touching_others() {
        let raw = br#"{
            "time": {"sync_timeout_seconds": "soon"},
            "ledger": {"rotation_threshold_pct": 70}
        }"#;
        let config = TelemetryConfig::from_json(raw);
        assert_eq!(config.time, TimeConfig::default());
        assert_eq!(config.ledger.rotation_threshold_pct, 70);
    }

    #[test]
    fn timezone_must_parse() {
        let config = TelemetryConfig::from_json(br#"{"time": {"timezone": "EST5EDT"}}"#);
        assert_eq!(config.time.timezone, "EST5EDT");

        let config = TelemetryConfig::from_json(br#"{"time": {"timezone": "Europe/Paris"}}"#);
        assert_eq!(config.time.timezone, "UTC0");
    }

    #[test]
    fn out_of_range_values_keep_defaults() {
        let raw = br#"{
            "tcp_logging": {"retry_backoff_ms": [], "server_port": 0},
            "ledger": {"rotation_threshold_pct": 150}
        }"#;
        let config = TelemetryConfig::from_json(raw);
        assert_eq!(config.shipper, ShipperConfig::default());
        assert_eq!(config.ledger.rotation_threshold_pct, 80);
    }

    #[test]
    fn garbage_or_missing_file_yields_defaults() {
        assert_eq!(TelemetryConfig::from_json(b"{not json"), TelemetryConfig::default());

        let mut storage = MemStorage::new(4096);
        assert_eq!(
            TelemetryConfig::load(&mut storage, CONFIG_PATH),
            TelemetryConfig::default()
        );

        storage.put(CONFIG_PATH, br#"{"tcp_logging": {"server_host": "10.0.0.2"}}"#);
        let config = TelemetryConfig::load(&mut storage, CONFIG_PATH);
        assert_eq!(config.shipper.server_host, "10.0.0.2");
    }
}
