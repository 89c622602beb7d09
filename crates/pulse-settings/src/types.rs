//! Settings type definitions.
//!
//! All types use camelCase JSON keys and `#[serde(default)]`, so a settings
//! file may contain any subset of fields.

use std::collections::HashSet;

use pulse_core::ConnectionConfig;
use pulse_core::constants::RECONNECT_SETTLE_DELAY_MS;
use pulse_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// # JSON Format
///
/// ```json
/// {
///   "connections": [
///     { "id": "main", "url": "ws://localhost:8080/api/lara-sock" },
///     { "id": "logs", "url": "ws://localhost:8080/api/logs-sock", "maxReconnectAttempts": 10 }
///   ],
///   "logging": { "level": "info" }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseSettings {
    /// Sockets to manage, in display order.
    pub connections: Vec<ConnectionConfig>,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Registry buffer sizes and timings.
    pub registry: RegistrySettings,
}

impl Default for PulseSettings {
    fn default() -> Self {
        Self {
            connections: vec![
                ConnectionConfig::new("main", "ws://localhost:8080/api/lara-sock"),
                ConnectionConfig::new("logs", "ws://localhost:8080/api/logs-sock"),
            ],
            logging: LoggingSettings::default(),
            registry: RegistrySettings::default(),
        }
    }
}

impl PulseSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for conn in &self.connections {
            if conn.id.trim().is_empty() {
                return Err(SettingsError::InvalidValue(
                    "connection id must not be empty".into(),
                ));
            }
            if !seen.insert(conn.id.as_str()) {
                return Err(SettingsError::InvalidValue(format!(
                    "duplicate connection id {:?}",
                    conn.id
                )));
            }
            if !(conn.url.starts_with("ws://") || conn.url.starts_with("wss://")) {
                return Err(SettingsError::InvalidValue(format!(
                    "connection {:?} url must start with ws:// or wss://, got {:?}",
                    conn.id, conn.url
                )));
            }
            if conn.reconnect_interval_ms == 0 {
                return Err(SettingsError::InvalidValue(format!(
                    "connection {:?} reconnectIntervalMs must be > 0",
                    conn.id
                )));
            }
        }
        self.registry.validate()
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`RUST_LOG` syntax).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// Registry buffer sizes and timings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrySettings {
    /// Queued outbound frames per connection before `send` reports failure.
    pub outbound_buffer: usize,
    /// Inbound socket events buffered per connection.
    pub inbound_buffer: usize,
    /// Buffered routed messages per subscription topic.
    pub route_capacity: usize,
    /// Buffered status changes per status subscriber.
    pub status_capacity: usize,
    /// Delay between the disconnect and connect halves of a manual reconnect.
    pub settle_delay_ms: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            inbound_buffer: 1024,
            route_capacity: 1024,
            status_capacity: 256,
            settle_delay_ms: RECONNECT_SETTLE_DELAY_MS,
        }
    }
}

impl RegistrySettings {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("outboundBuffer", self.outbound_buffer),
            ("inboundBuffer", self.inbound_buffer),
            ("routeCapacity", self.route_capacity),
            ("statusCapacity", self.status_capacity),
        ] {
            if value == 0 {
                return Err(SettingsError::InvalidValue(format!(
                    "registry.{name} must be > 0"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn defaults_are_valid() {
        let settings = PulseSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.connections.len(), 2);
        assert_eq!(settings.connections[0].id, "main");
        assert_eq!(settings.connections[1].url, "ws://localhost:8080/api/logs-sock");
        assert_eq!(settings.logging.level, "warn");
        assert_eq!(settings.registry.settle_delay_ms, 100);
        assert_eq!(settings.registry.inbound_buffer, 1024);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: PulseSettings =
            serde_json::from_str(r#"{"logging":{"level":"debug"}}"#).unwrap();
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, LogFormat::Compact);
        assert_eq!(settings.connections.len(), 2);
        assert_eq!(settings.registry.outbound_buffer, 256);
    }

    #[test]
    fn empty_connection_list_is_valid() {
        let settings = PulseSettings {
            connections: Vec::new(),
            ..PulseSettings::default()
        };
        settings.validate().unwrap();
    }

    #[test]
    fn rejects_duplicate_ids() {
        let settings = PulseSettings {
            connections: vec![
                ConnectionConfig::new("main", "ws://a"),
                ConnectionConfig::new("main", "ws://b"),
            ],
            ..PulseSettings::default()
        };
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(m)) if m.contains("duplicate"));
    }

    #[test]
    fn rejects_empty_id() {
        let settings = PulseSettings {
            connections: vec![ConnectionConfig::new("  ", "ws://a")],
            ..PulseSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_non_socket_scheme() {
        let settings = PulseSettings {
            connections: vec![ConnectionConfig::new("main", "http://a")],
            ..PulseSettings::default()
        };
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(m)) if m.contains("ws://"));
    }

    #[test]
    fn rejects_zero_interval() {
        let mut conn = ConnectionConfig::new("main", "wss://a");
        conn.reconnect_interval_ms = 0;
        let settings = PulseSettings {
            connections: vec![conn],
            ..PulseSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_zero_capacity() {
        let mut settings = PulseSettings::default();
        settings.registry.route_capacity = 0;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(m)) if m.contains("routeCapacity"));

        let mut settings = PulseSettings::default();
        settings.registry.inbound_buffer = 0;
        assert_matches!(settings.validate(), Err(SettingsError::InvalidValue(m)) if m.contains("inboundBuffer"));
    }
}
