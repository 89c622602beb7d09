//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PulseSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source, so a user
//!   `connections` list replaces the default one
//! - Null values in source are skipped (preserving target)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use pulse_core::ConnectionConfig;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::PulseSettings;

/// Env var naming an explicit settings file.
pub const SETTINGS_PATH_ENV: &str = "PULSE_SETTINGS";

/// Resolve the settings file path: `$PULSE_SETTINGS`, else `~/.pulse/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string(SETTINGS_PATH_ENV) {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pulse").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PulseSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// [`PulseSettings::validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<PulseSettings> {
    let defaults = serde_json::to_value(PulseSettings::default())?;

    let merged = match std::fs::read_to_string(path) {
        Ok(content) => {
            debug!(?path, "loading settings from file");
            let user: Value =
                serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            deep_merge(defaults, user)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut settings: PulseSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning and fall back to file/default.
/// `PULSE_CONNECTIONS` replaces the connection list before the per-connection
/// retry overrides are applied, so both can be combined.
pub fn apply_env_overrides(settings: &mut PulseSettings) {
    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_env_string("PULSE_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("PULSE_LOG_FORMAT") {
        match v.parse() {
            Ok(format) => settings.logging.format = format,
            Err(e) => tracing::warn!(key = "PULSE_LOG_FORMAT", value = %v, error = %e, "ignoring"),
        }
    }

    // ── Registry ────────────────────────────────────────────────────
    if let Some(v) = read_env_in("PULSE_OUTBOUND_BUFFER", 1..=1_000_000) {
        settings.registry.outbound_buffer = v;
    }
    if let Some(v) = read_env_in("PULSE_ROUTE_CAPACITY", 1..=1_000_000) {
        settings.registry.route_capacity = v;
    }
    if let Some(v) = read_env_in("PULSE_SETTLE_DELAY_MS", 0..=60_000) {
        settings.registry.settle_delay_ms = v;
    }

    // ── Connections ─────────────────────────────────────────────────
    if let Some(v) = read_env_string("PULSE_CONNECTIONS") {
        match parse_connection_list(&v) {
            Some(list) => settings.connections = list,
            None => tracing::warn!(key = "PULSE_CONNECTIONS", value = %v, "invalid connection list, ignoring"),
        }
    }
    if let Some(v) = read_env_in("PULSE_RECONNECT_INTERVAL_MS", 1..=3_600_000) {
        for conn in &mut settings.connections {
            conn.reconnect_interval_ms = v;
        }
    }
    if let Some(v) = read_env_in("PULSE_MAX_RECONNECT_ATTEMPTS", 0..=10_000) {
        for conn in &mut settings.connections {
            conn.max_reconnect_attempts = v;
        }
    }
}

/// Parse one `id=url` pair.
pub fn parse_connection_spec(spec: &str) -> Option<ConnectionConfig> {
    let (id, url) = spec.split_once('=')?;
    let (id, url) = (id.trim(), url.trim());
    if id.is_empty() || url.is_empty() {
        return None;
    }
    Some(ConnectionConfig::new(id, url))
}

/// Parse a comma-separated `id=url` list. `None` if any entry is malformed.
pub fn parse_connection_list(val: &str) -> Option<Vec<ConnectionConfig>> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_connection_spec)
        .collect()
}

/// Parse `val` and keep it only when it falls inside `range`.
pub fn parse_in_range<T>(val: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim().parse().ok().filter(|n| range.contains(n))
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_in<T>(name: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    let val = read_env_string(name)?;
    let parsed = parse_in_range(&val, range);
    if parsed.is_none() {
        tracing::warn!(key = name, value = %val, "out-of-range or malformed env var, ignoring");
    }
    parsed
}
