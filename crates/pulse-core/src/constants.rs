//! Package-level constants and connection defaults.

/// Current version of pulse (sourced from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Package name.
pub const NAME: &str = "pulse";

/// Default delay between automatic reconnect attempts, in milliseconds.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 3000;

/// Default cap on automatic reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Delay between the disconnect and connect halves of a manual reconnect.
pub const RECONNECT_SETTLE_DELAY_MS: u64 = 100;

/// Envelope field that selects the route of an inbound frame.
pub const ENVELOPE_TYPE_FIELD: &str = "type";
