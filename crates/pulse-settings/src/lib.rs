//! # pulse-settings
//!
//! Layered settings for the socket agent. Later layers win:
//!
//! 1. compiled defaults ([`PulseSettings::default()`]),
//! 2. the user file, `$PULSE_SETTINGS` or `~/.pulse/settings.json`, deep-merged
//!    over the defaults,
//! 3. `PULSE_*` environment overrides.
//!
//! The merged result is validated before it is returned.
//!
//! ```no_run
//! let settings = pulse_settings::load_settings()?;
//! for conn in &settings.connections {
//!     println!("{} -> {}", conn.id, conn.url);
//! }
//! # Ok::<(), pulse_settings::SettingsError>(())
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path,
    parse_connection_list, parse_connection_spec, settings_path,
};
pub use types::*;
