//! # pulse-core
//!
//! Foundation types shared by the pulse crates:
//!
//! - **Config**: [`ConnectionConfig`], one named socket endpoint and its retry policy
//! - **Status**: [`ConnectionStatus`] lifecycle states and [`ConnectionSnapshot`]
//! - **Envelopes**: [`RoutedMessage`] decoded from `{type, ...}` JSON frames
//! - **Dashboard payloads**: typed views over the metrics messages in [`messages`]
//! - **Errors**: [`SocketError`] and [`EnvelopeError`] via `thiserror`
//! - **Logging**: [`logging::init_subscriber`] for the `tracing` subscriber

#![deny(unsafe_code)]

pub mod config;
pub mod constants;
pub mod envelope;
pub mod errors;
pub mod logging;
pub mod messages;
pub mod status;

pub use config::ConnectionConfig;
pub use envelope::{RoutedMessage, decode_envelope};
pub use errors::{EnvelopeError, SocketError};
pub use status::{ConnectionSnapshot, ConnectionStatus};
