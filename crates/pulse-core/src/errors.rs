//! Error types for transports and envelope decoding.
//!
//! Neither type ever reaches a registry caller as a `Result`: transport errors
//! are recorded on the connection and reported to its handler, and envelope
//! errors only decide whether a frame gets routed.

use thiserror::Error;

/// Failure to establish a transport for a connection.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The configured address could not be turned into a handshake request.
    #[error("invalid socket address {url}: {message}")]
    InvalidUrl {
        /// Offending address.
        url: String,
        /// Parser message.
        message: String,
    },
    /// A sub-protocol name is not a valid header value.
    #[error("invalid sub-protocol {0:?}")]
    InvalidProtocol(String),
    /// TCP connect or handshake failed.
    #[error("failed to connect to {url}: {message}")]
    Connect {
        /// Target address.
        url: String,
        /// Underlying transport message.
        message: String,
    },
    /// The open attempt exceeded `connect_timeout_ms`.
    #[error("timed out after {timeout_ms}ms connecting to {url}")]
    OpenTimeout {
        /// Target address.
        url: String,
        /// Configured limit.
        timeout_ms: u64,
    },
}

impl SocketError {
    /// Build a [`SocketError::Connect`] from any displayable error.
    pub fn connect(url: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Connect {
            url: url.into(),
            message: err.to_string(),
        }
    }
}

/// Why an inbound frame could not be decoded as an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// The frame is not valid JSON.
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// The frame is JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// The object has no string `type` field.
    #[error("frame has no string \"type\" field")]
    MissingType,
}
