//! Connection lifecycle states and read-only snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a managed connection.
///
/// `idle → connecting → open → closing → closed`, with `closed → connecting`
/// on retry or manual reconnect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Created but never connected.
    #[default]
    Idle,
    /// Open attempt in flight.
    Connecting,
    /// Transport established; frames flow both ways.
    Open,
    /// Disconnect requested; waiting for the transport to wind down.
    Closing,
    /// No transport. May be waiting on a scheduled retry.
    Closed,
}

impl ConnectionStatus {
    /// Whether a `connect` request should be ignored in this state.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }

    /// Whether the connection can carry outbound frames.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Point-in-time view of one connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    /// Connection identifier.
    pub id: String,
    /// Target address.
    pub url: String,
    /// Current lifecycle state.
    pub status: ConnectionStatus,
    /// Most recent transport error, cleared on the next open attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Automatic reconnect attempts made in the current cycle.
    pub reconnect_attempts: u32,
}
