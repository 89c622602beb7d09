//! The seam between the registry and a concrete socket implementation.
//!
//! A [`Connector`] opens one transport per connect attempt and hands back a
//! pair of channels. The registry never touches the socket itself: it writes
//! [`OutboundFrame`]s into `outbound` and reads [`TransportEvent`]s from
//! `inbound`. Dropping `outbound` asks the transport to close; the end of
//! `inbound` means the transport is gone.

use async_trait::async_trait;
use pulse_core::{ConnectionConfig, SocketError};
use tokio::sync::mpsc;

/// A frame queued for delivery to the remote end.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl OutboundFrame {
    /// Serialize a JSON value into a text frame.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<String> for OutboundFrame {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for OutboundFrame {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<Vec<u8>> for OutboundFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

/// Something the transport observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// An inbound text frame.
    Frame(String),
    /// A non-fatal transport error. A `Closed` (or end of stream) follows if
    /// the socket is unusable.
    Error(String),
    /// The remote end or the network closed the socket.
    Closed(Option<String>),
}

/// Channels of an established transport.
#[derive(Debug)]
pub struct OpenedTransport {
    /// Frames to write. Dropping this closes the socket.
    pub outbound: mpsc::Sender<OutboundFrame>,
    /// Events read from the socket.
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens transports for connection configs.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish one transport. `outbound_buffer` bounds the outbound queue.
    async fn open(
        &self,
        config: &ConnectionConfig,
        outbound_buffer: usize,
    ) -> Result<OpenedTransport, SocketError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_conversions() {
        assert_eq!(OutboundFrame::from("hi"), OutboundFrame::Text("hi".into()));
        assert_eq!(OutboundFrame::from(String::from("hi")), OutboundFrame::Text("hi".into()));
        assert_eq!(OutboundFrame::from(vec![1u8, 2]), OutboundFrame::Binary(vec![1, 2]));
    }

    #[test]
    fn json_frame() {
        let frame = OutboundFrame::json(&serde_json::json!({"type": "ping", "data": "test"}));
        let OutboundFrame::Text(text) = frame else {
            panic!("expected text frame");
        };
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["type"], "ping");
    }

    #[test]
    fn frame_len() {
        assert_eq!(OutboundFrame::from("abc").len(), 3);
        assert!(OutboundFrame::Binary(Vec::new()).is_empty());
    }
}
