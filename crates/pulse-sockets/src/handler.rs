//! Lifecycle callbacks for managed connections.

use std::sync::Arc;

use tracing::{debug, info, warn};

/// Receives lifecycle notifications for every connection in a registry.
///
/// Methods are called from the connection's session task, outside the
/// registry lock, in the order events happened on that connection. They must
/// not block; hand long work to a spawned task.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// The transport for `connection_id` is established.
    fn on_open(&self, connection_id: &str) {
        let _ = connection_id;
    }

    /// A raw inbound frame arrived. Called after the frame was offered to the
    /// router, whether or not it decoded.
    fn on_message(&self, connection_id: &str, frame: &str) {
        let _ = (connection_id, frame);
    }

    /// The transport closed or failed to open.
    fn on_close(&self, connection_id: &str, reason: Option<&str>) {
        let _ = (connection_id, reason);
    }

    /// A transport error was recorded.
    fn on_error(&self, connection_id: &str, error: &str) {
        let _ = (connection_id, error);
    }
}

impl<H: ConnectionHandler + ?Sized> ConnectionHandler for Arc<H> {
    fn on_open(&self, connection_id: &str) {
        (**self).on_open(connection_id);
    }

    fn on_message(&self, connection_id: &str, frame: &str) {
        (**self).on_message(connection_id, frame);
    }

    fn on_close(&self, connection_id: &str, reason: Option<&str>) {
        (**self).on_close(connection_id, reason);
    }

    fn on_error(&self, connection_id: &str, error: &str) {
        (**self).on_error(connection_id, error);
    }
}

/// Handler that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHandler;

impl ConnectionHandler for NoopHandler {}

/// Handler that logs every event through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingHandler;

impl ConnectionHandler for LoggingHandler {
    fn on_open(&self, connection_id: &str) {
        info!(connection_id, "connection open");
    }

    fn on_message(&self, connection_id: &str, frame: &str) {
        debug!(connection_id, len = frame.len(), "frame received");
    }

    fn on_close(&self, connection_id: &str, reason: Option<&str>) {
        info!(connection_id, reason = reason.unwrap_or(""), "connection closed");
    }

    fn on_error(&self, connection_id: &str, error: &str) {
        warn!(connection_id, error, "connection error");
    }
}
