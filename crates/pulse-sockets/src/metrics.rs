//! Metric names recorded by the registry and router.
//!
//! Counters go through the `metrics` facade and are no-ops until a recorder
//! is installed. Every counter carries a `connection_id` label.

/// Transports established (counter).
pub const SOCKET_OPENS_TOTAL: &str = "socket_opens_total";
/// Open attempts that failed or timed out (counter).
pub const SOCKET_OPEN_FAILURES_TOTAL: &str = "socket_open_failures_total";
/// Closes not requested through `disconnect` (counter).
pub const SOCKET_UNSOLICITED_CLOSES_TOTAL: &str = "socket_unsolicited_closes_total";
/// Automatic reconnects scheduled (counter).
pub const SOCKET_RETRIES_SCHEDULED_TOTAL: &str = "socket_retries_scheduled_total";
/// Retry cycles that hit the attempt cap (counter).
pub const SOCKET_RETRIES_EXHAUSTED_TOTAL: &str = "socket_retries_exhausted_total";
/// Inbound frames decoded and published (counter).
pub const FRAMES_ROUTED_TOTAL: &str = "frames_routed_total";
/// Inbound frames dropped as undecodable (counter).
pub const FRAMES_DROPPED_TOTAL: &str = "frames_dropped_total";
/// `send` calls that could not queue a frame on an open connection (counter).
pub const SEND_FAILURES_TOTAL: &str = "send_failures_total";

/// Label attached to every counter above.
pub const CONNECTION_LABEL: &str = "connection_id";

pub(crate) fn increment(name: &'static str, connection_id: &str) {
    metrics::counter!(name, CONNECTION_LABEL => connection_id.to_owned()).increment(1);
}
