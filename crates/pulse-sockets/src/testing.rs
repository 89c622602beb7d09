//! In-memory [`Connector`] for exercising the registry without sockets.
//!
//! Each open attempt consumes the next scripted [`MockOutcome`] for its
//! connection id (falling back to the connector's default). Accepted opens
//! produce a [`MockSession`] the test drives by hand: push inbound frames,
//! read what the registry sent, or drop the session to simulate the remote
//! end going away.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_core::{ConnectionConfig, SocketError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::transport::{Connector, OpenedTransport, OutboundFrame, TransportEvent};

const INBOUND_BUFFER: usize = 64;

/// What one open attempt does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MockOutcome {
    /// Succeed and hand out a [`MockSession`].
    Accept,
    /// Fail with [`SocketError::Connect`] carrying this message.
    Refuse(String),
    /// Never complete.
    Hang,
}

impl MockOutcome {
    /// Shorthand for [`MockOutcome::Refuse`].
    pub fn refuse(message: impl Into<String>) -> Self {
        Self::Refuse(message.into())
    }
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<String, VecDeque<MockOutcome>>,
    default_outcome: Option<MockOutcome>,
    open_delay: Option<Duration>,
    sessions: HashMap<String, VecDeque<MockSession>>,
    opens: HashMap<String, usize>,
}

/// Scriptable connector. Clones share state.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    /// Connector that accepts every open.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next opens of `connection_id`.
    pub fn script<I>(&self, connection_id: &str, outcomes: I)
    where
        I: IntoIterator<Item = MockOutcome>,
    {
        self.state
            .lock()
            .scripts
            .entry(connection_id.to_owned())
            .or_default()
            .extend(outcomes);
    }

    /// Outcome used once a connection's script runs out.
    pub fn set_default(&self, outcome: MockOutcome) {
        self.state.lock().default_outcome = Some(outcome);
    }

    /// Delay every open by `delay` before applying its outcome.
    pub fn set_open_delay(&self, delay: Duration) {
        self.state.lock().open_delay = Some(delay);
    }

    /// Open attempts made across all connections.
    pub fn open_count(&self) -> usize {
        self.state.lock().opens.values().sum()
    }

    /// Open attempts made for `connection_id`.
    pub fn open_count_for(&self, connection_id: &str) -> usize {
        self.state
            .lock()
            .opens
            .get(connection_id)
            .copied()
            .unwrap_or(0)
    }

    /// Take the oldest unclaimed session accepted for `connection_id`.
    pub fn take_session(&self, connection_id: &str) -> Option<MockSession> {
        self.state
            .lock()
            .sessions
            .get_mut(connection_id)
            .and_then(VecDeque::pop_front)
    }

    /// Unclaimed sessions for `connection_id`.
    pub fn pending_sessions(&self, connection_id: &str) -> usize {
        self.state
            .lock()
            .sessions
            .get(connection_id)
            .map_or(0, VecDeque::len)
    }

    fn begin_open(&self, connection_id: &str) -> (MockOutcome, Option<Duration>) {
        let mut state = self.state.lock();
        *state.opens.entry(connection_id.to_owned()).or_default() += 1;
        let scripted = state
            .scripts
            .get_mut(connection_id)
            .and_then(VecDeque::pop_front);
        let outcome = match scripted {
            Some(outcome) => outcome,
            None => state.default_outcome.clone().unwrap_or(MockOutcome::Accept),
        };
        (outcome, state.open_delay)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(
        &self,
        config: &ConnectionConfig,
        outbound_buffer: usize,
    ) -> Result<OpenedTransport, SocketError> {
        let (outcome, delay) = self.begin_open(&config.id);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match outcome {
            MockOutcome::Accept => {
                let (outbound_tx, outbound_rx) = mpsc::channel(outbound_buffer.max(1));
                let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
                let session = MockSession {
                    connection_id: config.id.clone(),
                    inbound: inbound_tx,
                    outbound: outbound_rx,
                };
                self.state
                    .lock()
                    .sessions
                    .entry(config.id.clone())
                    .or_default()
                    .push_back(session);
                Ok(OpenedTransport {
                    outbound: outbound_tx,
                    inbound: inbound_rx,
                })
            }
            MockOutcome::Refuse(message) => Err(SocketError::connect(&config.url, message)),
            MockOutcome::Hang => std::future::pending().await,
        }
    }
}

/// The remote end of one accepted mock transport.
///
/// Dropping it ends the registry's inbound stream, which the registry sees as
/// an unsolicited close.
pub struct MockSession {
    /// Connection the session belongs to.
    pub connection_id: String,
    inbound: mpsc::Sender<TransportEvent>,
    outbound: mpsc::Receiver<OutboundFrame>,
}

impl MockSession {
    /// Deliver an inbound frame. Returns false once the registry stopped
    /// listening.
    pub fn push_frame(&self, frame: impl Into<String>) -> bool {
        self.inbound
            .try_send(TransportEvent::Frame(frame.into()))
            .is_ok()
    }

    /// Report a transport error.
    pub fn push_error(&self, error: impl Into<String>) -> bool {
        self.inbound
            .try_send(TransportEvent::Error(error.into()))
            .is_ok()
    }

    /// Close from the remote side with an optional reason.
    pub fn close(self, reason: Option<&str>) {
        let _ = self
            .inbound
            .try_send(TransportEvent::Closed(reason.map(str::to_owned)));
    }

    /// Next frame the registry sent, if one is queued.
    pub fn try_sent(&mut self) -> Option<OutboundFrame> {
        self.outbound.try_recv().ok()
    }

    /// Every frame the registry has sent so far.
    pub fn drain_sent(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Whether the registry dropped its end of the transport. Consumes a
    /// queued frame if one is waiting.
    pub fn released_by_client(&mut self) -> bool {
        matches!(self.outbound.try_recv(), Err(TryRecvError::Disconnected))
    }
}

impl std::fmt::Debug for MockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession")
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn accepts_by_default() {
        let connector = MockConnector::new();
        let cfg = ConnectionConfig::new("main", "ws://h");
        let transport = connector.open(&cfg, 4).await.unwrap();
        assert_eq!(connector.open_count_for("main"), 1);

        let mut session = connector.take_session("main").unwrap();
        transport.outbound.try_send("hello".into()).unwrap();
        assert_eq!(session.try_sent(), Some(OutboundFrame::Text("hello".into())));

        drop(transport);
        assert!(session.released_by_client());
    }

    #[tokio::test]
    async fn scripted_outcomes_then_default() {
        let connector = MockConnector::new();
        connector.script("main", [MockOutcome::refuse("refused")]);
        connector.set_default(MockOutcome::refuse("still down"));
        let cfg = ConnectionConfig::new("main", "ws://h");

        let first = connector.open(&cfg, 4).await;
        assert_matches!(first, Err(SocketError::Connect { message, .. }) if message == "refused");
        let second = connector.open(&cfg, 4).await;
        assert_matches!(second, Err(SocketError::Connect { message, .. }) if message == "still down");
        assert_eq!(connector.open_count(), 2);
        assert_eq!(connector.pending_sessions("main"), 0);
    }

    #[tokio::test]
    async fn session_feeds_inbound() {
        let connector = MockConnector::new();
        let cfg = ConnectionConfig::new("logs", "ws://h");
        let mut transport = connector.open(&cfg, 4).await.unwrap();
        let session = connector.take_session("logs").unwrap();

        assert!(session.push_frame(r#"{"type":"ping"}"#));
        session.close(Some("bye"));
        assert_eq!(
            transport.inbound.recv().await,
            Some(TransportEvent::Frame(r#"{"type":"ping"}"#.into()))
        );
        assert_eq!(
            transport.inbound.recv().await,
            Some(TransportEvent::Closed(Some("bye".into())))
        );
        assert_eq!(transport.inbound.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn hang_never_completes() {
        let connector = MockConnector::new();
        connector.set_default(MockOutcome::Hang);
        let cfg = ConnectionConfig::new("main", "ws://h");
        let result =
            tokio::time::timeout(Duration::from_secs(60), connector.open(&cfg, 4)).await;
        assert!(result.is_err());
    }
}
