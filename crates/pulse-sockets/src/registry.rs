//! The connection registry.
//!
//! [`ConnectionRegistry`] owns every managed connection, keyed by id. All
//! bookkeeping lives behind one mutex; each live connection also has a
//! session task that drives its transport and reports back through the
//! `on_*` methods below.
//!
//! Every session carries an epoch. Starting a connection bumps it, so events
//! from a session that has since been disconnected, replaced, or restarted
//! are recognised as stale and ignored.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pulse_core::constants::RECONNECT_SETTLE_DELAY_MS;
use pulse_core::{ConnectionConfig, ConnectionSnapshot, ConnectionStatus, SocketError};
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handler::ConnectionHandler;
use crate::metrics::{
    SEND_FAILURES_TOTAL, SOCKET_OPEN_FAILURES_TOTAL, SOCKET_OPENS_TOTAL,
    SOCKET_RETRIES_EXHAUSTED_TOTAL, SOCKET_RETRIES_SCHEDULED_TOTAL,
    SOCKET_UNSOLICITED_CLOSES_TOTAL, increment,
};
use crate::router::{DEFAULT_ROUTE_CAPACITY, MessageRouter, Subscription};
use crate::scheduler::{ReconnectPolicy, ReconnectScheduler};
use crate::transport::{Connector, OpenedTransport, OutboundFrame, TransportEvent};

/// Buffer sizes and timings for a registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Queued outbound frames per connection before `send` reports failure.
    pub outbound_buffer: usize,
    /// Buffered messages per router topic.
    pub route_capacity: usize,
    /// Buffered snapshots per status subscriber.
    pub status_capacity: usize,
    /// Gap between the disconnect and connect halves of `reconnect`.
    pub settle_delay: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
            route_capacity: DEFAULT_ROUTE_CAPACITY,
            status_capacity: 256,
            settle_delay: Duration::from_millis(RECONNECT_SETTLE_DELAY_MS),
        }
    }
}

/// What asked for a connection to start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trigger {
    /// `connect`, `connect_all`, or `configure`.
    Manual,
    /// Automatic retry after an unsolicited close.
    Retry,
    /// Second half of `reconnect`.
    Settle,
}

struct ConnectionEntry {
    config: Arc<ConnectionConfig>,
    status: ConnectionStatus,
    last_error: Option<String>,
    reconnect_attempts: u32,
    should_reconnect: bool,
    transport: Option<mpsc::Sender<OutboundFrame>>,
    epoch: u64,
    session: Option<CancellationToken>,
}

impl ConnectionEntry {
    fn new(config: ConnectionConfig) -> Self {
        Self {
            config: Arc::new(config),
            status: ConnectionStatus::Idle,
            last_error: None,
            reconnect_attempts: 0,
            should_reconnect: true,
            transport: None,
            epoch: 0,
            session: None,
        }
    }

    fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            id: self.config.id.clone(),
            url: self.config.url.clone(),
            status: self.status,
            last_error: self.last_error.clone(),
            reconnect_attempts: self.reconnect_attempts,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    order: Vec<String>,
    connections: HashMap<String, ConnectionEntry>,
    next_epoch: u64,
}

struct Inner {
    connector: Arc<dyn Connector>,
    handler: Arc<dyn ConnectionHandler>,
    router: Arc<MessageRouter>,
    scheduler: Arc<ReconnectScheduler>,
    state: Mutex<RegistryState>,
    status_tx: broadcast::Sender<ConnectionSnapshot>,
    options: RegistryOptions,
}

/// Manages a set of named socket connections.
///
/// Commands never block and never fail: unknown ids are logged and ignored,
/// transport failures are recorded on the connection and reported to the
/// [`ConnectionHandler`]. Must be created and used inside a tokio runtime.
///
/// Dropping the registry tears down every connection.
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl ConnectionRegistry {
    /// Create an empty registry with default options.
    pub fn new(connector: impl Connector, handler: impl ConnectionHandler) -> Self {
        Self::with_options(connector, handler, RegistryOptions::default())
    }

    /// Create an empty registry.
    pub fn with_options(
        connector: impl Connector,
        handler: impl ConnectionHandler,
        options: RegistryOptions,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(options.status_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                connector: Arc::new(connector),
                handler: Arc::new(handler),
                router: Arc::new(MessageRouter::new(options.route_capacity)),
                scheduler: Arc::new(ReconnectScheduler::new()),
                state: Mutex::new(RegistryState::default()),
                status_tx,
                options,
            }),
        }
    }

    /// Reconcile the registry to exactly `configs`.
    ///
    /// New ids are created and connected. Ids whose config is unchanged are
    /// left alone. Ids whose config changed are torn down and recreated.
    /// Ids not present are torn down and removed. When an id appears more
    /// than once, the first occurrence wins.
    pub fn configure<I>(&self, configs: I)
    where
        I: IntoIterator<Item = ConnectionConfig>,
    {
        self.inner.configure(configs.into_iter().collect());
    }

    /// Open `connection_id` unless it is already connecting or open.
    pub fn connect(&self, connection_id: &str) {
        self.inner.start(connection_id, Trigger::Manual);
    }

    /// Close `connection_id` and stop retrying it.
    pub fn disconnect(&self, connection_id: &str) {
        self.inner.disconnect(connection_id);
    }

    /// Disconnect, reset the retry counter, then connect after the settle
    /// delay.
    pub fn reconnect(&self, connection_id: &str) {
        self.inner.reconnect(connection_id);
    }

    /// [`connect`](Self::connect) every connection, in configuration order.
    pub fn connect_all(&self) {
        for id in self.ids() {
            self.connect(&id);
        }
    }

    /// [`disconnect`](Self::disconnect) every connection.
    pub fn disconnect_all(&self) {
        for id in self.ids() {
            self.disconnect(&id);
        }
    }

    /// [`reconnect`](Self::reconnect) every connection.
    pub fn reconnect_all(&self) {
        for id in self.ids() {
            self.reconnect(&id);
        }
    }

    /// Queue a frame on `connection_id`. True only if the connection is open
    /// and the frame was queued.
    pub fn send(&self, connection_id: &str, frame: impl Into<OutboundFrame>) -> bool {
        self.inner.send(connection_id, frame.into())
    }

    /// [`send`](Self::send) to every connection. Returns one result per
    /// connection, in configuration order.
    pub fn send_to_all(&self, frame: impl Into<OutboundFrame>) -> Vec<(String, bool)> {
        let frame = frame.into();
        let ids = self.ids();
        let results: Vec<(String, bool)> = ids
            .into_iter()
            .map(|id| {
                let sent = self.inner.send(&id, frame.clone());
                (id, sent)
            })
            .collect();
        let recipients = results.iter().filter(|(_, sent)| *sent).count();
        debug!(recipients, total = results.len(), "frame sent to all");
        results
    }

    /// Snapshot of one connection.
    pub fn get(&self, connection_id: &str) -> Option<ConnectionSnapshot> {
        self.inner
            .state
            .lock()
            .connections
            .get(connection_id)
            .map(ConnectionEntry::snapshot)
    }

    /// Snapshots of every connection, in configuration order.
    pub fn snapshot(&self) -> Vec<ConnectionSnapshot> {
        let state = self.inner.state.lock();
        state
            .order
            .iter()
            .filter_map(|id| state.connections.get(id))
            .map(ConnectionEntry::snapshot)
            .collect()
    }

    /// Connection ids, in configuration order.
    pub fn ids(&self) -> Vec<String> {
        self.inner.state.lock().order.clone()
    }

    /// Number of managed connections.
    pub fn len(&self) -> usize {
        self.inner.state.lock().order.len()
    }

    /// Whether the registry manages no connections.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a retry or settle timer is armed for `connection_id`.
    pub fn reconnect_pending(&self, connection_id: &str) -> bool {
        self.inner.scheduler.is_pending(connection_id)
    }

    /// Stream of snapshots, one per state change, in the order changes were
    /// applied.
    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionSnapshot> {
        self.inner.status_tx.subscribe()
    }

    /// The router inbound frames are published on.
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.inner.router
    }

    /// Shorthand for [`MessageRouter::subscribe`].
    pub fn subscribe(&self, connection_id: &str, message_type: &str) -> Subscription {
        self.inner.router.subscribe(connection_id, message_type)
    }

    /// Shorthand for [`MessageRouter::subscribe_all`].
    pub fn subscribe_all(&self, connection_id: &str) -> Subscription {
        self.inner.router.subscribe_all(connection_id)
    }

    /// Tear down and remove every connection, cancel every timer, and close
    /// every router topic.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.ids())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

impl Inner {
    fn publish(&self, entry: &ConnectionEntry) {
        // Err only means nobody is subscribed.
        let _ = self.status_tx.send(entry.snapshot());
    }

    fn configure(self: &Arc<Self>, configs: Vec<ConnectionConfig>) {
        let mut wanted = HashSet::new();
        let mut desired = Vec::with_capacity(configs.len());
        for config in configs {
            if wanted.insert(config.id.clone()) {
                desired.push(config);
            } else {
                warn!(connection_id = %config.id, "duplicate connection id in configure, ignoring");
            }
        }

        let mut to_start = Vec::new();
        let mut removed = Vec::new();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let absent: Vec<String> = state
                .order
                .iter()
                .filter(|id| !wanted.contains(*id))
                .cloned()
                .collect();
            for id in absent {
                if let Some(mut entry) = state.connections.remove(&id) {
                    let _ = self.tear_down(&mut entry);
                    entry.status = ConnectionStatus::Closed;
                    self.publish(&entry);
                }
                removed.push(id);
            }

            let mut order = Vec::with_capacity(desired.len());
            for config in desired {
                let id = config.id.clone();
                match state.connections.get_mut(&id) {
                    Some(entry) if *entry.config == config => {}
                    Some(entry) => {
                        info!(connection_id = %id, url = %config.url, "connection config changed, replacing");
                        let _ = self.tear_down(entry);
                        *entry = ConnectionEntry::new(config);
                        self.publish(entry);
                        to_start.push(id.clone());
                    }
                    None => {
                        info!(connection_id = %id, url = %config.url, "connection added");
                        let entry = ConnectionEntry::new(config);
                        self.publish(&entry);
                        let _ = state.connections.insert(id.clone(), entry);
                        to_start.push(id.clone());
                    }
                }
                order.push(id);
            }
            state.order = order;
        }

        for id in &removed {
            info!(connection_id = %id, "connection removed");
            self.router.remove_connection(id);
        }
        for id in &to_start {
            self.start(id, Trigger::Manual);
        }
    }

    fn start(self: &Arc<Self>, connection_id: &str, trigger: Trigger) {
        let mut state = self.state.lock();
        let RegistryState {
            connections,
            next_epoch,
            ..
        } = &mut *state;
        let Some(entry) = connections.get_mut(connection_id) else {
            if trigger == Trigger::Manual {
                warn!(connection_id, "connect: unknown connection");
            }
            return;
        };

        match trigger {
            // Intent stays as the last disconnect or reconnect left it.
            Trigger::Manual => {
                let _ = self.scheduler.cancel(connection_id);
            }
            Trigger::Retry | Trigger::Settle => {
                if !entry.should_reconnect {
                    debug!(connection_id, ?trigger, "scheduled connect skipped, reconnect cleared");
                    return;
                }
            }
        }
        if entry.status.is_active() {
            debug!(connection_id, status = %entry.status, "connect ignored, already active");
            return;
        }

        *next_epoch += 1;
        let epoch = *next_epoch;
        let cancel = CancellationToken::new();
        entry.epoch = epoch;
        entry.status = ConnectionStatus::Connecting;
        entry.last_error = None;
        entry.transport = None;
        entry.session = Some(cancel.clone());
        let config = Arc::clone(&entry.config);
        let attempt = entry.reconnect_attempts;
        self.publish(entry);
        drop(state);

        info!(connection_id, url = %config.url, attempt, ?trigger, "connecting");
        drop(tokio::spawn(Arc::clone(self).run_session(config, epoch, cancel)));
    }

    /// Clear intent, cancel the timer, reset attempts, and begin closing the
    /// transport. Returns whether anything observable changed.
    fn tear_down(&self, entry: &mut ConnectionEntry) -> bool {
        entry.should_reconnect = false;
        let had_timer = self.scheduler.cancel(&entry.config.id);
        let had_attempts = entry.reconnect_attempts != 0;
        entry.reconnect_attempts = 0;

        let closing = entry.status.is_active();
        if closing {
            entry.status = ConnectionStatus::Closing;
            entry.transport = None;
            if let Some(cancel) = &entry.session {
                cancel.cancel();
            }
        }
        closing || had_timer || had_attempts
    }

    fn disconnect(&self, connection_id: &str) {
        let mut state = self.state.lock();
        let Some(entry) = state.connections.get_mut(connection_id) else {
            warn!(connection_id, "disconnect: unknown connection");
            return;
        };
        if self.tear_down(entry) {
            self.publish(entry);
            info!(connection_id, status = %entry.status, "disconnect requested");
        }
    }

    fn reconnect(self: &Arc<Self>, connection_id: &str) {
        let mut state = self.state.lock();
        let Some(entry) = state.connections.get_mut(connection_id) else {
            warn!(connection_id, "reconnect: unknown connection");
            return;
        };
        let _ = self.tear_down(entry);
        entry.should_reconnect = true;
        entry.reconnect_attempts = 0;
        self.publish(entry);
        self.schedule_start(connection_id, self.options.settle_delay, Trigger::Settle);
        drop(state);

        info!(connection_id, "reconnect requested");
    }

    fn send(&self, connection_id: &str, frame: OutboundFrame) -> bool {
        let state = self.state.lock();
        let Some(entry) = state.connections.get(connection_id) else {
            debug!(connection_id, "send: unknown connection");
            return false;
        };
        let transport = match &entry.transport {
            Some(tx) if entry.status.is_open() => tx,
            _ => {
                debug!(connection_id, status = %entry.status, "send: connection not open");
                return false;
            }
        };
        match transport.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(connection_id, "send: outbound queue full, frame dropped");
                increment(SEND_FAILURES_TOTAL, connection_id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection_id, "send: transport already gone");
                increment(SEND_FAILURES_TOTAL, connection_id);
                false
            }
        }
    }

    fn shutdown(&self) {
        let entries: Vec<ConnectionEntry> = {
            let mut state = self.state.lock();
            state.order.clear();
            state.connections.drain().map(|(_, e)| e).collect()
        };
        let count = entries.len();
        for mut entry in entries {
            let _ = self.tear_down(&mut entry);
            entry.status = ConnectionStatus::Closed;
            self.publish(&entry);
        }
        self.scheduler.cancel_all();
        self.router.clear();
        if count > 0 {
            info!(connections = count, "registry shut down");
        }
    }

    fn schedule_start(self: &Arc<Self>, connection_id: &str, delay: Duration, trigger: Trigger) {
        let weak = Arc::downgrade(self);
        let id = connection_id.to_owned();
        self.scheduler.schedule(connection_id, delay, move || {
            if let Some(inner) = weak.upgrade() {
                inner.start(&id, trigger);
            }
        });
    }

    /// Decide whether an unsolicited close earns a retry. Increments the
    /// attempt counter when it does.
    fn plan_retry(&self, entry: &mut ConnectionEntry) -> Option<Duration> {
        if !entry.should_reconnect {
            return None;
        }
        let id = entry.config.id.as_str();
        let policy = ReconnectPolicy::from_config(&entry.config);
        match policy.next_delay(entry.reconnect_attempts) {
            Some(delay) => {
                entry.reconnect_attempts += 1;
                #[allow(clippy::cast_possible_truncation)]
                let delay_ms = delay.as_millis() as u64;
                info!(
                    connection_id = id,
                    attempt = entry.reconnect_attempts,
                    max_attempts = policy.max_attempts,
                    delay_ms,
                    "scheduling reconnect"
                );
                increment(SOCKET_RETRIES_SCHEDULED_TOTAL, id);
                Some(delay)
            }
            None => {
                if policy.max_attempts > 0 {
                    warn!(
                        connection_id = id,
                        attempts = entry.reconnect_attempts,
                        "reconnect attempts exhausted"
                    );
                    increment(SOCKET_RETRIES_EXHAUSTED_TOTAL, id);
                }
                None
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

impl Inner {
    async fn run_session(
        self: Arc<Self>,
        config: Arc<ConnectionConfig>,
        epoch: u64,
        cancel: CancellationToken,
    ) {
        let id = config.id.as_str();
        let open = self
            .connector
            .open(&config, self.options.outbound_buffer);
        let opened = match config.connect_timeout() {
            Some(limit) => match tokio::time::timeout(limit, open).await {
                Ok(result) => result,
                Err(_) => Err(SocketError::OpenTimeout {
                    url: config.url.clone(),
                    timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                }),
            },
            None => open.await,
        };

        let mut inbound = match opened {
            Ok(OpenedTransport { outbound, inbound }) => {
                if !self.on_opened(id, epoch, outbound) {
                    return;
                }
                inbound
            }
            Err(e) => {
                self.on_open_failed(id, epoch, &e);
                return;
            }
        };

        let reason = loop {
            tokio::select! {
                () = cancel.cancelled() => break None,
                event = inbound.recv() => match event {
                    Some(TransportEvent::Frame(frame)) => self.on_frame(id, epoch, &frame),
                    Some(TransportEvent::Error(error)) => self.on_transport_error(id, epoch, &error),
                    Some(TransportEvent::Closed(reason)) => break reason,
                    None => break None,
                },
            }
        };
        self.on_closed(id, epoch, reason.as_deref());
    }

    fn on_opened(&self, id: &str, epoch: u64, outbound: mpsc::Sender<OutboundFrame>) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.connections.get_mut(id) else {
            debug!(connection_id = id, "open completed for removed connection, closing");
            return false;
        };
        if entry.epoch != epoch {
            debug!(connection_id = id, "open completed for stale session, closing");
            return false;
        }
        if entry.status != ConnectionStatus::Connecting {
            debug!(connection_id = id, status = %entry.status, "open completed after disconnect, closing");
            entry.status = ConnectionStatus::Closed;
            entry.session = None;
            self.publish(entry);
            return false;
        }

        entry.status = ConnectionStatus::Open;
        entry.reconnect_attempts = 0;
        entry.transport = Some(outbound);
        self.publish(entry);
        drop(state);

        info!(connection_id = id, "connection open");
        increment(SOCKET_OPENS_TOTAL, id);
        self.handler.on_open(id);
        true
    }

    fn on_open_failed(self: &Arc<Self>, id: &str, epoch: u64, error: &SocketError) {
        let message = error.to_string();
        let mut state = self.state.lock();
        let Some(entry) = state.connections.get_mut(id) else {
            return;
        };
        if entry.epoch != epoch {
            debug!(connection_id = id, error = %message, "stale open failure ignored");
            return;
        }
        let unsolicited = entry.status == ConnectionStatus::Connecting;
        entry.status = ConnectionStatus::Closed;
        entry.last_error = Some(message.clone());
        entry.transport = None;
        entry.session = None;
        let retry = if unsolicited {
            self.plan_retry(entry)
        } else {
            None
        };
        self.publish(entry);
        if let Some(delay) = retry {
            self.schedule_start(id, delay, Trigger::Retry);
        }
        drop(state);

        warn!(connection_id = id, error = %message, "connection open failed");
        increment(SOCKET_OPEN_FAILURES_TOTAL, id);
        self.handler.on_error(id, &message);
        self.handler.on_close(id, Some(&message));
    }

    fn on_frame(&self, id: &str, epoch: u64, frame: &str) {
        {
            let state = self.state.lock();
            match state.connections.get(id) {
                Some(entry) if entry.epoch == epoch && entry.status == ConnectionStatus::Open => {}
                _ => return,
            }
        }
        let _ = self.router.dispatch(id, frame);
        self.handler.on_message(id, frame);
    }

    fn on_transport_error(&self, id: &str, epoch: u64, error: &str) {
        {
            let mut state = self.state.lock();
            let Some(entry) = state.connections.get_mut(id) else {
                return;
            };
            if entry.epoch != epoch {
                return;
            }
            entry.last_error = Some(error.to_owned());
            self.publish(entry);
        }
        warn!(connection_id = id, error, "transport error");
        self.handler.on_error(id, error);
    }

    fn on_closed(self: &Arc<Self>, id: &str, epoch: u64, reason: Option<&str>) {
        let mut state = self.state.lock();
        let Some(entry) = state.connections.get_mut(id) else {
            return;
        };
        if entry.epoch != epoch || entry.status == ConnectionStatus::Closed {
            debug!(connection_id = id, "stale close ignored");
            return;
        }
        let unsolicited = entry.status == ConnectionStatus::Open;
        entry.status = ConnectionStatus::Closed;
        entry.transport = None;
        entry.session = None;
        let retry = if unsolicited {
            self.plan_retry(entry)
        } else {
            None
        };
        self.publish(entry);
        if let Some(delay) = retry {
            self.schedule_start(id, delay, Trigger::Retry);
        }
        drop(state);

        if unsolicited {
            info!(connection_id = id, reason = reason.unwrap_or(""), "connection closed by remote");
            increment(SOCKET_UNSOLICITED_CLOSES_TOTAL, id);
        } else {
            info!(connection_id = id, "connection closed");
        }
        self.handler.on_close(id, reason);
    }
}
