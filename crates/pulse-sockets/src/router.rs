//! Keyed publish/subscribe for decoded inbound frames.
//!
//! Each frame that decodes as a `{type, ...}` envelope is published twice:
//! once on `(connection_id, type)` and once on the connection's wildcard
//! route. Topics are `tokio::sync::broadcast` channels created on first
//! subscription; publishing to a topic nobody subscribed to is free.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use pulse_core::RoutedMessage;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, warn};

use crate::metrics::{FRAMES_DROPPED_TOTAL, FRAMES_ROUTED_TOTAL, increment};

/// Default buffered messages per topic.
pub const DEFAULT_ROUTE_CAPACITY: usize = 1024;

/// Which messages of a connection a topic carries.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Route {
    /// Messages whose envelope `type` equals this string.
    Type(String),
    /// Every routed message.
    Any,
}

/// Topic identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RouteKey {
    /// Connection the messages arrive on.
    pub connection_id: String,
    /// Type filter.
    pub route: Route,
}

impl RouteKey {
    /// Key for one message type on one connection.
    pub fn typed(connection_id: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            route: Route::Type(message_type.into()),
        }
    }

    /// Wildcard key for one connection.
    pub fn any(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            route: Route::Any,
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.route {
            Route::Type(t) => write!(f, "{}:{t}", self.connection_id),
            Route::Any => write!(f, "{}:*", self.connection_id),
        }
    }
}

/// Receiving end of one topic.
pub struct Subscription {
    key: RouteKey,
    rx: broadcast::Receiver<Arc<RoutedMessage>>,
}

impl Subscription {
    /// Topic this subscription listens on.
    pub fn key(&self) -> &RouteKey {
        &self.key
    }

    /// Wait for the next message. Returns `None` once the topic is removed.
    ///
    /// A subscriber that falls more than the topic capacity behind skips the
    /// overwritten messages.
    pub async fn recv(&mut self) -> Option<Arc<RoutedMessage>> {
        loop {
            match self.rx.recv().await {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.key, skipped, "subscriber lagged, messages skipped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next message if one is buffered.
    pub fn try_recv(&mut self) -> Option<Arc<RoutedMessage>> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => return Some(message),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(topic = %self.key, skipped, "subscriber lagged, messages skipped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Routes decoded frames to subscribers.
pub struct MessageRouter {
    topics: RwLock<HashMap<RouteKey, broadcast::Sender<Arc<RoutedMessage>>>>,
    capacity: usize,
}

impl MessageRouter {
    /// Create a router whose topics buffer `capacity` messages each.
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to messages of `message_type` on `connection_id`.
    pub fn subscribe(&self, connection_id: &str, message_type: &str) -> Subscription {
        self.subscribe_key(RouteKey::typed(connection_id, message_type))
    }

    /// Subscribe to every routed message on `connection_id`.
    pub fn subscribe_all(&self, connection_id: &str) -> Subscription {
        self.subscribe_key(RouteKey::any(connection_id))
    }

    /// Subscribe to an explicit key.
    pub fn subscribe_key(&self, key: RouteKey) -> Subscription {
        let mut topics = self.topics.write();
        let rx = topics
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        debug!(topic = %key, "subscribed");
        Subscription { key, rx }
    }

    /// Decode `frame` and publish it. Undecodable frames are dropped and
    /// `None` is returned; the caller's connection is unaffected.
    pub fn dispatch(&self, connection_id: &str, frame: &str) -> Option<Arc<RoutedMessage>> {
        let message = match RoutedMessage::decode(connection_id, frame) {
            Ok(message) => Arc::new(message),
            Err(e) => {
                debug!(connection_id, error = %e, len = frame.len(), "dropping undecodable frame");
                increment(FRAMES_DROPPED_TOTAL, connection_id);
                return None;
            }
        };

        let typed = RouteKey::typed(connection_id, message.message_type.as_str());
        let any = RouteKey::any(connection_id);
        let topics = self.topics.read();
        let mut recipients = 0;
        for key in [&typed, &any] {
            if let Some(tx) = topics.get(key) {
                // Err only means no live receivers.
                if let Ok(n) = tx.send(message.clone()) {
                    recipients += n;
                }
            }
        }
        drop(topics);

        debug!(
            connection_id,
            message_type = %message.message_type,
            recipients,
            "frame routed"
        );
        increment(FRAMES_ROUTED_TOTAL, connection_id);
        Some(message)
    }

    /// Close every topic of `connection_id`. Subscribers see the end of
    /// their stream.
    pub fn remove_connection(&self, connection_id: &str) {
        let mut topics = self.topics.write();
        let before = topics.len();
        topics.retain(|key, _| key.connection_id != connection_id);
        let removed = before - topics.len();
        if removed > 0 {
            debug!(connection_id, removed, "topics closed");
        }
    }

    /// Close every topic.
    pub fn clear(&self) {
        self.topics.write().clear();
    }

    /// Number of topics with a sender, including ones whose subscribers have
    /// all gone away.
    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }

    /// Drop topics that no longer have subscribers. Returns how many went.
    pub fn prune(&self) -> usize {
        let mut topics = self.topics.write();
        let before = topics.len();
        topics.retain(|_, tx| tx.receiver_count() > 0);
        before - topics.len()
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new(DEFAULT_ROUTE_CAPACITY)
    }
}
