//! Fixed-interval reconnect timers.
//!
//! - [`ReconnectPolicy`]: interval and attempt cap for one connection
//! - [`ReconnectScheduler`]: at most one armed timer per connection id
//!
//! Arming a timer for an id that already has one aborts the old timer, and a
//! timer only runs its action if it is still the armed one when it wakes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use pulse_core::ConnectionConfig;
use tokio::task::JoinHandle;
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

/// Retry policy for one connection: a constant interval and a hard cap.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before each automatic attempt.
    pub interval: Duration,
    /// Automatic attempts allowed per cycle. `0` disables retries.
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Policy taken from a connection config.
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            interval: config.reconnect_interval(),
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay before the next attempt, or `None` once `attempts_made` reached
    /// the cap.
    pub fn next_delay(&self, attempts_made: u32) -> Option<Duration> {
        (attempts_made < self.max_attempts).then_some(self.interval)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler
// ─────────────────────────────────────────────────────────────────────────────

struct PendingTimer {
    ticket: u64,
    handle: JoinHandle<()>,
}

/// Per-connection one-shot timers.
pub struct ReconnectScheduler {
    pending: Mutex<HashMap<String, PendingTimer>>,
    next_ticket: AtomicU64,
}

impl ReconnectScheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(0),
        }
    }

    /// Run `action` after `delay`, replacing any timer already armed for
    /// `connection_id`.
    pub fn schedule<F>(self: &Arc<Self>, connection_id: &str, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let weak: Weak<Self> = Arc::downgrade(self);
        let key = connection_id.to_owned();

        // Hold the lock across spawn so the timer cannot look itself up before
        // it has been inserted.
        let mut pending = self.pending.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(scheduler) = weak.upgrade() else {
                return;
            };
            if scheduler.take_if_current(&key, ticket) {
                debug!(connection_id = %key, "reconnect timer fired");
                action();
            }
        });
        let previous = pending.insert(connection_id.to_owned(), PendingTimer { ticket, handle });
        drop(pending);

        if let Some(previous) = previous {
            debug!(connection_id, "replacing armed reconnect timer");
            previous.handle.abort();
        }
        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.as_millis() as u64;
        debug!(connection_id, delay_ms, "reconnect timer armed");
    }

    /// Disarm the timer for `connection_id`. Returns whether one was armed.
    pub fn cancel(&self, connection_id: &str) -> bool {
        let removed = self.pending.lock().remove(connection_id);
        match removed {
            Some(timer) => {
                timer.handle.abort();
                debug!(connection_id, "reconnect timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Disarm every timer.
    pub fn cancel_all(&self) {
        let drained: Vec<PendingTimer> = self.pending.lock().drain().map(|(_, t)| t).collect();
        for timer in drained {
            timer.handle.abort();
        }
    }

    /// Whether a timer is armed for `connection_id`.
    pub fn is_pending(&self, connection_id: &str) -> bool {
        self.pending.lock().contains_key(connection_id)
    }

    /// Number of armed timers.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn take_if_current(&self, connection_id: &str, ticket: u64) -> bool {
        let mut pending = self.pending.lock();
        match pending.get(connection_id) {
            Some(timer) if timer.ticket == ticket => {
                let _ = pending.remove(connection_id);
                true
            }
            _ => false,
        }
    }
}

impl Default for ReconnectScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ReconnectScheduler {
    fn drop(&mut self) {
        for (_, timer) in self.pending.get_mut().drain() {
            timer.handle.abort();
        }
    }
}
