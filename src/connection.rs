//! Connection struct definition
//!
//! Represents one live client channel: its lifecycle state and a bounded
//! outbound queue (the outbox) drained by a single writer task.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tracing::{debug, warn};

use crate::error::{RelayError, TransportError};
use crate::types::{ConnectionId, Envelope, Payload};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepting new outbound messages
    Open,
    /// Flushing the outbox before closing; new messages are refused
    Draining,
    /// Terminal
    Closed,
}

/// What to do when a send hits a full outbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest pending message to make room
    #[default]
    DropOldest,
    /// Keep the outbox as is and refuse the new message
    RejectNew,
}

impl OverflowPolicy {
    /// Name as accepted by `FromStr`
    pub fn as_str(&self) -> &'static str {
        match self {
            OverflowPolicy::DropOldest => "drop_oldest",
            OverflowPolicy::RejectNew => "reject_new",
        }
    }
}

impl FromStr for OverflowPolicy {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drop_oldest" | "drop-oldest" => Ok(Self::DropOldest),
            "reject_new" | "reject-new" => Ok(Self::RejectNew),
            other => Err(RelayError::InvalidConfig(format!(
                "unknown overflow policy: {}",
                other
            ))),
        }
    }
}

/// Why a connection was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Client went away or close was requested
    Normal,
    /// Transport read or write failed
    TransportError,
    /// Dropped-message count went past the configured threshold
    Overflow,
    /// Graceful drain did not finish in time
    DrainTimeout,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            CloseReason::Normal => "normal",
            CloseReason::TransportError => "transport error",
            CloseReason::Overflow => "outbox overflow",
            CloseReason::DrainTimeout => "drain timeout",
        };
        f.write_str(reason)
    }
}

/// Result of a single `send`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Enqueued without loss
    Queued,
    /// Enqueued after evicting the oldest pending message
    DroppedOldest,
    /// Outbox full under `RejectNew`; message discarded
    Rejected,
    /// Connection is draining or closed; message discarded
    Closed,
}

impl SendOutcome {
    /// Whether the message ended up in the outbox
    pub fn is_delivered(&self) -> bool {
        matches!(self, SendOutcome::Queued | SendOutcome::DroppedOldest)
    }
}

/// Outbox sizing and backpressure settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxConfig {
    /// Maximum number of pending messages
    pub capacity: usize,
    pub policy: OverflowPolicy,
    /// Close the connection once more than this many messages were dropped
    pub max_dropped: Option<u64>,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            policy: OverflowPolicy::DropOldest,
            max_dropped: None,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    outbox: VecDeque<Arc<Envelope>>,
}

/// One live client channel
///
/// `send` may be called concurrently from any number of broadcasts; the
/// outbox is consumed by exactly one writer through `next_outbound`.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    config: OutboxConfig,
    inner: Mutex<Inner>,
    dropped: AtomicU64,
    /// Wakes the writer on enqueue and on state changes
    writer: Notify,
    /// Mirrors `Inner::state` for async waiters
    state_tx: watch::Sender<ConnectionState>,
}

impl Connection {
    /// Create a new open connection
    pub fn new(id: ConnectionId, config: OutboxConfig) -> Self {
        let config = OutboxConfig {
            capacity: config.capacity.max(1),
            ..config
        };
        let (state_tx, _) = watch::channel(ConnectionState::Open);
        Self {
            id,
            config,
            inner: Mutex::new(Inner {
                state: ConnectionState::Open,
                outbox: VecDeque::with_capacity(config.capacity),
            }),
            dropped: AtomicU64::new(0),
            writer: Notify::new(),
            state_tx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// Number of messages lost to backpressure so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().outbox.len()
    }

    /// Copy of the pending outbox, oldest first
    pub fn pending(&self) -> Vec<Arc<Envelope>> {
        self.inner.lock().outbox.iter().cloned().collect()
    }

    /// Enqueue a message for delivery
    ///
    /// Never blocks. A full outbox is handled by the configured
    /// `OverflowPolicy`. A send that pushes the dropped count past
    /// `max_dropped` closes the connection and reports `Closed`.
    pub fn send(&self, envelope: Arc<Envelope>) -> SendOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Open {
                return SendOutcome::Closed;
            }

            if inner.outbox.len() < self.config.capacity {
                inner.outbox.push_back(envelope);
                SendOutcome::Queued
            } else {
                match self.config.policy {
                    OverflowPolicy::DropOldest => {
                        inner.outbox.pop_front();
                        inner.outbox.push_back(envelope);
                        SendOutcome::DroppedOldest
                    }
                    OverflowPolicy::RejectNew => SendOutcome::Rejected,
                }
            }
        };

        if outcome.is_delivered() {
            self.writer.notify_one();
        }

        if outcome != SendOutcome::Queued {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!("Outbox of {} full, {} dropped so far", self.id, dropped);

            if let Some(limit) = self.config.max_dropped {
                if dropped > limit {
                    warn!(
                        "Connection {} dropped {} messages (limit {}), closing",
                        self.id, dropped, limit
                    );
                    self.close(CloseReason::Overflow);
                    // The close discarded the outbox, this message included
                    return SendOutcome::Closed;
                }
            }
        }

        outcome
    }

    /// Wrap the transport's inbound stream
    ///
    /// The returned stream ends when the transport ends or when this
    /// connection is closed, whichever happens first.
    pub fn receive<'a, S>(
        &'a self,
        inbound: S,
    ) -> impl Stream<Item = Result<Payload, TransportError>> + Unpin + Send + 'a
    where
        S: Stream<Item = Result<Payload, TransportError>> + Unpin + Send + 'a,
    {
        inbound.take_until(Box::pin(self.closed()))
    }

    /// Next message for the writer, in FIFO order
    ///
    /// Returns `None` once the connection is closed. While draining, an
    /// empty outbox completes the drain and closes the connection.
    pub async fn next_outbound(&self) -> Option<Arc<Envelope>> {
        loop {
            let (next, state) = {
                let mut inner = self.inner.lock();
                (inner.outbox.pop_front(), inner.state)
            };

            if let Some(envelope) = next {
                return Some(envelope);
            }

            match state {
                ConnectionState::Open => self.writer.notified().await,
                ConnectionState::Draining => {
                    self.close(CloseReason::Normal);
                    return None;
                }
                ConnectionState::Closed => return None,
            }
        }
    }

    /// Close the connection and discard anything still pending
    ///
    /// Idempotent: returns `true` only for the call that performed the
    /// transition.
    pub fn close(&self, reason: CloseReason) -> bool {
        let discarded = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Closed {
                return false;
            }
            inner.state = ConnectionState::Closed;
            let discarded = inner.outbox.len();
            inner.outbox.clear();
            discarded
        };

        self.state_tx.send_replace(ConnectionState::Closed);
        self.writer.notify_one();

        debug!(
            "Connection {} closed ({}), {} pending discarded",
            self.id, reason, discarded
        );
        true
    }

    /// Gracefully close: let the writer flush the outbox first
    ///
    /// Resolves once the connection is closed, forcing the close when
    /// `timeout` elapses.
    pub async fn drain(&self, timeout: Duration) {
        let state = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Open && !inner.outbox.is_empty() {
                inner.state = ConnectionState::Draining;
            }
            inner.state
        };

        match state {
            ConnectionState::Closed => return,
            // Nothing pending
            ConnectionState::Open => {
                self.close(CloseReason::Normal);
                return;
            }
            ConnectionState::Draining => {
                // The writer may already have closed us; never overwrite Closed
                self.state_tx.send_if_modified(|state| {
                    if *state == ConnectionState::Open {
                        *state = ConnectionState::Draining;
                        true
                    } else {
                        false
                    }
                });
                self.writer.notify_one();
            }
        }

        if tokio::time::timeout(timeout, self.closed()).await.is_err() {
            self.close(CloseReason::DrainTimeout);
        }
    }

    /// Resolves when the connection reaches `Closed`
    pub async fn closed(&self) {
        let mut rx = self.state_tx.subscribe();
        loop {
            if *rx.borrow_and_update() == ConnectionState::Closed {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}
