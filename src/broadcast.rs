//! Broadcast fanout
//!
//! Delivers one sequenced message to every connection in a registry
//! snapshot. Delivery is best-effort per connection: a full or closed
//! outbox is counted, never propagated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::connection::SendOutcome;
use crate::registry::Registry;
use crate::types::{Envelope, Message};

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sequence number assigned to the message
    pub sequence: u64,
    /// Connections a send was attempted on
    pub recipients: usize,
    /// Sends that enqueued without loss
    pub queued: usize,
    /// Sends that enqueued after evicting an older message
    pub dropped_oldest: usize,
    /// Sends refused by a full `RejectNew` outbox
    pub rejected: usize,
    /// Sends refused because the connection was draining or closed
    pub closed: usize,
}

impl BroadcastReport {
    /// Connections that ended up with the message in their outbox
    pub fn delivered(&self) -> usize {
        self.queued + self.dropped_oldest
    }

    /// Connections that did not get the message
    pub fn failures(&self) -> usize {
        self.rejected + self.closed
    }

    pub fn is_partial_failure(&self) -> bool {
        self.failures() > 0
    }

    fn record(&mut self, outcome: SendOutcome) {
        self.recipients += 1;
        match outcome {
            SendOutcome::Queued => self.queued += 1,
            SendOutcome::DroppedOldest => self.dropped_oldest += 1,
            SendOutcome::Rejected => self.rejected += 1,
            SendOutcome::Closed => self.closed += 1,
        }
    }
}

/// Cumulative broadcast counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    pub messages: u64,
    pub deliveries: u64,
    pub dropped_oldest: u64,
    pub failures: u64,
    pub partial_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    messages: AtomicU64,
    deliveries: AtomicU64,
    dropped_oldest: AtomicU64,
    failures: AtomicU64,
    partial_failures: AtomicU64,
}

/// Assigns sequence numbers and fans messages out
///
/// Safe to call concurrently; each call enqueues on the connections of
/// its own snapshot in snapshot order.
#[derive(Debug, Default)]
pub struct Broadcaster {
    sequence: AtomicU64,
    counters: Counters,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `message` to every connection currently in `registry`
    ///
    /// When `exclude_sender` is set, the connection matching
    /// `message.sender` is skipped.
    pub fn broadcast(
        &self,
        registry: &Registry,
        message: Message,
        exclude_sender: bool,
    ) -> BroadcastReport {
        let snapshot = registry.snapshot();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let envelope = Arc::new(Envelope::new(sequence, message));

        let mut report = BroadcastReport {
            sequence,
            ..Default::default()
        };

        for connection in &snapshot {
            if exclude_sender && envelope.sender == Some(connection.id()) {
                continue;
            }
            let outcome = connection.send(envelope.clone());
            if !outcome.is_delivered() {
                debug!(
                    "Message #{} not delivered to {}: {:?}",
                    sequence,
                    connection.id(),
                    outcome
                );
            }
            report.record(outcome);
        }

        self.counters.messages.fetch_add(1, Ordering::Relaxed);
        self.counters
            .deliveries
            .fetch_add(report.delivered() as u64, Ordering::Relaxed);
        self.counters
            .dropped_oldest
            .fetch_add(report.dropped_oldest as u64, Ordering::Relaxed);

        if report.is_partial_failure() {
            self.counters
                .failures
                .fetch_add(report.failures() as u64, Ordering::Relaxed);
            self.counters.partial_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Broadcast #{} partially failed: {} of {} connections missed it",
                sequence,
                report.failures(),
                report.recipients
            );
        } else {
            debug!(
                "Broadcast #{} delivered to {} connections",
                sequence,
                report.delivered()
            );
        }

        report
    }

    /// Current counter values
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages: self.counters.messages.load(Ordering::Relaxed),
            deliveries: self.counters.deliveries.load(Ordering::Relaxed),
            dropped_oldest: self.counters.dropped_oldest.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            partial_failures: self.counters.partial_failures.load(Ordering::Relaxed),
        }
    }
}
