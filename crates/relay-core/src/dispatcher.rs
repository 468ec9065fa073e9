//! Fan-out of a single message to the current membership.
//!
//! The dispatcher is not a task of its own: the registry calls
//! [`fan_out`] from inside its event step, so the membership it iterates
//! is the same snapshot that joins and leaves mutate.
//!
//! Delivery is best-effort per destination:
//! - the sender never receives its own payload,
//! - a full destination queue drops the payload (reported, not retried),
//! - a closed destination, or one over the policy's drop limit, is
//!   returned as an eviction candidate for the registry to remove.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionId, EnqueueOutcome};
use crate::events::Message;
use crate::policy::BackpressurePolicy;

/// What happened while fanning out one message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanOutReport {
    /// Destinations that got the payload queued.
    pub queued: usize,

    /// Destinations whose queue was full.
    pub dropped: usize,

    /// Destinations whose queue was already closed.
    pub closed: usize,

    /// Destinations the registry should evict.
    pub evict: Vec<ConnectionId>,
}

impl FanOutReport {
    /// Total destinations considered (everyone but the sender).
    pub fn destinations(&self) -> usize {
        self.queued + self.dropped + self.closed
    }
}

/// Enqueue `message.payload` on every member except `message.sender`.
///
/// Iteration order is unspecified.
pub fn fan_out(
    members: &mut HashMap<ConnectionId, Connection>,
    message: &Message,
    policy: &BackpressurePolicy,
) -> FanOutReport {
    let mut report = FanOutReport::default();

    for (id, conn) in members.iter_mut() {
        if *id == message.sender {
            continue;
        }

        match conn.enqueue(message.payload.clone()) {
            EnqueueOutcome::Queued => report.queued += 1,
            EnqueueOutcome::Dropped => {
                report.dropped += 1;
                warn!(
                    conn_id = %id,
                    from = %message.sender,
                    consecutive = conn.consecutive_drops(),
                    "outbound queue full, dropping message"
                );
                if policy.should_evict(conn.consecutive_drops()) {
                    report.evict.push(*id);
                }
            }
            EnqueueOutcome::Closed => {
                report.closed += 1;
                debug!(conn_id = %id, "outbound queue closed, skipping");
                report.evict.push(*id);
            }
        }
    }

    report
}
