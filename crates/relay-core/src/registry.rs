//! Live connection registry.
//!
//! The registry is the single authority over which connections are
//! members of the room. It is a plain state machine: the server drives
//! it from one task, feeding it [`RelayEvent`]s in arrival order, so no
//! lock is ever taken on the membership set.
//!
//! Per connection the lifecycle is `unregistered -> registered ->
//! unregistered`, and the last state is terminal since ids are never
//! reused.

use std::collections::HashMap;

use tracing::{debug, error, info};

use crate::connection::{Connection, ConnectionId};
use crate::dispatcher::{self, FanOutReport};
use crate::error::RegistryError;
use crate::events::{Message, RelayEvent};
use crate::policy::BackpressurePolicy;

/// Running counters kept by the registry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub joined: u64,
    pub left: u64,
    /// Removed by the slow-consumer policy or because their queue closed.
    pub evicted: u64,
    pub messages: u64,
    /// Messages from senders that were no longer members.
    pub orphan_messages: u64,
    pub queued: u64,
    pub dropped: u64,
}

/// Point-in-time view of the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
    /// Member ids, ascending.
    pub members: Vec<ConnectionId>,
    pub stats: RelayStats,
}

#[derive(Debug, Default)]
pub struct Registry {
    members: HashMap<ConnectionId, Connection>,
    policy: BackpressurePolicy,
    stats: RelayStats,
}

impl Registry {
    pub fn new(policy: BackpressurePolicy) -> Self {
        Registry {
            members: HashMap::new(),
            policy,
            stats: RelayStats::default(),
        }
    }

    pub fn policy(&self) -> &BackpressurePolicy {
        &self.policy
    }

    /// Process one event from the intake.
    pub fn handle(&mut self, event: RelayEvent) -> Result<(), RegistryError> {
        match event {
            RelayEvent::Join(conn) => self.on_join(conn)?,
            RelayEvent::Leave(id) => {
                self.on_leave(id);
            }
            RelayEvent::Message(msg) => {
                self.on_message(&msg);
            }
            RelayEvent::Snapshot(reply) => {
                // Asker may have given up; nothing to do then.
                let _ = reply.send(self.snapshot());
            }
        }
        Ok(())
    }

    /// Admit a connection.
    ///
    /// A second join for an id that is already present is a logic error
    /// upstream; the existing member is kept and the duplicate is closed.
    pub fn on_join(&mut self, mut conn: Connection) -> Result<(), RegistryError> {
        let id = conn.id();
        if self.members.contains_key(&id) {
            error!(conn_id = %id, "duplicate join rejected");
            conn.close();
            return Err(RegistryError::AlreadyRegistered(id));
        }

        self.members.insert(id, conn);
        self.stats.joined += 1;
        info!(conn_id = %id, live = self.members.len(), "connection joined");
        Ok(())
    }

    /// Remove a connection and close its outbound queue.
    ///
    /// Returns `false` when the id was not a member, which is expected
    /// when both of a connection's loops report the same failure.
    pub fn on_leave(&mut self, id: ConnectionId) -> bool {
        match self.members.remove(&id) {
            Some(mut conn) => {
                conn.close();
                self.stats.left += 1;
                info!(
                    conn_id = %id,
                    live = self.members.len(),
                    dropped = conn.total_drops(),
                    "connection left"
                );
                true
            }
            None => {
                debug!(conn_id = %id, "leave for unknown connection ignored");
                false
            }
        }
    }

    /// Fan a message out to every member except its sender.
    ///
    /// Messages from a sender that already left are discarded, so nothing
    /// from a connection is relayed after its leave was processed.
    pub fn on_message(&mut self, msg: &Message) -> FanOutReport {
        if !self.members.contains_key(&msg.sender) {
            self.stats.orphan_messages += 1;
            debug!(conn_id = %msg.sender, "message from non-member discarded");
            return FanOutReport::default();
        }

        self.stats.messages += 1;
        let report = dispatcher::fan_out(&mut self.members, msg, &self.policy);
        self.stats.queued += report.queued as u64;
        self.stats.dropped += report.dropped as u64;

        for id in &report.evict {
            self.evict(*id);
        }

        report
    }

    fn evict(&mut self, id: ConnectionId) {
        if let Some(mut conn) = self.members.remove(&id) {
            conn.close();
            self.stats.evicted += 1;
            info!(
                conn_id = %id,
                live = self.members.len(),
                consecutive_drops = conn.consecutive_drops(),
                "connection evicted"
            );
        }
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member ids, ascending.
    pub fn members(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.members.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            members: self.members(),
            stats: self.stats,
        }
    }
}
