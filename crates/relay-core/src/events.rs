//! Events flowing into the registry.
//!
//! Every membership change and every message goes through one ordered
//! intake, so the registry sees a single consistent sequence:
//! - [`RelayEvent::Join`] / [`RelayEvent::Leave`]: lifecycle of a connection.
//! - [`RelayEvent::Message`]: a payload to fan out to everybody else.
//! - [`RelayEvent::Snapshot`]: read-only query answered in order.

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::connection::{Connection, ConnectionId};
use crate::registry::RegistrySnapshot;

/// A payload received from `sender`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: ConnectionId,
    pub payload: Bytes,
}

impl Message {
    pub fn new(sender: ConnectionId, payload: impl Into<Bytes>) -> Self {
        Message {
            sender,
            payload: payload.into(),
        }
    }
}

#[derive(Debug)]
pub enum RelayEvent {
    /// Admit a new connection.
    Join(Connection),

    /// Evict a connection; duplicates are harmless.
    Leave(ConnectionId),

    /// Fan a payload out to every member except its sender.
    Message(Message),

    /// Reply with the current membership and counters.
    Snapshot(oneshot::Sender<RegistrySnapshot>),
}
