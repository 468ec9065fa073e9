//! Error types for the relay core.
//!
//! Normal relay traffic is infallible at this layer: full queues are a
//! policy outcome and unknown senders are ignored. The only error is a
//! logic violation by whoever feeds the registry.

use thiserror::Error;

use crate::connection::ConnectionId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A join arrived for an id that is already a member.
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),
}
