//! relay-core
//!
//! Pure relay logic, no networking:
//! - connections and their bounded outbound queues
//! - events flowing into the registry
//! - backpressure policy
//! - fan-out (dispatcher)
//! - the membership registry

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod policy;
pub mod registry;

pub use connection::{Connection, ConnectionId, Drain, EnqueueOutcome};
pub use dispatcher::{fan_out, FanOutReport};
pub use error::RegistryError;
pub use events::{Message, RelayEvent};
pub use policy::{BackpressurePolicy, DEFAULT_QUEUE_CAPACITY};
pub use registry::{Registry, RegistrySnapshot, RelayStats};
