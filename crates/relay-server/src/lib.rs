//! relay-server
//!
//! Multi-client async server for the single-room message relay.
//! Every message a client sends is delivered to every other client.

pub mod config;
pub mod server;
pub mod supervisor;
pub mod transport;
pub mod types;

// internal module, not re-exported
mod registry_task;

pub use server::Relay;
