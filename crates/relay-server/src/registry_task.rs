//! Central registry loop.
//!
//! This task owns the `Registry` and processes every `RelayEvent`
//! coming from connection supervisors, one at a time and in arrival
//! order. Joins, leaves and fan-out therefore never race: a message is
//! always fanned out against the membership as it stands after every
//! earlier event.

use relay_core::{Registry, RegistrySnapshot};
use tracing::{error, info};

use crate::types::IntakeRx;

/// Run the central registry processing loop.
///
/// Returns the final snapshot once every intake sender is gone.
pub async fn run_registry_loop(mut intake_rx: IntakeRx, mut registry: Registry) -> RegistrySnapshot {
    info!(
        queue_capacity = registry.policy().queue_capacity,
        evict_after_drops = ?registry.policy().evict_after_drops,
        "registry loop started"
    );

    while let Some(event) = intake_rx.recv().await {
        if let Err(e) = registry.handle(event) {
            // A supervisor bug; the offending join was refused, keep serving.
            error!(error = %e, "registry logic violation");
        }
    }

    let snapshot = registry.snapshot();
    info!(stats = ?snapshot.stats, "registry loop shutting down (intake closed)");
    snapshot
}
