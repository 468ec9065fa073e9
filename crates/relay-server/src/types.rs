//! Shared types for the relay server.
//!
//! This module defines the channel aliases between connection
//! supervisors and the registry task. Every supervisor holds an
//! `IntakeTx`; the registry task owns the single `IntakeRx`.

use relay_core::RelayEvent;
use tokio::sync::mpsc;

/// Channel from supervisors → registry task.
///
/// Unbounded so a leave can always be sent without awaiting,
/// including from `Drop`.
pub type IntakeTx = mpsc::UnboundedSender<RelayEvent>;
pub type IntakeRx = mpsc::UnboundedReceiver<RelayEvent>;

/// Create the registry intake channel.
pub fn intake_channel() -> (IntakeTx, IntakeRx) {
    mpsc::unbounded_channel()
}
