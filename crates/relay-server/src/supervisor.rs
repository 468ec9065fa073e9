//! Per-connection supervisor.
//!
//! Each connection gets two loops:
//! - the read loop (in the supervisor task) turns inbound frames into
//!   `RelayEvent::Message`s for the registry;
//! - the write loop (its own task) drains the connection's outbound
//!   queue into the transport.
//!
//! Whichever loop stops first fires the connection's [`Teardown`]: one
//! `RelayEvent::Leave` is sent and the other loop is cancelled. The
//! write loop owns the sink and closes it after it exits, so the
//! transport is closed exactly once no matter which side failed.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use relay_core::{Connection, ConnectionId, Drain, Message, RelayEvent};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::transport::{FrameSink, FrameSource};
use crate::types::IntakeTx;

/// Upper bound on flushing and closing a sink during teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a connection was torn down. The first reported reason wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Peer ended its stream cleanly.
    PeerClosed,
    ReadFailed(String),
    WriteFailed(String),
    /// The registry closed the outbound queue (eviction), possibly while
    /// a write to a stalled peer was still pending.
    QueueClosed,
    /// The registry task is gone.
    RegistryGone,
    /// A loop ended without reporting, e.g. its task was aborted.
    Aborted(&'static str),
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::PeerClosed => f.write_str("peer closed"),
            ExitReason::ReadFailed(e) => write!(f, "read failed: {e}"),
            ExitReason::WriteFailed(e) => write!(f, "write failed: {e}"),
            ExitReason::QueueClosed => f.write_str("outbound queue closed"),
            ExitReason::RegistryGone => f.write_str("registry gone"),
            ExitReason::Aborted(side) => write!(f, "{side} loop aborted"),
        }
    }
}

/// Summary returned when both loops are done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorExit {
    pub conn_id: ConnectionId,
    pub reason: ExitReason,
    pub frames_read: u64,
    pub frames_written: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("registry is not running")]
pub struct RegistryClosed;

/// Exactly-once teardown shared by a connection's two loops.
pub struct Teardown {
    conn_id: ConnectionId,
    intake: IntakeTx,
    cancel: CancellationToken,
    reason: OnceLock<ExitReason>,
}

impl Teardown {
    pub fn new(conn_id: ConnectionId, intake: IntakeTx) -> Self {
        Teardown {
            conn_id,
            intake,
            cancel: CancellationToken::new(),
            reason: OnceLock::new(),
        }
    }

    /// Send the leave event and cancel both loops. Only the first call acts.
    pub fn trigger(&self, reason: ExitReason) {
        if self.reason.set(reason).is_err() {
            return;
        }
        debug!(conn_id = %self.conn_id, reason = ?self.reason.get(), "teardown");
        if self.intake.send(RelayEvent::Leave(self.conn_id)).is_err() {
            debug!(conn_id = %self.conn_id, "registry gone, leave not delivered");
        }
        self.cancel.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.reason.get().is_some()
    }

    pub fn reason(&self) -> Option<&ExitReason> {
        self.reason.get()
    }
}

/// One loop's hold on the teardown; dropping it without a report
/// still tears the connection down.
struct LoopGuard {
    teardown: Arc<Teardown>,
    side: &'static str,
}

impl LoopGuard {
    fn trigger(&self, reason: ExitReason) {
        self.teardown.trigger(reason);
    }

    async fn cancelled(&self) {
        self.teardown.cancel.cancelled().await
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.teardown.trigger(ExitReason::Aborted(self.side));
    }
}

/// Admit a new connection: allocate its id, emit the join and spawn
/// its supervisor.
pub fn start<R, W>(
    source: R,
    sink: W,
    intake: &IntakeTx,
    queue_capacity: usize,
) -> Result<(ConnectionId, JoinHandle<SupervisorExit>), RegistryClosed>
where
    R: FrameSource + 'static,
    W: FrameSink + 'static,
{
    let conn_id = ConnectionId::next();
    let (conn, drain) = Connection::new(conn_id, queue_capacity);

    // The join is queued before any of this connection's messages can be.
    intake
        .send(RelayEvent::Join(conn))
        .map_err(|_| RegistryClosed)?;

    let handle = tokio::spawn(supervise(conn_id, source, sink, drain, intake.clone()));
    Ok((conn_id, handle))
}

/// Run both loops of an already joined connection until teardown.
pub async fn supervise<R, W>(
    conn_id: ConnectionId,
    mut source: R,
    sink: W,
    drain: Drain,
    intake: IntakeTx,
) -> SupervisorExit
where
    R: FrameSource,
    W: FrameSink + 'static,
{
    let teardown = Arc::new(Teardown::new(conn_id, intake.clone()));

    let writer = tokio::spawn(write_loop(
        conn_id,
        sink,
        drain,
        LoopGuard {
            teardown: Arc::clone(&teardown),
            side: "write",
        },
    ));

    let frames_read = read_loop(
        conn_id,
        &mut source,
        &intake,
        LoopGuard {
            teardown: Arc::clone(&teardown),
            side: "read",
        },
    )
    .await;

    let frames_written = match writer.await {
        Ok(n) => n,
        Err(e) => {
            warn!(conn_id = %conn_id, error = %e, "write loop panicked");
            0
        }
    };

    let reason = teardown
        .reason()
        .cloned()
        .unwrap_or(ExitReason::Aborted("supervisor"));

    info!(
        conn_id = %conn_id,
        reason = %reason,
        frames_read,
        frames_written,
        "connection closed"
    );

    SupervisorExit {
        conn_id,
        reason,
        frames_read,
        frames_written,
    }
}

async fn read_loop<R: FrameSource>(
    conn_id: ConnectionId,
    source: &mut R,
    intake: &IntakeTx,
    guard: LoopGuard,
) -> u64 {
    let mut frames = 0u64;

    let reason = loop {
        tokio::select! {
            biased;

            _ = guard.cancelled() => break None,

            res = source.read_frame() => match res {
                Ok(Some(payload)) => {
                    frames += 1;
                    let event = RelayEvent::Message(Message { sender: conn_id, payload });
                    if intake.send(event).is_err() {
                        break Some(ExitReason::RegistryGone);
                    }
                }
                Ok(None) => break Some(ExitReason::PeerClosed),
                Err(e) => {
                    debug!(conn_id = %conn_id, error = %e, "read failed");
                    break Some(ExitReason::ReadFailed(e.to_string()));
                }
            },
        }
    };

    if let Some(reason) = reason {
        guard.trigger(reason);
    }
    frames
}

async fn write_loop<W: FrameSink>(
    conn_id: ConnectionId,
    mut sink: W,
    mut drain: Drain,
    guard: LoopGuard,
) -> u64 {
    let mut frames = 0u64;

    let reason = loop {
        tokio::select! {
            biased;

            _ = guard.cancelled() => break None,

            next = drain.next() => match next {
                Some(payload) => {
                    // A write that completes right away wins, so backlog
                    // still flushes to a healthy peer after the queue closed.
                    tokio::select! {
                        biased;

                        res = sink.write_frame(payload) => match res {
                            Ok(()) => frames += 1,
                            Err(e) => {
                                debug!(conn_id = %conn_id, error = %e, "write failed");
                                break Some(ExitReason::WriteFailed(e.to_string()));
                            }
                        },

                        _ = guard.cancelled() => break None,

                        _ = drain.closed() => {
                            debug!(conn_id = %conn_id, "evicted while a write was pending");
                            break Some(ExitReason::QueueClosed);
                        }
                    }
                }
                None => break Some(ExitReason::QueueClosed),
            },
        }
    };

    if let Some(reason) = reason {
        guard.trigger(reason);
    }

    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(conn_id = %conn_id, error = %e, "close failed"),
        Err(_) => warn!(conn_id = %conn_id, "close timed out"),
    }

    frames
}
