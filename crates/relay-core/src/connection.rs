//! One relay participant as seen by the registry.
//!
//! A connection is split in two halves when it is created:
//! - [`Connection`]: held by the registry; owns the only sender of the
//!   bounded outbound queue and is used for fan-out targeting.
//! - [`Drain`]: held by the connection's write loop; yields queued
//!   payloads until the queue is closed.
//!
//! Closing the `Connection` drops the sender, so the `Drain` ends once
//! it has handed out everything that was already queued. It also fires
//! the drain's close signal, which lets a write loop stuck on a slow
//! transport give up without waiting for the queue to empty.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

/// Identifier for a connected client.
///
/// This is intentionally opaque; we just guarantee uniqueness
/// over the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Allocate a fresh id. Ids are never handed out twice.
    pub fn next() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Result of a non-blocking [`Connection::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Payload is waiting in the outbound queue.
    Queued,
    /// Queue was at capacity; the payload was discarded.
    Dropped,
    /// Queue is closed (connection closed or its write loop is gone).
    Closed,
}

/// Registry-side handle of a connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    outbound: Option<mpsc::Sender<Bytes>>,
    closed: CancellationToken,
    consecutive_drops: u32,
    total_drops: u64,
}

/// Write-loop side of a connection's outbound queue.
#[derive(Debug)]
pub struct Drain {
    id: ConnectionId,
    rx: mpsc::Receiver<Bytes>,
    closed: CancellationToken,
}

impl Connection {
    /// Create a connection with an outbound queue of `capacity` entries.
    ///
    /// A capacity of zero is treated as one (tokio channels need at
    /// least one slot).
    pub fn new(id: ConnectionId, capacity: usize) -> (Connection, Drain) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();
        let conn = Connection {
            id,
            outbound: Some(tx),
            closed: closed.clone(),
            consecutive_drops: 0,
            total_drops: 0,
        };
        (conn, Drain { id, rx, closed })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// `false` once [`close`](Self::close) ran or the write loop dropped its drain.
    pub fn is_live(&self) -> bool {
        self.outbound.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Number of drops since the last successful enqueue.
    pub fn consecutive_drops(&self) -> u32 {
        self.consecutive_drops
    }

    pub fn total_drops(&self) -> u64 {
        self.total_drops
    }

    /// Try to place `payload` on the outbound queue without waiting.
    ///
    /// A full queue drops the payload: one slow reader must never hold
    /// up delivery to anybody else.
    pub fn enqueue(&mut self, payload: Bytes) -> EnqueueOutcome {
        let Some(tx) = self.outbound.as_ref() else {
            return EnqueueOutcome::Closed;
        };

        match tx.try_send(payload) {
            Ok(()) => {
                self.consecutive_drops = 0;
                EnqueueOutcome::Queued
            }
            Err(TrySendError::Full(_)) => {
                self.consecutive_drops = self.consecutive_drops.saturating_add(1);
                self.total_drops += 1;
                EnqueueOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }

    /// Close the outbound queue and signal the drain. Idempotent.
    pub fn close(&mut self) {
        self.outbound = None;
        self.closed.cancel();
    }
}

impl Drain {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Wait for the next queued payload.
    ///
    /// Returns `None` once the queue is closed and empty.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Take the next payload if one is already queued.
    pub fn try_next(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Resolves once the registry closed this connection.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
