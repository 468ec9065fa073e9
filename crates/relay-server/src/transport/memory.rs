//! In-process transport backed by channels.
//!
//! [`pair`] returns the relay-facing halves plus a [`MemoryPeer`] that
//! plays the remote client: it can send frames, inject failures or
//! stalls, read what the relay wrote and check how often the sink was
//! closed.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{FrameSink, FrameSource, TransportError};

type Inbound = Result<Bytes, TransportError>;

#[derive(Debug, Default)]
struct Shared {
    fail_writes: AtomicBool,
    stall_writes: AtomicBool,
    closes: AtomicUsize,
}

pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

pub struct MemorySink {
    tx: mpsc::UnboundedSender<Bytes>,
    shared: Arc<Shared>,
}

/// Remote end of an in-memory connection.
pub struct MemoryPeer {
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    shared: Arc<Shared>,
}

pub fn pair() -> (MemorySource, MemorySink, MemoryPeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared::default());
    (
        MemorySource { rx: in_rx },
        MemorySink {
            tx: out_tx,
            shared: Arc::clone(&shared),
        },
        MemoryPeer {
            inbound: Some(in_tx),
            outbound: out_rx,
            shared,
        },
    )
}

impl MemoryPeer {
    /// Deliver a frame to the relay's read loop.
    pub fn send(&self, payload: impl Into<Bytes>) -> bool {
        match &self.inbound {
            Some(tx) => tx.send(Ok(payload.into())).is_ok(),
            None => false,
        }
    }

    /// Make the relay's next read fail.
    pub fn fail_read(&mut self, reason: &str) {
        if let Some(tx) = self.inbound.take() {
            let _ = tx.send(Err(TransportError::Reset(reason.to_string())));
        }
    }

    /// End the inbound stream cleanly.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Make every following write from the relay fail.
    pub fn fail_writes(&self) {
        self.shared.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Make every following write from the relay hang forever, like a
    /// client that stopped reading.
    pub fn stall_writes(&self) {
        self.shared.stall_writes.store(true, Ordering::SeqCst);
    }

    /// Next frame the relay wrote; `None` once the sink is gone.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.outbound.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.outbound.try_recv().ok()
    }

    /// How many times the relay closed this connection's sink.
    pub fn close_count(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn write_frame(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if self.shared.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Reset("write failure injected".to_string()));
        }
        if self.shared.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.tx
            .send(payload)
            .map_err(|_| TransportError::Reset("peer went away".to_string()))
    }

    async fn close(self) -> Result<(), TransportError> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
