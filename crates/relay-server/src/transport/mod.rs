//! Frame-level transport primitives.
//!
//! The relay only needs three things from a network connection:
//! read one frame, write one frame, close. Each transport splits its
//! stream into a [`FrameSource`] (owned by the read loop) and a
//! [`FrameSink`] (owned by the write loop).
//!
//! Implementations:
//! - [`ws`]: axum WebSocket, text and binary messages as opaque bytes.
//! - [`tcp`]: u32 big-endian length-prefixed frames over a `TcpStream`.
//! - [`memory`]: in-process channels, for embedding and tests.

pub mod memory;
pub mod tcp;
pub mod ws;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] axum::Error),

    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    #[error("connection reset: {0}")]
    Reset(String),
}

/// Inbound half of a framed connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame.
    ///
    /// `Ok(None)` means the peer ended the stream cleanly.
    async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// Outbound half of a framed connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn write_frame(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Close the underlying stream. Consumes the sink, so it runs at most once.
    async fn close(self) -> Result<(), TransportError>;
}
