//! Length-prefixed TCP transport.
//!
//! Wire format per frame:
//!
//! ```text
//! +----------------+------------------+
//! | len: u32 (BE)  | payload: len B   |
//! +----------------+------------------+
//! ```
//!
//! A zero-length frame is a valid empty payload.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::debug;

use super::{FrameSink, FrameSource, TransportError};

pub struct TcpFrameSource {
    inner: FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
}

pub struct TcpFrameSink {
    inner: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    max_frame_len: usize,
}

/// The codec both sides of a relay TCP connection use.
pub fn codec(max_frame_len: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_frame_len)
        .new_codec()
}

/// Split an accepted stream into framed halves.
pub fn split(stream: TcpStream, max_frame_len: usize) -> (TcpFrameSource, TcpFrameSink) {
    // Small chat-style frames; don't let Nagle hold them back.
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "set_nodelay failed");
    }
    let (read_half, write_half) = stream.into_split();
    (
        TcpFrameSource {
            inner: FramedRead::new(read_half, codec(max_frame_len)),
        },
        TcpFrameSink {
            inner: FramedWrite::new(write_half, codec(max_frame_len)),
            max_frame_len,
        },
    )
}

#[async_trait]
impl FrameSource for TcpFrameSource {
    async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.inner.next().await {
            Some(Ok(frame)) => Ok(Some(frame.freeze())),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl FrameSink for TcpFrameSink {
    async fn write_frame(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if payload.len() > self.max_frame_len {
            return Err(TransportError::FrameTooLarge {
                len: payload.len(),
                max: self.max_frame_len,
            });
        }
        self.inner.send(payload).await?;
        Ok(())
    }

    async fn close(self) -> Result<(), TransportError> {
        let mut inner = self.inner;
        // Flushes, then shuts down the write half.
        SinkExt::<Bytes>::close(&mut inner).await?;
        Ok(())
    }
}
