//! WebSocket transport on top of axum's upgraded socket.
//!
//! Text and binary messages are both relayed as opaque bytes. Outbound
//! payloads go out as text when they are valid UTF-8 and as binary
//! otherwise, so browser clients keep getting strings. Ping/pong is
//! answered by the socket itself and never surfaces as a frame.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use super::{FrameSink, FrameSource, TransportError};

pub struct WsFrameSource {
    inner: SplitStream<WebSocket>,
}

pub struct WsFrameSink {
    inner: SplitSink<WebSocket, Message>,
}

pub fn split(socket: WebSocket) -> (WsFrameSource, WsFrameSink) {
    let (sink, stream) = socket.split();
    (WsFrameSource { inner: stream }, WsFrameSink { inner: sink })
}

#[async_trait]
impl FrameSource for WsFrameSource {
    async fn read_frame(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(Bytes::from(text))),
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }
}

/// Text when the payload is UTF-8, binary otherwise.
pub fn to_message(payload: Bytes) -> Message {
    match std::str::from_utf8(&payload) {
        Ok(text) => Message::Text(text.into()),
        Err(_) => Message::Binary(payload),
    }
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn write_frame(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.inner.send(to_message(payload)).await?;
        Ok(())
    }

    async fn close(self) -> Result<(), TransportError> {
        let mut inner = self.inner;
        // Sends a close frame if the peer has not already gone.
        inner.close().await?;
        Ok(())
    }
}
