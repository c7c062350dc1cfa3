use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use webpipe_core::PipeError;

/// One frame at the transport boundary. Control frames (ping/pong) are
/// handled below this boundary and never surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Read half of a connection. `Ok(None)` means the peer closed cleanly.
#[async_trait]
pub trait FrameStream: Send {
    async fn recv(&mut self) -> Result<Option<Frame>, PipeError>;
}

/// Write half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), PipeError>;
    async fn close(&mut self) -> Result<(), PipeError>;
}

/// Split an accepted WebSocket into the two transport halves.
pub fn split(socket: WebSocket) -> (WsFrameStream, WsFrameSink) {
    let (sink, stream) = socket.split();
    (WsFrameStream { inner: stream }, WsFrameSink { inner: sink })
}

pub struct WsFrameStream {
    inner: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn recv(&mut self) -> Result<Option<Frame>, PipeError> {
        loop {
            match self.inner.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(Some(Frame::Text(text.to_string()))),
                Some(Ok(WsMessage::Binary(bytes))) => {
                    return Ok(Some(Frame::Binary(bytes.to_vec())))
                }
                // axum answers pings automatically; pongs carry no envelope
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
                Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
                Some(Err(e)) => return Err(PipeError::Transport(e.to_string())),
            }
        }
    }
}

pub struct WsFrameSink {
    inner: SplitSink<WebSocket, WsMessage>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, frame: Frame) -> Result<(), PipeError> {
        let message = match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(bytes) => WsMessage::Binary(bytes.into()),
        };
        self.inner
            .send(message)
            .await
            .map_err(|e| PipeError::Transport(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), PipeError> {
        self.inner
            .close()
            .await
            .map_err(|e| PipeError::Transport(e.to_string()))
    }
}
