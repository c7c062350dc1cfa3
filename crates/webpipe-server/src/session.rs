use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use webpipe_core::{Envelope, PipeError, SessionId};

use crate::registry::SubscriptionRegistry;
use crate::transport::{Frame, FrameSink, FrameStream};

pub(crate) type SharedSink = Arc<Mutex<Box<dyn FrameSink>>>;

/// One handshaken connection: its write half, its subscription registry,
/// and (until the read loop claims it) its read half.
///
/// Cloning is cheap and shares the same connection. The read loop is
/// single-use: once it terminates the session is finished, the connection
/// is closed exactly once, and every subscriber channel is dropped.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: SessionId,
    sink: SharedSink,
    registry: SubscriptionRegistry,
    reader: parking_lot::Mutex<Option<Box<dyn FrameStream>>>,
}

impl Session {
    pub fn new(stream: impl FrameStream + 'static, sink: impl FrameSink + 'static) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: SessionId::new(),
                sink: Arc::new(Mutex::new(Box::new(sink))),
                registry: SubscriptionRegistry::new(),
                reader: parking_lot::Mutex::new(Some(Box::new(stream))),
            }),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Register `subscriber` for `event`; re-subscribing the same pair
    /// replaces the previous channel.
    pub fn on(&self, event: &str, subscriber: &str) -> mpsc::Receiver<Message> {
        self.inner.registry.subscribe(event, subscriber)
    }

    pub fn off(&self, event: &str, subscriber: &str) {
        self.inner.registry.unsubscribe(event, subscriber)
    }

    /// Write a fire-and-forget event envelope. A write failure is returned
    /// to the caller and does not terminate the session.
    pub async fn emit(&self, event: &str, args: Vec<Value>) -> Result<(), PipeError> {
        let text = Envelope::event(event, args).encode()?;
        self.inner.sink.lock().await.send(Frame::Text(text)).await
    }

    /// Spawn the read/dispatch loop and return immediately.
    pub fn start(&self) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move { session.run().await })
    }

    /// Drive the read/dispatch loop to completion: read one frame, decode,
    /// fan out, repeat. Terminates on a read error, a decode failure, or
    /// peer close.
    pub async fn run(&self) {
        let Some(mut reader) = self.inner.reader.lock().take() else {
            warn!(session = %self.inner.id, "read loop already started");
            return;
        };
        debug!(session = %self.inner.id, "read loop started");

        loop {
            let frame = match reader.recv().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!(session = %self.inner.id, "peer closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(session = %self.inner.id, error = %e, "read failed");
                    break;
                }
            };

            let text = match frame {
                Frame::Text(text) => text,
                Frame::Binary(_) => {
                    warn!(session = %self.inner.id, "binary frame is not a valid envelope");
                    break;
                }
            };

            let envelope = match Envelope::decode(&text) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(session = %self.inner.id, error = %e, "terminating on malformed envelope");
                    break;
                }
            };

            let message = Message {
                name: envelope.n,
                args: envelope.args,
                request_id: envelope.request_id,
                sink: Arc::clone(&self.inner.sink),
            };
            self.inner.registry.dispatch(message).await;
        }

        // Single exit path: close the connection once, then drop every
        // subscriber channel so receivers observe the end of the session.
        if let Err(e) = self.inner.sink.lock().await.close().await {
            debug!(session = %self.inner.id, error = %e, "close after read loop");
        }
        self.inner.registry.close_all();
        info!(session = %self.inner.id, "session terminated");
    }
}

/// One delivered inbound message. Each subscriber receives its own copy;
/// a copy with a request id can answer exactly once.
#[derive(Clone)]
pub struct Message {
    pub name: String,
    pub args: Vec<Value>,
    request_id: String,
    sink: SharedSink,
}

impl Message {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn expects_reply(&self) -> bool {
        !self.request_id.is_empty()
    }

    /// Answer the originating request. Consuming `self` makes a second reply
    /// through the same delivered copy unrepresentable. Fails with
    /// `NoReplyExpected` (and writes nothing) when no reply was requested.
    pub async fn reply(self, args: Vec<Value>) -> Result<(), PipeError> {
        if self.request_id.is_empty() {
            return Err(PipeError::NoReplyExpected);
        }
        let text = Envelope::reply(&self.name, &self.request_id, args).encode()?;
        self.sink.lock().await.send(Frame::Text(text)).await
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl Message {
    /// A message detached from any live connection; replies go nowhere.
    pub(crate) fn test(name: &str, args: Vec<Value>, request_id: &str) -> Self {
        let (_stream, sink, _peer) = crate::transport::mem::pair();
        Self {
            name: name.to_owned(),
            args,
            request_id: request_id.to_owned(),
            sink: Arc::new(Mutex::new(Box::new(sink))),
        }
    }
}
