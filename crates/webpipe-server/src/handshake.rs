use std::time::Duration;

use tracing::{debug, warn};
use webpipe_core::PipeError;

use crate::transport::{Frame, FrameSink, FrameStream};

/// Magic token both peers must exchange before any application message.
pub const HANDSHAKE_TOKEN: &str = "WEBPIPE1";

/// Text frame written to the peer when negotiation fails.
pub const HANDSHAKE_FAILURE_FRAME: &str = "ERROR";

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Confirm protocol compatibility with the peer.
///
/// Sends the magic token, then waits for the peer to echo it byte-for-byte
/// as a text frame. Non-text frames, mismatched payloads, read errors, and
/// an early close do not fail the wait; only an exact match or the timeout
/// resolves it. On timeout a failure frame is written best-effort and the
/// caller is expected to close the connection.
pub async fn negotiate<S, K>(
    stream: &mut S,
    sink: &mut K,
    timeout: Duration,
) -> Result<(), PipeError>
where
    S: FrameStream + ?Sized,
    K: FrameSink + ?Sized,
{
    if let Err(e) = sink.send(Frame::Text(HANDSHAKE_TOKEN.to_owned())).await {
        // A dead transport surfaces as a timeout below.
        debug!(error = %e, "failed to send handshake greeting");
    }

    let wait_for_token = async {
        loop {
            match stream.recv().await {
                Ok(Some(Frame::Text(text))) if text == HANDSHAKE_TOKEN => break,
                Ok(Some(_)) => debug!("ignoring non-matching frame during handshake"),
                // Nothing more will arrive; park until the timer resolves the wait.
                Ok(None) | Err(_) => std::future::pending::<()>().await,
            }
        }
    };

    match tokio::time::timeout(timeout, wait_for_token).await {
        Ok(()) => {
            debug!("handshake complete");
            Ok(())
        }
        Err(_) => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "no matching handshake token before timeout"
            );
            let _ = sink
                .send(Frame::Text(HANDSHAKE_FAILURE_FRAME.to_owned()))
                .await;
            Err(PipeError::HandshakeFailed)
        }
    }
}
