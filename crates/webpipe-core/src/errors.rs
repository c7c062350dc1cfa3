/// Typed error hierarchy for pipe operations.
/// Classifies errors as fatal to the session or local to the calling site.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PipeError {
    // Fatal — the session is never created
    #[error("handshake failed: peer did not echo the magic token")]
    HandshakeFailed,

    // Fatal — terminates the owning session's read loop
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    // Local — reported to the caller only
    #[error("message is not expecting a reply")]
    NoReplyExpected,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("connection closed")]
    Closed,
}

impl PipeError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedEnvelope {
            reason: reason.into(),
        }
    }

    /// Whether this error ends the session it occurred on.
    /// Transport errors are fatal on the read path but not on the write path;
    /// the read loop is the only place that acts on this.
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(
            self,
            Self::HandshakeFailed | Self::MalformedEnvelope { .. } | Self::Closed
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::HandshakeFailed => "handshake_failed",
            Self::MalformedEnvelope { .. } => "malformed_envelope",
            Self::NoReplyExpected => "no_reply_expected",
            Self::Transport(_) => "transport_error",
            Self::Closed => "closed",
        }
    }
}
