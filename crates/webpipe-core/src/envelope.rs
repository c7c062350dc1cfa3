use serde::Serialize;
use serde_json::Value;

use crate::errors::PipeError;

/// Prefix applied to the event name of every reply envelope.
pub const REPLY_MARKER: &str = "__webpipe_reply:";

/// Wire-level event name carried by a reply to `name`.
pub fn reply_event_name(name: &str) -> String {
    format!("{REPLY_MARKER}{name}")
}

/// One wire document: a named event with positional arguments and
/// optional request/reply correlation ids.
///
/// Empty `request_id`/`reply_to` strings mean "absent" and are omitted
/// from the encoded document.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Envelope {
    pub n: String,
    pub args: Vec<Value>,
    #[serde(rename = "requestId", skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    #[serde(rename = "replyTo", skip_serializing_if = "String::is_empty")]
    pub reply_to: String,
}

impl Envelope {
    /// A fire-and-forget event envelope.
    pub fn event(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            n: name.into(),
            args,
            request_id: String::new(),
            reply_to: String::new(),
        }
    }

    /// A reply envelope answering the request `request_id` made under `name`.
    pub fn reply(name: &str, request_id: &str, args: Vec<Value>) -> Self {
        Self {
            n: reply_event_name(name),
            args,
            request_id: String::new(),
            reply_to: request_id.to_owned(),
        }
    }

    /// Serialize to the wire text form.
    pub fn encode(&self) -> Result<String, PipeError> {
        serde_json::to_string(self).map_err(|e| PipeError::Transport(e.to_string()))
    }

    /// Parse an inbound wire document.
    ///
    /// Field shapes are checked explicitly so a misbehaving peer produces a
    /// `MalformedEnvelope` error rather than a panic: `n` must be a non-empty
    /// string, `args` must be an array, `requestId` (when present) must be a
    /// string and defaults to empty.
    pub fn decode(text: &str) -> Result<Self, PipeError> {
        let doc: Value = serde_json::from_str(text)
            .map_err(|e| PipeError::malformed(format!("invalid JSON: {e}")))?;
        let doc = doc
            .as_object()
            .ok_or_else(|| PipeError::malformed("envelope is not an object"))?;

        let name = doc
            .get("n")
            .ok_or_else(|| PipeError::malformed("missing field `n`"))?
            .as_str()
            .ok_or_else(|| PipeError::malformed("field `n` is not a string"))?;
        if name.is_empty() {
            return Err(PipeError::malformed("field `n` is empty"));
        }

        let args = doc
            .get("args")
            .ok_or_else(|| PipeError::malformed("missing field `args`"))?
            .as_array()
            .ok_or_else(|| PipeError::malformed("field `args` is not an array"))?
            .clone();

        let request_id = match doc.get("requestId") {
            None => String::new(),
            Some(v) => v
                .as_str()
                .ok_or_else(|| PipeError::malformed("field `requestId` is not a string"))?
                .to_owned(),
        };

        Ok(Self {
            n: name.to_owned(),
            args,
            request_id,
            reply_to: String::new(),
        })
    }

    pub fn expects_reply(&self) -> bool {
        !self.request_id.is_empty()
    }
}
