pub mod envelope;
pub mod errors;
pub mod ids;

pub use envelope::{reply_event_name, Envelope, REPLY_MARKER};
pub use errors::PipeError;
pub use ids::SessionId;
