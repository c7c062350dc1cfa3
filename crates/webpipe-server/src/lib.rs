pub mod handshake;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

pub use server::{build_router, session_handler, start, AppState, ServerConfig, ServerHandle, SessionHandler};
pub use session::{Message, Session};
