use std::time::Duration;

use clap::Parser;
use tracing::warn;
use webpipe_server::{session_handler, ServerConfig, Session};

/// Event pipe server: accepts WebSocket connections, performs the
/// magic-token handshake, then exchanges named-event envelopes.
#[derive(Parser)]
#[command(name = "webpipe")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 9601)]
    port: u16,

    /// Handshake timeout in milliseconds.
    #[arg(long, default_value_t = 2000)]
    handshake_timeout_ms: u64,
}

#[tokio::main]
async fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        port: args.port,
        handshake_timeout: Duration::from_millis(args.handshake_timeout_ms),
    };

    tracing::info!("Starting webpipe server");

    let handle = webpipe_server::start(config, session_handler(attach_echo))
        .await
        .expect("Failed to start server");

    tracing::info!(port = handle.port, "webpipe server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}

/// Diagnostic subscriber: answers "ping" requests by echoing the arguments.
async fn attach_echo(session: Session) {
    let mut pings = session.on("ping", "webpipe");
    tokio::spawn(async move {
        while let Some(msg) = pings.recv().await {
            if !msg.expects_reply() {
                continue;
            }
            let args = msg.args.clone();
            if let Err(e) = msg.reply(args).await {
                warn!(error = %e, "failed to reply to ping");
            }
        }
    });
}
