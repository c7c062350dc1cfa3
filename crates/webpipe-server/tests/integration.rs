//! End-to-end tests using a real WebSocket client.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use webpipe_server::{session_handler, ServerConfig, Session, SessionHandler};

const TIMEOUT: Duration = Duration::from_secs(5);
const TOKEN: &str = "WEBPIPE1";

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Boot a test server on a random port and return the WS URL.
async fn boot(handler: SessionHandler) -> String {
    let config = ServerConfig {
        port: 0,
        ..Default::default()
    };
    let handle = webpipe_server::start(config, handler).await.unwrap();
    format!("ws://127.0.0.1:{}/ws", handle.port)
}

/// A handler that answers `ping` requests with a fixed `42`.
fn ping_handler() -> SessionHandler {
    session_handler(|session: Session| async move {
        let mut pings = session.on("ping", "s1");
        tokio::spawn(async move {
            while let Some(msg) = pings.recv().await {
                let _ = msg.reply(vec![json!(42)]).await;
            }
        });
    })
}

/// Read the next text frame.
async fn read_text(ws: &mut WsStream) -> String {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return text.to_string();
        }
    }
}

/// Complete the magic-token handshake from the client side.
async fn connect_and_shake(url: &str) -> WsStream {
    let (mut ws, _) = connect_async(url).await.unwrap();
    assert_eq!(read_text(&mut ws).await, TOKEN, "server must greet first");
    ws.send(Message::text(TOKEN)).await.unwrap();
    ws
}

/// Read until the server closes the connection.
async fn wait_for_close(ws: &mut WsStream) {
    let closed = timeout(TIMEOUT, async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "server did not close the connection");
}

#[tokio::test]
async fn e2e_handshake_then_request_reply() {
    let url = boot(ping_handler()).await;
    let mut ws = connect_and_shake(&url).await;

    ws.send(Message::text(
        r#"{"n":"ping","args":[1,2],"requestId":"r1"}"#,
    ))
    .await
    .unwrap();

    let reply: Value = serde_json::from_str(&read_text(&mut ws).await).unwrap();
    assert_eq!(reply["n"], "__webpipe_reply:ping");
    assert_eq!(reply["replyTo"], "r1");
    assert_eq!(reply["args"], json!([42]));
}

#[tokio::test]
async fn e2e_fan_out_to_two_subscribers() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<String>();

    let handler = session_handler(move |session: Session| {
        let seen_tx = seen_tx.clone();
        async move {
            for subscriber in ["s1", "s2"] {
                let mut rx = session.on("chat", subscriber);
                let seen = seen_tx.clone();
                tokio::spawn(async move {
                    while let Some(msg) = rx.recv().await {
                        let _ = seen.send(format!("{subscriber}:{}", msg.args[0]));
                    }
                });
            }
        }
    });

    let url = boot(handler).await;
    let mut ws = connect_and_shake(&url).await;

    ws.send(Message::text(r#"{"n":"chat","args":["hello"]}"#))
        .await
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..2 {
        let entry = timeout(TIMEOUT, seen_rx.recv())
            .await
            .expect("timeout waiting for delivery")
            .unwrap();
        seen.push(entry);
    }
    seen.sort();
    assert_eq!(seen, vec![r#"s1:"hello""#, r#"s2:"hello""#]);
}

#[tokio::test]
async fn e2e_handshake_timeout_sends_error_and_closes() {
    let config = ServerConfig {
        port: 0,
        handshake_timeout: Duration::from_millis(200),
    };
    let handle = webpipe_server::start(config, ping_handler()).await.unwrap();
    let url = format!("ws://127.0.0.1:{}/ws", handle.port);

    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    assert_eq!(read_text(&mut ws).await, TOKEN);

    // never echo the token
    assert_eq!(read_text(&mut ws).await, "ERROR");
    wait_for_close(&mut ws).await;
}

#[tokio::test]
async fn e2e_late_token_still_succeeds() {
    let url = boot(ping_handler()).await;
    let (mut ws, _) = connect_async(url.as_str()).await.unwrap();
    assert_eq!(read_text(&mut ws).await, TOKEN);

    // a wrong guess first, then the real token
    ws.send(Message::text("NOTTHETOKEN")).await.unwrap();
    ws.send(Message::text(TOKEN)).await.unwrap();

    ws.send(Message::text(r#"{"n":"ping","args":[],"requestId":"r2"}"#))
        .await
        .unwrap();
    let reply: Value = serde_json::from_str(&read_text(&mut ws).await).unwrap();
    assert_eq!(reply["replyTo"], "r2");
}

#[tokio::test]
async fn e2e_event_without_subscribers_is_dropped_silently() {
    let url = boot(ping_handler()).await;
    let mut ws = connect_and_shake(&url).await;

    ws.send(Message::text(r#"{"n":"nobody-listens","args":[]}"#))
        .await
        .unwrap();

    // the session survives; a ping still round-trips
    ws.send(Message::text(r#"{"n":"ping","args":[],"requestId":"r3"}"#))
        .await
        .unwrap();
    let reply: Value = serde_json::from_str(&read_text(&mut ws).await).unwrap();
    assert_eq!(reply["replyTo"], "r3");
}

#[tokio::test]
async fn e2e_malformed_envelope_closes_the_session() {
    let url = boot(ping_handler()).await;
    let mut ws = connect_and_shake(&url).await;

    ws.send(Message::text("not an envelope")).await.unwrap();
    wait_for_close(&mut ws).await;
}

#[tokio::test]
async fn e2e_server_emit_reaches_client() {
    let handler = session_handler(|session: Session| async move {
        let _ = session.emit("welcome", vec![json!("hello")]).await;
    });

    let url = boot(handler).await;
    let mut ws = connect_and_shake(&url).await;

    let event: Value = serde_json::from_str(&read_text(&mut ws).await).unwrap();
    assert_eq!(event["n"], "welcome");
    assert_eq!(event["args"], json!(["hello"]));
    assert!(event.get("requestId").is_none());
}
