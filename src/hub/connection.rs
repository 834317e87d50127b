//! The per-connection reader/writer pump. Each accepted socket gets one
//! reader task and one writer task; inbound handling is serialized per
//! connection (a single reader loop), matching the "no two concurrent
//! requests on one socket" backpressure rule.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, instrument, warn};

use crate::hub::protocol::{ClientMessage, ErrorCode, ErrorPayload, ServerMessage};
use crate::hub::Hub;

/// Reads the `username` an upstream identity/auth provider is expected to
/// have injected into the upgrade request's query string. The core treats
/// identity as already verified by the time a connection reaches the hub
/// (see `spec.md` §1's Non-goals) — this is the one seam where that
/// assumption is made concrete.
fn extract_username(uri: &str) -> Option<String> {
    let query = uri.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "username").then(|| value.to_string())
    })
}

/// Drives one accepted TCP connection end to end: WebSocket handshake,
/// registration, reader/writer pump, and cleanup on exit.
#[instrument(skip(hub, stream))]
pub async fn run(hub: Arc<Hub>, stream: TcpStream, addr: SocketAddr) {
    let mut captured_uri = String::new();
    let callback = |request: &tokio_tungstenite::tungstenite::handshake::server::Request,
                    response: tokio_tungstenite::tungstenite::handshake::server::Response| {
        captured_uri = request.uri().to_string();
        Ok(response)
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(err) => {
            debug!(%addr, error = %err, "websocket handshake failed");
            return;
        }
    };

    let Some(username) = extract_username(&captured_uri) else {
        debug!(%addr, "connection rejected: no username in upgrade request");
        return;
    };

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let (connection_id, outbound) = hub.registry.register(username.clone(), hub.config.outbound_queue_capacity).await;
    debug!(%addr, %username, %connection_id, "connection registered");

    let write_timeout = hub.config.write_timeout;
    let writer_queue = outbound.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = writer_queue.pop().await {
            let text = match serde_json::to_string(&message) {
                Ok(t) => t,
                Err(err) => {
                    warn!(error = %err, "failed to serialize outbound message");
                    continue;
                }
            };
            let sent = tokio::time::timeout(write_timeout, ws_tx.send(Message::Text(text))).await;
            match sent {
                Ok(Ok(())) => {}
                _ => break,
            }
        }
    });

    let read_idle_timeout = hub.config.read_idle_timeout;
    loop {
        let next = tokio::select! {
            result = tokio::time::timeout(read_idle_timeout, ws_rx.next()) => result,
            _ = outbound.closed() => {
                debug!(%username, "connection force-closed: outbound queue lagging past threshold");
                break;
            }
        };
        let frame = match next {
            Ok(frame) => frame,
            Err(_) => {
                debug!(%username, "read idle timeout, closing connection");
                break;
            }
        };

        match frame {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => hub.dispatch(connection_id, &username, msg).await,
                Err(err) => {
                    debug!(%username, error = %err, "invalid inbound message");
                    let _ = hub
                        .registry
                        .send_to(
                            connection_id,
                            ServerMessage::Error {
                                payload: ErrorPayload { code: ErrorCode::InternalError, message: "malformed message".into() },
                                timestamp: chrono::Utc::now(),
                            },
                        )
                        .await;
                }
            },
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                debug!(%username, error = %err, "websocket read error");
                break;
            }
        }
    }

    writer.abort();
    hub.handle_disconnect(connection_id, &username).await;
    debug!(%username, %connection_id, "connection cleaned up");
}
