//! `GET /socket` -- WebSocket upgrade and per-connection actor.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::adapter::ConnectionAdapter;
use crate::config::GatewayConfig;
use crate::connection::Connection;
use crate::frame::{ClientFrame, ServerFrame};
use crate::gateway::GatewayState;
use crate::handshake::Handshake;

/// Policy violation: bad credential or malformed handshake.
const CLOSE_POLICY: u16 = 1008;

/// GET /socket
///
/// Query and headers are captured at upgrade time; the credential itself
/// may also arrive in the client's first frame, so authentication happens
/// after the upgrade.
pub async fn socket_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let handshake = Handshake::from_request(query, &headers);
    ws.on_upgrade(move |socket| run_socket(socket, state.adapter, state.config, handshake))
}

/// Drive one socket from handshake to deregistration.
pub async fn run_socket(
    mut socket: WebSocket,
    adapter: Arc<ConnectionAdapter>,
    config: Arc<GatewayConfig>,
    handshake: Handshake,
) {
    let auth = match timeout(config.handshake_timeout, read_connect_frame(&mut socket)).await {
        Ok(Some(auth)) => auth,
        Ok(None) => {
            debug!("socket closed before connect frame");
            return;
        }
        Err(_) => {
            info!("handshake timed out");
            close(&mut socket, CLOSE_POLICY, "handshake timeout").await;
            return;
        }
    };
    let handshake = handshake.with_auth(auth);

    let identity = match adapter.authenticate(&handshake).await {
        Ok(identity) => identity,
        Err(e) => {
            let message = e.to_string();
            let _ = send_frame(&mut socket, &ServerFrame::ConnectError { message }).await;
            close(&mut socket, CLOSE_POLICY, "Invalid auth token").await;
            return;
        }
    };

    let (conn, rx) = adapter.connect(identity, config.connection_buffer);

    // The ack goes out before the writer starts so it precedes any event
    // already queued for this connection.
    let ack = ServerFrame::Connect {
        id: conn.id,
        authenticated: conn.is_authenticated(),
    };
    if send_frame(&mut socket, &ack).await.is_err() {
        adapter.disconnect(&conn);
        return;
    }

    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(writer_task(sink, rx, config.ping_interval));

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(ClientFrame::Disconnect) => {
                    debug!(connection_id = %conn.id, "client requested disconnect");
                    break;
                }
                Ok(ClientFrame::Connect { .. }) => {
                    debug!(connection_id = %conn.id, "duplicate connect frame ignored");
                }
                Err(e) => {
                    debug!(connection_id = %conn.id, error = %e, "unreadable client frame");
                }
            },
            Ok(Message::Close(frame)) => {
                debug!(connection_id = %conn.id, reason = ?frame, "client closed");
                break;
            }
            // Pongs are answered by axum; binary frames are not part of the protocol.
            Ok(_) => {}
            Err(e) => {
                warn!(connection_id = %conn.id, error = %e, "socket receive error");
                break;
            }
        }
    }

    writer.abort();
    adapter.disconnect(&conn);
    log_closed(&conn);
}

/// Wait for the client's connect frame and return its `auth` payload.
/// Returns `None` if the socket closes first.
async fn read_connect_frame(socket: &mut WebSocket) -> Option<Option<serde_json::Value>> {
    while let Some(msg) = socket.recv().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(text.as_str()) {
                Ok(ClientFrame::Connect { auth }) => return Some(auth),
                Ok(ClientFrame::Disconnect) => return None,
                Err(e) => debug!(error = %e, "ignoring frame before connect"),
            },
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

/// Forward queued frames to the socket and keep it alive with pings.
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerFrame>,
    ping_interval: std::time::Duration,
) {
    let mut ping = interval(ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    ping.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to encode server frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).map_err(axum::Error::new)?;
    socket.send(Message::Text(text.into())).await
}

async fn close(socket: &mut WebSocket, code: u16, reason: &'static str) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

fn log_closed(conn: &Connection) {
    info!(
        connection_id = %conn.id,
        open_secs = (chrono::Utc::now() - conn.connected_at).num_seconds(),
        "socket closed"
    );
}
