//! End-to-end WebSocket tests against a gateway on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use quill_core::{Identity, Role};
use quill_realtime::{
    Gateway, GatewayConfig, JwtValidator, MemoryTransport, ServerFrame, TargetedEvent,
};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const SECRET: &str = "gateway-e2e-secret";
const STEP_TIMEOUT: Duration = Duration::from_secs(3);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_gateway(config: GatewayConfig) -> (SocketAddr, Arc<Gateway>) {
    let gateway = Gateway::build(
        config,
        Arc::new(MemoryTransport::new()),
        Arc::new(JwtValidator::new(SECRET)),
    )
    .await
    .unwrap();
    let gateway = Arc::new(gateway);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = gateway.router();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, gateway)
}

fn token_for(user: &str) -> String {
    JwtValidator::new(SECRET)
        .issue_token(&Identity::new(user, user, Role::User), 3600)
        .unwrap()
}

async fn open(addr: SocketAddr, query: &str) -> Client {
    let url = format!("ws://{addr}/socket{query}");
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Next server frame, skipping pings.
async fn next_frame(ws: &mut Client) -> Option<ServerFrame> {
    loop {
        let msg = tokio::time::timeout(STEP_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame");
        match msg {
            Some(Ok(Message::Text(text))) => {
                return Some(serde_json::from_str(text.as_str()).unwrap());
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(other)) => panic!("unexpected message: {other:?}"),
        }
    }
}

async fn handshake(ws: &mut Client, auth: Value) -> ServerFrame {
    send_json(ws, json!({"type": "connect", "auth": auth})).await;
    next_frame(ws).await.expect("socket closed during handshake")
}

async fn wait_for_connections(gateway: &Gateway, expected: usize) {
    let deadline = tokio::time::Instant::now() + STEP_TIMEOUT;
    while gateway.adapter().server().len() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {expected} connections, have {}",
            gateway.adapter().server().len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn valid_token_connects_authenticated() {
    let (addr, gateway) = spawn_gateway(GatewayConfig::default()).await;
    let mut ws = open(addr, "").await;

    let ack = handshake(&mut ws, json!({"token": token_for("u1")})).await;
    assert!(matches!(ack, ServerFrame::Connect { authenticated: true, .. }));
    assert_eq!(gateway.adapter().registry().get("u1").len(), 1);
}

#[tokio::test]
async fn query_token_is_accepted() {
    let (addr, gateway) = spawn_gateway(GatewayConfig::default()).await;
    let mut ws = open(addr, &format!("?token={}", token_for("u1"))).await;

    let ack = handshake(&mut ws, Value::Null).await;
    assert!(matches!(ack, ServerFrame::Connect { authenticated: true, .. }));
    assert!(gateway.adapter().registry().contains_user("u1"));
}

#[tokio::test]
async fn no_token_connects_unauthenticated() {
    let (addr, gateway) = spawn_gateway(GatewayConfig::default()).await;
    let mut ws = open(addr, "").await;

    send_json(&mut ws, json!({"type": "connect"})).await;
    let ack = next_frame(&mut ws).await.unwrap();
    assert!(matches!(ack, ServerFrame::Connect { authenticated: false, .. }));
    assert_eq!(gateway.adapter().server().len(), 1);
    assert_eq!(gateway.adapter().registry().connection_count(), 0);
}

#[tokio::test]
async fn invalid_token_is_refused() {
    let (addr, gateway) = spawn_gateway(GatewayConfig::default()).await;
    let mut ws = open(addr, "").await;

    let reply = handshake(&mut ws, json!({"token": "forged.token.value"})).await;
    assert_eq!(
        reply,
        ServerFrame::ConnectError {
            message: "Invalid auth token".into()
        }
    );
    assert!(next_frame(&mut ws).await.is_none(), "socket should close");
    assert!(gateway.adapter().server().is_empty());
    assert_eq!(gateway.adapter().registry().user_count(), 0);
}

#[tokio::test]
async fn silent_client_times_out() {
    let config = GatewayConfig {
        handshake_timeout: Duration::from_millis(200),
        ..GatewayConfig::default()
    };
    let (addr, gateway) = spawn_gateway(config).await;
    let mut ws = open(addr, "").await;

    assert!(next_frame(&mut ws).await.is_none());
    assert!(gateway.adapter().server().is_empty());
}

#[tokio::test]
async fn targeted_event_reaches_socket() {
    let (addr, gateway) = spawn_gateway(GatewayConfig::default()).await;
    let mut ws = open(addr, "").await;
    handshake(&mut ws, json!({"token": token_for("u1")})).await;

    gateway
        .propagation()
        .propagate_event(TargetedEvent::new("notification", json!({"id": 7}), "u1"))
        .await
        .unwrap();

    assert_eq!(
        next_frame(&mut ws).await.unwrap(),
        ServerFrame::Event {
            event: "notification".into(),
            data: json!({"id": 7}),
        }
    );
}

#[tokio::test]
async fn close_deregisters_socket() {
    let (addr, gateway) = spawn_gateway(GatewayConfig::default()).await;
    let mut ws = open(addr, "").await;
    handshake(&mut ws, json!({"token": token_for("u1")})).await;
    wait_for_connections(&gateway, 1).await;

    ws.close(None).await.unwrap();
    wait_for_connections(&gateway, 0).await;
    assert!(!gateway.adapter().registry().contains_user("u1"));
}

#[tokio::test]
async fn disconnect_frame_deregisters_socket() {
    let (addr, gateway) = spawn_gateway(GatewayConfig::default()).await;
    let mut ws = open(addr, "").await;
    handshake(&mut ws, json!({"token": token_for("u1")})).await;
    wait_for_connections(&gateway, 1).await;

    send_json(&mut ws, json!({"type": "disconnect"})).await;
    wait_for_connections(&gateway, 0).await;
    assert_eq!(gateway.adapter().registry().user_count(), 0);
}
