//! JSON text frames exchanged over a gateway WebSocket.

use quill_core::ConnectionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames the gateway writes to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake accepted; the socket is now live.
    Connect {
        id: ConnectionId,
        authenticated: bool,
    },
    /// Handshake refused. The socket is closed right after this frame.
    ConnectError { message: String },
    /// An application event relayed from the bus.
    Event { event: String, data: Value },
}

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Opens the handshake. `auth` is the client's handshake payload,
    /// typically `{"token": "<jwt>"}`.
    Connect {
        #[serde(default)]
        auth: Option<Value>,
    },
    Disconnect,
}
