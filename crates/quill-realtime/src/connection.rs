//! A live WebSocket connection owned by this process.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use quill_core::{ConnectionId, Identity};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::frame::ServerFrame;

/// Process-local handle for one open socket.
///
/// The identity is fixed at construction: a connection is either
/// authenticated for its whole lifetime or never. Frames are pushed onto a
/// bounded queue drained by the socket's writer task, so emitting never
/// blocks the caller.
pub struct Connection {
    pub id: ConnectionId,
    identity: Option<Identity>,
    pub connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<ServerFrame>,
    dropped_frames: AtomicU64,
}

impl Connection {
    /// Create a connection with a fresh id and an outbound queue of
    /// `buffer` frames. Returns the receiving half for the writer task.
    pub fn new(
        identity: Option<Identity>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<ServerFrame>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::with_id(Uuid::new_v4(), identity, tx), rx)
    }

    pub fn with_id(
        id: ConnectionId,
        identity: Option<Identity>,
        outbound: mpsc::Sender<ServerFrame>,
    ) -> Self {
        Self {
            id,
            identity,
            connected_at: Utc::now(),
            outbound,
            dropped_frames: AtomicU64::new(0),
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.id.as_str())
    }

    pub fn is_authenticated(&self) -> bool {
        self.identity.is_some()
    }

    /// Emit an application event to this connection.
    ///
    /// Returns `false` if the frame was dropped.
    pub fn emit(&self, event: &str, data: &Value) -> bool {
        self.send_frame(ServerFrame::Event {
            event: event.to_string(),
            data: data.clone(),
        })
    }

    /// Queue a frame for the writer task.
    ///
    /// A full or closed queue drops the frame and bumps the drop counter.
    pub fn send_frame(&self, frame: ServerFrame) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "queue closed",
                };
                warn!(
                    connection_id = %self.id,
                    dropped,
                    reason,
                    "dropping frame for connection"
                );
                false
            }
        }
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// True once the writer side has gone away.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id())
            .field("connected_at", &self.connected_at)
            .finish()
    }
}
