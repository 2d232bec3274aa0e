//! The socket server handle: every open connection on this process.

use std::sync::Arc;

use dashmap::DashMap;
use quill_core::ConnectionId;
use serde_json::Value;
use tracing::debug;

use crate::connection::Connection;

/// All live sockets held by this process, authenticated or not.
///
/// Unlike the [`ConnectionRegistry`](crate::registry::ConnectionRegistry),
/// which indexes by user, this is the target of "broadcast to all".
pub struct SocketServer {
    connections: DashMap<ConnectionId, Arc<Connection>>,
}

impl SocketServer {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    pub fn insert(&self, connection: Arc<Connection>) {
        self.connections.insert(connection.id, connection);
    }

    /// Remove a connection. Returns `None` if it was already gone.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.remove(&id).map(|(_, conn)| conn)
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(&id).map(|c| c.value().clone())
    }

    /// Emit to a single connection. Returns `false` if it is not held here
    /// or its queue dropped the frame.
    pub fn emit(&self, id: ConnectionId, event: &str, data: &Value) -> bool {
        self.get(id).is_some_and(|conn| conn.emit(event, data))
    }

    /// Emit to every connection on this process. Returns how many accepted
    /// the frame.
    pub fn emit_all(&self, event: &str, data: &Value) -> usize {
        // Snapshot first so no shard lock is held while emitting.
        let targets: Vec<Arc<Connection>> =
            self.connections.iter().map(|c| c.value().clone()).collect();
        let delivered = targets.iter().filter(|c| c.emit(event, data)).count();
        debug!(event, recipients = targets.len(), delivered, "emit to all");
        delivered
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for SocketServer {
    fn default() -> Self {
        Self::new()
    }
}
