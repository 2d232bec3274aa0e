//! Per-process registry of authenticated connections, keyed by user id.
//!
//! Only the [`ConnectionAdapter`](crate::adapter::ConnectionAdapter) mutates
//! the registry. It is local to one process: the union of every gateway's
//! registry is the global set of a user's live sockets.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use quill_core::{ConnectionId, UserId};
use tracing::debug;

use crate::connection::Connection;

/// Maps a user id to the connections that user holds on this process.
///
/// A user id is present only while it owns at least one connection; the
/// key is dropped in the same shard-locked step that removes the last one.
pub struct ConnectionRegistry {
    users: DashMap<UserId, Vec<Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
        }
    }

    /// Append a connection to the user's set.
    ///
    /// Adding the same handle twice stores it twice; callers register each
    /// connection once.
    pub fn add(&self, user_id: &str, connection: Arc<Connection>) {
        let mut entry = self.users.entry(user_id.to_string()).or_default();
        entry.push(connection);
        debug!(
            user_id,
            connections = entry.len(),
            "connection registered"
        );
    }

    /// Remove one occurrence of `connection_id` from the user's set.
    ///
    /// Returns `false` if it was not registered under that user.
    pub fn remove(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        match self.users.entry(user_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let conns = entry.get_mut();
                let Some(pos) = conns.iter().position(|c| c.id == connection_id) else {
                    return false;
                };
                conns.remove(pos);
                let remaining = conns.len();
                if remaining == 0 {
                    entry.remove();
                }
                debug!(user_id, %connection_id, remaining, "connection unregistered");
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Snapshot of the user's connections (empty if none).
    pub fn get(&self, user_id: &str) -> Vec<Arc<Connection>> {
        self.users
            .get(user_id)
            .map(|conns| conns.value().clone())
            .unwrap_or_default()
    }

    /// Snapshot of every authenticated connection on this process.
    pub fn get_all(&self) -> Vec<Arc<Connection>> {
        self.users
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect()
    }

    pub fn contains_user(&self, user_id: &str) -> bool {
        self.users.contains_key(user_id)
    }

    /// Number of users with at least one connection here.
    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn connection_count(&self) -> usize {
        self.users.iter().map(|entry| entry.value().len()).sum()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
