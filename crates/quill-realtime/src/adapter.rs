//! Connection lifecycle: authenticate, register, deregister.
//!
//! The adapter is the only writer to the [`ConnectionRegistry`] and the
//! [`SocketServer`]. It can only be built from a [`PendingPropagation`],
//! which it attaches to its socket server before returning, so no socket
//! can be accepted while broadcasts would still miss it.

use std::sync::Arc;

use quill_core::{Error, Identity, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::auth::AccessTokenValidator;
use crate::connection::Connection;
use crate::frame::ServerFrame;
use crate::handshake::Handshake;
use crate::propagation::{PendingPropagation, PropagationService};
use crate::registry::ConnectionRegistry;
use crate::server::SocketServer;

pub struct ConnectionAdapter {
    validator: Arc<dyn AccessTokenValidator>,
    registry: Arc<ConnectionRegistry>,
    server: Arc<SocketServer>,
}

impl ConnectionAdapter {
    /// Create this process's socket server, attach it to `pending`, and
    /// return the adapter together with the now-dispatching service.
    pub fn new(
        validator: Arc<dyn AccessTokenValidator>,
        pending: PendingPropagation,
    ) -> (Self, PropagationService) {
        let registry = pending.registry().clone();
        let server = Arc::new(SocketServer::new());
        let propagation = pending.attach_server(server.clone());
        let adapter = Self {
            validator,
            registry,
            server,
        };
        (adapter, propagation)
    }

    /// Resolve the handshake's credential.
    ///
    /// - No credential: `Ok(None)`, the socket proceeds unauthenticated.
    /// - Valid credential: `Ok(Some(identity))`.
    /// - Invalid credential: `Err(Error::InvalidAuth)`; the socket must be
    ///   refused and never registered.
    pub async fn authenticate(&self, handshake: &Handshake) -> Result<Option<Identity>> {
        let Some(token) = handshake.bearer_token() else {
            debug!("handshake without credential, proceeding unauthenticated");
            return Ok(None);
        };

        match self.validator.validate_access_token(token).await {
            Ok(identity) => Ok(Some(identity)),
            Err(e) => {
                debug!(error = %e, "handshake rejected");
                Err(Error::InvalidAuth)
            }
        }
    }

    /// Register a socket that passed the handshake.
    ///
    /// Returns the connection handle and the receiving end of its outbound
    /// queue for the writer task.
    pub fn connect(
        &self,
        identity: Option<Identity>,
        outbound_buffer: usize,
    ) -> (Arc<Connection>, mpsc::Receiver<ServerFrame>) {
        let (conn, rx) = Connection::new(identity, outbound_buffer);
        let conn = Arc::new(conn);

        self.server.insert(conn.clone());
        if let Some(user_id) = conn.user_id() {
            self.registry.add(user_id, conn.clone());
        }

        info!(
            connection_id = %conn.id,
            user_id = conn.user_id().unwrap_or("-"),
            authenticated = conn.is_authenticated(),
            "socket connected"
        );
        (conn, rx)
    }

    /// Authenticate and, on success, register in one step.
    pub async fn accept(
        &self,
        handshake: &Handshake,
        outbound_buffer: usize,
    ) -> Result<(Arc<Connection>, mpsc::Receiver<ServerFrame>)> {
        let identity = self.authenticate(handshake).await?;
        Ok(self.connect(identity, outbound_buffer))
    }

    /// Deregister a socket. Safe to call more than once.
    pub fn disconnect(&self, conn: &Connection) {
        // The server removal decides which call does the work, so a repeat
        // cannot remove a duplicate registry entry.
        if self.server.remove(conn.id).is_none() {
            debug!(connection_id = %conn.id, "socket already disconnected");
            return;
        }
        if let Some(user_id) = conn.user_id() {
            self.registry.remove(user_id, conn.id);
        }
        info!(
            connection_id = %conn.id,
            user_id = conn.user_id().unwrap_or("-"),
            dropped_frames = conn.dropped_frames(),
            "socket disconnected"
        );
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn server(&self) -> &Arc<SocketServer> {
        &self.server
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryTransport;
    use crate::bus::BusClient;
    use async_trait::async_trait;
    use quill_core::Role;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts "good-<user>" tokens and counts calls.
    #[derive(Default)]
    struct StubValidator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AccessTokenValidator for StubValidator {
        async fn validate_access_token(&self, token: &str) -> Result<Identity> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match token.strip_prefix("good-") {
                Some(user) => Ok(Identity::new(user, user, Role::User)),
                None => Err(Error::InvalidAuth),
            }
        }
    }

    async fn adapter() -> (ConnectionAdapter, PropagationService, Arc<StubValidator>) {
        let bus = BusClient::new(Arc::new(MemoryTransport::new()));
        let pending = PendingPropagation::new(bus, Arc::new(ConnectionRegistry::new()))
            .await
            .unwrap();
        let validator = Arc::new(StubValidator::default());
        let (adapter, service) = ConnectionAdapter::new(validator.clone(), pending);
        (adapter, service, validator)
    }

    fn with_query_token(token: &str) -> Handshake {
        let query = HashMap::from([("token".to_string(), token.to_string())]);
        Handshake::new(None, query, Vec::new())
    }

    #[tokio::test]
    async fn no_credential_is_unauthenticated() {
        let (adapter, _svc, validator) = adapter().await;
        let identity = adapter.authenticate(&Handshake::default()).await.unwrap();
        assert!(identity.is_none());
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn valid_credential_yields_identity() {
        let (adapter, _svc, _) = adapter().await;
        let identity = adapter
            .authenticate(&with_query_token("good-u1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.id, "u1");
    }

    #[tokio::test]
    async fn invalid_credential_is_rejected_without_side_effects() {
        let (adapter, _svc, _) = adapter().await;
        let handshake = Handshake::default().with_auth(Some(json!({"token": "forged"})));

        let err = adapter.accept(&handshake, 8).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid auth token");
        assert!(adapter.server().is_empty());
        assert_eq!(adapter.registry().user_count(), 0);
    }

    #[tokio::test]
    async fn authenticated_connect_registers_everywhere() {
        let (adapter, _svc, _) = adapter().await;
        let (conn, _rx) = adapter.accept(&with_query_token("good-u1"), 8).await.unwrap();

        assert!(adapter.server().get(conn.id).is_some());
        assert_eq!(adapter.registry().get("u1").len(), 1);
    }

    #[tokio::test]
    async fn unauthenticated_connect_skips_registry() {
        let (adapter, _svc, _) = adapter().await;
        let (conn, _rx) = adapter.accept(&Handshake::default(), 8).await.unwrap();

        assert!(adapter.server().get(conn.id).is_some());
        assert_eq!(adapter.registry().connection_count(), 0);
    }

    #[tokio::test]
    async fn disconnect_twice_matches_once() {
        let (adapter, _svc, _) = adapter().await;
        let (a, _ra) = adapter.accept(&with_query_token("good-u1"), 8).await.unwrap();
        let (b, _rb) = adapter.accept(&with_query_token("good-u1"), 8).await.unwrap();

        adapter.disconnect(&a);
        let after_once = (
            adapter.server().len(),
            adapter.registry().get("u1").iter().map(|c| c.id).collect::<Vec<_>>(),
        );
        adapter.disconnect(&a);
        let after_twice = (
            adapter.server().len(),
            adapter.registry().get("u1").iter().map(|c| c.id).collect::<Vec<_>>(),
        );

        assert_eq!(after_once, after_twice);
        assert_eq!(after_twice, (1, vec![b.id]));
    }

    #[tokio::test]
    async fn disconnect_last_socket_prunes_user() {
        let (adapter, _svc, _) = adapter().await;
        let (a, _ra) = adapter.accept(&with_query_token("good-u1"), 8).await.unwrap();
        adapter.disconnect(&a);
        adapter.disconnect(&a);
        assert!(!adapter.registry().contains_user("u1"));
        assert!(adapter.server().is_empty());
    }

    #[tokio::test]
    async fn adapter_and_service_share_server() {
        let (adapter, svc, _) = adapter().await;
        assert!(Arc::ptr_eq(adapter.server(), svc.server()));
        assert!(Arc::ptr_eq(adapter.registry(), svc.registry()));
    }
}
