//! `Gateway` -- axum router over the socket, relay and health routes.

use std::sync::Arc;
use std::time::Instant;

use axum::routing::{get, post};
use axum::Router;
use quill_core::Result;
use tower_http::trace::TraceLayer;

use crate::adapter::ConnectionAdapter;
use crate::auth::AccessTokenValidator;
use crate::bus::{BusClient, Transport};
use crate::config::GatewayConfig;
use crate::propagation::{PendingPropagation, PropagationService};
use crate::registry::ConnectionRegistry;
use crate::{health, relay, ws};

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub adapter: Arc<ConnectionAdapter>,
    pub propagation: PropagationService,
    pub config: Arc<GatewayConfig>,
    /// When the gateway started.
    pub started_at: Instant,
}

/// One gateway process: a socket server attached to the bus.
pub struct Gateway {
    state: GatewayState,
}

impl Gateway {
    /// Subscribe to the bus, attach a fresh socket server, and wire the
    /// adapter. Fails only if the bus subscriptions cannot be opened.
    pub async fn build(
        config: GatewayConfig,
        transport: Arc<dyn Transport>,
        validator: Arc<dyn AccessTokenValidator>,
    ) -> Result<Self> {
        let bus = BusClient::new(transport);
        let pending = PendingPropagation::new(bus, Arc::new(ConnectionRegistry::new())).await?;
        let (adapter, propagation) = ConnectionAdapter::new(validator, pending);

        Ok(Self {
            state: GatewayState {
                adapter: Arc::new(adapter),
                propagation,
                config: Arc::new(config),
                started_at: Instant::now(),
            },
        })
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/socket", get(ws::socket_upgrade))
            .route("/health", get(health::health))
            .route("/internal/events/send", post(relay::send_event))
            .route("/internal/events/broadcast", post(relay::broadcast))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// In-process producer handle.
    pub fn propagation(&self) -> &PropagationService {
        &self.state.propagation
    }

    pub fn adapter(&self) -> &Arc<ConnectionAdapter> {
        &self.state.adapter
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.state.config
    }
}
