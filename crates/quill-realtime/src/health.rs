//! `/health` endpoint.

use std::time::Instant;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::gateway::GatewayState;

/// Health check response body. Counters cover this process only.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the gateway started.
    pub uptime_secs: u64,
    /// Open sockets, authenticated or not.
    pub connections: usize,
    /// Distinct users with at least one socket here.
    pub authenticated_users: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    connections: usize,
    authenticated_users: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        authenticated_users,
    }
}

/// GET /health
pub async fn health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(health_check(
        state.started_at,
        state.adapter.server().len(),
        state.adapter.registry().user_count(),
    ))
}
