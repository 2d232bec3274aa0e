//! Internal HTTP relay for producers that run outside the gateway process.
//!
//! `POST /internal/events/send` and `POST /internal/events/broadcast` publish
//! through the [`PropagationService`](crate::PropagationService) exactly as
//! an in-process producer would.

use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use quill_core::Error;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::envelope::{BroadcastEvent, TargetedEvent};
use crate::gateway::GatewayState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    #[default]
    All,
    Authenticated,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastRequest {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub audience: Audience,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub published: bool,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub receivers: usize,
}

#[derive(Debug)]
pub enum RelayError {
    Unauthorized,
    BadRequest(String),
    BusUnavailable(String),
    Internal(String),
}

impl From<Error> for RelayError {
    fn from(err: Error) -> Self {
        match err {
            Error::InvalidEnvelope(msg) => RelayError::BadRequest(msg),
            Error::BusUnavailable(detail) => RelayError::BusUnavailable(detail),
            other => RelayError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            RelayError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            RelayError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            RelayError::BusUnavailable(detail) => {
                warn!(error = %detail, "relay publish failed");
                (StatusCode::SERVICE_UNAVAILABLE, "bus unavailable".to_string())
            }
            RelayError::Internal(detail) => {
                error!(error = %detail, "relay request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// POST /internal/events/send
pub async fn send_event(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(event): Json<TargetedEvent>,
) -> Result<(StatusCode, Json<SendResponse>), RelayError> {
    authorize(&state, &headers)?;
    let published = state.propagation.propagate_event(event).await?;
    Ok((StatusCode::ACCEPTED, Json(SendResponse { published })))
}

/// POST /internal/events/broadcast
pub async fn broadcast(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Json(req): Json<BroadcastRequest>,
) -> Result<(StatusCode, Json<BroadcastResponse>), RelayError> {
    authorize(&state, &headers)?;
    let event = BroadcastEvent::new(req.event, req.data);
    let receivers = match req.audience {
        Audience::All => state.propagation.emit_to_all(event).await?,
        Audience::Authenticated => state.propagation.emit_to_authenticated(event).await?,
    };
    Ok((StatusCode::ACCEPTED, Json(BroadcastResponse { receivers })))
}

fn authorize(state: &GatewayState, headers: &HeaderMap) -> Result<(), RelayError> {
    let Some(expected) = state.config.relay_token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => {
            warn!("relay request with missing or wrong bearer token");
            Err(RelayError::Unauthorized)
        }
    }
}
