//! Bus envelopes and the producer-facing event requests.

use quill_core::{ConnectionId, Error, Result, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SEND_CHANNEL: &str = "SOCKET_EVENT_SEND";
pub const EMIT_ALL_CHANNEL: &str = "SOCKET_EVENT_EMIT_ALL";
pub const EMIT_AUTHENTICATED_CHANNEL: &str = "SOCKET_EVENT_EMIT_AUTHENTICATED";

// ── Channel ─────────────────────────────────────────────────────────

/// The three propagation channels, one per envelope kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Send,
    EmitAll,
    EmitAuthenticated,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Send, Channel::EmitAll, Channel::EmitAuthenticated];

    /// The static bus channel name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Send => SEND_CHANNEL,
            Self::EmitAll => EMIT_ALL_CHANNEL,
            Self::EmitAuthenticated => EMIT_AUTHENTICATED_CHANNEL,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Envelope ────────────────────────────────────────────────────────

/// A message on the bus. Exists only in flight; discarded after dispatch.
///
/// Tagged by `kind` so a payload missing a field its kind requires (e.g.
/// `userId` on `SEND`) fails to deserialize rather than dispatching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Envelope {
    #[serde(rename_all = "camelCase")]
    Send {
        event: String,
        #[serde(default)]
        data: Value,
        user_id: UserId,
        /// Connection to skip, typically the one whose action caused the
        /// event. Filtered by whichever process holds it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin_connection_id: Option<ConnectionId>,
    },
    EmitAll {
        event: String,
        #[serde(default)]
        data: Value,
    },
    EmitAuthenticated {
        event: String,
        #[serde(default)]
        data: Value,
    },
}

impl Envelope {
    /// The channel this envelope belongs on.
    pub fn channel(&self) -> Channel {
        match self {
            Self::Send { .. } => Channel::Send,
            Self::EmitAll { .. } => Channel::EmitAll,
            Self::EmitAuthenticated { .. } => Channel::EmitAuthenticated,
        }
    }

    pub fn event(&self) -> &str {
        match self {
            Self::Send { event, .. }
            | Self::EmitAll { event, .. }
            | Self::EmitAuthenticated { event, .. } => event,
        }
    }

    /// Checks the schema cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.event().is_empty() {
            return Err(Error::InvalidEnvelope("event name is empty".into()));
        }
        if let Self::Send { user_id, .. } = self {
            if user_id.is_empty() {
                return Err(Error::InvalidEnvelope("SEND without userId".into()));
            }
        }
        Ok(())
    }
}

// ── Producer requests ───────────────────────────────────────────────

/// An event aimed at every connection of one user, cluster-wide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetedEvent {
    pub event: String,
    #[serde(default)]
    pub data: Value,
    /// Missing or empty means the event is not published.
    #[serde(default)]
    pub user_id: Option<UserId>,
    /// Connection to exclude from delivery.
    #[serde(default)]
    pub socket_id: Option<ConnectionId>,
}

impl TargetedEvent {
    pub fn new(event: impl Into<String>, data: Value, user_id: impl Into<UserId>) -> Self {
        Self {
            event: event.into(),
            data,
            user_id: Some(user_id.into()),
            socket_id: None,
        }
    }

    /// Skip `socket_id` when delivering.
    pub fn excluding(mut self, socket_id: ConnectionId) -> Self {
        self.socket_id = Some(socket_id);
        self
    }
}

/// An event for every connection (or every authenticated one).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEvent {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl BroadcastEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}
