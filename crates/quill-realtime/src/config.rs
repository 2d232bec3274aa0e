use std::time::Duration;

/// Runtime knobs for the socket and relay routes.
///
/// Process-level settings (listen address, secrets, bus URL) live in the
/// gateway binary's CLI.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long a freshly opened socket may take to send its connect frame.
    pub handshake_timeout: Duration,
    /// Interval between server pings on an idle socket.
    pub ping_interval: Duration,
    /// Outbound frames queued per connection before new ones are dropped.
    pub connection_buffer: usize,
    /// Bearer token required on the internal relay routes. `None` leaves
    /// them open, which is only appropriate behind a private network.
    pub relay_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(25),
            connection_buffer: 64,
            relay_token: None,
        }
    }
}
