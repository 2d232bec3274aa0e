use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use quill_realtime::{Gateway, GatewayConfig, JwtValidator, MemoryTransport, Transport};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quill-gateway", about = "Quill real-time gateway: WebSocket fan-out node")]
struct Cli {
    /// Address to listen on (HTTP + WebSocket)
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: String,

    /// HMAC secret shared with the auth service
    #[arg(long, env = "JWT_SECRET")]
    jwt_secret: String,

    /// Redis URL for the cross-node bus. Without it the gateway runs as a
    /// single node on an in-process bus.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Bearer token required on /internal/events/*
    #[arg(long, env = "RELAY_TOKEN")]
    relay_token: Option<String>,

    /// Seconds a new socket may take to send its connect frame
    #[arg(long, env = "HANDSHAKE_TIMEOUT_SECS", default_value_t = 10)]
    handshake_timeout_secs: u64,

    /// Seconds between server pings
    #[arg(long, env = "PING_INTERVAL_SECS", default_value_t = 25)]
    ping_interval_secs: u64,

    /// Outbound frames buffered per socket before drops
    #[arg(long, env = "CONNECTION_BUFFER", default_value_t = 64)]
    connection_buffer: usize,
}

impl Cli {
    fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            connection_buffer: self.connection_buffer,
            relay_token: self.relay_token.clone().filter(|t| !t.is_empty()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("quill=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    let transport = connect_bus(cli.redis_url.as_deref()).await?;
    let validator = Arc::new(JwtValidator::new(cli.jwt_secret.clone()));
    let gateway = Gateway::build(cli.gateway_config(), transport, validator).await?;

    if gateway.config().relay_token.is_none() {
        tracing::warn!("RELAY_TOKEN not set, /internal/events/* is unauthenticated");
    }

    let listener = tokio::net::TcpListener::bind(&cli.listen_addr).await?;
    tracing::info!("Starting gateway on {}", listener.local_addr()?);

    axum::serve(listener, gateway.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn connect_bus(redis_url: Option<&str>) -> Result<Arc<dyn Transport>> {
    match redis_url {
        #[cfg(feature = "redis")]
        Some(url) => {
            tracing::info!("Connecting to Redis bus...");
            let transport = quill_realtime::RedisTransport::connect(url).await?;
            Ok(Arc::new(transport))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => anyhow::bail!("REDIS_URL is set but quill-gateway was built without the redis feature"),
        None => {
            tracing::info!("No REDIS_URL, using in-process bus (single node)");
            Ok(Arc::new(MemoryTransport::new()))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
