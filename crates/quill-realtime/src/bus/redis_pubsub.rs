//! Redis PUBLISH/SUBSCRIBE transport.
//!
//! Available only when the `redis` cargo feature is enabled.
//!
//! ## Connections
//!
//! The publisher role is a single `ConnectionManager`, which reconnects on
//! transient failures and is cheaply cloneable. Each subscription opens its
//! own dedicated pub/sub connection; Redis forbids regular commands on a
//! subscribed connection, so the two roles never share one.
//!
//! ## Reconnects
//!
//! A subscription stream simply ends when its connection drops. The
//! transport does not resubscribe on its own; the propagation dispatcher
//! owns that policy (see `propagation::resubscribe`). Messages published
//! while a subscriber is disconnected are lost.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use quill_core::{Error, Result};
use redis::AsyncCommands;
use tracing::{info, warn};

use super::Transport;

pub struct RedisTransport {
    client: redis::Client,
    publisher: redis::aio::ConnectionManager,
}

impl RedisTransport {
    /// Connect the publisher role.
    ///
    /// `redis_url` is a standard Redis connection string, e.g.
    /// `redis://127.0.0.1:6379`.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).map_err(unavailable)?;
        let publisher = redis::aio::ConnectionManager::new(client.clone())
            .await
            .map_err(unavailable)?;
        info!("connected to redis bus");
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl Transport for RedisTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<usize> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(channel, payload).await.map_err(unavailable)?;
        Ok(usize::try_from(receivers).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(unavailable)?;
        pubsub.subscribe(channel).await.map_err(unavailable)?;

        let wanted = channel.to_string();
        let stream = pubsub.into_on_message().filter_map(move |msg| {
            let payload = if msg.get_channel_name() != wanted {
                None
            } else {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        warn!(channel = %wanted, error = %e, "non-utf8 redis payload");
                        None
                    }
                }
            };
            futures::future::ready(payload)
        });
        Ok(stream.boxed())
    }
}

fn unavailable(e: redis::RedisError) -> Error {
    Error::BusUnavailable(e.to_string())
}
