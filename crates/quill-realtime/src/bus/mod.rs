//! Publish/subscribe backplane used to move envelopes between processes.
//!
//! [`Transport`] is the raw, string-payload seam; [`BusClient`] layers JSON
//! (de)serialization on top. Two transports ship:
//! - [`memory::MemoryTransport`] -- in-process broadcast channels (default).
//! - `redis_pubsub::RedisTransport` -- Redis PUBLISH/SUBSCRIBE, behind the
//!   `redis` feature.

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_pubsub;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use quill_core::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// Channel-based publish/subscribe transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Publish a raw payload. Returns how many subscribers the transport
    /// reports as having received it.
    async fn publish(&self, channel: &str, payload: String) -> Result<usize>;

    /// Subscribe to a channel. The stream yields only payloads published on
    /// `channel` after this call resolves, and ends if the transport drops
    /// the subscription.
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>>;
}

/// Typed JSON client over a [`Transport`].
///
/// Cheap to clone; every clone shares the same underlying publisher and
/// subscriber connections.
#[derive(Clone)]
pub struct BusClient {
    transport: Arc<dyn Transport>,
}

impl BusClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Serialize `value` and publish it on `channel`.
    pub async fn publish<T>(&self, channel: &str, value: &T) -> Result<usize>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_string(value)?;
        self.transport.publish(channel, payload).await
    }

    /// Subscribe to `channel`, yielding deserialized payloads.
    ///
    /// Payloads that fail to deserialize are logged and skipped so a single
    /// poison message cannot end the stream.
    pub async fn subscribe<T>(&self, channel: &str) -> Result<BoxStream<'static, T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let raw = self.transport.subscribe(channel).await?;
        let channel = channel.to_string();
        let typed = raw.filter_map(move |payload| {
            let decoded = match serde_json::from_str::<T>(&payload) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(
                        channel = %channel,
                        error = %e,
                        bytes = payload.len(),
                        "dropping undecodable bus message"
                    );
                    None
                }
            };
            futures::future::ready(decoded)
        });
        Ok(typed.boxed())
    }
}
