//! In-process transport backed by `tokio::sync::broadcast`.
//!
//! One broadcast channel per channel name, lazily created on first publish
//! or subscribe. Several gateways sharing one `MemoryTransport` behave like
//! a cluster on a shared backplane, which is how the fan-out tests run.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use quill_core::Result;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use super::Transport;

/// Default broadcast channel capacity per channel name.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

pub struct MemoryTransport {
    channels: DashMap<String, broadcast::Sender<String>>,
    capacity: usize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Subscribers that fall more than `capacity` messages behind skip
    /// ahead and log the gap.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Number of live subscriptions on a channel.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .get(channel)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .value()
            .clone()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, channel: &str, payload: String) -> Result<usize> {
        // send() fails only when nobody is subscribed, which is not an error.
        Ok(self.sender(channel).send(payload).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>> {
        let rx = self.sender(channel).subscribe();
        let channel = channel.to_string();
        let stream = BroadcastStream::new(rx).filter_map(move |item| {
            let payload = match item {
                Ok(payload) => Some(payload),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(channel = %channel, skipped, "bus subscriber lagged");
                    None
                }
            };
            futures::future::ready(payload)
        });
        Ok(stream.boxed())
    }
}
