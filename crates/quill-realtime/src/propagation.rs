//! Cross-process event propagation.
//!
//! Producers publish an [`Envelope`] to the bus; every gateway process,
//! including the one that published, is subscribed and delivers the
//! envelope to the sockets it holds. No process special-cases itself.
//!
//! Construction is two-phase:
//! 1. [`PendingPropagation::new`] subscribes to all three channels. Incoming
//!    envelopes wait in the subscription until dispatch starts.
//! 2. [`PendingPropagation::attach_server`] hands over this process's
//!    [`SocketServer`] and starts one dispatcher task per channel. Only the
//!    resulting [`PropagationService`] can broadcast.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use quill_core::Result;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::BusClient;
use crate::envelope::{BroadcastEvent, Channel, Envelope, TargetedEvent};
use crate::registry::ConnectionRegistry;
use crate::server::SocketServer;

/// First delay before resubscribing a channel whose stream ended.
const RESUBSCRIBE_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// Upper bound on the resubscribe delay.
const RESUBSCRIBE_MAX_BACKOFF: Duration = Duration::from_secs(5);

// ── PendingPropagation ───────────────────────────────────────────────

/// Subscribed, but not yet dispatching.
pub struct PendingPropagation {
    bus: BusClient,
    registry: Arc<ConnectionRegistry>,
    subscriptions: Vec<(Channel, BoxStream<'static, Envelope>)>,
}

impl PendingPropagation {
    /// Subscribe to the SEND, EMIT_ALL and EMIT_AUTHENTICATED channels.
    pub async fn new(bus: BusClient, registry: Arc<ConnectionRegistry>) -> Result<Self> {
        let mut subscriptions = Vec::with_capacity(Channel::ALL.len());
        for channel in Channel::ALL {
            let stream = bus.subscribe::<Envelope>(channel.name()).await?;
            subscriptions.push((channel, stream));
        }
        info!(channels = subscriptions.len(), "propagation subscribed");
        Ok(Self {
            bus,
            registry,
            subscriptions,
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Publish a targeted event. Needs only the bus, so it is available
    /// before the server is attached.
    pub async fn propagate_event(&self, event: TargetedEvent) -> Result<bool> {
        publish_targeted(&self.bus, event).await
    }

    /// Attach this process's socket server and start dispatching.
    ///
    /// Must run inside a Tokio runtime.
    pub fn attach_server(self, server: Arc<SocketServer>) -> PropagationService {
        let dispatcher = Arc::new(Dispatcher {
            registry: self.registry.clone(),
            server: server.clone(),
        });

        let tasks = self
            .subscriptions
            .into_iter()
            .map(|(channel, stream)| {
                tokio::spawn(run_dispatch_loop(
                    self.bus.clone(),
                    channel,
                    stream,
                    dispatcher.clone(),
                ))
            })
            .collect();

        info!("propagation attached to socket server");
        PropagationService {
            inner: Arc::new(Inner {
                bus: self.bus,
                registry: self.registry,
                server,
                tasks,
            }),
        }
    }
}

// ── PropagationService ───────────────────────────────────────────────

/// The attached, dispatching propagation service.
///
/// Cheap to clone. Dropping the last clone stops the dispatcher tasks.
#[derive(Clone)]
pub struct PropagationService {
    inner: Arc<Inner>,
}

struct Inner {
    bus: BusClient,
    registry: Arc<ConnectionRegistry>,
    server: Arc<SocketServer>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl PropagationService {
    /// Deliver `event` to every connection of `event.user_id`, on any
    /// process, except `event.socket_id`.
    ///
    /// Returns `Ok(false)` without publishing when the user id is missing or
    /// empty. An empty event name fails with `Error::InvalidEnvelope`, since
    /// no receiver would deliver it. A bus failure is returned as an error;
    /// it is not retried.
    pub async fn propagate_event(&self, event: TargetedEvent) -> Result<bool> {
        publish_targeted(&self.inner.bus, event).await
    }

    /// Deliver to every open connection on every process, authenticated or
    /// not. Returns the bus-reported receiver count.
    ///
    /// Fails with `Error::InvalidEnvelope` before publishing if the event
    /// name is empty.
    pub async fn emit_to_all(&self, event: BroadcastEvent) -> Result<usize> {
        let envelope = Envelope::EmitAll {
            event: event.event,
            data: event.data,
        };
        self.publish(envelope).await
    }

    /// Deliver to every authenticated connection on every process.
    pub async fn emit_to_authenticated(&self, event: BroadcastEvent) -> Result<usize> {
        let envelope = Envelope::EmitAuthenticated {
            event: event.event,
            data: event.data,
        };
        self.publish(envelope).await
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    pub fn server(&self) -> &Arc<SocketServer> {
        &self.inner.server
    }

    async fn publish(&self, envelope: Envelope) -> Result<usize> {
        envelope.validate()?;
        let channel = envelope.channel();
        let receivers = self.inner.bus.publish(channel.name(), &envelope).await?;
        debug!(channel = %channel, event = envelope.event(), receivers, "envelope published");
        Ok(receivers)
    }
}

async fn publish_targeted(bus: &BusClient, event: TargetedEvent) -> Result<bool> {
    let TargetedEvent {
        event,
        data,
        user_id,
        socket_id,
    } = event;

    let Some(user_id) = user_id.filter(|id| !id.is_empty()) else {
        debug!(event = %event, "targeted event without user id, not published");
        return Ok(false);
    };

    let envelope = Envelope::Send {
        event,
        data,
        user_id,
        origin_connection_id: socket_id,
    };
    envelope.validate()?;
    let receivers = bus.publish(Channel::Send.name(), &envelope).await?;
    debug!(event = envelope.event(), receivers, "targeted event published");
    Ok(true)
}

// ── Dispatch ─────────────────────────────────────────────────────────

/// Delivers received envelopes to connections held by this process.
pub(crate) struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    server: Arc<SocketServer>,
}

impl Dispatcher {
    #[cfg(test)]
    pub(crate) fn new(registry: Arc<ConnectionRegistry>, server: Arc<SocketServer>) -> Self {
        Self { registry, server }
    }

    /// Deliver one envelope received on `channel`. Returns how many local
    /// connections accepted it. Never fails: bad envelopes are logged and
    /// dropped.
    pub(crate) fn dispatch(&self, channel: Channel, envelope: Envelope) -> usize {
        if envelope.channel() != channel {
            warn!(
                channel = %channel,
                kind = %envelope.channel(),
                "envelope on the wrong channel, dropping"
            );
            return 0;
        }
        if let Err(e) = envelope.validate() {
            warn!(channel = %channel, error = %e, "invalid envelope, dropping");
            return 0;
        }

        match envelope {
            Envelope::Send {
                event,
                data,
                user_id,
                origin_connection_id,
            } => {
                let targets = self.registry.get(&user_id);
                let delivered = targets
                    .iter()
                    .filter(|conn| Some(conn.id) != origin_connection_id)
                    .filter(|conn| conn.emit(&event, &data))
                    .count();
                debug!(
                    user_id = %user_id,
                    event = %event,
                    local_connections = targets.len(),
                    delivered,
                    "SEND dispatched"
                );
                delivered
            }
            Envelope::EmitAll { event, data } => self.server.emit_all(&event, &data),
            Envelope::EmitAuthenticated { event, data } => {
                let targets = self.registry.get_all();
                let delivered = targets.iter().filter(|conn| conn.emit(&event, &data)).count();
                debug!(
                    event = %event,
                    local_connections = targets.len(),
                    delivered,
                    "EMIT_AUTHENTICATED dispatched"
                );
                delivered
            }
        }
    }
}

/// Drain one channel's subscription, dispatching envelopes in delivery
/// order. If the stream ends, resubscribe with backoff and carry on.
async fn run_dispatch_loop(
    bus: BusClient,
    channel: Channel,
    mut stream: BoxStream<'static, Envelope>,
    dispatcher: Arc<Dispatcher>,
) {
    loop {
        while let Some(envelope) = stream.next().await {
            dispatcher.dispatch(channel, envelope);
        }
        warn!(channel = %channel, "bus subscription ended, resubscribing");
        stream = resubscribe(&bus, channel).await;
    }
}

async fn resubscribe(bus: &BusClient, channel: Channel) -> BoxStream<'static, Envelope> {
    let mut backoff = RESUBSCRIBE_INITIAL_BACKOFF;
    loop {
        tokio::time::sleep(backoff).await;
        match bus.subscribe::<Envelope>(channel.name()).await {
            Ok(stream) => {
                info!(channel = %channel, "bus subscription restored");
                return stream;
            }
            Err(e) => {
                backoff = (backoff * 2).min(RESUBSCRIBE_MAX_BACKOFF);
                warn!(
                    channel = %channel,
                    error = %e,
                    retry_in_ms = backoff.as_millis() as u64,
                    "resubscribe failed"
                );
            }
        }
    }
}
