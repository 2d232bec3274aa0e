#![allow(clippy::new_without_default)]

//! # quill-realtime
//!
//! Real-time notification fan-out for the Quill backend.
//!
//! Every gateway process keeps its own [`ConnectionRegistry`] of live
//! sockets keyed by user id. Producers never touch the registry directly:
//! they publish an [`Envelope`] through the [`PropagationService`], the bus
//! fans it out to every process (the publisher included), and each process
//! delivers it to the sockets it holds.

pub mod adapter;
pub mod auth;
pub mod bus;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod frame;
pub mod gateway;
pub mod handshake;
pub mod health;
pub mod propagation;
pub mod registry;
pub mod relay;
pub mod server;
pub mod ws;

pub use adapter::ConnectionAdapter;
pub use auth::{AccessTokenValidator, JwtValidator};
pub use bus::{memory::MemoryTransport, BusClient, Transport};
pub use config::GatewayConfig;
pub use connection::Connection;
pub use envelope::{BroadcastEvent, Channel, Envelope, TargetedEvent};
pub use frame::{ClientFrame, ServerFrame};
pub use gateway::{Gateway, GatewayState};
pub use handshake::Handshake;
pub use propagation::{PendingPropagation, PropagationService};
pub use registry::ConnectionRegistry;
pub use server::SocketServer;

#[cfg(feature = "redis")]
pub use bus::redis_pubsub::RedisTransport;
