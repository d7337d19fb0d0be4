//! Channel hub
//!
//! An in-process pub/sub dispatcher. Clients subscribe to one named channel
//! each; envelopes broadcast on a channel are rendered once and offered to
//! every subscriber's bounded outbound queue. A subscriber whose queue is full
//! is disconnected instead of slowing the others down.
//!
//! Keyed clients on the `heartbeat` channel drive presence: joining or leaving
//! calls the [`PresenceObserver`] and then broadcasts a presence notice on the
//! `gateway` channel.
//!
//! ```no_run
//! use std::sync::Arc;
//! use channel_hub::{Dispatcher, DispatcherConfig, Envelope, NoopObserver};
//!
//! # async fn demo() -> Result<(), channel_hub::HubError> {
//! let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), Arc::new(NoopObserver));
//! let handle = dispatcher.start();
//! handle.broadcast(Envelope::text("orders", "created", "o-1")).await?;
//! dispatcher.stop();
//! dispatcher.stopped().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connect;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod presence;
pub mod registry;
pub mod shard;
pub mod stats;

pub use client::{Client, ClientId, ClientInfo, ClientQueue, Inbound, Outbound};
pub use config::{DEFAULT_QUEUE_CAPACITY, DispatcherConfig, PumpConfig};
pub use connect::connect;
pub use dispatcher::{ChannelSummary, Dispatcher, DispatcherHandle};
pub use envelope::{
    Envelope, Frame, GATEWAY_CHANNEL, HEARTBEAT_CHANNEL, Payload, PayloadKind, PresenceUpdate,
    RawEnvelope,
};
pub use error::HubError;
pub use presence::{NoopObserver, PresenceObserver};
pub use shard::{ShardedDispatcher, ShardedHandle, shard_for};
pub use stats::StatsSnapshot;
