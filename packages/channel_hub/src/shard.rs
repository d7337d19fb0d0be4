//! Sharded dispatcher
//!
//! Splits channels across several independent dispatcher loops. Each channel
//! lives on exactly one shard, so every registry still has a single writer.
//! The presence channels share shard 0 so a heartbeat transition and its
//! gateway notice are handled in one step.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::client::{Client, ClientId, ClientInfo};
use crate::config::DispatcherConfig;
use crate::dispatcher::{ChannelSummary, Dispatcher, DispatcherHandle};
use crate::envelope::{Envelope, GATEWAY_CHANNEL, HEARTBEAT_CHANNEL, RawEnvelope};
use crate::error::HubError;
use crate::presence::PresenceObserver;
use crate::stats::StatsSnapshot;

/// Shard index for `channel` among `shards` dispatchers.
pub fn shard_for(channel: &str, shards: usize) -> usize {
    if shards <= 1 || channel == HEARTBEAT_CHANNEL || channel == GATEWAY_CHANNEL {
        return 0;
    }
    let mut hasher = DefaultHasher::new();
    channel.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

pub struct ShardedDispatcher {
    shards: Vec<Dispatcher>,
    shutdown: CancellationToken,
}

impl ShardedDispatcher {
    /// Build `count` dispatchers (at least one) sharing one observer and one
    /// shutdown token.
    pub fn new(count: usize, config: DispatcherConfig, observer: Arc<dyn PresenceObserver>) -> Self {
        let shutdown = CancellationToken::new();
        let shards = (0..count.max(1))
            .map(|_| {
                Dispatcher::with_shutdown(config.clone(), observer.clone(), shutdown.child_token())
            })
            .collect();
        Self { shards, shutdown }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn start(&mut self) -> ShardedHandle {
        let handles: Vec<DispatcherHandle> =
            self.shards.iter_mut().map(Dispatcher::start).collect();
        ShardedHandle {
            shards: handles.into(),
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn handle(&self) -> ShardedHandle {
        ShardedHandle {
            shards: self.shards.iter().map(Dispatcher::handle).collect(),
            shutdown: self.shutdown.clone(),
        }
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Wait for every shard loop to exit.
    pub async fn stopped(&mut self) {
        for shard in &mut self.shards {
            shard.stopped().await;
        }
    }
}

/// Cloneable handle that routes each call to the owning shard.
#[derive(Clone)]
pub struct ShardedHandle {
    shards: Arc<[DispatcherHandle]>,
    shutdown: CancellationToken,
}

impl ShardedHandle {
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard_index(&self, channel: &str) -> usize {
        shard_for(channel, self.shards.len())
    }

    /// Dispatcher that owns `channel`.
    pub fn handle_for(&self, channel: &str) -> &DispatcherHandle {
        &self.shards[self.shard_index(channel)]
    }

    pub async fn register(&self, client: Client) -> Result<(), HubError> {
        self.handle_for(client.channel()).register(client).await
    }

    pub async fn unregister(&self, client: ClientInfo) -> Result<(), HubError> {
        self.handle_for(&client.channel).unregister(client).await
    }

    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), HubError> {
        self.handle_for(&envelope.channel).broadcast(envelope).await
    }

    pub async fn broadcast_raw(&self, raw: RawEnvelope) -> Result<(), HubError> {
        self.handle_for(&raw.channel).broadcast_raw(raw).await
    }

    pub async fn is_subscribed(&self, channel: &str, id: ClientId) -> Result<bool, HubError> {
        self.handle_for(channel).is_subscribed(channel, id).await
    }

    pub async fn subscriber_count(&self, channel: &str) -> Result<usize, HubError> {
        self.handle_for(channel).subscriber_count(channel).await
    }

    /// Channels across all shards, sorted by name.
    pub async fn channels(&self) -> Result<Vec<ChannelSummary>, HubError> {
        let mut all = Vec::new();
        for shard in self.shards.iter() {
            all.extend(shard.channels().await?);
        }
        all.sort();
        Ok(all)
    }

    /// Counters summed over every shard.
    pub fn stats(&self) -> StatsSnapshot {
        self.shards
            .iter()
            .map(DispatcherHandle::stats)
            .fold(StatsSnapshot::default(), |acc, s| acc + s)
    }

    pub fn config(&self) -> &DispatcherConfig {
        self.shards[0].config()
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.shards.iter().all(DispatcherHandle::is_running)
    }
}
