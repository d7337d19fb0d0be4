//! Dispatcher counters
//!
//! Written only from the dispatcher loop, read from anywhere.

use serde::{Deserialize, Serialize};
use std::ops::Add;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DispatchStats {
    /// Clients currently in the registry
    pub active_clients: AtomicU64,
    /// Register commands that added a client
    pub clients_registered: AtomicU64,
    /// Unregister commands that removed a client
    pub clients_unregistered: AtomicU64,
    /// Clients removed because their outbound queue was full or closed
    pub clients_dropped: AtomicU64,
    /// Envelopes fanned out (including presence notices)
    pub broadcasts: AtomicU64,
    /// Frames enqueued onto client queues
    pub frames_delivered: AtomicU64,
    /// Broadcasts dropped before delivery (unsupported kind, bad payload)
    pub messages_rejected: AtomicU64,
    /// Observer invocations
    pub presence_events: AtomicU64,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn client_registered(&self) {
        self.active_clients.fetch_add(1, Ordering::Relaxed);
        self.clients_registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_unregistered(&self) {
        self.active_clients.fetch_sub(1, Ordering::Relaxed);
        self.clients_unregistered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_dropped(&self) {
        self.active_clients.fetch_sub(1, Ordering::Relaxed);
        self.clients_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Registry cleared on shutdown.
    pub fn clients_cleared(&self, count: usize) {
        self.active_clients
            .fetch_sub(count as u64, Ordering::Relaxed);
    }

    pub fn broadcast(&self, delivered: usize) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.frames_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
    }

    pub fn message_rejected(&self) {
        self.messages_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn presence_event(&self) {
        self.presence_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            active_clients: self.active_clients.load(Ordering::Relaxed),
            clients_registered: self.clients_registered.load(Ordering::Relaxed),
            clients_unregistered: self.clients_unregistered.load(Ordering::Relaxed),
            clients_dropped: self.clients_dropped.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            messages_rejected: self.messages_rejected.load(Ordering::Relaxed),
            presence_events: self.presence_events.load(Ordering::Relaxed),
        }
    }
}

/// Serializable view of [`DispatchStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub active_clients: u64,
    pub clients_registered: u64,
    pub clients_unregistered: u64,
    pub clients_dropped: u64,
    pub broadcasts: u64,
    pub frames_delivered: u64,
    pub messages_rejected: u64,
    pub presence_events: u64,
}

// Summing snapshots across shards.
impl Add for StatsSnapshot {
    type Output = StatsSnapshot;

    fn add(self, other: StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            active_clients: self.active_clients + other.active_clients,
            clients_registered: self.clients_registered + other.clients_registered,
            clients_unregistered: self.clients_unregistered + other.clients_unregistered,
            clients_dropped: self.clients_dropped + other.clients_dropped,
            broadcasts: self.broadcasts + other.broadcasts,
            frames_delivered: self.frames_delivered + other.frames_delivered,
            messages_rejected: self.messages_rejected + other.messages_rejected,
            presence_events: self.presence_events + other.presence_events,
        }
    }
}
