//! Server metrics for observability
//!
//! Connection and publish counters for the HTTP/WebSocket front end. The
//! dispatcher keeps its own counters; `/metrics` reports both.

use channel_hub::StatsSnapshot;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// WebSocket upgrades that were attached to the dispatcher
    pub connections_accepted: AtomicU64,
    /// Upgrades that failed to attach (dispatcher stopped)
    pub connect_failures: AtomicU64,

    // Publish metrics
    /// Messages accepted by the publish endpoint
    pub messages_published: AtomicU64,
    /// Publish requests turned away
    pub publish_rejected: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn connection_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connect_failed(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_rejected(&self) {
        self.publish_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot, folding in the dispatcher's counters
    pub fn snapshot(&self, dispatcher: StatsSnapshot) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                accepted: self.connections_accepted.load(Ordering::Relaxed),
                failed: self.connect_failures.load(Ordering::Relaxed),
                active: dispatcher.active_clients,
            },
            publish: PublishMetrics {
                accepted: self.messages_published.load(Ordering::Relaxed),
                rejected: self.publish_rejected.load(Ordering::Relaxed),
            },
            dispatcher,
        }
    }
}

/// Snapshot of all metrics (serializable)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub publish: PublishMetrics,
    pub dispatcher: StatsSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub accepted: u64,
    pub failed: u64,
    pub active: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishMetrics {
    pub accepted: u64,
    pub rejected: u64,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub dispatcher_running: bool,
    pub shards: usize,
    pub connections: u64,
    pub uptime_secs: u64,
}
