//! Dispatcher and pump tuning
//!
//! Plain structs with defaults. Loading them from files or the environment
//! is left to the embedding server.

use std::time::Duration;

/// Outbound frames a client may have queued before it is dropped as too slow.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Commands that may wait for the dispatcher loop before senders are parked.
pub const DEFAULT_COMMAND_CAPACITY: usize = 1024;

/// Dispatcher tuning.
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Capacity of each client's outbound queue. A full queue at delivery
    /// time disconnects the client.
    pub queue_capacity: usize,
    /// Capacity of the dispatcher's command channel.
    pub command_capacity: usize,
    pub pump: PumpConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            pump: PumpConfig::default(),
        }
    }
}

/// Per-connection I/O pump timing.
#[derive(Clone, Debug)]
pub struct PumpConfig {
    /// Upper bound on a single socket write.
    pub write_timeout: Duration,
    /// Keepalive ping period (None = never ping).
    pub ping_interval: Option<Duration>,
    /// Drop the connection after this long without inbound traffic (None = never).
    pub idle_timeout: Option<Duration>,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(10),
            ping_interval: Some(Duration::from_secs(54)),
            idle_timeout: Some(Duration::from_secs(60)),
        }
    }
}
