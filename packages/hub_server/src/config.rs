use anyhow::{Context, Result};
use channel_hub::{DEFAULT_QUEUE_CAPACITY, DispatcherConfig, PumpConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

// =============================================================================
// File config (figment-deserialized from defaults / hub.toml / env vars)
// =============================================================================
//
//   hub.toml:        [dispatcher]
//                    queue_capacity = 128
//
//   env var:         HUB_DISPATCHER__QUEUE_CAPACITY=128   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub dispatcher: DispatcherFileConfig,
}

/// Listener settings (lives under `[server]` in hub.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Dispatcher tunables (lives under `[dispatcher]` in hub.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatcherFileConfig {
    #[serde(default = "default_shards")]
    pub shards: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_command_capacity")]
    pub command_capacity: usize,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    /// 0 disables keepalive pings
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// 0 disables the idle read deadline
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for DispatcherFileConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            queue_capacity: default_queue_capacity(),
            command_capacity: default_command_capacity(),
            write_timeout_secs: default_write_timeout_secs(),
            ping_interval_secs: default_ping_interval_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_shards() -> usize {
    1
}
fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}
fn default_command_capacity() -> usize {
    channel_hub::config::DEFAULT_COMMAND_CAPACITY
}
fn default_write_timeout_secs() -> u64 {
    10
}
fn default_ping_interval_secs() -> u64 {
    54
}
fn default_idle_timeout_secs() -> u64 {
    60
}

/// Build a figment that layers: defaults → hub.toml → HUB_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `HUB_SERVER__PORT=9000`  →  `server.port = 9000`
pub fn load_config(path: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("HUB_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

/// Resolved hub configuration.
#[derive(Clone, Debug)]
pub struct HubConfig {
    pub host: String,
    pub port: u16,
    pub shards: usize,
    pub dispatcher: DispatcherConfig,
}

impl HubConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        let d = &fc.dispatcher;
        Self {
            host: fc.server.host.clone(),
            port: fc.server.port,
            shards: d.shards.max(1),
            dispatcher: DispatcherConfig {
                queue_capacity: d.queue_capacity.max(1),
                command_capacity: d.command_capacity.max(1),
                pump: PumpConfig {
                    write_timeout: Duration::from_secs(d.write_timeout_secs.max(1)),
                    ping_interval: non_zero_secs(d.ping_interval_secs),
                    idle_timeout: non_zero_secs(d.idle_timeout_secs),
                },
            },
        }
    }

    /// Load from `path` plus the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let fc: FileConfig = load_config(path)
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        Ok(Self::from_file(&fc))
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
