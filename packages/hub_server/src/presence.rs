//! Presence tracking
//!
//! Keeps a live-connection count per heartbeat key. Called from inside the
//! dispatcher loop, so the lock is only ever held for a map update.

use channel_hub::PresenceObserver;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Default)]
pub struct PresenceTracker {
    online: Mutex<HashMap<String, usize>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_online(&self, key: &str) -> bool {
        self.online
            .lock()
            .map(|online| online.contains_key(key))
            .unwrap_or(false)
    }

    /// Keys with at least one live heartbeat connection, sorted.
    pub fn online_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = match self.online.lock() {
            Ok(online) => online.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        keys.sort();
        keys
    }

    pub fn connection_count(&self, key: &str) -> usize {
        self.online
            .lock()
            .ok()
            .and_then(|online| online.get(key).copied())
            .unwrap_or(0)
    }
}

impl PresenceObserver for PresenceTracker {
    fn on_heartbeat(&self, key: &str, online: bool) {
        let Ok(mut map) = self.online.lock() else {
            return;
        };
        if online {
            let count = map.entry(key.to_string()).or_insert(0);
            *count += 1;
            if *count == 1 {
                info!(key = %key, "Key is online");
            }
        } else if let Some(count) = map.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                map.remove(key);
                info!(key = %key, "Key is offline");
            }
        }
    }
}
