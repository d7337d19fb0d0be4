//! Presence observer
//!
//! Invoked synchronously from inside the dispatcher loop whenever a keyed
//! client joins or leaves the heartbeat channel. Implementations must not
//! block: every channel's delivery waits on the callback.

/// Receives `(key, online)` transitions for heartbeat clients.
pub trait PresenceObserver: Send + Sync + 'static {
    fn on_heartbeat(&self, key: &str, online: bool);
}

impl<F> PresenceObserver for F
where
    F: Fn(&str, bool) + Send + Sync + 'static,
{
    fn on_heartbeat(&self, key: &str, online: bool) {
        self(key, online)
    }
}

/// Observer that ignores every transition.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PresenceObserver for NoopObserver {
    fn on_heartbeat(&self, _key: &str, _online: bool) {}
}
