//! Dispatcher
//!
//! A single task owns the [`Registry`] and applies register, unregister and
//! broadcast commands one at a time. Nothing else touches the registry, so it
//! needs no lock. Everything outside the loop talks to it through a cloneable
//! [`DispatcherHandle`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{Client, ClientId, ClientInfo};
use crate::config::DispatcherConfig;
use crate::envelope::{Envelope, RawEnvelope};
use crate::error::HubError;
use crate::presence::PresenceObserver;
use crate::registry::Registry;
use crate::stats::{DispatchStats, StatsSnapshot};

/// Commands accepted by the dispatcher loop
#[derive(Debug)]
pub(crate) enum Command {
    Register(Client),
    Unregister(ClientInfo),
    Broadcast(Envelope),
    BroadcastRaw(RawEnvelope),
    Contains {
        channel: String,
        id: ClientId,
        respond_to: oneshot::Sender<bool>,
    },
    SubscriberCount {
        channel: String,
        respond_to: oneshot::Sender<usize>,
    },
    Channels {
        respond_to: oneshot::Sender<Vec<ChannelSummary>>,
    },
}

/// A channel and how many clients are subscribed to it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub name: String,
    pub subscribers: usize,
}

/// Owner of a dispatcher loop: construct, start, stop.
pub struct Dispatcher {
    handle: DispatcherHandle,
    actor: Option<DispatcherActor>,
    task: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Build a dispatcher. The loop does not run until [`Dispatcher::start`].
    pub fn new(config: DispatcherConfig, observer: Arc<dyn PresenceObserver>) -> Self {
        Self::with_shutdown(config, observer, CancellationToken::new())
    }

    /// Build a dispatcher that also stops when `shutdown` is cancelled.
    pub fn with_shutdown(
        config: DispatcherConfig,
        observer: Arc<dyn PresenceObserver>,
        shutdown: CancellationToken,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.command_capacity.max(1));
        let stats = Arc::new(DispatchStats::new());
        let actor = DispatcherActor {
            registry: Registry::new(),
            announced: HashMap::new(),
            observer,
            stats: stats.clone(),
            receiver,
            shutdown: shutdown.clone(),
        };
        Self {
            handle: DispatcherHandle {
                sender,
                shutdown,
                stats,
                config: Arc::new(config),
            },
            actor: Some(actor),
            task: None,
        }
    }

    /// Spawn the event loop. Calling it again is a no-op.
    pub fn start(&mut self) -> DispatcherHandle {
        if let Some(actor) = self.actor.take() {
            self.task = Some(tokio::spawn(actor.run()));
        }
        self.handle.clone()
    }

    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    /// Signal the loop and every client pump to stop.
    pub fn stop(&self) {
        self.handle.stop();
    }

    /// Wait for the loop to exit after [`Dispatcher::stop`].
    pub async fn stopped(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("dispatcher task failed: {}", e);
            }
        }
    }
}

/// Cloneable entry point into a running dispatcher.
///
/// Every method hands a command to the loop and returns without waiting for
/// it to be applied. Queries round-trip through the loop, so their answer
/// reflects every command this handle sent before them.
#[derive(Clone)]
pub struct DispatcherHandle {
    sender: mpsc::Sender<Command>,
    shutdown: CancellationToken,
    stats: Arc<DispatchStats>,
    config: Arc<DispatcherConfig>,
}

impl DispatcherHandle {
    pub async fn register(&self, client: Client) -> Result<(), HubError> {
        self.send(Command::Register(client)).await
    }

    /// Remove a client. A heartbeat client goes offline only if it was
    /// announced online and has not gone offline already, so repeated
    /// unregisters produce a single `offline`.
    pub async fn unregister(&self, client: ClientInfo) -> Result<(), HubError> {
        self.send(Command::Unregister(client)).await
    }

    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), HubError> {
        self.send(Command::Broadcast(envelope)).await
    }

    /// Broadcast an untyped envelope. An unsupported kind is dropped and
    /// logged inside the loop; the caller is never told.
    pub async fn broadcast_raw(&self, raw: RawEnvelope) -> Result<(), HubError> {
        self.send(Command::BroadcastRaw(raw)).await
    }

    pub async fn is_subscribed(&self, channel: &str, id: ClientId) -> Result<bool, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Contains {
            channel: channel.to_string(),
            id,
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| HubError::DispatcherStopped)
    }

    pub async fn subscriber_count(&self, channel: &str) -> Result<usize, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SubscriberCount {
            channel: channel.to_string(),
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| HubError::DispatcherStopped)
    }

    pub async fn channels(&self) -> Result<Vec<ChannelSummary>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Channels { respond_to: tx }).await?;
        rx.await.map_err(|_| HubError::DispatcherStopped)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled() && !self.sender.is_closed()
    }

    /// Token cancelled when the dispatcher stops. Client pumps hang child
    /// tokens off it.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        if self.shutdown.is_cancelled() {
            return Err(HubError::DispatcherStopped);
        }
        self.sender
            .send(command)
            .await
            .map_err(|_| HubError::DispatcherStopped)
    }
}

struct DispatcherActor {
    registry: Registry,
    /// Heartbeat clients announced online, with their keys
    announced: HashMap<ClientId, String>,
    observer: Arc<dyn PresenceObserver>,
    stats: Arc<DispatchStats>,
    receiver: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
}

impl DispatcherActor {
    async fn run(mut self) {
        info!("Dispatcher started");

        loop {
            let command = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = self.receiver.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.handle(command);
        }

        self.receiver.close();
        // Pair every outstanding online before the gateway clients go away.
        let mut announced: Vec<(ClientId, String)> = self.announced.drain().collect();
        announced.sort();
        for (_, key) in announced {
            self.announce(&key, false);
        }
        let dropped = self.registry.clear();
        self.stats.clients_cleared(dropped);
        info!("Dispatcher stopped ({} clients disconnected)", dropped);
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register(client) => self.register(client),
            Command::Unregister(info) => self.unregister(&info),
            Command::Broadcast(envelope) => self.deliver(&envelope),
            Command::BroadcastRaw(raw) => {
                let channel = raw.channel.clone();
                match raw.resolve() {
                    Ok(envelope) => self.deliver(&envelope),
                    Err(e) => {
                        self.stats.message_rejected();
                        warn!(channel = %channel, "Dropping broadcast: {}", e);
                    }
                }
            }
            Command::Contains {
                channel,
                id,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.contains(&channel, id));
            }
            Command::SubscriberCount {
                channel,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.subscriber_count(&channel));
            }
            Command::Channels { respond_to } => {
                let mut channels: Vec<ChannelSummary> = self
                    .registry
                    .channels()
                    .map(|(name, subscribers)| ChannelSummary {
                        name: name.to_string(),
                        subscribers,
                    })
                    .collect();
                channels.sort();
                let _ = respond_to.send(channels);
            }
        }
    }

    fn register(&mut self, client: Client) {
        let info = client.info().clone();
        if !self.registry.insert(client) {
            debug!(channel = %info.channel, client = %info.id, "Client already registered");
            return;
        }
        self.stats.client_registered();
        info!(channel = %info.channel, client = %info.id, "Registered client");

        if let Some(key) = info.presence_key() {
            if !self.announced.contains_key(&info.id) {
                self.announced.insert(info.id, key.to_string());
                self.announce(key, true);
            }
        }
    }

    fn unregister(&mut self, info: &ClientInfo) {
        // Dropping the removed client closes its queue.
        if self.registry.remove(&info.channel, info.id).is_some() {
            self.stats.client_unregistered();
            info!(channel = %info.channel, client = %info.id, "Unregistered client");
        }

        if let Some(key) = self.announced.remove(&info.id) {
            self.announce(&key, false);
        }
    }

    fn announce(&mut self, key: &str, online: bool) {
        self.stats.presence_event();
        self.observer.on_heartbeat(key, online);
        self.deliver(&Envelope::presence(key, online));
    }

    fn deliver(&mut self, envelope: &Envelope) {
        let frame = match envelope.render() {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.message_rejected();
                error!(channel = %envelope.channel, "Failed to render frame: {}", e);
                return;
            }
        };

        let delivery = self.registry.deliver(&envelope.channel, &frame);
        self.stats.broadcast(delivery.delivered);

        for id in &delivery.overflowed {
            self.stats.client_dropped();
            warn!(
                channel = %envelope.channel,
                client = %id,
                "Outbound queue full, disconnecting client"
            );
        }
        for id in &delivery.disconnected {
            self.stats.client_dropped();
            debug!(channel = %envelope.channel, client = %id, "Client queue already closed");
        }
        for id in delivery.overflowed.iter().chain(&delivery.disconnected) {
            if let Some(key) = self.announced.remove(id) {
                self.announce(&key, false);
            }
        }

        debug!(
            channel = %envelope.channel,
            operation = %envelope.operation,
            kind = %envelope.kind(),
            delivered = delivery.delivered,
            "Broadcast delivered"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{GATEWAY_CHANNEL, HEARTBEAT_CHANNEL};
    use crate::presence::NoopObserver;
    use std::sync::Mutex;
    use tokio::sync::mpsc::error::TryRecvError;

    fn started(observer: Arc<dyn PresenceObserver>) -> (Dispatcher, DispatcherHandle) {
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), observer);
        let handle = dispatcher.start();
        (dispatcher, handle)
    }

    fn frame_json(frame: &crate::envelope::Frame) -> serde_json::Value {
        serde_json::from_str(frame.as_str()).unwrap()
    }

    #[tokio::test]
    async fn test_register_then_unregister() {
        let (_dispatcher, handle) = started(Arc::new(NoopObserver));
        let (client, mut queue) = Client::new("orders", None, 4);
        let info = client.info().clone();

        handle.register(client).await.unwrap();
        assert!(handle.is_subscribed("orders", info.id).await.unwrap());

        handle.unregister(info.clone()).await.unwrap();
        assert!(!handle.is_subscribed("orders", info.id).await.unwrap());
        assert_eq!(handle.subscriber_count("orders").await.unwrap(), 0);

        // queue closed by the unregister
        assert_eq!(queue.recv().await, None);
    }

    #[tokio::test]
    async fn test_unregister_unknown_client_is_noop() {
        let (_dispatcher, handle) = started(Arc::new(NoopObserver));
        let (client, _queue) = Client::new("orders", None, 4);
        let info = client.info().clone();
        drop(client);

        handle.unregister(info).await.unwrap();
        assert!(handle.channels().await.unwrap().is_empty());
        assert_eq!(handle.stats().clients_unregistered, 0);
    }

    #[tokio::test]
    async fn test_presence_fires_before_gateway_delivery() {
        let (gateway, gateway_queue) = Client::new(GATEWAY_CHANNEL, None, 8);
        let gateway_queue = Arc::new(Mutex::new(gateway_queue));
        let events = Arc::new(Mutex::new(Vec::new()));

        let observer_queue = gateway_queue.clone();
        let observer_events = events.clone();
        let observer = move |key: &str, online: bool| {
            // the gateway frame must not be queued yet when the observer runs
            let empty = matches!(
                observer_queue.lock().unwrap().try_recv(),
                Err(TryRecvError::Empty)
            );
            observer_events
                .lock()
                .unwrap()
                .push((key.to_string(), online, empty));
        };

        let (_dispatcher, handle) = started(Arc::new(observer));
        handle.register(gateway).await.unwrap();

        let (heartbeat, _hb_queue) = Client::new(HEARTBEAT_CHANNEL, Some("K".into()), 4);
        let info = heartbeat.info().clone();
        handle.register(heartbeat).await.unwrap();
        handle.subscriber_count(GATEWAY_CHANNEL).await.unwrap();

        let online = gateway_queue.lock().unwrap().try_recv().unwrap();
        let value = frame_json(&online);
        assert_eq!(value["operation"], "online");
        assert_eq!(value["data"]["key"], "K");

        handle.unregister(info).await.unwrap();
        handle.subscriber_count(GATEWAY_CHANNEL).await.unwrap();

        let offline = gateway_queue.lock().unwrap().try_recv().unwrap();
        let value = frame_json(&offline);
        assert_eq!(value["operation"], "offline");
        assert_eq!(value["data"]["key"], "K");

        assert_eq!(
            *events.lock().unwrap(),
            vec![("K".to_string(), true, true), ("K".to_string(), false, true)]
        );
    }

    #[tokio::test]
    async fn test_heartbeat_without_key_is_silent() {
        let events = Arc::new(Mutex::new(Vec::<(String, bool)>::new()));
        let sink = events.clone();
        let (_dispatcher, handle) = started(Arc::new(move |key: &str, online: bool| {
            sink.lock().unwrap().push((key.to_string(), online))
        }));

        let (client, _queue) = Client::new(HEARTBEAT_CHANNEL, None, 4);
        let info = client.info().clone();
        handle.register(client).await.unwrap();
        handle.unregister(info).await.unwrap();
        handle.channels().await.unwrap();

        assert!(events.lock().unwrap().is_empty());
        assert_eq!(handle.stats().presence_events, 0);
    }

    #[tokio::test]
    async fn test_dropped_heartbeat_still_goes_offline_once() {
        let events = Arc::new(Mutex::new(Vec::<(String, bool)>::new()));
        let sink = events.clone();
        let (_dispatcher, handle) = started(Arc::new(move |key: &str, online: bool| {
            sink.lock().unwrap().push((key.to_string(), online))
        }));

        let (client, _queue) = Client::new(HEARTBEAT_CHANNEL, Some("K".into()), 1);
        let info = client.info().clone();
        handle.register(client).await.unwrap();

        // saturate, then overflow
        handle
            .broadcast(Envelope::text(HEARTBEAT_CHANNEL, "beat", "1"))
            .await
            .unwrap();
        handle
            .broadcast(Envelope::text(HEARTBEAT_CHANNEL, "beat", "2"))
            .await
            .unwrap();
        assert!(!handle.is_subscribed(HEARTBEAT_CHANNEL, info.id).await.unwrap());

        // offline as soon as the client is dropped
        assert_eq!(
            *events.lock().unwrap(),
            vec![("K".to_string(), true), ("K".to_string(), false)]
        );

        // the pump's later unregisters add nothing
        handle.unregister(info.clone()).await.unwrap();
        handle.unregister(info).await.unwrap();
        handle.channels().await.unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![("K".to_string(), true), ("K".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_stop_closes_queues_and_rejects_commands() {
        let (mut dispatcher, handle) = started(Arc::new(NoopObserver));
        let (client, mut queue) = Client::new("orders", None, 4);
        handle.register(client).await.unwrap();
        handle.subscriber_count("orders").await.unwrap();

        assert!(handle.is_running());
        dispatcher.stop();
        dispatcher.stopped().await;

        assert!(!handle.is_running());
        assert_eq!(queue.recv().await, None);
        assert!(matches!(
            handle
                .broadcast(Envelope::text("orders", "created", "x"))
                .await,
            Err(HubError::DispatcherStopped)
        ));
        assert_eq!(handle.stats().active_clients, 0);
    }

    #[tokio::test]
    async fn test_stop_sends_offline_for_announced_heartbeats() {
        let events = Arc::new(Mutex::new(Vec::<(String, bool)>::new()));
        let sink = events.clone();
        let (mut dispatcher, handle) = started(Arc::new(move |key: &str, online: bool| {
            sink.lock().unwrap().push((key.to_string(), online))
        }));

        let (gateway, mut gateway_queue) = Client::new(GATEWAY_CHANNEL, None, 8);
        handle.register(gateway).await.unwrap();
        let (heartbeat, _hb_queue) = Client::new(HEARTBEAT_CHANNEL, Some("K".into()), 4);
        let info = heartbeat.info().clone();
        handle.register(heartbeat).await.unwrap();
        handle.channels().await.unwrap();

        dispatcher.stop();
        dispatcher.stopped().await;

        // what a read pump does once its socket is torn down
        assert!(matches!(
            handle.unregister(info).await,
            Err(HubError::DispatcherStopped)
        ));
        assert_eq!(
            *events.lock().unwrap(),
            vec![("K".to_string(), true), ("K".to_string(), false)]
        );

        let online = gateway_queue.recv().await.unwrap();
        assert_eq!(frame_json(&online)["operation"], "online");
        let offline = gateway_queue.recv().await.unwrap();
        assert_eq!(frame_json(&offline)["operation"], "offline");
        assert_eq!(gateway_queue.recv().await, None);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), Arc::new(NoopObserver));
        let first = dispatcher.start();
        let second = dispatcher.start();

        let (client, _queue) = Client::new("orders", None, 4);
        first.register(client).await.unwrap();
        assert_eq!(second.subscriber_count("orders").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_commands_before_start_are_buffered() {
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default(), Arc::new(NoopObserver));
        let handle = dispatcher.handle();

        let (client, _queue) = Client::new("orders", None, 4);
        handle.register(client).await.unwrap();

        dispatcher.start();
        assert_eq!(handle.subscriber_count("orders").await.unwrap(), 1);
    }
}
