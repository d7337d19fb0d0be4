//! Clients and their I/O pumps
//!
//! A connection is split in two halves. The [`Client`] holds the only sender
//! of the outbound queue and lives in the dispatcher's registry; dropping it
//! is what closes the queue. The [`ClientQueue`] holds the receiver and is
//! drained by [`write_dispatch`]. [`read_dispatch`] watches the socket and
//! asks the dispatcher to unregister once the peer goes away.

use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PumpConfig;
use crate::dispatcher::DispatcherHandle;
use crate::envelope::{Frame, HEARTBEAT_CHANNEL};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a connection.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ClientId(pub u64);

impl ClientId {
    fn next() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Identity of a client without access to its queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub channel: String,
    pub key: Option<String>,
}

impl ClientInfo {
    /// The identity key, when this client drives presence.
    pub fn presence_key(&self) -> Option<&str> {
        if self.channel == HEARTBEAT_CHANNEL {
            self.key.as_deref()
        } else {
            None
        }
    }
}

/// Registry-side half of a connection.
#[derive(Debug)]
pub struct Client {
    info: ClientInfo,
    outbound: mpsc::Sender<Frame>,
}

impl Client {
    /// Create a client bound to `channel` with an outbound queue of `capacity` frames.
    pub fn new(
        channel: impl Into<String>,
        key: Option<String>,
        capacity: usize,
    ) -> (Client, ClientQueue) {
        let info = ClientInfo {
            id: ClientId::next(),
            channel: channel.into(),
            key,
        };
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let queue = ClientQueue {
            info: info.clone(),
            receiver,
        };
        (Client { info, outbound }, queue)
    }

    pub fn id(&self) -> ClientId {
        self.info.id
    }

    pub fn channel(&self) -> &str {
        &self.info.channel
    }

    pub fn key(&self) -> Option<&str> {
        self.info.key.as_deref()
    }

    pub fn info(&self) -> &ClientInfo {
        &self.info
    }

    /// Non-blocking enqueue. Never waits for the write pump.
    pub(crate) fn try_deliver(&self, frame: &Frame) -> Result<(), TrySendError<Frame>> {
        self.outbound.try_send(frame.clone())
    }
}

/// Consumer half of a client's outbound queue.
#[derive(Debug)]
pub struct ClientQueue {
    info: ClientInfo,
    receiver: mpsc::Receiver<Frame>,
}

impl ClientQueue {
    pub fn info(&self) -> &ClientInfo {
        &self.info
    }

    /// Next frame, or `None` once the registry has dropped the client.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Frame, TryRecvError> {
        self.receiver.try_recv()
    }
}

/// Frames written to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    Ping,
    Close,
}

/// Frames read from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    Binary(Vec<u8>),
    Ping,
    Pong,
    Close,
}

/// Drain the outbound queue into the socket, FIFO, one write at a time.
///
/// Exits when the queue closes (sending a close frame first), when a write
/// fails or exceeds `write_timeout`, or when `cancel` fires. Cancels `cancel`
/// on the way out so the read pump stops too.
pub async fn write_dispatch<S>(
    mut queue: ClientQueue,
    mut sink: S,
    config: PumpConfig,
    cancel: CancellationToken,
) where
    S: Sink<Outbound> + Unpin,
    S::Error: fmt::Display,
{
    let id = queue.info().id;
    let _guard = cancel.clone().drop_guard();
    let mut ping = config.ping_interval.map(keepalive);

    loop {
        let outbound = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(client = %id, "write pump cancelled");
                let _ = tokio::time::timeout(config.write_timeout, sink.send(Outbound::Close)).await;
                break;
            }
            frame = queue.recv() => match frame {
                Some(frame) => Outbound::Frame(frame),
                None => {
                    debug!(client = %id, "outbound queue closed");
                    let _ = tokio::time::timeout(config.write_timeout, sink.send(Outbound::Close)).await;
                    break;
                }
            },
            _ = tick(&mut ping) => Outbound::Ping,
        };

        match tokio::time::timeout(config.write_timeout, sink.send(outbound)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(client = %id, "write failed: {}", e);
                cancel.cancel();
                break;
            }
            Err(_) => {
                warn!(client = %id, "write timed out after {:?}", config.write_timeout);
                cancel.cancel();
                break;
            }
        }
    }

    // A peer that stopped reading can hold close pending forever.
    if tokio::time::timeout(config.write_timeout, sink.close()).await.is_err() {
        debug!(client = %id, "close timed out");
    }
    debug!(client = %id, "write pump exited");
}

/// Watch the socket until the peer disconnects, then unregister.
///
/// Inbound application frames carry no meaning for the dispatcher and are
/// discarded. Any inbound traffic resets the idle deadline.
pub async fn read_dispatch<R, E>(
    info: ClientInfo,
    mut stream: R,
    dispatcher: DispatcherHandle,
    idle_timeout: Option<Duration>,
    cancel: CancellationToken,
) where
    R: Stream<Item = Result<Inbound, E>> + Unpin,
    E: fmt::Display,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(client = %info.id, "read pump cancelled");
                break;
            }
            next = next_inbound(&mut stream, idle_timeout) => next,
        };

        match next {
            ReadEvent::Frame(Inbound::Close) | ReadEvent::Ended => {
                debug!(client = %info.id, "peer closed connection");
                break;
            }
            ReadEvent::Frame(Inbound::Text(text)) => {
                debug!(client = %info.id, bytes = text.len(), "ignoring inbound text");
            }
            ReadEvent::Frame(Inbound::Binary(data)) => {
                debug!(client = %info.id, bytes = data.len(), "ignoring inbound binary");
            }
            ReadEvent::Frame(Inbound::Ping | Inbound::Pong) => {}
            ReadEvent::Failed(reason) => {
                debug!(client = %info.id, "read failed: {}", reason);
                break;
            }
            ReadEvent::Idle => {
                info!(client = %info.id, "idle timeout, disconnecting");
                break;
            }
        }
    }

    cancel.cancel();
    let id = info.id;
    if dispatcher.unregister(info).await.is_err() {
        debug!(client = %id, "dispatcher already stopped");
    }
}

enum ReadEvent {
    Frame(Inbound),
    Failed(String),
    Ended,
    Idle,
}

async fn next_inbound<R, E>(stream: &mut R, idle_timeout: Option<Duration>) -> ReadEvent
where
    R: Stream<Item = Result<Inbound, E>> + Unpin,
    E: fmt::Display,
{
    let next = match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
            Ok(next) => next,
            Err(_) => return ReadEvent::Idle,
        },
        None => stream.next().await,
    };
    match next {
        Some(Ok(frame)) => ReadEvent::Frame(frame),
        Some(Err(e)) => ReadEvent::Failed(e.to_string()),
        None => ReadEvent::Ended,
    }
}

fn keepalive(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
