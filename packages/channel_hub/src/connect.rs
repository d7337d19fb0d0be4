//! Connection adapter
//!
//! Turns an established bidirectional connection into a registered client
//! with its two pumps running.

use futures::{Sink, Stream};
use std::fmt;
use tracing::debug;

use crate::client::{Client, ClientId, Inbound, Outbound, read_dispatch, write_dispatch};
use crate::dispatcher::DispatcherHandle;
use crate::error::HubError;

/// Register a new client on `channel` and spawn its write and read pumps.
///
/// The registration is queued before either pump starts, so the dispatcher
/// sees it ahead of the unregister the read pump eventually sends. Both pumps
/// hang off a child of the dispatcher's shutdown token: stopping the
/// dispatcher, or either side of the connection failing, ends both.
pub async fn connect<S, R, E>(
    dispatcher: &DispatcherHandle,
    sink: S,
    stream: R,
    channel: &str,
    key: Option<String>,
) -> Result<ClientId, HubError>
where
    S: Sink<Outbound> + Unpin + Send + 'static,
    S::Error: fmt::Display + Send,
    R: Stream<Item = Result<Inbound, E>> + Unpin + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let config = dispatcher.config();
    let (client, queue) = Client::new(channel, key, config.queue_capacity);
    let info = client.info().clone();
    let pump = config.pump.clone();

    dispatcher.register(client).await?;

    let cancel = dispatcher.shutdown_token().child_token();
    tokio::spawn(write_dispatch(queue, sink, pump.clone(), cancel.clone()));
    tokio::spawn(read_dispatch(
        info.clone(),
        stream,
        dispatcher.clone(),
        pump.idle_timeout,
        cancel,
    ));

    debug!(channel = %info.channel, client = %info.id, "Connection attached");
    Ok(info.id)
}
