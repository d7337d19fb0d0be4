//! axum WebSocket adapter
//!
//! Maps socket messages onto the dispatcher's transport-neutral
//! [`Outbound`]/[`Inbound`] frames so the pumps never see axum types.

use axum::extract::ws::{Message, WebSocket};
use channel_hub::{Inbound, Outbound};
use futures::{Sink, SinkExt, Stream, StreamExt};

pub fn to_message(outbound: Outbound) -> Message {
    match outbound {
        Outbound::Frame(frame) => Message::Text(frame.as_str().into()),
        Outbound::Ping => Message::Ping(Default::default()),
        Outbound::Close => Message::Close(None),
    }
}

pub fn from_message(message: Message) -> Inbound {
    match message {
        Message::Text(text) => Inbound::Text(text.to_string()),
        Message::Binary(data) => Inbound::Binary(data.to_vec()),
        Message::Ping(_) => Inbound::Ping,
        Message::Pong(_) => Inbound::Pong,
        Message::Close(_) => Inbound::Close,
    }
}

/// Split an upgraded socket into a frame sink and an inbound stream.
pub fn split(
    socket: WebSocket,
) -> (
    impl Sink<Outbound, Error = axum::Error> + Unpin + Send + 'static,
    impl Stream<Item = Result<Inbound, axum::Error>> + Unpin + Send + 'static,
) {
    let (sender, receiver) = socket.split();
    let sink = sender.with(|outbound| futures::future::ready(Ok(to_message(outbound))));
    let stream = receiver.map(|message| message.map(from_message));
    (sink, stream)
}
