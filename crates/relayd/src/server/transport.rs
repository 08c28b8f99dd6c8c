//! Transport adapter between the WebSocket and a connection.
//!
//! The connection handler works against a `Stream` of [`Inbound`] frames and
//! a `Sink` of [`Outbound`] frames, so tests can drive it over in-memory
//! channels. [`split_socket`] adapts an axum `WebSocket` to that shape.

use axum::extract::ws::{Message, WebSocket};
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;

use crate::hub::Payload;

/// A frame read from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Text or binary application data
    Data(Vec<u8>),

    /// Ping/pong, answered by the transport itself
    Control,

    /// The peer sent a close frame
    Close,
}

/// A frame to write to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(Payload),
    Close,
}

/// Errors raised by the underlying socket.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Transport closed")]
    Closed,
}

impl From<axum::Error> for TransportError {
    fn from(e: axum::Error) -> Self {
        TransportError::WebSocket(e.to_string())
    }
}

impl From<Message> for Inbound {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => Inbound::Data(text.into_bytes()),
            Message::Binary(data) => Inbound::Data(data),
            Message::Ping(_) | Message::Pong(_) => Inbound::Control,
            Message::Close(_) => Inbound::Close,
        }
    }
}

impl From<Outbound> for Message {
    fn from(frame: Outbound) -> Self {
        match frame {
            Outbound::Text(payload) => Message::Text(payload.to_string()),
            Outbound::Close => Message::Close(None),
        }
    }
}

/// Split an upgraded socket into the reader stream and writer sink.
pub fn split_socket(
    socket: WebSocket,
) -> (
    impl Stream<Item = Result<Inbound, TransportError>> + Unpin + Send,
    impl Sink<Outbound, Error = TransportError> + Unpin + Send + 'static,
) {
    let (sink, stream) = socket.split();

    let stream = stream.map(|frame| frame.map(Inbound::from).map_err(TransportError::from));
    let sink = sink.with(|frame: Outbound| {
        future::ready(Ok::<_, TransportError>(Message::from(frame)))
    });

    (stream, sink)
}
