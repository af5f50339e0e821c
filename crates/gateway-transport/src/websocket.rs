//! WebSocket socket halves for axum upgrades.
//!
//! [`attach`] is the upgrade entry point: it takes a freshly upgraded socket,
//! splits it, and starts a pump bound to the hub.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use gateway_core::{HubHandle, Payload};

use crate::pump::{self, PumpConfig, PumpHandle};
use crate::traits::{Inbound, SocketReader, SocketWriter, TransportError};

/// Reading half of an upgraded WebSocket.
pub struct WebSocketReader {
    stream: SplitStream<WebSocket>,
}

impl WebSocketReader {
    /// Wrap the stream half of a split socket.
    #[must_use]
    pub fn new(stream: SplitStream<WebSocket>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl SocketReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(Inbound::Data(Payload::from(text)))),
            Some(Ok(Message::Binary(data))) => Ok(Some(Inbound::Data(Payload::from(data)))),
            // Pongs to inbound pings are queued by the socket itself.
            Some(Ok(Message::Ping(_))) => Ok(Some(Inbound::Ping)),
            Some(Ok(Message::Pong(_))) => Ok(Some(Inbound::Pong)),
            Some(Ok(Message::Close(_))) | None => Ok(None),
            Some(Err(e)) => Err(TransportError::ReceiveFailed(e.to_string())),
        }
    }
}

/// Writing half of an upgraded WebSocket.
pub struct WebSocketWriter {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

impl WebSocketWriter {
    /// Wrap the sink half of a split socket.
    #[must_use]
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink,
            closed: false,
        }
    }

    async fn write(&mut self, message: Message) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.sink
            .send(message)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

#[async_trait]
impl SocketWriter for WebSocketWriter {
    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError> {
        let message = match payload {
            Payload::Text(text) => Message::Text(text.to_string()),
            Payload::Binary(data) => Message::Binary(data.to_vec()),
        };
        self.write(message).await
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.write(Message::Ping(Vec::new())).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(format!("Failed to close: {e}")))
    }
}

/// Bind an upgraded socket to the hub and start its pump.
///
/// Registers the connection and spawns its reader and writer, then returns.
///
/// # Errors
///
/// Returns an error if the hub is no longer running.
pub fn attach(
    socket: WebSocket,
    hub: &HubHandle,
    config: PumpConfig,
) -> Result<PumpHandle, TransportError> {
    let (sink, stream) = socket.split();
    pump::start(
        WebSocketReader::new(stream),
        WebSocketWriter::new(sink),
        hub,
        config,
    )
}
