//! Socket abstraction traits for the gateway.
//!
//! A socket is used as two independent halves, one per pump loop, so the
//! reader and writer never contend for the same object.

use async_trait::async_trait;
use gateway_core::{HubError, Payload};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A socket write did not finish in time.
    #[error("Write timed out")]
    Timeout,

    /// The peer stopped answering heartbeats.
    #[error("Heartbeat timed out")]
    HeartbeatTimeout,

    /// Inbound message exceeds the configured maximum.
    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge {
        /// Size of the offending message.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Pump settings that cannot drive a connection.
    #[error("Invalid pump configuration: {0}")]
    InvalidConfig(&'static str),

    /// The hub is gone.
    #[error("Hub error: {0}")]
    Hub(#[from] HubError),
}

/// A frame read from a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// An application message.
    Data(Payload),
    /// A ping from the peer.
    Ping,
    /// A pong answering one of our pings.
    Pong,
}

/// The reading half of a socket.
#[async_trait]
pub trait SocketReader: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` if the peer closed the connection cleanly.
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError>;
}

/// The writing half of a socket.
#[async_trait]
pub trait SocketWriter: Send {
    /// Send a message, keeping its text/binary kind.
    async fn send(&mut self, payload: &Payload) -> Result<(), TransportError>;

    /// Send a heartbeat ping.
    async fn ping(&mut self) -> Result<(), TransportError>;

    /// Close the socket. Closing twice is a no-op.
    async fn close(&mut self) -> Result<(), TransportError>;
}
