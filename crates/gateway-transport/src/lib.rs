//! # gateway-transport
//!
//! Connection pumps for the gateway.
//!
//! Each connection is served by a reader task and a writer task that bridge
//! its socket to the hub:
//!
//! ```text
//!            ┌──────────── reader ───────────┐
//! socket ────┤                               ├──▶ hub.broadcast / unregister
//!            └──── writer ◀── mailbox ◀──────┘    (hub fans out to mailboxes)
//! ```
//!
//! Sockets are abstracted by the [`SocketReader`] and [`SocketWriter`]
//! traits; the `axum` feature provides them for upgraded axum WebSockets.
//!
//! ```rust,ignore
//! use gateway_transport::websocket;
//!
//! ws.on_upgrade(move |socket| async move {
//!     if let Ok(pump) = websocket::attach(socket, &hub, PumpConfig::default()) {
//!         pump.closed().await;
//!     }
//! })
//! ```

pub mod pump;
pub mod traits;

#[cfg(feature = "axum")]
pub mod websocket;

pub use pump::{start, PumpConfig, PumpHandle};
pub use traits::{Inbound, SocketReader, SocketWriter, TransportError};

#[cfg(feature = "axum")]
pub use websocket::attach;
