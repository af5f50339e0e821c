//! # gateway-core
//!
//! Connection hub and message fan-out for the gateway.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Hub** - The single event loop that owns membership and fans out messages
//! - **Membership** - The set of live connections and their outbound mailboxes
//! - **Connection** - Connection identifiers and mailbox construction
//! - **Message** - Opaque payloads routed through the hub
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  register / unregister / broadcast  ┌─────────────┐
//! │    Pump     │────────────────────────────────────▶│     Hub     │
//! └─────────────┘                                     └─────────────┘
//!        ▲                                                   │
//!        │                 mailbox (bounded, FIFO)           │
//!        └───────────────────────────────────────────────────┘
//! ```
//!
//! All membership changes and fan-out go through one loop, so the membership
//! set has a single writer and needs no locking.

pub mod connection;
pub mod hub;
pub mod membership;
pub mod message;

pub use connection::{Connection, ConnectionId, Mailbox, DEFAULT_MAILBOX_CAPACITY};
pub use hub::{EchoPolicy, Hub, HubConfig, HubError, HubHandle, HubStats};
pub use membership::{Delivery, Membership};
pub use message::{Message, Payload};
