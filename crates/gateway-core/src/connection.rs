//! Connection identity and outbound mailboxes.
//!
//! A connection is split in two when it is created:
//!
//! - [`Connection`] is handed to the hub on registration. It carries the only
//!   sending half of the mailbox, so when the hub drops it the mailbox closes.
//! - [`Mailbox`] stays with the connection's writer loop, which drains it.

use crate::message::Message;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};

/// Default number of pending outbound messages per connection.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next connection ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The hub-side half of a connection.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::Sender<Arc<Message>>,
}

impl Connection {
    /// Create a connection with a fresh ID and a mailbox of `capacity` slots.
    ///
    /// A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, Mailbox) {
        Self::with_id(ConnectionId::next(), capacity)
    }

    /// Create a connection with a given ID.
    #[must_use]
    pub fn with_id(id: ConnectionId, capacity: usize) -> (Self, Mailbox) {
        let (outbound, inbox) = mpsc::channel(capacity.max(1));
        (Self { id, outbound }, Mailbox { id, inbox })
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Push a message into the mailbox without waiting.
    ///
    /// # Errors
    ///
    /// Fails if the mailbox is full or its writer has gone away.
    pub fn try_deliver(&self, message: Arc<Message>) -> Result<(), TrySendError<Arc<Message>>> {
        self.outbound.try_send(message)
    }
}

/// The writer-side half of a connection: the receiving end of its mailbox.
#[derive(Debug)]
pub struct Mailbox {
    id: ConnectionId,
    inbox: mpsc::Receiver<Arc<Message>>,
}

impl Mailbox {
    /// ID of the connection this mailbox belongs to.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Wait for the next message.
    ///
    /// Returns `None` once the hub has closed the mailbox and it is drained.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        self.inbox.recv().await
    }

    /// Take the next message if one is queued.
    ///
    /// # Errors
    ///
    /// Returns `TryRecvError::Empty` when nothing is queued and
    /// `TryRecvError::Disconnected` once the mailbox is closed and drained.
    pub fn try_recv(&mut self) -> Result<Arc<Message>, TryRecvError> {
        self.inbox.try_recv()
    }
}
