//! The set of live connections.
//!
//! `Membership` is plain data with no interior locking. It is owned by the hub
//! loop, which is its only writer.

use crate::connection::{Connection, ConnectionId};
use crate::message::Message;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

/// Outcome of a single fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Number of mailboxes that accepted the message.
    pub delivered: usize,
    /// Connections evicted because their mailbox could not accept it.
    pub evicted: Vec<ConnectionId>,
}

/// Live connections keyed by ID.
#[derive(Debug, Default)]
pub struct Membership {
    members: HashMap<ConnectionId, Connection>,
}

impl Membership {
    /// Create an empty membership set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection.
    ///
    /// Returns `false` if a connection with the same ID was already present,
    /// in which case the existing entry is kept.
    pub fn insert(&mut self, connection: Connection) -> bool {
        let id = connection.id();
        if self.members.contains_key(&id) {
            debug!(connection = %id, "Connection already registered");
            return false;
        }
        self.members.insert(id, connection);
        true
    }

    /// Remove a connection, closing its mailbox.
    ///
    /// Returns `false` if it was not a member.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        // Dropping the hub-side half is what closes the mailbox.
        self.members.remove(&id).is_some()
    }

    /// Check whether a connection is a member.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains_key(&id)
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether there are no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// IDs of all members, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.members.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Push `message` onto every member's mailbox except `skip`.
    ///
    /// Never waits. A member whose mailbox is full, or whose writer has gone
    /// away, is removed and its mailbox closed; the rest still get the message.
    pub fn fan_out(&mut self, message: &Arc<Message>, skip: Option<ConnectionId>) -> Delivery {
        let mut delivery = Delivery::default();

        for (id, connection) in &self.members {
            if Some(*id) == skip {
                continue;
            }
            match connection.try_deliver(Arc::clone(message)) {
                Ok(()) => delivery.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(connection = %id, "Mailbox full, evicting slow connection");
                    delivery.evicted.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection = %id, "Mailbox closed by writer, evicting");
                    delivery.evicted.push(*id);
                }
            }
        }

        for id in &delivery.evicted {
            self.members.remove(id);
        }

        trace!(
            message = message.id,
            delivered = delivery.delivered,
            evicted = delivery.evicted.len(),
            "Fanned out message"
        );

        delivery
    }
}
