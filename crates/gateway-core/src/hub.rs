//! The connection hub.
//!
//! The hub owns the membership set and processes every registration,
//! deregistration and broadcast through one event loop, in arrival order.
//! Other components talk to it only through a cloneable [`HubHandle`].

use crate::connection::{Connection, ConnectionId, Mailbox, DEFAULT_MAILBOX_CAPACITY};
use crate::membership::Membership;
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Hub errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// The hub loop is no longer running.
    #[error("Hub is not running")]
    Closed,
}

/// Whether a sender receives its own broadcasts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EchoPolicy {
    /// Deliver to every member except the sender.
    #[default]
    ExcludeSender,
    /// Deliver to every member, the sender included.
    IncludeSender,
}

/// Hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Self-echo behaviour for broadcasts.
    pub echo: EchoPolicy,
    /// Mailbox capacity for connections created through the handle.
    pub mailbox_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            echo: EchoPolicy::default(),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
        }
    }
}

/// Hub statistics, as seen by the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Current number of members.
    pub members: usize,
    /// Registrations processed.
    pub registrations: u64,
    /// Deregistrations that removed a member.
    pub unregistrations: u64,
    /// Broadcasts processed.
    pub broadcasts: u64,
    /// Messages accepted by member mailboxes.
    pub deliveries: u64,
    /// Members evicted for backpressure or a dead writer.
    pub evictions: u64,
}

/// Events drained by the hub loop.
#[derive(Debug)]
enum Event {
    Register(Connection),
    Unregister(ConnectionId),
    Broadcast(Message),
    Stats(oneshot::Sender<HubStats>),
    Members(oneshot::Sender<Vec<ConnectionId>>),
}

/// A cloneable handle for sending events to the hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::UnboundedSender<Event>,
    mailbox_capacity: usize,
}

impl HubHandle {
    fn send(&self, event: Event) -> Result<(), HubError> {
        self.events.send(event).map_err(|_| HubError::Closed)
    }

    /// Enqueue a registration. The connection joins membership when the loop
    /// processes it.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub fn register(&self, connection: Connection) -> Result<(), HubError> {
        self.send(Event::Register(connection))
    }

    /// Enqueue a deregistration. Unknown IDs are ignored by the loop.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub fn unregister(&self, id: ConnectionId) -> Result<(), HubError> {
        self.send(Event::Unregister(id))
    }

    /// Enqueue a message for fan-out to current members.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub fn broadcast(&self, message: Message) -> Result<(), HubError> {
        self.send(Event::Broadcast(message))
    }

    /// Create a connection with the hub's mailbox capacity and register it.
    ///
    /// Returns the connection's mailbox.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub fn connect(&self) -> Result<Mailbox, HubError> {
        let (connection, mailbox) = Connection::new(self.mailbox_capacity);
        self.register(connection)?;
        Ok(mailbox)
    }

    /// Ask the loop for its statistics.
    ///
    /// The answer reflects every event enqueued on this handle before the call.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Stats(tx))?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Ask the loop for the current member IDs, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Closed`] if the hub loop has stopped.
    pub async fn members(&self) -> Result<Vec<ConnectionId>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::Members(tx))?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Mailbox capacity used for new connections.
    #[must_use]
    pub fn mailbox_capacity(&self) -> usize {
        self.mailbox_capacity
    }

    /// Whether the hub loop is still accepting events.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.events.is_closed()
    }
}

/// The hub: membership plus the event loop that owns it.
pub struct Hub {
    config: HubConfig,
    members: Membership,
    events: mpsc::UnboundedReceiver<Event>,
    stats: HubStats,
}

impl Hub {
    /// Create a hub with empty membership and a fresh intake queue.
    #[must_use]
    pub fn new(config: HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = HubHandle {
            events: tx,
            mailbox_capacity: config.mailbox_capacity.max(1),
        };
        let hub = Self {
            config,
            members: Membership::new(),
            events: rx,
            stats: HubStats::default(),
        };
        (hub, handle)
    }

    /// Create a hub and spawn its loop on the current runtime.
    #[must_use]
    pub fn spawn(config: HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        (handle, tokio::spawn(hub.run()))
    }

    /// Run the event loop.
    ///
    /// Processes one event at a time until every handle has been dropped.
    pub async fn run(mut self) {
        info!(echo = ?self.config.echo, "Hub started");

        while let Some(event) = self.events.recv().await {
            self.handle(event);
        }

        info!(members = self.members.len(), "Hub stopped");
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Register(connection) => {
                let id = connection.id();
                if self.members.insert(connection) {
                    self.stats.registrations += 1;
                    debug!(connection = %id, members = self.members.len(), "Registered");
                }
            }

            Event::Unregister(id) => {
                if self.members.remove(id) {
                    self.stats.unregistrations += 1;
                    debug!(connection = %id, members = self.members.len(), "Unregistered");
                } else {
                    trace!(connection = %id, "Unregister for non-member ignored");
                }
            }

            Event::Broadcast(message) => {
                let skip = match self.config.echo {
                    EchoPolicy::ExcludeSender => message.source,
                    EchoPolicy::IncludeSender => None,
                };
                let delivery = self.members.fan_out(&Arc::new(message), skip);
                self.stats.broadcasts += 1;
                self.stats.deliveries += delivery.delivered as u64;
                self.stats.evictions += delivery.evicted.len() as u64;
            }

            Event::Stats(reply) => {
                let _ = reply.send(self.stats());
            }

            Event::Members(reply) => {
                let _ = reply.send(self.members.ids());
            }
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            members: self.members.len(),
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tokio::sync::mpsc::error::TryRecvError;

    fn spawn_hub(echo: EchoPolicy) -> HubHandle {
        let (handle, _join) = Hub::spawn(HubConfig {
            echo,
            ..HubConfig::default()
        });
        handle
    }

    fn text(mailbox: &mut Mailbox) -> String {
        let msg = mailbox.try_recv().unwrap();
        String::from_utf8(msg.payload.as_bytes().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_unregister() {
        let hub = spawn_hub(EchoPolicy::ExcludeSender);

        let a = hub.connect().unwrap();
        let b = hub.connect().unwrap();
        assert_eq!(hub.members().await.unwrap(), vec![a.id(), b.id()]);

        hub.unregister(a.id()).unwrap();
        assert_eq!(hub.members().await.unwrap(), vec![b.id()]);

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.members, 1);
        assert_eq!(stats.registrations, 2);
        assert_eq!(stats.unregistrations, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_membership_consistent_under_concurrent_producers() {
        let hub = spawn_hub(EchoPolicy::ExcludeSender);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let mut kept = Vec::new();
                for i in 0..50 {
                    let mailbox = hub.connect().unwrap();
                    if i % 2 == 0 {
                        hub.unregister(mailbox.id()).unwrap();
                    } else {
                        kept.push(mailbox);
                    }
                }
                kept
            }));
        }

        let mut expected = BTreeSet::new();
        let mut mailboxes = Vec::new();
        for task in tasks {
            for mailbox in task.await.unwrap() {
                expected.insert(mailbox.id());
                mailboxes.push(mailbox);
            }
        }

        let members: BTreeSet<_> = hub.members().await.unwrap().into_iter().collect();
        assert_eq!(members, expected);
        assert_eq!(members.len(), 200);
    }

    #[tokio::test]
    async fn test_fan_out_preserves_sender_order() {
        let hub = spawn_hub(EchoPolicy::ExcludeSender);
        let a = hub.connect().unwrap();
        let mut b = hub.connect().unwrap();

        hub.broadcast(Message::new("m1").with_source(a.id())).unwrap();
        hub.broadcast(Message::new("m2").with_source(a.id())).unwrap();
        hub.stats().await.unwrap();

        assert_eq!(text(&mut b), "m1");
        assert_eq!(text(&mut b), "m2");
    }

    #[tokio::test]
    async fn test_exclude_sender_does_not_echo() {
        let hub = spawn_hub(EchoPolicy::ExcludeSender);
        let mut a = hub.connect().unwrap();
        let mut b = hub.connect().unwrap();

        hub.broadcast(Message::new("hello").with_source(a.id())).unwrap();
        let stats = hub.stats().await.unwrap();

        assert_eq!(stats.deliveries, 1);
        assert!(matches!(a.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(text(&mut b), "hello");
    }

    #[tokio::test]
    async fn test_include_sender_echoes() {
        let hub = spawn_hub(EchoPolicy::IncludeSender);
        let mut a = hub.connect().unwrap();
        let mut b = hub.connect().unwrap();

        hub.broadcast(Message::new("hello").with_source(a.id())).unwrap();
        let stats = hub.stats().await.unwrap();

        assert_eq!(stats.deliveries, 2);
        assert_eq!(text(&mut a), "hello");
        assert_eq!(text(&mut b), "hello");
    }

    #[tokio::test]
    async fn test_sourceless_broadcast_reaches_everyone() {
        let hub = spawn_hub(EchoPolicy::ExcludeSender);
        let mut a = hub.connect().unwrap();
        let mut b = hub.connect().unwrap();

        hub.broadcast(Message::new("notice")).unwrap();
        hub.stats().await.unwrap();

        assert_eq!(text(&mut a), "notice");
        assert_eq!(text(&mut b), "notice");
    }

    #[tokio::test]
    async fn test_backpressure_evicts_saturated_member() {
        let hub = spawn_hub(EchoPolicy::ExcludeSender);
        let sender = hub.connect().unwrap();
        let mut slow = hub.connect().unwrap();
        let (healthy_conn, mut healthy) = Connection::new(1024);
        hub.register(healthy_conn).unwrap();

        for i in 0..DEFAULT_MAILBOX_CAPACITY {
            hub.broadcast(Message::new(format!("m{i}")).with_source(sender.id()))
                .unwrap();
        }
        assert_eq!(hub.stats().await.unwrap().evictions, 0);

        hub.broadcast(Message::new("overflow").with_source(sender.id()))
            .unwrap();
        let stats = hub.stats().await.unwrap();

        assert_eq!(stats.evictions, 1);
        let members = hub.members().await.unwrap();
        assert!(!members.contains(&slow.id()));
        assert!(members.contains(&healthy.id()));

        // The slow mailbox holds exactly its 256 messages, then reports closed.
        for _ in 0..DEFAULT_MAILBOX_CAPACITY {
            assert!(slow.try_recv().is_ok());
        }
        assert!(matches!(slow.try_recv(), Err(TryRecvError::Disconnected)));

        let mut last = String::new();
        while let Ok(msg) = healthy.try_recv() {
            last = String::from_utf8(msg.payload.as_bytes().to_vec()).unwrap();
        }
        assert_eq!(last, "overflow");
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = spawn_hub(EchoPolicy::ExcludeSender);
        let a = hub.connect().unwrap();
        let b = hub.connect().unwrap();

        hub.unregister(a.id()).unwrap();
        hub.unregister(a.id()).unwrap();
        hub.unregister(ConnectionId::next()).unwrap();

        assert_eq!(hub.members().await.unwrap(), vec![b.id()]);
        assert_eq!(hub.stats().await.unwrap().unregistrations, 1);
    }

    #[tokio::test]
    async fn test_unregister_after_eviction_is_noop() {
        let hub = spawn_hub(EchoPolicy::ExcludeSender);
        let (conn, mut mailbox) = Connection::new(1);
        let id = conn.id();
        hub.register(conn).unwrap();

        hub.broadcast(Message::new("fills")).unwrap();
        hub.broadcast(Message::new("evicts")).unwrap();
        hub.unregister(id).unwrap();

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.unregistrations, 0);
        assert_eq!(stats.members, 0);

        assert!(mailbox.try_recv().is_ok());
        assert!(matches!(mailbox.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[tokio::test]
    async fn test_unregister_closes_mailbox() {
        let hub = spawn_hub(EchoPolicy::ExcludeSender);
        let mut a = hub.connect().unwrap();

        hub.unregister(a.id()).unwrap();
        assert!(a.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_hub_stops_when_handles_dropped() {
        let (handle, join) = Hub::spawn(HubConfig::default());
        let other = handle.clone();
        drop(handle);
        assert!(other.is_running());
        drop(other);

        join.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_hub_rejects_events() {
        let (hub, handle) = Hub::new(HubConfig::default());
        drop(hub);

        assert!(!handle.is_running());
        assert_eq!(handle.connect().unwrap_err(), HubError::Closed);
        assert_eq!(
            handle.broadcast(Message::new("x")).unwrap_err(),
            HubError::Closed
        );
        assert_eq!(handle.stats().await.unwrap_err(), HubError::Closed);
    }

    #[test]
    fn test_echo_policy_names() {
        let policy: EchoPolicy = serde_json::from_str("\"include_sender\"").unwrap();
        assert_eq!(policy, EchoPolicy::IncludeSender);
        assert_eq!(EchoPolicy::default(), EchoPolicy::ExcludeSender);
    }
}
