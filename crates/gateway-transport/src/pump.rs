//! The per-connection pump.
//!
//! A pump bridges one socket to the hub with two tasks:
//!
//! - the **reader** forwards inbound messages to the hub and, when the socket
//!   fails or closes, unregisters the connection;
//! - the **writer** drains the connection's mailbox onto the socket, sends
//!   heartbeat pings, and closes the socket when it stops.
//!
//! The loops share a once-only shutdown signal so that whichever stops first
//! brings the other down with it.

use crate::traits::{Inbound, SocketReader, SocketWriter, TransportError};
use gateway_core::{Connection, ConnectionId, HubHandle, Mailbox, Message};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Pump configuration.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
    /// Interval between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// Inbound silence after which the peer is considered dead.
    pub heartbeat_timeout: Duration,
    /// Deadline for a single socket write.
    pub write_timeout: Duration,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024, // 64 KB
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl PumpConfig {
    /// Check that the timings can drive the heartbeat and write deadlines.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidConfig`] naming the first zero duration.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.heartbeat_interval.is_zero() {
            return Err(TransportError::InvalidConfig("heartbeat_interval must be positive"));
        }
        if self.heartbeat_timeout.is_zero() {
            return Err(TransportError::InvalidConfig("heartbeat_timeout must be positive"));
        }
        if self.write_timeout.is_zero() {
            return Err(TransportError::InvalidConfig("write_timeout must be positive"));
        }
        Ok(())
    }
}

/// State shared by a connection's reader and writer.
#[derive(Debug)]
struct Link {
    shutdown: AtomicBool,
    notify: Notify,
    started: Instant,
    last_seen_ms: AtomicU64,
}

impl Link {
    fn new() -> Self {
        Self {
            shutdown: AtomicBool::new(false),
            notify: Notify::new(),
            started: Instant::now(),
            last_seen_ms: AtomicU64::new(0),
        }
    }

    /// Record inbound activity.
    fn touch(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_seen_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Time since the last inbound activity.
    fn idle(&self) -> Duration {
        let last_seen = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.started.elapsed().saturating_sub(last_seen)
    }

    /// Signal shutdown. Returns `true` for the first caller only.
    fn shut_down(&self) -> bool {
        let first = !self.shutdown.swap(true, Ordering::SeqCst);
        if first {
            self.notify.notify_waiters();
        }
        first
    }

    /// Resolve once shutdown has been signalled.
    async fn stopped(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shutdown.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

/// Handle to a running pump.
#[derive(Debug)]
pub struct PumpHandle {
    id: ConnectionId,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl PumpHandle {
    /// ID of the pumped connection.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Wait until both loops have exited.
    pub async fn closed(self) {
        for (task, handle) in [("reader", self.reader), ("writer", self.writer)] {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!(connection = %self.id, task, "Pump task panicked");
                }
            }
        }
    }
}

/// Register a new connection with the hub and start its reader and writer.
///
/// Returns as soon as both loops are spawned.
///
/// # Errors
///
/// Returns an error if `config` is invalid or the hub is no longer running.
/// The socket halves are dropped in that case.
pub fn start<R, W>(
    reader: R,
    writer: W,
    hub: &HubHandle,
    config: PumpConfig,
) -> Result<PumpHandle, TransportError>
where
    R: SocketReader + 'static,
    W: SocketWriter + 'static,
{
    config.validate()?;

    let (connection, mailbox) = Connection::new(hub.mailbox_capacity());
    let id = connection.id();
    hub.register(connection)?;

    debug!(connection = %id, "Connection pump started");

    let link = Arc::new(Link::new());
    let writer = tokio::spawn(write_loop(writer, mailbox, Arc::clone(&link), config.clone()));
    let reader = tokio::spawn(read_loop(reader, id, hub.clone(), link, config));

    Ok(PumpHandle { id, reader, writer })
}

async fn timed<F>(limit: Duration, write: F) -> Result<(), TransportError>
where
    F: Future<Output = Result<(), TransportError>>,
{
    tokio::time::timeout(limit, write)
        .await
        .map_err(|_| TransportError::Timeout)?
}

async fn read_loop<R: SocketReader>(
    mut reader: R,
    id: ConnectionId,
    hub: HubHandle,
    link: Arc<Link>,
    config: PumpConfig,
) {
    let result = loop {
        let frame = tokio::select! {
            frame = reader.recv() => frame,
            () = link.stopped() => break Ok(()),
        };

        match frame {
            Ok(Some(Inbound::Data(payload))) => {
                link.touch();
                if payload.len() > config.max_message_size {
                    break Err(TransportError::MessageTooLarge {
                        size: payload.len(),
                        max: config.max_message_size,
                    });
                }
                if let Err(e) = hub.broadcast(Message::new(payload).with_source(id)) {
                    break Err(e.into());
                }
            }
            Ok(Some(Inbound::Ping | Inbound::Pong)) => link.touch(),
            Ok(None) => {
                debug!(connection = %id, "Peer closed connection");
                break Ok(());
            }
            Err(e) => break Err(e),
        }
    };

    if let Err(e) = result {
        warn!(connection = %id, error = %e, "Reader stopped");
    }

    if hub.unregister(id).is_err() {
        debug!(connection = %id, "Hub gone before unregister");
    }
    link.shut_down();
}

async fn write_loop<W: SocketWriter>(
    mut writer: W,
    mut mailbox: Mailbox,
    link: Arc<Link>,
    config: PumpConfig,
) {
    let id = mailbox.id();
    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result = loop {
        tokio::select! {
            message = mailbox.recv() => match message {
                Some(message) => {
                    if let Err(e) = timed(config.write_timeout, writer.send(message.payload())).await {
                        break Err(e);
                    }
                }
                None => {
                    debug!(connection = %id, "Mailbox closed");
                    break Ok(());
                }
            },
            _ = heartbeat.tick() => {
                if link.idle() > config.heartbeat_timeout {
                    break Err(TransportError::HeartbeatTimeout);
                }
                if let Err(e) = timed(config.write_timeout, writer.ping()).await {
                    break Err(e);
                }
            }
            () = link.stopped() => break Ok(()),
        }
    };

    if let Err(e) = result {
        warn!(connection = %id, error = %e, "Writer stopped");
    }

    link.shut_down();
    if let Err(e) = timed(config.write_timeout, writer.close()).await {
        debug!(connection = %id, error = %e, "Close failed");
    }

    debug!(connection = %id, "Connection pump finished");
}
