//! Subscriber types for the broadcast registry.

use crate::error::{RelayError, Result};
use crate::types::ItemId;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Prefix of sub-protocol entries that name an app to follow.
pub const APP_FILTER_PREFIX: &str = "app-";

/// Configuration for the broadcast registry.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Max number of app ids one subscriber may filter on.
    /// Default: 50
    pub max_filter_size: usize,

    /// Interval between user-count heartbeats.
    /// Default: 30s
    pub heartbeat_interval: Duration,

    /// Buffered messages per in-process channel connection.
    /// Default: 1000
    pub connection_buffer: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_filter_size: 50,
            heartbeat_interval: Duration::from_secs(30),
            connection_buffer: 1000,
        }
    }
}

/// Unique identifier for a subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Outbound half of a subscriber connection, owned by the transport.
///
/// Writes are fire-and-forget. `send` returns `false` only when the
/// connection is gone for good; a message dropped because the peer is slow
/// still counts as delivered.
pub trait Connection: Send + Sync {
    /// Whether the connection can still accept messages.
    fn is_available(&self) -> bool;

    /// Write one text frame.
    fn send(&self, message: &str) -> bool;

    /// Close the connection from the server side.
    fn close(&self);
}

/// Set of app ids a subscriber follows.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppFilter {
    ids: BTreeSet<ItemId>,
}

impl AppFilter {
    /// Parse raw identifiers, rejecting oversized or malformed input.
    pub fn parse<S: AsRef<str>>(raw: &[S], max_size: usize) -> Result<Self> {
        if raw.len() > max_size {
            return Err(RelayError::InvalidFilter(format!(
                "{} app ids requested, at most {} allowed",
                raw.len(),
                max_size
            )));
        }

        let mut ids = BTreeSet::new();
        for entry in raw {
            let entry = entry.as_ref().trim();
            let id = entry
                .parse::<ItemId>()
                .map_err(|_| RelayError::InvalidFilter(format!("invalid app id {:?}", entry)))?;
            ids.insert(id);
        }

        Ok(Self { ids })
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.ids.contains(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.ids.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Extract the app entries from a comma-separated sub-protocol list.
///
/// `"steam-pics, app-440,app-570"` yields `["440", "570"]`. Entries are
/// returned unparsed so that validation happens in one place.
pub fn app_filter_entries(protocols: &str) -> Vec<&str> {
    protocols
        .split(',')
        .map(str::trim)
        .filter_map(|entry| entry.strip_prefix(APP_FILTER_PREFIX))
        .collect()
}

/// In-process connection backed by a bounded channel.
///
/// Useful for transports that run their own writer task per socket, and
/// for tests.
pub struct ChannelConnection {
    sender: Sender<String>,
    open: Arc<AtomicBool>,
}

impl ChannelConnection {
    /// Create a connection and the handle its reader side consumes.
    pub fn pair(buffer: usize) -> (Arc<ChannelConnection>, ConnectionHandle) {
        let (sender, receiver) = bounded(buffer);
        let open = Arc::new(AtomicBool::new(true));

        let connection = Arc::new(ChannelConnection {
            sender,
            open: Arc::clone(&open),
        });

        (connection, ConnectionHandle { receiver, open })
    }
}

impl Connection for ChannelConnection {
    fn is_available(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, message: &str) -> bool {
        if !self.is_available() {
            return false;
        }

        match self.sender.try_send(message.to_string()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Subscriber buffer full, dropping message");
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                self.open.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Reader side of a [`ChannelConnection`].
///
/// Dropping the handle marks the connection unavailable.
pub struct ConnectionHandle {
    /// Channel to receive serialized events.
    pub receiver: Receiver<String>,
    open: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Receive the next message (blocking).
    pub fn recv(&self) -> std::result::Result<String, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<String, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<String, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Whether the server side closed the connection.
    pub fn is_closed(&self) -> bool {
        !self.open.load(Ordering::SeqCst)
    }

    /// Simulate the peer going away.
    pub fn disconnect(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }
}
