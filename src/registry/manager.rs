//! Registry of live subscribers that fans events out.

use crate::error::{RelayError, Result};
use crate::events::OutboundEvent;
use crate::types::{ChangeNumber, ItemId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::types::{AppFilter, Connection, RegistryConfig, SubscriberId};

/// Internal subscriber state.
struct Subscriber {
    id: SubscriberId,
    connection: Arc<dyn Connection>,
    /// App subscribers only get targeted updates.
    filter: Option<AppFilter>,
    /// Cleared when a write reports the connection gone.
    last_known_live: bool,
}

impl Subscriber {
    fn is_live(&self) -> bool {
        self.last_known_live && self.connection.is_available()
    }

    fn wants_broadcasts(&self) -> bool {
        self.filter.is_none()
    }
}

/// Heartbeat bookkeeping.
#[derive(Default)]
struct HeartbeatState {
    last_count: usize,
    joined_since_last: bool,
}

/// Thread-safe set of live subscribers.
///
/// The lock guards membership only. Messages are written after the lock is
/// released, so a slow subscriber never blocks connects or disconnects.
pub struct BroadcastRegistry {
    /// Subscribers in join order.
    subscribers: Mutex<Vec<Subscriber>>,
    /// Counter for generating subscriber IDs.
    next_id: AtomicU64,
    heartbeat: Mutex<HeartbeatState>,
    config: RegistryConfig,
}

impl BroadcastRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            heartbeat: Mutex::new(HeartbeatState::default()),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a connection. Sends nothing; the caller picks the greeting.
    pub fn add(&self, connection: Arc<dyn Connection>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::SeqCst));

        self.subscribers.lock().push(Subscriber {
            id,
            connection,
            filter: None,
            last_known_live: true,
        });
        self.heartbeat.lock().joined_since_last = true;

        tracing::debug!(subscriber = %id, "Subscriber added");
        id
    }

    /// Restrict a subscriber to targeted updates for the given app ids.
    ///
    /// Oversized or malformed input closes and removes the subscriber. An
    /// empty list clears the filter.
    pub fn set_filter<S: AsRef<str>>(&self, id: SubscriberId, app_ids: &[S]) -> Result<()> {
        let parsed = AppFilter::parse(app_ids, self.config.max_filter_size);

        let mut subs = self.subscribers.lock();
        let index = subs
            .iter()
            .position(|sub| sub.id == id)
            .ok_or(RelayError::SubscriberNotFound(id))?;

        match parsed {
            Ok(filter) => {
                subs[index].filter = if filter.is_empty() { None } else { Some(filter) };
                Ok(())
            }
            Err(e) => {
                let rejected = subs.remove(index);
                drop(subs);
                rejected.connection.close();
                tracing::warn!(subscriber = %id, error = %e, "Rejected subscriber filter");
                Err(e)
            }
        }
    }

    /// Remove a subscriber. Returns whether it was present.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let mut subs = self.subscribers.lock();
        match subs.iter().position(|sub| sub.id == id) {
            Some(index) => {
                subs.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of registered subscribers, including ones not yet found dead.
    pub fn live_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Number of live subscribers that receive broadcasts.
    ///
    /// Prunes dead subscribers first.
    pub fn audience_count(&self) -> usize {
        self.count(|sub| sub.wants_broadcasts())
    }

    /// Number of live subscribers with an app filter.
    pub fn app_subscriber_count(&self) -> usize {
        self.count(|sub| !sub.wants_broadcasts())
    }

    // --- Sending ---

    /// Send an event to every broadcast subscriber.
    ///
    /// Dead subscribers found along the way are pruned instead of written
    /// to. Returns the number of successful sends.
    pub fn broadcast(&self, event: &OutboundEvent) -> usize {
        let message = match event.to_json() {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(event = event.kind(), error = %e, "Failed to serialize event");
                return 0;
            }
        };

        let targets = self.snapshot(|sub| sub.wants_broadcasts());
        self.deliver(targets, &message)
    }

    /// Send an event to one subscriber.
    pub fn send_to(&self, id: SubscriberId, event: &OutboundEvent) -> Result<bool> {
        let message = event.to_json()?;

        let connection = {
            let subs = self.subscribers.lock();
            subs.iter()
                .find(|sub| sub.id == id)
                .map(|sub| Arc::clone(&sub.connection))
                .ok_or(RelayError::SubscriberNotFound(id))?
        };

        let delivered = connection.send(&message);
        if !delivered {
            self.mark_dead(&[id]);
        }
        Ok(delivered)
    }

    /// Send per-subscriber events for changed items a subscriber follows.
    ///
    /// `make_event` is called once per matched item with that item's own
    /// change number. Returns the number of events delivered.
    pub fn send_targeted<F>(&self, changed: &HashMap<ItemId, ChangeNumber>, make_event: F) -> usize
    where
        F: Fn(ItemId, ChangeNumber) -> OutboundEvent,
    {
        if changed.is_empty() {
            return 0;
        }

        let targets: Vec<(SubscriberId, Arc<dyn Connection>, Vec<ItemId>)> = {
            let mut subs = self.subscribers.lock();
            Self::prune(&mut subs);
            subs.iter()
                .filter_map(|sub| {
                    let filter = sub.filter.as_ref()?;
                    let matched: Vec<ItemId> =
                        filter.ids().filter(|id| changed.contains_key(id)).collect();
                    if matched.is_empty() {
                        None
                    } else {
                        Some((sub.id, Arc::clone(&sub.connection), matched))
                    }
                })
                .collect()
        };

        let mut sent = 0;
        let mut dead = Vec::new();
        for (id, connection, matched) in targets {
            for item in matched {
                let event = make_event(item, changed[&item]);
                let message = match event.to_json() {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::error!(event = event.kind(), error = %e, "Failed to serialize event");
                        continue;
                    }
                };
                if connection.send(&message) {
                    sent += 1;
                } else {
                    dead.push(id);
                    break;
                }
            }
        }

        if !dead.is_empty() {
            self.mark_dead(&dead);
        }
        sent
    }

    /// Broadcast the user count if it changed or someone joined since the
    /// last heartbeat. Returns the count when it was sent.
    pub fn heartbeat(&self) -> Option<usize> {
        let users = self.audience_count();

        {
            let mut state = self.heartbeat.lock();
            if users == state.last_count && !state.joined_since_last {
                return None;
            }
            state.joined_since_last = false;

            if users != state.last_count && users > 0 {
                tracing::info!(
                    users,
                    app_subscribers = self.app_subscriber_count(),
                    "Users connected"
                );
            }
            state.last_count = users;
        }

        self.broadcast(&OutboundEvent::UsersOnline { users });
        Some(users)
    }

    /// Close and drop every subscriber.
    pub fn close_all(&self) {
        let drained: Vec<Subscriber> = std::mem::take(&mut *self.subscribers.lock());
        for sub in &drained {
            sub.connection.close();
        }
        tracing::debug!(count = drained.len(), "Closed all subscribers");
    }

    // --- Internals ---

    /// Prune dead subscribers and collect connections matching `select`.
    ///
    /// Walks from tail to head so removing in place never skips an entry.
    fn snapshot<F>(&self, select: F) -> Vec<(SubscriberId, Arc<dyn Connection>)>
    where
        F: Fn(&Subscriber) -> bool,
    {
        let mut subs = self.subscribers.lock();
        let mut targets = Vec::with_capacity(subs.len());

        for i in (0..subs.len()).rev() {
            if !subs[i].is_live() {
                let gone = subs.remove(i);
                tracing::debug!(subscriber = %gone.id, "Pruned dead subscriber");
                continue;
            }
            if select(&subs[i]) {
                targets.push((subs[i].id, Arc::clone(&subs[i].connection)));
            }
        }

        targets
    }

    fn count<F>(&self, select: F) -> usize
    where
        F: Fn(&Subscriber) -> bool,
    {
        let mut subs = self.subscribers.lock();
        Self::prune(&mut subs);
        subs.iter().filter(|sub| select(sub)).count()
    }

    fn prune(subs: &mut Vec<Subscriber>) {
        for i in (0..subs.len()).rev() {
            if !subs[i].is_live() {
                let gone = subs.remove(i);
                tracing::debug!(subscriber = %gone.id, "Pruned dead subscriber");
            }
        }
    }

    /// Write one message to each target outside the lock.
    fn deliver(&self, targets: Vec<(SubscriberId, Arc<dyn Connection>)>, message: &str) -> usize {
        let mut sent = 0;
        let mut dead = Vec::new();

        for (id, connection) in targets {
            if connection.send(message) {
                sent += 1;
            } else {
                dead.push(id);
            }
        }

        if !dead.is_empty() {
            self.mark_dead(&dead);
        }
        sent
    }

    /// Flag subscribers whose last write failed; the next pass prunes them.
    fn mark_dead(&self, ids: &[SubscriberId]) {
        let mut subs = self.subscribers.lock();
        for sub in subs.iter_mut().filter(|sub| ids.contains(&sub.id)) {
            sub.last_known_live = false;
        }
    }
}

impl Default for BroadcastRegistry {
    fn default() -> Self {
        Self::new()
    }
}
