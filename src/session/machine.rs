//! The upstream session state machine.

use crate::checkpoint::Checkpoint;
use crate::error::{RelayError, Result};
use crate::events::{Enricher, OutboundEvent};
use crate::registry::BroadcastRegistry;
use crate::types::{ChangeNumber, SessionEpoch, SessionState};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::poller::Poller;
use super::shared::SessionShared;
use super::types::{SessionConfig, SessionListener, UpstreamFeed, UpstreamNotification};

/// Follow-up scheduled by the callback loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Retry {
    Reconnect,
    LogOn,
}

/// Why the callback loop woke up.
enum Wake {
    Notification(UpstreamNotification),
    Stop,
    Idle,
}

/// Everything the callback loop and poll loops need.
struct SessionCore {
    shared: Arc<SessionShared>,
    upstream: Arc<dyn UpstreamFeed>,
    registry: Arc<BroadcastRegistry>,
    enricher: Enricher,
    config: SessionConfig,
    listener: SessionListener,
    pollers: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionCore {
    /// Callback loop: waits for notifications and drives transitions.
    fn run(&self, notifications: Receiver<UpstreamNotification>) {
        self.begin_connect();

        let mut retry: Option<(Instant, Retry)> = None;

        while self.shared.is_running() {
            let wait = match retry {
                Some((at, _)) => at
                    .saturating_duration_since(Instant::now())
                    .min(self.config.callback_wait),
                None => self.config.callback_wait,
            };

            let wake = select! {
                recv(notifications) -> message => match message {
                    Ok(notification) => Wake::Notification(notification),
                    Err(_) => Wake::Stop,
                },
                recv(self.shared.stop_signal()) -> _ => Wake::Stop,
                default(wait) => Wake::Idle,
            };

            match wake {
                Wake::Notification(notification) => self.handle(notification, &mut retry),
                Wake::Stop => break,
                Wake::Idle => {}
            }

            if !self.shared.is_running() {
                break;
            }

            if let Some((at, action)) = retry {
                if Instant::now() >= at {
                    retry = None;
                    match action {
                        Retry::Reconnect => self.begin_connect(),
                        Retry::LogOn => self.upstream.log_on(),
                    }
                }
            }
        }

        tracing::debug!("Callback loop exited");
    }

    fn begin_connect(&self) {
        tracing::info!("Connecting to upstream");
        self.shared.set_state(SessionState::Connecting);
        self.upstream.connect(self.listener.clone());
    }

    fn handle(&self, notification: UpstreamNotification, retry: &mut Option<(Instant, Retry)>) {
        match notification {
            UpstreamNotification::Connected(Ok(())) => {
                tracing::info!("Connected to upstream, logging in");
                self.upstream.log_on();
            }

            UpstreamNotification::Connected(Err(reason)) => {
                tracing::warn!(
                    reason = %reason,
                    retry_in_secs = self.config.reconnect_delay.as_secs(),
                    "Could not connect to upstream"
                );
                self.enter_backoff(retry);
            }

            UpstreamNotification::Disconnected => {
                if !self.shared.is_running() {
                    tracing::info!("Shutting down");
                    return;
                }

                let epoch = self.retire_epoch(true);
                tracing::warn!(
                    epoch = %epoch,
                    retry_in_secs = self.config.reconnect_delay.as_secs(),
                    "Disconnected from upstream, retrying"
                );
                self.enter_backoff(retry);
            }

            UpstreamNotification::LoggedOn(Ok(())) => {
                if self.shared.swap_logged_on(true) {
                    tracing::debug!("Duplicate login notification ignored");
                    return;
                }
                self.shared.set_state(SessionState::LoggedIn);
                self.registry.broadcast(&OutboundEvent::LogOn);

                let epoch = self.shared.epoch();
                tracing::info!(epoch = %epoch, "Logged in");
                self.spawn_poller(epoch);
            }

            UpstreamNotification::LoggedOn(Err(reason)) => {
                tracing::warn!(reason = %reason, "Failed to log in");
                *retry = Some((Instant::now() + self.config.login_retry_delay, Retry::LogOn));
            }

            UpstreamNotification::LoggedOff(reason) => {
                self.retire_epoch(false);
                self.shared.set_state(SessionState::Connecting);
                tracing::info!(reason = %reason, "Logged off from upstream");
                *retry = Some((Instant::now() + self.config.login_retry_delay, Retry::LogOn));
            }
        }
    }

    /// End the logged-in lifetime: bump the epoch (always, or only if we
    /// were logged in) and then emit `LogOff` if we were.
    ///
    /// Runs under the emit lock, so no changelist of the retired epoch can
    /// follow the `LogOff`.
    fn retire_epoch(&self, always: bool) -> SessionEpoch {
        let _emits = self.shared.lock_emits();
        let was_logged_on = self.shared.swap_logged_on(false);

        let epoch = if always || was_logged_on {
            self.shared.bump_epoch()
        } else {
            self.shared.epoch()
        };
        if was_logged_on {
            self.registry.broadcast(&OutboundEvent::LogOff);
        }
        epoch
    }

    fn enter_backoff(&self, retry: &mut Option<(Instant, Retry)>) {
        self.shared.set_state(SessionState::Backoff);
        *retry = Some((Instant::now() + self.config.reconnect_delay, Retry::Reconnect));
    }

    fn spawn_poller(&self, epoch: SessionEpoch) {
        let poller = Poller {
            shared: Arc::clone(&self.shared),
            upstream: Arc::clone(&self.upstream),
            registry: Arc::clone(&self.registry),
            enricher: self.enricher.clone(),
            config: self.config.clone(),
            epoch,
        };

        let spawned = thread::Builder::new()
            .name(format!("feed-poll-{}", epoch))
            .spawn(move || poller.run());

        match spawned {
            Ok(handle) => {
                let mut pollers = self.pollers.lock();
                pollers.retain(|handle| !handle.is_finished());
                pollers.push(handle);
            }
            Err(e) => tracing::error!(epoch = %epoch, error = %e, "Failed to start poll loop"),
        }
    }
}

/// Persistent session with the upstream catalog.
///
/// Connects, logs in, polls for changes while logged in and reconnects on
/// failure without limit. Changelists and status events are pushed through
/// the [`BroadcastRegistry`]. The checkpoint is loaded on construction and
/// saved once by [`FeedSession::shutdown`].
pub struct FeedSession {
    core: Arc<SessionCore>,
    checkpoint: Checkpoint,
    notifications: Receiver<UpstreamNotification>,
    stop: Mutex<Option<Sender<()>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl FeedSession {
    /// Create a session, loading the checkpoint.
    pub fn new(
        config: SessionConfig,
        upstream: Arc<dyn UpstreamFeed>,
        registry: Arc<BroadcastRegistry>,
        enricher: Enricher,
        checkpoint: Checkpoint,
    ) -> Result<Self> {
        let change_number = checkpoint.load()?;
        tracing::info!(change_number = %change_number, "Loaded checkpoint");

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let (notify_tx, notify_rx) = unbounded();

        let core = SessionCore {
            shared: Arc::new(SessionShared::new(change_number, stop_rx)),
            upstream,
            registry,
            enricher,
            config,
            listener: SessionListener::new(notify_tx),
            pollers: Mutex::new(Vec::new()),
        };

        Ok(Self {
            core: Arc::new(core),
            checkpoint,
            notifications: notify_rx,
            stop: Mutex::new(Some(stop_tx)),
            driver: Mutex::new(None),
        })
    }

    /// Start connecting and processing notifications on a background thread.
    pub fn start(&self) -> Result<()> {
        if !self.core.shared.is_running() {
            return Err(RelayError::ShutDown);
        }

        let mut driver = self.driver.lock();
        if driver.is_some() {
            return Err(RelayError::AlreadyStarted);
        }

        let core = Arc::clone(&self.core);
        let notifications = self.notifications.clone();
        let handle = thread::Builder::new()
            .name("feed-session".into())
            .spawn(move || core.run(notifications))?;

        *driver = Some(handle);
        Ok(())
    }

    /// Listener that feeds notifications into this session.
    pub fn listener(&self) -> SessionListener {
        self.core.listener.clone()
    }

    pub fn state(&self) -> SessionState {
        self.core.shared.state()
    }

    pub fn epoch(&self) -> SessionEpoch {
        self.core.shared.epoch()
    }

    pub fn is_logged_on(&self) -> bool {
        self.core.shared.is_logged_on()
    }

    /// Last fully processed change number.
    pub fn change_number(&self) -> ChangeNumber {
        self.core.shared.change_number()
    }

    /// Stop polling, save the checkpoint and release the connection.
    ///
    /// Poll loops and the callback loop have exited before the checkpoint
    /// is written, so no batch can race the final save. Calling this again
    /// is a no-op.
    pub fn shutdown(&self) -> Result<()> {
        let shared = &self.core.shared;
        if !shared.stop_running() {
            return Ok(());
        }

        shared.set_state(SessionState::ShuttingDown);
        let epoch = shared.bump_epoch();
        tracing::info!(epoch = %epoch, "Shutting down feed session");

        // Wakes every sleeping poll loop and the callback loop
        self.stop.lock().take();

        self.join_pollers();
        if let Some(handle) = self.driver.lock().take() {
            let _ = handle.join();
        }
        // A login handled just before the callback loop stopped may have
        // started one more poll loop
        self.join_pollers();

        let saved = self.checkpoint.save(shared.change_number());

        self.core.upstream.disconnect();
        shared.swap_logged_on(false);
        shared.set_state(SessionState::Disconnected);

        saved
    }

    fn join_pollers(&self) {
        let pollers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.core.pollers.lock());
        for handle in pollers {
            let _ = handle.join();
        }
    }
}

impl Drop for FeedSession {
    fn drop(&mut self) {
        if self.core.shared.is_running() {
            if let Err(e) = self.shutdown() {
                tracing::error!(error = %e, "Failed to save checkpoint on drop");
            }
        }
    }
}
