//! Upstream-facing types for the feed session.

use crate::error::Result;
use crate::types::{ChangeBatch, ChangeNumber};
use crossbeam_channel::Sender;
use std::time::Duration;

/// Timing configuration for the feed session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Delay before reconnecting after a failed or lost connection.
    /// Default: 15s
    pub reconnect_delay: Duration,

    /// Delay before retrying a failed login.
    /// Default: 2s
    pub login_retry_delay: Duration,

    /// Upper bound on one wait for upstream notifications.
    /// Default: 5s
    pub callback_wait: Duration,

    /// Wait before the first poll after process start.
    /// Default: 60s
    pub warmup_delay: Duration,

    /// Max random extra added to the warm-up wait.
    /// Default: 10s
    pub warmup_jitter: Duration,

    /// Max random pause between polls.
    /// Default: 3.2s
    pub poll_jitter: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(15),
            login_retry_delay: Duration::from_secs(2),
            callback_wait: Duration::from_secs(5),
            warmup_delay: Duration::from_secs(60),
            warmup_jitter: Duration::from_secs(10),
            poll_jitter: Duration::from_millis(3200),
        }
    }
}

/// Lifecycle notifications from the upstream feed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpstreamNotification {
    /// A connection attempt finished.
    Connected(std::result::Result<(), String>),
    /// The connection dropped.
    Disconnected,
    /// A login attempt finished.
    LoggedOn(std::result::Result<(), String>),
    /// The upstream source ended the login session.
    LoggedOff(String),
}

/// Receiver of upstream lifecycle notifications, one method per event.
///
/// Safe to call from any thread; calls only enqueue the notification.
pub trait FeedListener: Send + Sync {
    fn on_connected(&self, result: std::result::Result<(), String>);

    fn on_disconnected(&self);

    fn on_logged_on(&self, result: std::result::Result<(), String>);

    fn on_logged_off(&self, reason: &str);
}

/// Listener handed to the upstream feed; queues notifications for the
/// session's callback loop.
#[derive(Clone, Debug)]
pub struct SessionListener {
    sender: Sender<UpstreamNotification>,
}

impl SessionListener {
    pub(crate) fn new(sender: Sender<UpstreamNotification>) -> Self {
        Self { sender }
    }

    fn deliver(&self, notification: UpstreamNotification) {
        if self.sender.send(notification).is_err() {
            tracing::debug!("Feed session gone, dropping upstream notification");
        }
    }
}

impl FeedListener for SessionListener {
    fn on_connected(&self, result: std::result::Result<(), String>) {
        self.deliver(UpstreamNotification::Connected(result));
    }

    fn on_disconnected(&self) {
        self.deliver(UpstreamNotification::Disconnected);
    }

    fn on_logged_on(&self, result: std::result::Result<(), String>) {
        self.deliver(UpstreamNotification::LoggedOn(result));
    }

    fn on_logged_off(&self, reason: &str) {
        self.deliver(UpstreamNotification::LoggedOff(reason.to_string()));
    }
}

/// Connection to the remote catalog.
///
/// `connect` and `log_on` are asynchronous: their outcome arrives later
/// through the listener. `changes_since` is a blocking request/response
/// call and may fail transiently.
pub trait UpstreamFeed: Send + Sync {
    /// Start connecting; report through `listener`.
    fn connect(&self, listener: SessionListener);

    /// Start an anonymous login on the established connection.
    fn log_on(&self);

    /// Release the connection.
    fn disconnect(&self);

    /// Fetch app and package changes after `since`.
    fn changes_since(&self, since: ChangeNumber) -> Result<ChangeBatch>;
}
