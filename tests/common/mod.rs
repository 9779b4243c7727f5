//! Shared helpers for the integration tests.

#![allow(dead_code)]

use changelist_relay::{
    ChangeBatch, ChangeNumber, ConnectionHandle, FeedListener, RelayError, Result,
    SessionConfig, SessionListener, UpstreamFeed,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Upstream double driven by scripted outcomes.
///
/// Connects and logins succeed unless an outcome is queued. Polls replay
/// queued batches, then report "nothing changed" (or fail, if asked to).
#[derive(Default)]
pub struct FakeUpstream {
    listener: Mutex<Option<SessionListener>>,
    connect_results: Mutex<VecDeque<std::result::Result<(), String>>>,
    login_results: Mutex<VecDeque<std::result::Result<(), String>>>,
    batches: Mutex<VecDeque<ChangeBatch>>,
    fail_polls: Mutex<usize>,
    pub connects: AtomicUsize,
    pub logons: AtomicUsize,
    pub polls: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_connect(&self, result: std::result::Result<(), String>) {
        self.connect_results.lock().push_back(result);
    }

    pub fn queue_login(&self, result: std::result::Result<(), String>) {
        self.login_results.lock().push_back(result);
    }

    pub fn queue_batch(&self, batch: ChangeBatch) {
        self.batches.lock().push_back(batch);
    }

    pub fn fail_next_polls(&self, count: usize) {
        *self.fail_polls.lock() = count;
    }

    pub fn pending_batches(&self) -> usize {
        self.batches.lock().len()
    }

    /// Simulate the upstream dropping the connection.
    pub fn drop_connection(&self) {
        if let Some(listener) = self.listener.lock().clone() {
            listener.on_disconnected();
        }
    }

    /// Simulate the upstream ending the login session.
    pub fn log_off(&self, reason: &str) {
        if let Some(listener) = self.listener.lock().clone() {
            listener.on_logged_off(reason);
        }
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

impl UpstreamFeed for FakeUpstream {
    fn connect(&self, listener: SessionListener) {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let result = self.connect_results.lock().pop_front().unwrap_or(Ok(()));
        *self.listener.lock() = Some(listener.clone());
        listener.on_connected(result);
    }

    fn log_on(&self) {
        self.logons.fetch_add(1, Ordering::SeqCst);
        let result = self.login_results.lock().pop_front().unwrap_or(Ok(()));
        if let Some(listener) = self.listener.lock().clone() {
            listener.on_logged_on(result);
        }
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn changes_since(&self, since: ChangeNumber) -> Result<ChangeBatch> {
        self.polls.fetch_add(1, Ordering::SeqCst);

        {
            let mut failures = self.fail_polls.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(RelayError::Upstream("request timed out".into()));
            }
        }

        Ok(self.batches.lock().pop_front().unwrap_or_else(|| ChangeBatch {
            current_change_number: since,
            ..Default::default()
        }))
    }
}

/// Session timings short enough for tests.
pub fn quick_session() -> SessionConfig {
    SessionConfig {
        reconnect_delay: Duration::from_millis(30),
        login_retry_delay: Duration::from_millis(20),
        callback_wait: Duration::from_millis(10),
        warmup_delay: Duration::ZERO,
        warmup_jitter: Duration::ZERO,
        poll_jitter: Duration::from_millis(5),
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Next message of the given `Type`, skipping everything else.
pub fn next_of_type(handle: &ConnectionHandle, kind: &str) -> Option<serde_json::Value> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let text = handle.recv_timeout(remaining).ok()?;
        let value: serde_json::Value = serde_json::from_str(&text).ok()?;
        if value["Type"] == kind {
            return Some(value);
        }
    }
}

/// Every message currently buffered, parsed.
pub fn drain(handle: &ConnectionHandle) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    while let Ok(text) = handle.try_recv() {
        if let Ok(value) = serde_json::from_str(&text) {
            out.push(value);
        }
    }
    out
}
