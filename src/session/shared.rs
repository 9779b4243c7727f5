//! State shared between the callback loop and poll loops.

use crate::types::{ChangeNumber, SessionEpoch, SessionState};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

pub(crate) struct SessionShared {
    state: Mutex<SessionState>,
    epoch: AtomicU64,
    logged_on: AtomicBool,
    running: AtomicBool,
    /// When the first request of the process may go out. Fixed by the
    /// first poll loop; later loops wait for the same instant.
    first_poll_at: Mutex<Option<Instant>>,
    /// Held while emitting session events, so an epoch change and the
    /// events of the epoch it retires never interleave.
    emits: Mutex<()>,
    /// Last fully processed change number.
    pub(crate) progress: Mutex<ChangeNumber>,
    /// Disconnected once shutdown begins; wakes every interruptible wait.
    stop: Receiver<()>,
}

impl SessionShared {
    pub(crate) fn new(checkpoint: ChangeNumber, stop: Receiver<()>) -> Self {
        Self {
            state: Mutex::new(SessionState::Disconnected),
            epoch: AtomicU64::new(0),
            logged_on: AtomicBool::new(false),
            running: AtomicBool::new(true),
            first_poll_at: Mutex::new(None),
            emits: Mutex::new(()),
            progress: Mutex::new(checkpoint),
            stop,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        if *state != next {
            tracing::debug!(from = %*state, to = %next, "Session state change");
            *state = next;
        }
    }

    pub(crate) fn epoch(&self) -> SessionEpoch {
        SessionEpoch(self.epoch.load(Ordering::SeqCst))
    }

    /// Start a new epoch, invalidating poll loops tagged with the old one.
    pub(crate) fn bump_epoch(&self) -> SessionEpoch {
        SessionEpoch(self.epoch.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub(crate) fn is_logged_on(&self) -> bool {
        self.logged_on.load(Ordering::SeqCst)
    }

    /// Set the login flag, returning the previous value.
    pub(crate) fn swap_logged_on(&self, value: bool) -> bool {
        self.logged_on.swap(value, Ordering::SeqCst)
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Clear the running flag, returning whether it was set.
    pub(crate) fn stop_running(&self) -> bool {
        self.running.swap(false, Ordering::SeqCst)
    }

    /// Deadline for the first request of the process, computed from
    /// `warmup` on the first call only.
    pub(crate) fn first_poll_deadline<F>(&self, warmup: F) -> Instant
    where
        F: FnOnce() -> Duration,
    {
        *self
            .first_poll_at
            .lock()
            .get_or_insert_with(|| Instant::now() + warmup())
    }

    pub(crate) fn lock_emits(&self) -> MutexGuard<'_, ()> {
        self.emits.lock()
    }

    pub(crate) fn change_number(&self) -> ChangeNumber {
        *self.progress.lock()
    }

    pub(crate) fn stop_signal(&self) -> &Receiver<()> {
        &self.stop
    }

    /// Sleep for `duration` unless shutdown begins first.
    ///
    /// Returns `false` if woken by shutdown.
    pub(crate) fn sleep(&self, duration: Duration) -> bool {
        matches!(self.stop.recv_timeout(duration), Err(RecvTimeoutError::Timeout))
    }
}
