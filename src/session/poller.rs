//! Poll loop bound to one session epoch.

use crate::events::{Enricher, OutboundEvent};
use crate::registry::BroadcastRegistry;
use crate::types::{ChangeBatch, ChangeNumber, ItemId, SessionEpoch};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::reconcile::{reconcile, Reconciliation};
use super::shared::SessionShared;
use super::types::{SessionConfig, UpstreamFeed};

/// Longest stretch a waiting poll loop goes without checking its epoch.
const EPOCH_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Random duration in `[0, max]`.
fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// Requests changes in a loop for as long as its epoch is current.
pub(crate) struct Poller {
    pub(crate) shared: Arc<SessionShared>,
    pub(crate) upstream: Arc<dyn UpstreamFeed>,
    pub(crate) registry: Arc<BroadcastRegistry>,
    pub(crate) enricher: Enricher,
    pub(crate) config: SessionConfig,
    pub(crate) epoch: SessionEpoch,
}

impl Poller {
    fn is_current(&self) -> bool {
        self.shared.is_running() && self.shared.epoch() == self.epoch
    }

    pub(crate) fn run(self) {
        tracing::debug!(epoch = %self.epoch, "Poll loop started");

        let first_poll_at = self
            .shared
            .first_poll_deadline(|| self.config.warmup_delay + jitter(self.config.warmup_jitter));
        let remaining = first_poll_at.saturating_duration_since(Instant::now());
        if !remaining.is_zero() {
            tracing::info!(
                epoch = %self.epoch,
                delay_ms = remaining.as_millis() as u64,
                "Waiting for subscribers to reconnect before first poll"
            );
        }
        if !self.wait_until(first_poll_at) {
            tracing::debug!(epoch = %self.epoch, "Poll loop retired during warm-up");
            return;
        }

        while self.is_current() {
            let since = self.shared.change_number();

            match self.upstream.changes_since(since) {
                Ok(batch) => {
                    if !self.is_current() {
                        break;
                    }
                    self.apply(since, &batch);
                }
                Err(e) => {
                    tracing::warn!(epoch = %self.epoch, since = %since, error = %e, "Change poll failed");
                }
            }

            if !self.shared.sleep(jitter(self.config.poll_jitter)) {
                break;
            }
        }

        tracing::debug!(epoch = %self.epoch, "Poll loop exited");
    }

    /// Sleep until `deadline`. Returns `false` as soon as the epoch is
    /// retired or shutdown begins.
    fn wait_until(&self, deadline: Instant) -> bool {
        loop {
            if !self.is_current() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            if !self.shared.sleep(remaining.min(EPOCH_CHECK_INTERVAL)) {
                return false;
            }
        }
    }

    /// Reconcile one batch and push the resulting events.
    fn apply(&self, since: ChangeNumber, batch: &ChangeBatch) {
        let outcome = {
            let mut progress = self.shared.progress.lock();
            if !self.is_current() {
                return;
            }
            let outcome = reconcile(since, batch);
            if let Reconciliation::Advanced { to, .. } = &outcome {
                *progress = *to;
            }
            outcome
        };

        let Reconciliation::Advanced {
            from,
            to,
            changelists,
            suppressed,
        } = outcome
        else {
            return;
        };

        tracing::info!(
            from = %from,
            to = %to,
            apps = batch.app_changes.len(),
            packages = batch.package_changes.len(),
            suppressed,
            "Changelist {} -> {}",
            from,
            to
        );

        if suppressed {
            return;
        }

        let events: Vec<OutboundEvent> = changelists
            .iter()
            .map(|changelist| self.enricher.changelist(changelist))
            .collect();

        let changed_apps: HashMap<ItemId, ChangeNumber> = batch
            .app_changes
            .values()
            .map(|record| (record.item_id, record.change_number))
            .collect();

        // Name lookups may be slow; the session can have logged off meanwhile
        let _emits = self.shared.lock_emits();
        if !self.is_current() {
            tracing::debug!(epoch = %self.epoch, to = %to, "Epoch retired, dropping batch events");
            return;
        }

        for event in &events {
            self.registry.broadcast(event);
        }
        self.registry
            .send_targeted(&changed_apps, |app_id, change_number| OutboundEvent::AppUpdate {
                app_id,
                change_number,
            });
    }
}
