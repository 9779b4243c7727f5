//! Main Relay struct tying the session, registry and heartbeat together.

use crate::checkpoint::{Checkpoint, DEFAULT_CHECKPOINT_FILE};
use crate::error::Result;
use crate::events::{Enricher, NameResolver, NoNames, OutboundEvent};
use crate::registry::{
    app_filter_entries, BroadcastRegistry, Connection, Heartbeat, RegistryConfig, SubscriberId,
};
use crate::session::{FeedSession, SessionConfig, UpstreamFeed};
use crate::types::{ChangeNumber, SessionState};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;

/// Relay configuration.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Where the checkpoint is read at startup and written at shutdown.
    pub checkpoint_path: PathBuf,

    /// Upstream session timing.
    pub session: SessionConfig,

    /// Subscriber limits and heartbeat interval.
    pub registry: RegistryConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_FILE),
            session: SessionConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

/// The changelist relay.
///
/// Provides a unified interface for:
/// - Running the upstream session
/// - Accepting and dropping subscriber connections
/// - Periodic user-count heartbeats
/// - Orderly shutdown with a final checkpoint write
pub struct Relay {
    registry: Arc<BroadcastRegistry>,
    session: FeedSession,
    heartbeat: Mutex<Option<Heartbeat>>,
}

impl Relay {
    /// Build a relay without name lookups.
    pub fn new(config: RelayConfig, upstream: Arc<dyn UpstreamFeed>) -> Result<Self> {
        Self::with_resolver(config, upstream, Arc::new(NoNames))
    }

    /// Build a relay that resolves display names through `resolver`.
    pub fn with_resolver(
        config: RelayConfig,
        upstream: Arc<dyn UpstreamFeed>,
        resolver: Arc<dyn NameResolver>,
    ) -> Result<Self> {
        let registry = Arc::new(BroadcastRegistry::with_config(config.registry));
        let session = FeedSession::new(
            config.session,
            upstream,
            Arc::clone(&registry),
            Enricher::new(resolver),
            Checkpoint::new(&config.checkpoint_path),
        )?;

        Ok(Self {
            registry,
            session,
            heartbeat: Mutex::new(None),
        })
    }

    /// Start the upstream session and the heartbeat.
    pub fn start(&self) -> Result<()> {
        self.session.start()?;

        let interval = self.registry.config().heartbeat_interval;
        let heartbeat = Heartbeat::spawn(Arc::clone(&self.registry), interval)?;
        *self.heartbeat.lock() = Some(heartbeat);

        tracing::info!("Relay started");
        Ok(())
    }

    /// Register a new connection.
    ///
    /// `protocols` is the comma-separated sub-protocol list the client asked
    /// for. `app-<id>` entries make it an app subscriber that only receives
    /// targeted updates; an invalid or oversized list closes the connection
    /// and returns an error. Plain subscribers are greeted with the current
    /// user count.
    pub fn on_subscriber_connect(
        &self,
        connection: Arc<dyn Connection>,
        protocols: Option<&str>,
    ) -> Result<SubscriberId> {
        let id = self.registry.add(connection);

        let apps = protocols.map(app_filter_entries).unwrap_or_default();
        if !apps.is_empty() {
            self.registry.set_filter(id, &apps)?;
            tracing::info!(
                subscriber = %id,
                apps = %apps.join(", "),
                app_subscribers = self.registry.app_subscriber_count(),
                "App subscriber connected"
            );
            return Ok(id);
        }

        let users = self.registry.audience_count();
        self.registry.send_to(id, &OutboundEvent::UsersOnline { users })?;
        tracing::debug!(subscriber = %id, users, "Subscriber connected");

        Ok(id)
    }

    /// Forget a connection the transport saw close. Idempotent.
    pub fn on_subscriber_disconnect(&self, id: SubscriberId) {
        if self.registry.remove(id) {
            tracing::debug!(subscriber = %id, "Subscriber disconnected");
        }
    }

    pub fn registry(&self) -> &Arc<BroadcastRegistry> {
        &self.registry
    }

    pub fn session(&self) -> &FeedSession {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn change_number(&self) -> ChangeNumber {
        self.session.change_number()
    }

    /// Stop everything, save the checkpoint and close all subscribers.
    pub fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down relay");

        if let Some(heartbeat) = self.heartbeat.lock().take() {
            heartbeat.stop();
        }

        let saved = self.session.shutdown();
        self.registry.close_all();
        saved
    }
}
