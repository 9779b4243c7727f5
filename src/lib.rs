//! # Changelist Relay
//!
//! Mirrors a remote catalog's change stream to many live subscribers.
//!
//! ## Core Concepts
//!
//! - **Session**: Persistent upstream connection that logs in, polls for
//!   changes and reconnects on failure
//! - **Assembler**: Turns one batch of per-item changes into ordered
//!   changelist events
//! - **Registry**: Thread-safe subscriber set with broadcast, targeted
//!   sends and lazy pruning of dead connections
//! - **Checkpoint**: Last processed change number, saved at shutdown
//!
//! ## Example
//!
//! ```ignore
//! use changelist_relay::{ChannelConnection, Relay, RelayConfig};
//!
//! let relay = Relay::new(RelayConfig::default(), upstream)?;
//! relay.start()?;
//!
//! // From the transport's accept loop
//! let (connection, handle) = ChannelConnection::pair(1000);
//! let id = relay.on_subscriber_connect(connection, Some("steam-pics"))?;
//!
//! // On Ctrl+C
//! relay.shutdown()?;
//! ```

pub mod assembler;
pub mod checkpoint;
pub mod error;
pub mod events;
pub mod registry;
pub mod relay;
pub mod session;
pub mod types;

// Re-exports
pub use assembler::assemble;
pub use checkpoint::Checkpoint;
pub use error::{RelayError, Result};
pub use events::{Enricher, NameResolver, NameTable, NoNames, OutboundEvent};
pub use registry::{
    app_filter_entries, AppFilter, BroadcastRegistry, ChannelConnection, Connection,
    ConnectionHandle, Heartbeat, RegistryConfig, SubscriberId,
};
pub use relay::{Relay, RelayConfig};
pub use session::{
    reconcile, FeedListener, FeedSession, Reconciliation, SessionConfig, SessionListener,
    UpstreamFeed, UpstreamNotification,
};
pub use types::*;
