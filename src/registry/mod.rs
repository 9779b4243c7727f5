//! Subscriber registry for live changelist delivery.
//!
//! Holds the set of connected subscribers and fans events out to them:
//! - Broadcasts (status, changelists, user counts) to plain subscribers
//! - Targeted app updates to subscribers that follow specific apps
//! - Lazy pruning of connections found dead during a pass
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(BroadcastRegistry::new());
//!
//! let (connection, handle) = ChannelConnection::pair(1000);
//! let id = registry.add(connection);
//! registry.set_filter(id, &app_filter_entries("steam-pics, app-440"))?;
//!
//! let _heartbeat = Heartbeat::spawn(Arc::clone(&registry), Duration::from_secs(30))?;
//!
//! while let Ok(message) = handle.recv() {
//!     println!("{}", message);
//! }
//! ```

mod heartbeat;
mod manager;
mod types;

pub use heartbeat::Heartbeat;
pub use manager::BroadcastRegistry;
pub use types::{
    app_filter_entries, AppFilter, ChannelConnection, Connection, ConnectionHandle,
    RegistryConfig, SubscriberId, APP_FILTER_PREFIX,
};
