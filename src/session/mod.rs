//! Upstream feed session.
//!
//! Owns the connection to the remote catalog and turns it into outbound
//! events:
//! - A callback loop reacts to connect/login/logoff/disconnect
//!   notifications and schedules reconnects
//! - While logged in, a poll loop tagged with the current epoch requests
//!   changes and reconciles each batch against the checkpoint
//! - Bumping the epoch retires any poll loop from an earlier login
//!
//! # Example
//!
//! ```ignore
//! let session = FeedSession::new(
//!     SessionConfig::default(),
//!     upstream,
//!     Arc::clone(&registry),
//!     Enricher::placeholders(),
//!     Checkpoint::new("last-changenumber.txt"),
//! )?;
//! session.start()?;
//!
//! // ... later
//! session.shutdown()?;
//! ```

mod machine;
mod poller;
mod reconcile;
mod shared;
mod types;

pub use machine::FeedSession;
pub use reconcile::{reconcile, Reconciliation};
pub use types::{FeedListener, SessionConfig, SessionListener, UpstreamFeed, UpstreamNotification};
