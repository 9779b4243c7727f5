//! Error types for the changelist relay.

use crate::registry::SubscriberId;
use thiserror::Error;

/// Main error type for relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid checkpoint format: {0}")]
    InvalidFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid subscriber filter: {0}")]
    InvalidFilter(String),

    #[error("Subscriber not found: {0}")]
    SubscriberNotFound(SubscriberId),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Name lookup failed: {0}")]
    Enrichment(String),

    #[error("Session already started")]
    AlreadyStarted,

    #[error("Session is shut down")]
    ShutDown,
}

impl From<serde_json::Error> for RelayError {
    fn from(e: serde_json::Error) -> Self {
        RelayError::Serialization(e.to_string())
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
