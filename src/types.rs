//! Core types for the changelist relay.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Identifier of an app or package tracked by the upstream catalog.
pub type ItemId = u32;

/// Change number issued by the upstream source. `0` means unknown.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ChangeNumber(pub u32);

impl ChangeNumber {
    /// The bootstrap value, before anything has been processed.
    pub const UNKNOWN: ChangeNumber = ChangeNumber(0);

    pub fn is_unknown(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ChangeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CN({})", self.0)
    }
}

impl fmt::Display for ChangeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One item's latest change as reported by the upstream source.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemChangeRecord {
    pub item_id: ItemId,
    pub change_number: ChangeNumber,
}

impl ItemChangeRecord {
    pub fn new(item_id: ItemId, change_number: u32) -> Self {
        Self {
            item_id,
            change_number: ChangeNumber(change_number),
        }
    }
}

/// Response to a "changes since" request.
///
/// App and package records are keyed independently by item id; the two
/// collections carry no ordering guarantee.
#[derive(Clone, Debug, Default)]
pub struct ChangeBatch {
    /// Ceiling change number reported by the upstream source.
    pub current_change_number: ChangeNumber,
    pub app_changes: HashMap<ItemId, ItemChangeRecord>,
    pub package_changes: HashMap<ItemId, ItemChangeRecord>,
}

impl ChangeBatch {
    /// Create an empty batch with the given ceiling.
    pub fn new(current_change_number: u32) -> Self {
        Self {
            current_change_number: ChangeNumber(current_change_number),
            ..Default::default()
        }
    }

    /// Builder-style helper adding an app record.
    pub fn with_app(mut self, item_id: ItemId, change_number: u32) -> Self {
        self.app_changes
            .insert(item_id, ItemChangeRecord::new(item_id, change_number));
        self
    }

    /// Builder-style helper adding a package record.
    pub fn with_package(mut self, item_id: ItemId, change_number: u32) -> Self {
        self.package_changes
            .insert(item_id, ItemChangeRecord::new(item_id, change_number));
        self
    }
}

/// One discrete, numbered changelist.
///
/// At least one of `app_ids` / `package_ids` is non-empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangelistEvent {
    pub change_number: ChangeNumber,
    pub app_ids: BTreeSet<ItemId>,
    pub package_ids: BTreeSet<ItemId>,
}

/// Generation counter for one logged-in lifetime of the upstream session.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SessionEpoch(pub u64);

impl fmt::Debug for SessionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({})", self.0)
    }
}

impl fmt::Display for SessionEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of the upstream session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Initial and terminal state.
    #[default]
    Disconnected,
    /// Connection or login in progress.
    Connecting,
    /// Logged in; the poll loop is running.
    LoggedIn,
    /// Waiting for the reconnect delay to elapse.
    Backoff,
    /// External stop requested.
    ShuttingDown,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::LoggedIn => "logged_in",
            SessionState::Backoff => "backoff",
            SessionState::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}
