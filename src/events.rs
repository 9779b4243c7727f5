//! Outbound events delivered verbatim to subscribers.
//!
//! Every event serializes to a JSON object tagged by a `Type` field, e.g.
//! `{"Type":"AppUpdate","AppID":440,"ChangeNumber":1234}`. New variants are
//! added to [`OutboundEvent`]; nothing dispatches on anything but the tag.

use crate::error::Result;
use crate::types::{ChangeNumber, ChangelistEvent, ItemId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Events sent to subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Type")]
pub enum OutboundEvent {
    /// Number of broadcast subscribers currently connected.
    UsersOnline {
        #[serde(rename = "Users")]
        users: usize,
    },

    /// The upstream session logged in.
    LogOn,

    /// The upstream session logged off or lost its connection.
    LogOff,

    /// One changelist with display names for the touched items.
    Changelist {
        #[serde(rename = "ChangeNumber")]
        change_number: ChangeNumber,
        #[serde(rename = "Apps")]
        apps: BTreeMap<ItemId, String>,
        #[serde(rename = "Packages")]
        packages: BTreeMap<ItemId, String>,
    },

    /// A subscribed app changed.
    AppUpdate {
        #[serde(rename = "AppID")]
        app_id: ItemId,
        #[serde(rename = "ChangeNumber")]
        change_number: ChangeNumber,
    },
}

impl OutboundEvent {
    /// Serialize to the JSON text sent over the wire.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The discriminant as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::UsersOnline { .. } => "UsersOnline",
            OutboundEvent::LogOn => "LogOn",
            OutboundEvent::LogOff => "LogOff",
            OutboundEvent::Changelist { .. } => "Changelist",
            OutboundEvent::AppUpdate { .. } => "AppUpdate",
        }
    }
}

/// Optional lookup of human-readable names for changed items.
///
/// Implementations may hit a database or a remote service. Ids missing from
/// the returned map keep their placeholder name.
pub trait NameResolver: Send + Sync {
    fn app_names(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, String>>;

    fn package_names(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, String>>;
}

/// Resolver used when no lookup service is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoNames;

impl NameResolver for NoNames {
    fn app_names(&self, _ids: &[ItemId]) -> Result<HashMap<ItemId, String>> {
        Ok(HashMap::new())
    }

    fn package_names(&self, _ids: &[ItemId]) -> Result<HashMap<ItemId, String>> {
        Ok(HashMap::new())
    }
}

/// Name of one catalog item.
#[derive(Clone, Debug)]
struct NameEntry {
    name: String,
    last_known_name: Option<String>,
}

/// In-memory resolver, e.g. filled from a catalog snapshot at startup and
/// refreshed while the relay runs.
///
/// Renamed items resolve to `Name (LastKnownName)`.
#[derive(Debug, Default)]
pub struct NameTable {
    apps: RwLock<HashMap<ItemId, NameEntry>>,
    packages: RwLock<HashMap<ItemId, NameEntry>>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_app(&self, id: ItemId, name: impl Into<String>, last_known_name: Option<&str>) {
        self.apps.write().insert(id, NameEntry::new(name, last_known_name));
    }

    pub fn set_package(&self, id: ItemId, name: impl Into<String>, last_known_name: Option<&str>) {
        self.packages
            .write()
            .insert(id, NameEntry::new(name, last_known_name));
    }

    fn lookup(table: &RwLock<HashMap<ItemId, NameEntry>>, ids: &[ItemId]) -> HashMap<ItemId, String> {
        let table = table.read();
        ids.iter()
            .filter_map(|id| {
                let entry = table.get(id)?;
                Some((*id, display_name(&entry.name, entry.last_known_name.as_deref())))
            })
            .collect()
    }
}

impl NameEntry {
    fn new(name: impl Into<String>, last_known_name: Option<&str>) -> Self {
        Self {
            name: name.into(),
            last_known_name: last_known_name.map(str::to_string),
        }
    }
}

impl NameResolver for NameTable {
    fn app_names(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, String>> {
        Ok(Self::lookup(&self.apps, ids))
    }

    fn package_names(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, String>> {
        Ok(Self::lookup(&self.packages, ids))
    }
}

/// Combine a current name with the last name the item was known by.
fn display_name(name: &str, last_known_name: Option<&str>) -> String {
    match last_known_name {
        Some(last) if !last.is_empty() && last != name => format!("{} ({})", name, last),
        _ => name.to_string(),
    }
}

pub fn app_placeholder(id: ItemId) -> String {
    format!("Unknown App {}", id)
}

pub fn package_placeholder(id: ItemId) -> String {
    format!("Unknown Package {}", id)
}

/// Turns assembled changelists into wire events, filling in names.
#[derive(Clone)]
pub struct Enricher {
    resolver: Arc<dyn NameResolver>,
}

impl Enricher {
    pub fn new(resolver: Arc<dyn NameResolver>) -> Self {
        Self { resolver }
    }

    /// Enricher that only ever produces placeholder names.
    pub fn placeholders() -> Self {
        Self::new(Arc::new(NoNames))
    }

    /// Build the outbound event for one changelist.
    ///
    /// Lookup failures are logged and degrade to placeholder names.
    pub fn changelist(&self, changelist: &ChangelistEvent) -> OutboundEvent {
        let app_ids: Vec<ItemId> = changelist.app_ids.iter().copied().collect();
        let package_ids: Vec<ItemId> = changelist.package_ids.iter().copied().collect();

        let mut apps: BTreeMap<ItemId, String> =
            app_ids.iter().map(|&id| (id, app_placeholder(id))).collect();
        let mut packages: BTreeMap<ItemId, String> = package_ids
            .iter()
            .map(|&id| (id, package_placeholder(id)))
            .collect();

        if !app_ids.is_empty() {
            match self.resolver.app_names(&app_ids) {
                Ok(names) => overlay(&mut apps, names),
                Err(e) => tracing::warn!(
                    change_number = %changelist.change_number,
                    error = %e,
                    "App name lookup failed"
                ),
            }
        }

        if !package_ids.is_empty() {
            match self.resolver.package_names(&package_ids) {
                Ok(names) => overlay(&mut packages, names),
                Err(e) => tracing::warn!(
                    change_number = %changelist.change_number,
                    error = %e,
                    "Package name lookup failed"
                ),
            }
        }

        OutboundEvent::Changelist {
            change_number: changelist.change_number,
            apps,
            packages,
        }
    }
}

impl Default for Enricher {
    fn default() -> Self {
        Self::placeholders()
    }
}

/// Replace placeholders with resolved names; ids not in the changelist are ignored.
fn overlay(target: &mut BTreeMap<ItemId, String>, names: HashMap<ItemId, String>) {
    for (id, name) in names {
        if let Some(slot) = target.get_mut(&id) {
            *slot = name;
        }
    }
}
