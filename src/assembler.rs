//! Reduces a batch of per-item change records into changelist events.
//!
//! The upstream source answers a poll with one ceiling change number and a
//! flat set of items, each tagged with the change number that last touched
//! it. Several changelists may be folded into one response, so the records
//! are grouped by their own change number (not the ceiling) and the app and
//! package groupings are joined on that key.

use crate::types::{ChangeNumber, ChangelistEvent, ItemChangeRecord, ItemId};
use std::collections::{BTreeMap, BTreeSet};

/// Group records by their own change number.
fn group_by_change<'a, I>(records: I) -> BTreeMap<ChangeNumber, BTreeSet<ItemId>>
where
    I: IntoIterator<Item = &'a ItemChangeRecord>,
{
    let mut groups: BTreeMap<ChangeNumber, BTreeSet<ItemId>> = BTreeMap::new();
    for record in records {
        groups
            .entry(record.change_number)
            .or_default()
            .insert(record.item_id);
    }
    groups
}

/// Assemble ordered changelist events from app and package records.
///
/// Produces one event per distinct change number found in either input
/// (full outer join), ascending by change number. Every event has at least
/// one non-empty id set.
pub fn assemble<'a, A, P>(app_records: A, package_records: P) -> Vec<ChangelistEvent>
where
    A: IntoIterator<Item = &'a ItemChangeRecord>,
    P: IntoIterator<Item = &'a ItemChangeRecord>,
{
    let mut apps = group_by_change(app_records);
    let mut packages = group_by_change(package_records);

    let keys: BTreeSet<ChangeNumber> = apps.keys().chain(packages.keys()).copied().collect();

    // BTreeSet iteration already yields keys in ascending order.
    keys.into_iter()
        .map(|change_number| ChangelistEvent {
            change_number,
            app_ids: apps.remove(&change_number).unwrap_or_default(),
            package_ids: packages.remove(&change_number).unwrap_or_default(),
        })
        .collect()
}
