use std::collections::HashSet;

use crate::keyed_list::{Entity, KeyedList};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub removed: usize,
    pub inserted: usize,
    pub updated: usize,
}

impl ReconcileReport {
    pub fn is_unchanged(&self) -> bool {
        self.removed == 0 && self.inserted == 0 && self.updated == 0
    }
}

/// Brings the key set of `list` in line with `snapshot`.
///
/// Entries whose key is absent from the snapshot are removed, new keys are
/// appended in snapshot order, and entries present on both sides keep their
/// client-only state. Snapshot-owned fields that changed are refreshed in
/// place. When a key appears more than once in the snapshot the first record
/// wins.
pub fn reconcile<T: Entity>(list: &mut KeyedList<T>, snapshot: Vec<T>) -> ReconcileReport {
    let mut report = ReconcileReport::default();

    let snapshot_keys: HashSet<T::Key> = snapshot.iter().map(Entity::key).collect();
    let stale: Vec<T::Key> = list
        .iter()
        .map(Entity::key)
        .filter(|key| !snapshot_keys.contains(key))
        .collect();
    for key in &stale {
        if list.remove_by_key(key).is_some() {
            report.removed += 1;
        }
    }

    let mut seen = HashSet::with_capacity(snapshot_keys.len());
    for fresh in snapshot {
        let key = fresh.key();
        if !seen.insert(key.clone()) {
            log::debug!("[reconcile] duplicate snapshot key {key:?} ignored");
            continue;
        }

        let updates = match list.find(&key) {
            Some(existing) => existing.snapshot_updates(&fresh),
            None => {
                if list.insert(fresh) {
                    report.inserted += 1;
                }
                continue;
            }
        };
        for update in updates {
            if list.update_field(&key, update) {
                report.updated += 1;
            }
        }
    }

    report
}
