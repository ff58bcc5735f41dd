//! Merge engine
//!
//! Pure reconciliation of a local collection with a pulled remote snapshot.
//! Conflict resolution is whole-document last-write-wins by `last_modified`;
//! tombstones remove unconditionally, regardless of timestamps.

use std::collections::{BTreeSet, HashMap};

use crate::models::{DocId, Document};

/// Ids whose content changed as a result of a merge, partitioned for
/// change-notification consumers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub inserted: Vec<DocId>,
    pub updated: Vec<DocId>,
    pub removed: Vec<DocId>,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.removed.len()
    }
}

/// Result of one merge pass.
#[derive(Debug, Clone)]
pub struct MergeOutcome<D> {
    /// Next local collection, most-recent-first.
    pub documents: Vec<D>,
    /// What changed locally, for UI notification.
    pub changes: ChangeSet,
    /// Whether local state holds anything the remote snapshot lacks, so the
    /// caller should follow the merge with a push.
    pub needs_push: bool,
}

/// Merge remote documents and tombstones into the local collection.
///
/// Rules, in order:
/// 1. Any document whose id is tombstoned (locally or remotely) is removed.
/// 2. A remote document absent locally is inserted, unless its content key
///    duplicates an existing local document's content.
/// 3. For a document present on both sides the newer `last_modified` wins;
///    on an exact tie the local copy survives unchanged.
/// 4. Local documents absent from the remote snapshot are left untouched.
pub fn merge<D: Document>(
    local: &[D],
    remote: &[D],
    local_tombstones: &BTreeSet<DocId>,
    remote_tombstones: &BTreeSet<DocId>,
) -> MergeOutcome<D> {
    let mut changes = ChangeSet::default();
    let mut needs_push = !remote_tombstones.is_superset(local_tombstones);

    let tombstoned =
        |id: DocId| local_tombstones.contains(&id) || remote_tombstones.contains(&id);

    // Step 1: tombstones always remove.
    let mut merged: Vec<D> = Vec::with_capacity(local.len() + remote.len());
    for doc in local {
        if tombstoned(doc.id()) {
            changes.removed.push(doc.id());
        } else {
            merged.push(doc.clone());
        }
    }
    if !changes.removed.is_empty() {
        // The remote snapshot may still carry the removed documents.
        needs_push = true;
    }

    let mut index_by_id: HashMap<DocId, usize> = merged
        .iter()
        .enumerate()
        .map(|(index, doc)| (doc.id(), index))
        .collect();
    let remote_ids: BTreeSet<DocId> = remote.iter().map(Document::id).collect();

    // Step 2: fold in remote documents.
    for incoming in remote {
        if tombstoned(incoming.id()) {
            continue;
        }

        match index_by_id.get(&incoming.id()) {
            None => {
                // Content-equality dedupe for kinds that define a key: the
                // same text arriving under a fresh id is not a new document.
                let duplicate = incoming.content_key().is_some_and(|key| {
                    merged.iter().any(|doc| doc.content_key() == Some(key))
                });
                if duplicate {
                    continue;
                }
                index_by_id.insert(incoming.id(), merged.len());
                merged.push(incoming.clone());
                changes.inserted.push(incoming.id());
            }
            Some(&index) => {
                let ours = &merged[index];
                if ours.last_modified() >= incoming.last_modified() {
                    // Local wins, ties included; if strictly newer the remote
                    // snapshot is stale and needs our copy.
                    if ours.last_modified() > incoming.last_modified() {
                        needs_push = true;
                    }
                } else {
                    merged[index] = incoming.clone();
                    changes.updated.push(incoming.id());
                }
            }
        }
    }

    // Step 4: local documents the remote never saw still need pushing.
    if merged
        .iter()
        .any(|doc| doc.is_syncable() && !remote_ids.contains(&doc.id()))
    {
        needs_push = true;
    }

    merged.sort_by(|a, b| b.last_modified().cmp(&a.last_modified()));

    MergeOutcome {
        documents: merged,
        changes,
        needs_push,
    }
}
