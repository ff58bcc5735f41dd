//! Tombstone ledger for deleted document ids

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::models::DocId;

/// Set of document ids known to have been deleted locally.
///
/// The ledger is pushed alongside the collection so other devices learn of
/// deletions that happened while they were offline. It grows monotonically:
/// ids are never reused, so there is no safe moment to forget one, and the
/// wire format (a bare id array) carries no timestamps to expire against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TombstoneLedger {
    ids: BTreeSet<DocId>,
}

impl TombstoneLedger {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ids: BTreeSet::new(),
        }
    }

    /// Record a local deletion. Returns `true` if the id was newly marked.
    pub fn mark_deleted(&mut self, id: DocId) -> bool {
        self.ids.insert(id)
    }

    #[must_use]
    pub fn is_deleted(&self, id: DocId) -> bool {
        self.ids.contains(&id)
    }

    /// Current tombstone set, for merge input and remote push.
    #[must_use]
    pub fn snapshot(&self) -> BTreeSet<DocId> {
        self.ids.clone()
    }

    /// Absorb tombstones learned from a remote pull.
    ///
    /// Returns how many ids were new to this ledger.
    pub fn merge(&mut self, remote: &BTreeSet<DocId>) -> usize {
        let before = self.ids.len();
        self.ids.extend(remote.iter().copied());
        self.ids.len() - before
    }

    /// Whether every local tombstone is already known remotely.
    #[must_use]
    pub fn is_subset_of(&self, remote: &BTreeSet<DocId>) -> bool {
        self.ids.is_subset(remote)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
