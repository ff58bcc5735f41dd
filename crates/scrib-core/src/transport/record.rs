//! Native-record remote transport
//!
//! Each document is an individually addressable remote record with a
//! server-assigned change tag. Deletes are first-class remote operations,
//! so no persistent tombstone ledger is required; deletions observed in the
//! change feed are handed to the merge engine as per-pass tombstones.

use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::{DocId, DocKind, Document};

use super::{RemoteSnapshot, RemoteTransport};

/// A remote record as the server stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRecord {
    pub id: DocId,
    /// JSON-encoded document content.
    pub payload: String,
    /// Opaque server change stamp; compared for equality, never interpreted.
    pub change_tag: String,
}

/// One entry of the incremental change feed.
#[derive(Debug, Clone)]
pub enum RecordChange {
    Saved(RemoteRecord),
    Deleted(DocId),
}

/// Result of one record write.
#[derive(Debug, Clone)]
pub enum SaveOutcome {
    Saved { change_tag: String },
    /// A newer server-side write holds this record; `latest` carries its
    /// current state so the caller can re-derive and retry.
    Conflict { latest: RemoteRecord },
}

/// Per-record remote store with native conflict detection.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Changes after `cursor`, plus the new cursor.
    async fn changes_since(&self, kind: DocKind, cursor: u64) -> Result<(Vec<RecordChange>, u64)>;

    /// Full current record set, for disaster recovery.
    async fn fetch_all(&self, kind: DocKind) -> Result<(Vec<RemoteRecord>, u64)>;

    /// Write one record. `expected_tag` of `None` means "create"; a stale
    /// tag is reported as a conflict, never silently overwritten.
    async fn save(
        &self,
        kind: DocKind,
        id: DocId,
        payload: String,
        expected_tag: Option<&str>,
    ) -> Result<SaveOutcome>;

    async fn delete(&self, kind: DocKind, id: DocId) -> Result<()>;

    async fn clear(&self, kind: DocKind) -> Result<()>;
}

#[derive(Debug, Default)]
struct Mirror {
    cursor: u64,
    records: HashMap<DocId, RemoteRecord>,
    /// Records whose push hit two consecutive conflicts this pass and were
    /// deferred to the next one.
    deferred: BTreeSet<DocId>,
}

/// Record transport for one collection kind.
pub struct RecordTransport<D: Document> {
    store: Arc<dyn RecordStore>,
    mirror: Mutex<Mirror>,
    _kind: PhantomData<fn() -> D>,
}

impl<D: Document> RecordTransport<D> {
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            mirror: Mutex::new(Mirror::default()),
            _kind: PhantomData,
        }
    }

    /// Ids deferred by the last push after repeated conflicts.
    pub async fn deferred_conflicts(&self) -> BTreeSet<DocId> {
        self.mirror.lock().await.deferred.clone()
    }

    /// Disaster-recovery path: drop the incremental cursor and mirror the
    /// full remote record set.
    pub async fn refetch(&self) -> Result<RemoteSnapshot<D>> {
        let (records, cursor) = self.store.fetch_all(D::KIND).await?;
        let mut mirror = self.mirror.lock().await;
        mirror.cursor = cursor;
        mirror.records = records
            .into_iter()
            .map(|record| (record.id, record))
            .collect();
        Ok(RemoteSnapshot {
            documents: decode_mirror(&mirror.records),
            tombstones: BTreeSet::new(),
        })
    }
}

fn decode_mirror<D: Document>(records: &HashMap<DocId, RemoteRecord>) -> Vec<D> {
    records
        .values()
        .filter_map(|record| match serde_json::from_str(&record.payload) {
            Ok(document) => Some(document),
            Err(error) => {
                tracing::warn!("Undecodable remote record {}: {error}", record.id);
                None
            }
        })
        .collect()
}

#[async_trait]
impl<D: Document> RemoteTransport<D> for RecordTransport<D> {
    async fn pull(&self) -> Result<RemoteSnapshot<D>> {
        let mut mirror = self.mirror.lock().await;
        let (changes, cursor) = self.store.changes_since(D::KIND, mirror.cursor).await?;
        mirror.cursor = cursor;

        let mut deleted = BTreeSet::new();
        for change in changes {
            match change {
                RecordChange::Saved(record) => {
                    deleted.remove(&record.id);
                    mirror.records.insert(record.id, record);
                }
                RecordChange::Deleted(id) => {
                    mirror.records.remove(&id);
                    deleted.insert(id);
                }
            }
        }

        Ok(RemoteSnapshot {
            documents: decode_mirror(&mirror.records),
            tombstones: deleted,
        })
    }

    async fn push(&self, documents: &[D], tombstones: &BTreeSet<DocId>) -> Result<()> {
        let mut mirror = self.mirror.lock().await;
        mirror.deferred.clear();

        // Deletes are native operations here.
        for &id in tombstones {
            if mirror.records.remove(&id).is_some() {
                self.store.delete(D::KIND, id).await?;
            }
        }

        for document in documents {
            if !document.is_syncable() || tombstones.contains(&document.id()) {
                continue;
            }
            let id = document.id();
            let payload = serde_json::to_string(document)?;
            let expected = mirror.records.get(&id);
            if expected.is_some_and(|record| record.payload == payload) {
                continue;
            }

            let outcome = self
                .store
                .save(
                    D::KIND,
                    id,
                    payload.clone(),
                    expected.map(|record| record.change_tag.as_str()),
                )
                .await?;

            match outcome {
                SaveOutcome::Saved { change_tag } => {
                    mirror.records.insert(
                        id,
                        RemoteRecord {
                            id,
                            payload,
                            change_tag,
                        },
                    );
                }
                SaveOutcome::Conflict { latest } => {
                    // Re-derive from current local content and the latest
                    // server stamp, then re-push once.
                    let retry = self
                        .store
                        .save(D::KIND, id, payload.clone(), Some(&latest.change_tag))
                        .await?;
                    match retry {
                        SaveOutcome::Saved { change_tag } => {
                            mirror.records.insert(
                                id,
                                RemoteRecord {
                                    id,
                                    payload,
                                    change_tag,
                                },
                            );
                        }
                        SaveOutcome::Conflict { latest } => {
                            tracing::warn!(
                                "Record {id} conflicted twice in one pass; deferring"
                            );
                            mirror.records.insert(id, latest);
                            mirror.deferred.insert(id);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn push_one(&self, document: &D) -> Result<()> {
        self.push(std::slice::from_ref(document), &BTreeSet::new())
            .await
    }

    async fn clear(&self) -> Result<()> {
        self.store.clear(D::KIND).await?;
        let mut mirror = self.mirror.lock().await;
        *mirror = Mirror::default();
        // The cleared records surface as deletions to other devices via the
        // change feed; locally we start from scratch.
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryRecordInner {
    seq: u64,
    next_tag: u64,
    records: HashMap<(DocKind, DocId), RemoteRecord>,
    log: Vec<(u64, DocKind, RecordChange)>,
}

/// In-memory `RecordStore` for tests, with a scriptable change feed.
#[derive(Default)]
pub struct MemoryRecordStore {
    inner: Mutex<MemoryRecordInner>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate another device writing a record directly.
    pub async fn save_direct(&self, kind: DocKind, id: DocId, payload: &str) -> String {
        let mut inner = self.inner.lock().await;
        Self::write(&mut inner, kind, id, payload.to_string())
    }

    /// Simulate another device deleting a record directly.
    pub async fn delete_direct(&self, kind: DocKind, id: DocId) {
        let mut inner = self.inner.lock().await;
        if inner.records.remove(&(kind, id)).is_some() {
            inner.seq += 1;
            let seq = inner.seq;
            inner.log.push((seq, kind, RecordChange::Deleted(id)));
        }
    }

    fn write(inner: &mut MemoryRecordInner, kind: DocKind, id: DocId, payload: String) -> String {
        inner.next_tag += 1;
        let change_tag = format!("ct-{}", inner.next_tag);
        let record = RemoteRecord {
            id,
            payload,
            change_tag: change_tag.clone(),
        };
        inner.records.insert((kind, id), record.clone());
        inner.seq += 1;
        let seq = inner.seq;
        inner.log.push((seq, kind, RecordChange::Saved(record)));
        change_tag
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn changes_since(&self, kind: DocKind, cursor: u64) -> Result<(Vec<RecordChange>, u64)> {
        let inner = self.inner.lock().await;
        let changes = inner
            .log
            .iter()
            .filter(|(seq, entry_kind, _)| *seq > cursor && *entry_kind == kind)
            .map(|(_, _, change)| change.clone())
            .collect();
        Ok((changes, inner.seq))
    }

    async fn fetch_all(&self, kind: DocKind) -> Result<(Vec<RemoteRecord>, u64)> {
        let inner = self.inner.lock().await;
        let records = inner
            .records
            .iter()
            .filter(|((entry_kind, _), _)| *entry_kind == kind)
            .map(|(_, record)| record.clone())
            .collect();
        Ok((records, inner.seq))
    }

    async fn save(
        &self,
        kind: DocKind,
        id: DocId,
        payload: String,
        expected_tag: Option<&str>,
    ) -> Result<SaveOutcome> {
        let mut inner = self.inner.lock().await;
        if let Some(current) = inner.records.get(&(kind, id)) {
            if expected_tag != Some(current.change_tag.as_str()) {
                return Ok(SaveOutcome::Conflict {
                    latest: current.clone(),
                });
            }
        }
        let change_tag = Self::write(&mut inner, kind, id, payload);
        Ok(SaveOutcome::Saved { change_tag })
    }

    async fn delete(&self, kind: DocKind, id: DocId) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.records.remove(&(kind, id)).is_some() {
            inner.seq += 1;
            let seq = inner.seq;
            inner.log.push((seq, kind, RecordChange::Deleted(id)));
        }
        Ok(())
    }

    async fn clear(&self, kind: DocKind) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let ids: Vec<DocId> = inner
            .records
            .keys()
            .filter(|(entry_kind, _)| *entry_kind == kind)
            .map(|(_, id)| *id)
            .collect();
        for id in ids {
            inner.records.remove(&(kind, id));
            inner.seq += 1;
            let seq = inner.seq;
            inner.log.push((seq, kind, RecordChange::Deleted(id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tab;
    use pretty_assertions::assert_eq;

    fn tab(name: &str, last_modified: i64) -> Tab {
        let mut tab = Tab::new(name, name);
        tab.last_modified = last_modified;
        tab
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn push_then_pull_via_change_feed() {
        let store = Arc::new(MemoryRecordStore::new());
        let ours: RecordTransport<Tab> = RecordTransport::new(Arc::clone(&store) as _);
        let theirs: RecordTransport<Tab> = RecordTransport::new(store as _);

        let doc = tab("A", 100);
        ours.push(&[doc.clone()], &BTreeSet::new()).await.unwrap();

        let snapshot = theirs.pull().await.unwrap();
        assert_eq!(snapshot.documents, vec![doc]);
        assert!(snapshot.tombstones.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn incremental_pull_only_reports_new_changes() {
        let store = Arc::new(MemoryRecordStore::new());
        let transport: RecordTransport<Tab> = RecordTransport::new(Arc::clone(&store) as _);

        let doc = tab("A", 100);
        store
            .save_direct(DocKind::Tab, doc.id, &serde_json::to_string(&doc).unwrap())
            .await;

        let first = transport.pull().await.unwrap();
        assert_eq!(first.documents.len(), 1);

        // Nothing new: mirror unchanged, still one document.
        let second = transport.pull().await.unwrap();
        assert_eq!(second.documents.len(), 1);
        assert!(second.tombstones.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn native_deletes_surface_as_pass_tombstones_once() {
        let store = Arc::new(MemoryRecordStore::new());
        let transport: RecordTransport<Tab> = RecordTransport::new(Arc::clone(&store) as _);

        let doc = tab("A", 100);
        store
            .save_direct(DocKind::Tab, doc.id, &serde_json::to_string(&doc).unwrap())
            .await;
        transport.pull().await.unwrap();

        store.delete_direct(DocKind::Tab, doc.id).await;

        let snapshot = transport.pull().await.unwrap();
        assert!(snapshot.documents.is_empty());
        assert!(snapshot.tombstones.contains(&doc.id));

        // The tombstone is per-pass, not persistent.
        let next = transport.pull().await.unwrap();
        assert!(next.tombstones.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn conflicting_push_rederives_and_retries_once() {
        let store = Arc::new(MemoryRecordStore::new());
        let transport: RecordTransport<Tab> = RecordTransport::new(Arc::clone(&store) as _);

        let mut doc = tab("A", 100);
        transport.push(&[doc.clone()], &BTreeSet::new()).await.unwrap();

        // Another device overwrites the record; our mirror tag is now stale.
        let mut theirs = doc.clone();
        theirs.text = "their edit".to_string();
        theirs.last_modified = 150;
        store
            .save_direct(
                DocKind::Tab,
                doc.id,
                &serde_json::to_string(&theirs).unwrap(),
            )
            .await;

        doc.text = "our edit".to_string();
        doc.last_modified = 200;
        transport.push(&[doc.clone()], &BTreeSet::new()).await.unwrap();

        let (records, _) = store.fetch_all(DocKind::Tab).await.unwrap();
        assert_eq!(records.len(), 1);
        let stored: Tab = serde_json::from_str(&records[0].payload).unwrap();
        assert_eq!(stored.text, "our edit");
        assert!(transport.deferred_conflicts().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tombstoned_push_deletes_record_natively() {
        let store = Arc::new(MemoryRecordStore::new());
        let transport: RecordTransport<Tab> = RecordTransport::new(Arc::clone(&store) as _);

        let doc = tab("A", 100);
        transport.push(&[doc.clone()], &BTreeSet::new()).await.unwrap();

        let mut tombstones = BTreeSet::new();
        tombstones.insert(doc.id);
        transport.push(&[], &tombstones).await.unwrap();

        let (records, _) = store.fetch_all(DocKind::Tab).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn refetch_rebuilds_mirror_from_scratch() {
        let store = Arc::new(MemoryRecordStore::new());
        let transport: RecordTransport<Tab> = RecordTransport::new(Arc::clone(&store) as _);

        let doc = tab("A", 100);
        store
            .save_direct(DocKind::Tab, doc.id, &serde_json::to_string(&doc).unwrap())
            .await;

        let snapshot = transport.refetch().await.unwrap();
        assert_eq!(snapshot.documents, vec![doc]);

        // After a refetch the incremental cursor is current.
        let next = transport.pull().await.unwrap();
        assert_eq!(next.documents.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clear_removes_all_records_for_kind() {
        let store = Arc::new(MemoryRecordStore::new());
        let transport: RecordTransport<Tab> = RecordTransport::new(Arc::clone(&store) as _);

        transport
            .push(&[tab("A", 1), tab("B", 2)], &BTreeSet::new())
            .await
            .unwrap();
        transport.clear().await.unwrap();

        let (records, _) = store.fetch_all(DocKind::Tab).await.unwrap();
        assert!(records.is_empty());
    }
}
