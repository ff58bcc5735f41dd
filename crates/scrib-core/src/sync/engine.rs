//! Per-collection sync engine
//!
//! Owns one in-memory collection plus its tombstone ledger, persists both
//! through the durable local store, and reconciles with the remote transport.
//! All mutations land here; network and disk never block a caller.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};

use crate::error::{Error, Result};
use crate::merge::{merge, ChangeSet};
use crate::models::{DocId, DocKind, Document};
use crate::store::{DocumentStore, LocalStore, TombstoneLedger};
use crate::transport::RemoteTransport;
use crate::util::MonotonicClock;

use super::debounce::Debouncer;

/// Debounce window between a mutation and its persistence/push.
pub const FLUSH_DEBOUNCE: Duration = Duration::from_millis(750);

/// Change notification for UI-layer consumers.
#[derive(Debug, Clone)]
pub struct ChangeNotice {
    pub kind: DocKind,
    pub changes: ChangeSet,
}

struct Collection<D: Document> {
    store: DocumentStore<D>,
    ledger: TombstoneLedger,
    debounce: Debouncer,
}

struct EngineInner<D: Document> {
    collection: Mutex<Collection<D>>,
    transport: Arc<dyn RemoteTransport<D>>,
    local: Arc<dyn LocalStore>,
    /// Serializes pull/merge passes for this kind; passes for other kinds
    /// run on their own engines and may overlap freely.
    pass_lock: Mutex<()>,
    events: broadcast::Sender<ChangeNotice>,
    enabled: AtomicBool,
    last_sync_ms: AtomicI64,
    clock: MonotonicClock,
}

/// Cloneable handle to one collection's sync engine.
pub struct SyncEngine<D: Document> {
    inner: Arc<EngineInner<D>>,
}

impl<D: Document> Clone for SyncEngine<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: Document> SyncEngine<D> {
    pub fn new(
        local: Arc<dyn LocalStore>,
        transport: Arc<dyn RemoteTransport<D>>,
        events: broadcast::Sender<ChangeNotice>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                collection: Mutex::new(Collection {
                    store: DocumentStore::new(),
                    ledger: TombstoneLedger::new(),
                    debounce: Debouncer::new(FLUSH_DEBOUNCE),
                }),
                transport,
                local,
                pass_lock: Mutex::new(()),
                events,
                enabled: AtomicBool::new(false),
                last_sync_ms: AtomicI64::new(0),
                clock: MonotonicClock::new(),
            }),
        }
    }

    /// Hydrate the collection and ledger from the local snapshot files.
    ///
    /// Absent or damaged snapshots start the collection empty; the remote
    /// copy (if any) restores it on the next pass.
    pub async fn load_local(&self) -> Result<()> {
        let docs = Self::read_local(&*self.inner.local, D::KIND.collection_key());
        let ledger = Self::read_local(&*self.inner.local, D::KIND.tombstone_key());

        let mut collection = self.inner.collection.lock().await;
        collection.store.replace_all(docs);
        collection.store.sort_recent_first_and_cap();
        collection.ledger = ledger;
        Ok(())
    }

    fn read_local<T: serde::de::DeserializeOwned + Default>(
        local: &dyn LocalStore,
        key: &str,
    ) -> T {
        match local.get(key) {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(value) => value,
                Err(error) => {
                    tracing::warn!("Damaged local snapshot at {key}: {error}");
                    T::default()
                }
            },
            Ok(None) => T::default(),
            Err(error) => {
                tracing::warn!("Failed reading local snapshot at {key}: {error}");
                T::default()
            }
        }
    }

    /// All documents, in collection order.
    pub async fn list(&self) -> Vec<D> {
        self.inner.collection.lock().await.store.list().to_vec()
    }

    pub async fn get(&self, id: DocId) -> Result<D> {
        self.inner
            .collection
            .lock()
            .await
            .store
            .get(id)
            .map(Clone::clone)
    }

    /// Insert or replace a document from a local mutation.
    ///
    /// Stamps a fresh `last_modified` and schedules the debounced flush.
    pub async fn upsert(&self, mut doc: D) -> DocId {
        doc.touch(self.inner.clock.now_ms());
        let id = doc.id();
        {
            let mut collection = self.inner.collection.lock().await;
            collection.store.upsert(doc);
            collection.store.sort_recent_first_and_cap();
        }
        self.record_changed(id).await;
        id
    }

    /// Capture path for brand-new documents: local upsert plus an immediate
    /// single-document remote append, so a fresh clipboard entry reaches
    /// other devices without rewriting the whole collection.
    ///
    /// The append failing is not an error for the caller; the next debounced
    /// flush carries the entry in the full snapshot.
    pub async fn capture(&self, mut doc: D) -> DocId {
        doc.touch(self.inner.clock.now_ms());
        let id = doc.id();
        {
            let mut collection = self.inner.collection.lock().await;
            collection.store.upsert(doc.clone());
            collection.store.sort_recent_first_and_cap();
        }
        self.record_changed(id).await;
        if self.is_enabled() {
            // Same-kind pushes never overlap an in-flight pass.
            let _pass = self.inner.pass_lock.lock().await;
            if let Err(error) = self.inner.transport.push_one(&doc).await {
                tracing::warn!("Single-document push for {} failed: {error}", D::KIND);
            }
        }
        id
    }

    /// Note that a document changed; schedules persistence and push.
    pub async fn record_changed(&self, id: DocId) {
        tracing::debug!("{} {id} changed", D::KIND);
        self.schedule_flush().await;
    }

    /// Delete a document: removed from the store, remembered in the ledger.
    ///
    /// Deleting an absent id is a benign no-op.
    pub async fn record_deleted(&self, id: DocId) {
        {
            let mut collection = self.inner.collection.lock().await;
            match collection.store.remove(id) {
                Ok(_) => {}
                Err(Error::NotFound(_)) => {
                    tracing::debug!("Delete of absent {} {id}", D::KIND);
                }
                Err(error) => {
                    tracing::warn!("Delete of {} {id} failed: {error}", D::KIND);
                }
            }
            collection.ledger.mark_deleted(id);
        }
        self.schedule_flush().await;
    }

    async fn schedule_flush(&self) {
        let engine = self.clone();
        let mut collection = self.inner.collection.lock().await;
        collection.debounce.schedule(move || async move {
            if let Err(error) = engine.flush_now().await {
                tracing::warn!("Deferred flush for {} failed: {error}", D::KIND);
            }
        });
    }

    /// Write the durable local snapshot without touching the remote store.
    pub async fn persist_now(&self) -> Result<()> {
        let (docs, tombstones) = self.snapshot().await;
        self.write_local(&docs, &tombstones)
    }

    /// Persist the collection locally and, when sync is on, push it.
    ///
    /// In-memory state stays authoritative if the local write fails; the
    /// next debounce retries it. A flush for this kind waits out any
    /// in-flight pass; other kinds are unaffected.
    pub async fn flush_now(&self) -> Result<()> {
        let _pass = self.inner.pass_lock.lock().await;
        let (docs, tombstones) = self.snapshot().await;
        self.write_local(&docs, &tombstones)?;

        if self.is_enabled() {
            self.inner.transport.push(&docs, &tombstones).await?;
        }
        Ok(())
    }

    fn write_local(&self, docs: &[D], tombstones: &BTreeSet<DocId>) -> Result<()> {
        let docs_json = serde_json::to_string(docs)?;
        let tombstones_json = serde_json::to_string(tombstones)?;
        self.inner.local.set(D::KIND.collection_key(), &docs_json)?;
        self.inner
            .local
            .set(D::KIND.tombstone_key(), &tombstones_json)?;
        self.inner.local.flush()
    }

    /// One full pull → merge → apply → push pass.
    ///
    /// Passes for the same kind never overlap; once started, a pass always
    /// completes and applies its result.
    pub async fn run_pass(&self) -> Result<ChangeSet> {
        let _pass = self.inner.pass_lock.lock().await;

        let snapshot = self.inner.transport.pull().await?;

        let (outcome, tombstones) = {
            let mut collection = self.inner.collection.lock().await;
            collection.ledger.merge(&snapshot.tombstones);
            let tombstones = collection.ledger.snapshot();
            let outcome = merge(
                collection.store.list(),
                &snapshot.documents,
                &tombstones,
                &snapshot.tombstones,
            );
            collection.store.replace_all(outcome.documents.clone());
            collection.store.sort_recent_first_and_cap();
            (outcome, tombstones)
        };

        // Durable snapshot of the merged state, push only if we hold news.
        self.write_local(&outcome.documents, &tombstones)?;

        if outcome.needs_push && self.is_enabled() {
            self.inner
                .transport
                .push(&outcome.documents, &tombstones)
                .await?;
        }

        self.inner
            .last_sync_ms
            .store(crate::util::unix_timestamp_ms_now(), Ordering::SeqCst);

        if !outcome.changes.is_empty() {
            let _ = self.inner.events.send(ChangeNotice {
                kind: D::KIND,
                changes: outcome.changes.clone(),
            });
        }
        tracing::debug!(
            "{} pass: +{} ~{} -{}",
            D::KIND,
            outcome.changes.inserted.len(),
            outcome.changes.updated.len(),
            outcome.changes.removed.len()
        );
        Ok(outcome.changes)
    }

    /// Wait until no pass is in flight (used by the disable path).
    pub async fn wait_idle(&self) {
        drop(self.inner.pass_lock.lock().await);
    }

    /// Remove all remote state for this collection.
    pub async fn clear_remote(&self) -> Result<()> {
        self.inner.transport.clear().await
    }

    /// Cancel any pending debounced flush.
    pub async fn cancel_pending_flush(&self) {
        self.inner.collection.lock().await.debounce.cancel();
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Last successful pass, Unix ms (diagnostic only).
    #[must_use]
    pub fn last_sync_ms(&self) -> Option<i64> {
        match self.inner.last_sync_ms.load(Ordering::SeqCst) {
            0 => None,
            stamp => Some(stamp),
        }
    }

    /// Current tombstone set.
    pub async fn tombstones(&self) -> BTreeSet<DocId> {
        self.inner.collection.lock().await.ledger.snapshot()
    }

    async fn snapshot(&self) -> (Vec<D>, BTreeSet<DocId>) {
        let collection = self.inner.collection.lock().await;
        (
            collection.store.list().to_vec(),
            collection.ledger.snapshot(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClipEntry, Tab};
    use crate::store::MemoryStore;
    use crate::transport::{BlobTransport, MemoryKv, RemoteKv};
    use pretty_assertions::assert_eq;
    use tokio::time::sleep;

    fn tab_engine(
        kv: &Arc<MemoryKv>,
        local: &Arc<MemoryStore>,
    ) -> (SyncEngine<Tab>, broadcast::Receiver<ChangeNotice>) {
        let (events, rx) = broadcast::channel(16);
        let transport: Arc<dyn RemoteTransport<Tab>> = Arc::new(BlobTransport::new(
            Arc::clone(kv) as Arc<dyn RemoteKv>,
        ));
        let engine = SyncEngine::new(
            Arc::clone(local) as Arc<dyn LocalStore>,
            transport,
            events,
        );
        engine.set_enabled(true);
        (engine, rx)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upsert_is_immediately_visible() {
        let kv = Arc::new(MemoryKv::new());
        let local = Arc::new(MemoryStore::new());
        let (engine, _rx) = tab_engine(&kv, &local);

        let id = engine.upsert(Tab::new("Scratch", "hello")).await;
        let fetched = engine.get(id).await.unwrap();
        assert_eq!(fetched.text, "hello");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn flush_persists_locally_and_pushes() {
        let kv = Arc::new(MemoryKv::new());
        let local = Arc::new(MemoryStore::new());
        let (engine, _rx) = tab_engine(&kv, &local);

        engine.upsert(Tab::new("Scratch", "hello")).await;
        engine.flush_now().await.unwrap();

        assert!(local.get("tabs").unwrap().unwrap().contains("hello"));
        assert!(kv.raw("tabs").await.unwrap().contains("hello"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pass_pulls_remote_documents_and_notifies() {
        let kv = Arc::new(MemoryKv::new());
        let local = Arc::new(MemoryStore::new());
        let (engine, mut rx) = tab_engine(&kv, &local);

        let remote_tab = Tab::new("Remote", "from another device");
        let transport: BlobTransport<Tab> =
            BlobTransport::new(Arc::clone(&kv) as Arc<dyn RemoteKv>);
        transport
            .push(&[remote_tab.clone()], &BTreeSet::new())
            .await
            .unwrap();

        let changes = engine.run_pass().await.unwrap();
        assert_eq!(changes.inserted, vec![remote_tab.id]);

        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.kind, DocKind::Tab);
        assert_eq!(notice.changes.inserted, vec![remote_tab.id]);

        assert_eq!(engine.get(remote_tab.id).await.unwrap().text, remote_tab.text);
        assert!(engine.last_sync_ms().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deletion_tombstones_and_survives_stale_remote() {
        let kv = Arc::new(MemoryKv::new());
        let local = Arc::new(MemoryStore::new());
        let (engine, _rx) = tab_engine(&kv, &local);

        let id = engine.upsert(Tab::new("Doomed", "bye")).await;
        engine.flush_now().await.unwrap();

        engine.record_deleted(id).await;
        engine.flush_now().await.unwrap();

        // The stale remote copy must not resurrect the tab.
        let changes = engine.run_pass().await.unwrap();
        assert!(changes.inserted.is_empty());
        assert!(engine.get(id).await.is_err());
        assert!(kv.raw("deletedTabIDs").await.unwrap().contains(&id.to_string()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_of_absent_id_is_benign() {
        let kv = Arc::new(MemoryKv::new());
        let local = Arc::new(MemoryStore::new());
        let (engine, _rx) = tab_engine(&kv, &local);

        engine.record_deleted(DocId::new()).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn pass_failure_is_transient_and_recovers() {
        let kv = Arc::new(MemoryKv::new());
        let local = Arc::new(MemoryStore::new());
        let (engine, _rx) = tab_engine(&kv, &local);

        kv.set_offline(true);
        assert!(engine.run_pass().await.is_err());
        assert!(engine.last_sync_ms().is_none());

        kv.set_offline(false);
        engine.run_pass().await.unwrap();
        assert!(engine.last_sync_ms().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn two_devices_converge_through_shared_remote() {
        let kv = Arc::new(MemoryKv::new());
        let local_a = Arc::new(MemoryStore::new());
        let local_b = Arc::new(MemoryStore::new());
        let (device_a, _rx_a) = tab_engine(&kv, &local_a);
        let (device_b, _rx_b) = tab_engine(&kv, &local_b);

        device_a.upsert(Tab::new("From A", "alpha")).await;
        device_a.flush_now().await.unwrap();

        device_b.upsert(Tab::new("From B", "beta")).await;
        device_b.run_pass().await.unwrap();
        device_a.run_pass().await.unwrap();

        let mut names_a: Vec<String> = device_a
            .list()
            .await
            .into_iter()
            .map(|tab| tab.name)
            .collect();
        let mut names_b: Vec<String> = device_b
            .list()
            .await
            .into_iter()
            .map(|tab| tab.name)
            .collect();
        names_a.sort();
        names_b.sort();
        assert_eq!(names_a, vec!["From A", "From B"]);
        assert_eq!(names_a, names_b);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn file_bound_tabs_stay_local() {
        let kv = Arc::new(MemoryKv::new());
        let local = Arc::new(MemoryStore::new());
        let (engine, _rx) = tab_engine(&kv, &local);

        let mut bound = Tab::new("Pinned", "secret");
        bound.file_path = Some("/home/me/secret.md".to_string());
        engine.upsert(bound).await;
        engine.flush_now().await.unwrap();

        assert!(!kv.raw("tabs").await.unwrap().contains("secret"));
        // But it is still durably saved locally.
        assert!(local.get("tabs").unwrap().unwrap().contains("secret"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_local_restores_previous_state() {
        let kv = Arc::new(MemoryKv::new());
        let local = Arc::new(MemoryStore::new());
        let (engine, _rx) = tab_engine(&kv, &local);

        let id = engine.upsert(Tab::new("Persisted", "still here")).await;
        engine.flush_now().await.unwrap();

        let (reopened, _rx2) = tab_engine(&kv, &local);
        reopened.load_local().await.unwrap();
        assert_eq!(reopened.get(id).await.unwrap().text, "still here");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn debounced_mutations_coalesce_into_one_flush() {
        let kv = Arc::new(MemoryKv::new());
        let local = Arc::new(MemoryStore::new());
        let (engine, _rx) = tab_engine(&kv, &local);

        let mut tab = Tab::new("Typing", "h");
        let id = tab.id;
        for text in ["he", "hel", "hell", "hello"] {
            tab = engine.get(id).await.unwrap_or(tab);
            tab.text = text.to_string();
            engine.upsert(tab.clone()).await;
        }

        // Nothing flushed yet inside the debounce window.
        assert_eq!(local.get("tabs").unwrap(), None);

        sleep(FLUSH_DEBOUNCE + Duration::from_millis(300)).await;
        let stored = local.get("tabs").unwrap().unwrap();
        assert!(stored.contains("hello"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn capture_appends_single_clip_remotely() {
        let kv = Arc::new(MemoryKv::new());
        let local = Arc::new(MemoryStore::new());
        let (events, _rx) = broadcast::channel(16);
        let transport: Arc<dyn RemoteTransport<ClipEntry>> = Arc::new(BlobTransport::new(
            Arc::clone(&kv) as Arc<dyn RemoteKv>,
        ));
        let engine = SyncEngine::new(
            Arc::clone(&local) as Arc<dyn LocalStore>,
            transport,
            events,
        );
        engine.set_enabled(true);

        engine.capture(ClipEntry::new("copied text")).await;

        // The append path writes without waiting for the debounce.
        assert!(kv.raw("clipboard").await.unwrap().contains("copied text"));
    }
}
