//! Blob-shaped remote transport
//!
//! Each collection kind is serialized wholesale into one key of a remote
//! key-value store, with a second key holding the tombstone id set.

use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::{DocId, Document};

use super::{RemoteSnapshot, RemoteTransport};

/// Remote key-value blob store: the weakly-consistent shared medium.
#[async_trait]
pub trait RemoteKv: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn put(&self, key: &str, value: String) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Blob transport for one collection kind.
pub struct BlobTransport<D: Document> {
    kv: Arc<dyn RemoteKv>,
    remote_cap: usize,
    _kind: PhantomData<fn() -> D>,
}

impl<D: Document> BlobTransport<D> {
    #[must_use]
    pub fn new(kv: Arc<dyn RemoteKv>) -> Self {
        Self {
            kv,
            remote_cap: D::KIND.remote_cap(),
            _kind: PhantomData,
        }
    }

    /// Override the remote entry cap (tests and constrained backends).
    #[must_use]
    pub const fn with_remote_cap(mut self, cap: usize) -> Self {
        self.remote_cap = cap;
        self
    }

    /// Decode a remote payload, treating damage as "no remote data yet".
    fn decode_lenient<T: DeserializeOwned + Default>(key: &str, payload: Option<String>) -> T {
        let Some(payload) = payload else {
            return T::default();
        };
        match serde_json::from_str(&payload) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!("Undecodable remote payload at {key}: {error}");
                T::default()
            }
        }
    }

    fn encode_snapshot(documents: &[D], tombstones: &BTreeSet<DocId>, cap: usize) -> Result<(String, String)> {
        let mut syncable: Vec<&D> = documents
            .iter()
            .filter(|doc| doc.is_syncable() && !tombstones.contains(&doc.id()))
            .collect();
        syncable.sort_by(|a, b| b.last_modified().cmp(&a.last_modified()));
        syncable.truncate(cap);

        let docs_json = serde_json::to_string(&syncable)?;
        let tombstones_json = serde_json::to_string(tombstones)?;
        Ok((docs_json, tombstones_json))
    }
}

#[async_trait]
impl<D: Document> RemoteTransport<D> for BlobTransport<D> {
    async fn pull(&self) -> Result<RemoteSnapshot<D>> {
        let doc_key = D::KIND.collection_key();
        let tombstone_key = D::KIND.tombstone_key();

        let documents: Vec<D> = Self::decode_lenient(doc_key, self.kv.get(doc_key).await?);
        let tombstones: BTreeSet<DocId> =
            Self::decode_lenient(tombstone_key, self.kv.get(tombstone_key).await?);

        tracing::debug!(
            "Pulled {} {} document(s), {} tombstone(s)",
            documents.len(),
            D::KIND,
            tombstones.len()
        );
        Ok(RemoteSnapshot {
            documents,
            tombstones,
        })
    }

    async fn push(&self, documents: &[D], tombstones: &BTreeSet<DocId>) -> Result<()> {
        let (docs_json, tombstones_json) =
            Self::encode_snapshot(documents, tombstones, self.remote_cap)?;

        self.kv.put(D::KIND.collection_key(), docs_json).await?;
        self.kv.put(D::KIND.tombstone_key(), tombstones_json).await?;
        tracing::debug!("Pushed {} snapshot", D::KIND);
        Ok(())
    }

    async fn push_one(&self, document: &D) -> Result<()> {
        if !document.is_syncable() {
            return Ok(());
        }

        // Read-modify-write: insert at the front of the existing remote
        // collection and cap, without touching the tombstone key.
        let key = D::KIND.collection_key();
        let mut documents: Vec<D> = Self::decode_lenient(key, self.kv.get(key).await?);
        documents.retain(|existing| {
            existing.id() != document.id()
                && (document.content_key().is_none()
                    || existing.content_key() != document.content_key())
        });
        documents.insert(0, document.clone());
        documents.truncate(self.remote_cap);

        self.kv.put(key, serde_json::to_string(&documents)?).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.kv.delete(D::KIND.collection_key()).await?;
        self.kv.delete(D::KIND.tombstone_key()).await?;
        tracing::info!("Cleared remote {} blobs", D::KIND);
        Ok(())
    }
}

/// In-memory `RemoteKv` for tests; can simulate an unreachable store.
#[derive(Default)]
pub struct MemoryKv {
    values: Mutex<HashMap<String, String>>,
    offline: std::sync::atomic::AtomicBool,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail until switched back, like a network outage.
    pub fn set_offline(&self, offline: bool) {
        self.offline
            .store(offline, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::error::Error::Transport(
                "remote store unreachable".to_string(),
            ));
        }
        Ok(())
    }

    /// Raw value under `key`, bypassing the online check (test inspection).
    pub async fn raw(&self, key: &str) -> Option<String> {
        self.values.lock().await.get(key).cloned()
    }

    /// Seed a raw value, e.g. a malformed payload.
    pub async fn insert_raw(&self, key: &str, value: &str) {
        self.values
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
    }
}

#[async_trait]
impl RemoteKv for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check_online()?;
        Ok(self.values.lock().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<()> {
        self.check_online()?;
        self.values.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_online()?;
        self.values.lock().await.remove(key);
        Ok(())
    }
}
