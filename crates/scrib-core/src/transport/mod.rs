//! Remote transport: how a collection reaches the shared remote store.
//!
//! Two shapes implement one contract. The blob shape rewrites whole JSON
//! collections under fixed keys and carries tombstones in a companion key;
//! the record shape addresses documents individually and propagates deletes
//! natively, feeding them back to the merge engine as per-pass tombstones.

mod blob;
mod http;
mod record;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{DocId, Document};

pub use blob::{BlobTransport, MemoryKv, RemoteKv};
pub use http::HttpKvStore;
pub use record::{
    MemoryRecordStore, RecordChange, RecordStore, RecordTransport, RemoteRecord, SaveOutcome,
};

/// Everything one pull learned from the remote store.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot<D> {
    pub documents: Vec<D>,
    pub tombstones: BTreeSet<DocId>,
}

/// Transport contract shared by both remote shapes.
#[async_trait]
pub trait RemoteTransport<D: Document>: Send + Sync {
    /// Fetch remote documents and tombstones.
    ///
    /// Absent or undecodable remote payloads are empty state, never errors.
    async fn pull(&self) -> Result<RemoteSnapshot<D>>;

    /// Publish the full local snapshot (already merged) and tombstone set.
    ///
    /// Unsyncable and tombstoned documents are filtered out; the remote
    /// collection is capped independently of the local cap.
    async fn push(&self, documents: &[D], tombstones: &BTreeSet<DocId>) -> Result<()>;

    /// Publish one new document without re-uploading the whole collection.
    async fn push_one(&self, document: &D) -> Result<()>;

    /// Remove all remote state for this collection (the "unsync" step).
    async fn clear(&self) -> Result<()>;
}
