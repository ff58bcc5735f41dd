//! In-memory document collection

use crate::error::{Error, Result};
use crate::models::{DocId, Document};

/// Ordered in-memory collection of documents of one kind.
///
/// Mutations are synchronous and visible to subsequent reads immediately;
/// durability is the caller's concern (see the change tracker).
#[derive(Debug, Clone, Default)]
pub struct DocumentStore<D: Document> {
    docs: Vec<D>,
}

impl<D: Document> DocumentStore<D> {
    #[must_use]
    pub const fn new() -> Self {
        Self { docs: Vec::new() }
    }

    /// Insert a document, or replace the existing document with the same id.
    pub fn upsert(&mut self, doc: D) {
        match self.position(doc.id()) {
            Some(index) => self.docs[index] = doc,
            None => self.docs.push(doc),
        }
    }

    /// Remove a document by id, returning it.
    ///
    /// `NotFound` for an absent id; callers treat that as a benign no-op.
    pub fn remove(&mut self, id: DocId) -> Result<D> {
        let index = self
            .position(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(self.docs.remove(index))
    }

    /// Get a document by id.
    pub fn get(&self, id: DocId) -> Result<&D> {
        self.position(id)
            .map(|index| &self.docs[index])
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// All documents, in collection order.
    #[must_use]
    pub fn list(&self) -> &[D] {
        &self.docs
    }

    #[must_use]
    pub fn contains(&self, id: DocId) -> bool {
        self.position(id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Replace the whole collection, e.g. with a merge result.
    pub fn replace_all(&mut self, docs: Vec<D>) {
        self.docs = docs;
    }

    /// Re-sort most-recent-first and drop entries past the local cap.
    pub fn sort_recent_first_and_cap(&mut self) {
        self.docs
            .sort_by(|a, b| b.last_modified().cmp(&a.last_modified()));
        self.docs.truncate(D::KIND.local_cap());
    }

    fn position(&self, id: DocId) -> Option<usize> {
        self.docs.iter().position(|doc| doc.id() == id)
    }
}
