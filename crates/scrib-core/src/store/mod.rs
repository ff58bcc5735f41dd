//! Storage layer: in-memory document collections, tombstones, and the
//! durable local key-value primitive they snapshot into.

mod documents;
mod local;
mod tombstones;

pub use documents::DocumentStore;
pub use local::{FileStore, LocalStore, MemoryStore};
pub use tombstones::TombstoneLedger;
