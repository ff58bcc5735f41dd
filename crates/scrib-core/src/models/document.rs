//! Document identity and the kind-generic document contract

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for a document, using UUID v7 (time-sortable)
///
/// Ids are assigned once at creation and never reused, so a tombstone for an
/// id can never collide with an unrelated later document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocId(Uuid);

impl DocId {
    /// Create a new unique document ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for DocId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The two synced collection kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    Tab,
    Clipboard,
}

impl DocKind {
    /// Remote/local key holding the collection snapshot
    #[must_use]
    pub const fn collection_key(self) -> &'static str {
        match self {
            Self::Tab => "tabs",
            Self::Clipboard => "clipboard",
        }
    }

    /// Remote/local key holding the tombstone id set for this kind
    #[must_use]
    pub const fn tombstone_key(self) -> &'static str {
        match self {
            Self::Tab => "deletedTabIDs",
            Self::Clipboard => "deletedClipboardIDs",
        }
    }

    /// Maximum entries kept in the local collection
    #[must_use]
    pub const fn local_cap(self) -> usize {
        match self {
            Self::Tab => 128,
            Self::Clipboard => 200,
        }
    }

    /// Maximum entries written to the remote snapshot
    ///
    /// Smaller than the local cap so a device that lagged behind still has
    /// room to merge without immediately evicting fresh local entries.
    #[must_use]
    pub const fn remote_cap(self) -> usize {
        match self {
            Self::Tab => 64,
            Self::Clipboard => 50,
        }
    }
}

impl fmt::Display for DocKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tab => write!(f, "tab"),
            Self::Clipboard => write!(f, "clipboard"),
        }
    }
}

/// Contract every synced document kind implements.
///
/// The store, merge engine, transports, and scheduler are all written against
/// this trait so one implementation serves both tabs and clipboard entries.
pub trait Document:
    Clone + fmt::Debug + PartialEq + Send + Sync + Serialize + serde::de::DeserializeOwned + 'static
{
    /// Collection kind of this document type
    const KIND: DocKind;

    /// Stable identity
    fn id(&self) -> DocId;

    /// Last local content mutation, Unix ms; the sole conflict signal
    fn last_modified(&self) -> i64;

    /// Stamp a new modification time
    fn touch(&mut self, now_ms: i64);

    /// Whether this document participates in sync at all
    ///
    /// Documents bound to an external file never sync.
    fn is_syncable(&self) -> bool {
        true
    }

    /// Content-equality key, for kinds deduped by exact content
    fn content_key(&self) -> Option<&str> {
        None
    }
}
