//! Clipboard entry model

use serde::{Deserialize, Serialize};

use super::{DocId, DocKind, Document};
use crate::util::unix_timestamp_ms_now;

/// A captured clipboard entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipEntry {
    /// Unique identifier
    pub id: DocId,
    /// Captured text, also the dedupe key across devices
    pub text: String,
    /// Capture timestamp (Unix ms)
    pub created_at: i64,
    /// Last modification timestamp (Unix ms)
    pub last_modified: i64,
}

impl ClipEntry {
    /// Create a new clipboard entry with the given text
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let now = unix_timestamp_ms_now();
        Self {
            id: DocId::new(),
            text: text.into(),
            created_at: now,
            last_modified: now,
        }
    }
}

impl Document for ClipEntry {
    const KIND: DocKind = DocKind::Clipboard;

    fn id(&self) -> DocId {
        self.id
    }

    fn last_modified(&self) -> i64 {
        self.last_modified
    }

    fn touch(&mut self, now_ms: i64) {
        self.last_modified = now_ms;
    }

    /// The same text copied on two devices is one logical entry.
    fn content_key(&self) -> Option<&str> {
        Some(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clip_is_stamped() {
        let clip = ClipEntry::new("hello");
        assert_eq!(clip.text, "hello");
        assert!(clip.created_at > 0);
        assert_eq!(clip.created_at, clip.last_modified);
    }

    #[test]
    fn clips_dedupe_by_exact_text() {
        let clip = ClipEntry::new("hello");
        assert_eq!(clip.content_key(), Some("hello"));
    }

    #[test]
    fn clips_are_always_syncable() {
        assert!(ClipEntry::new("x").is_syncable());
    }

    #[test]
    fn json_round_trip_preserves_every_field() {
        let clip = ClipEntry::new("copied 📋 text");
        let json = serde_json::to_string(&clip).unwrap();
        let back: ClipEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, clip);
    }
}
