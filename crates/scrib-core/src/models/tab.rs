//! Scratch tab model

use serde::{Deserialize, Serialize};

use super::{DocId, DocKind, Document};
use crate::util::unix_timestamp_ms_now;

/// A scratch tab: a named buffer of free-form text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    /// Unique identifier
    pub id: DocId,
    /// Display name
    pub name: String,
    /// Plain text content
    pub text: String,
    /// Editor language tag (e.g. "markdown", "plain")
    pub language: String,
    /// External file this tab is bound to; bound tabs never sync
    #[serde(default)]
    pub file_path: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last content mutation timestamp (Unix ms)
    pub last_modified: i64,
}

impl Tab {
    /// Create a new unbound scratch tab with the given text
    #[must_use]
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        let now = unix_timestamp_ms_now();
        Self {
            id: DocId::new(),
            name: name.into(),
            text: text.into(),
            language: "plain".to_string(),
            file_path: None,
            created_at: now,
            last_modified: now,
        }
    }

    /// Get first line as a title preview, truncated to `max_len` characters
    #[must_use]
    pub fn title_preview(&self, max_len: usize) -> String {
        self.text
            .lines()
            .next()
            .unwrap_or("")
            .chars()
            .take(max_len)
            .collect()
    }

    /// Check if tab text is empty (whitespace-only counts as empty)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

impl Document for Tab {
    const KIND: DocKind = DocKind::Tab;

    fn id(&self) -> DocId {
        self.id
    }

    fn last_modified(&self) -> i64 {
        self.last_modified
    }

    fn touch(&mut self, now_ms: i64) {
        self.last_modified = now_ms;
    }

    fn is_syncable(&self) -> bool {
        self.file_path.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_tab_is_unbound_and_stamped() {
        let tab = Tab::new("Scratch", "Hello world");
        assert_eq!(tab.text, "Hello world");
        assert!(tab.file_path.is_none());
        assert!(tab.is_syncable());
        assert!(tab.created_at > 0);
        assert_eq!(tab.created_at, tab.last_modified);
    }

    #[test]
    fn file_bound_tab_never_syncs() {
        let mut tab = Tab::new("Notes", "pinned");
        tab.file_path = Some("/home/me/notes.md".to_string());
        assert!(!tab.is_syncable());
    }

    #[test]
    fn touch_bumps_last_modified() {
        let mut tab = Tab::new("Scratch", "a");
        let stamp = tab.last_modified + 5;
        tab.touch(stamp);
        assert_eq!(tab.last_modified, stamp);
    }

    #[test]
    fn title_preview_takes_first_line() {
        let tab = Tab::new("Scratch", "First line\nSecond line");
        assert_eq!(tab.title_preview(50), "First line");
        assert_eq!(tab.title_preview(5), "First");
    }

    #[test]
    fn is_empty_ignores_whitespace() {
        assert!(Tab::new("Scratch", "   ").is_empty());
        assert!(!Tab::new("Scratch", "text").is_empty());
    }

    #[test]
    fn json_round_trip_preserves_every_field() {
        let mut tab = Tab::new("Round trip", "body\nwith lines");
        tab.language = "markdown".to_string();
        tab.file_path = Some("/tmp/bound.md".to_string());

        let json = serde_json::to_string(&tab).unwrap();
        let back: Tab = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tab);
    }
}
