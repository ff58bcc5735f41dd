//! Sync settings persisted through the local store.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::LocalStore;
use crate::util::normalize_text_option;

const SETTINGS_KEY: &str = "settings";

/// User-facing sync configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Whether sync is turned on.
    pub enabled: bool,
    /// Steady-state poll cadence in seconds.
    pub poll_interval_secs: u64,
    /// Base URL of the remote key-value store.
    pub endpoint: Option<String>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_secs: 30,
            endpoint: None,
        }
    }
}

impl SyncSettings {
    /// Load settings, falling back to defaults on absence or damage.
    pub fn load(store: &dyn LocalStore) -> Self {
        match store.get(SETTINGS_KEY) {
            Ok(Some(payload)) => match serde_json::from_str(&payload) {
                Ok(settings) => settings,
                Err(error) => {
                    tracing::warn!("Damaged settings payload: {error}");
                    Self::default()
                }
            },
            Ok(None) => Self::default(),
            Err(error) => {
                tracing::warn!("Failed reading settings: {error}");
                Self::default()
            }
        }
    }

    pub fn save(&self, store: &dyn LocalStore) -> Result<()> {
        let payload = serde_json::to_string(self)?;
        store.set(SETTINGS_KEY, &payload)?;
        store.flush()
    }

    /// Normalized endpoint, if one is configured.
    #[must_use]
    pub fn endpoint(&self) -> Option<String> {
        normalize_text_option(self.endpoint.clone())
    }
}
