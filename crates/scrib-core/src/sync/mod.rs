//! Cross-device sync: change tracking, per-kind engines, and the scheduler.

mod debounce;
mod engine;
mod scheduler;

use std::sync::Arc;

use tokio::sync::broadcast;

pub use debounce::Debouncer;
pub use engine::{ChangeNotice, SyncEngine, FLUSH_DEBOUNCE};
pub use scheduler::{
    backoff_delay, SchedulerConfig, SyncPhase, SyncScheduler, SyncStatus, SyncTrigger,
};

use crate::error::Result;
use crate::models::{ClipEntry, Tab};
use crate::store::LocalStore;
use crate::transport::RemoteTransport;

/// The whole sync surface: one scheduler per collection kind, one event
/// stream, one enable/disable toggle.
///
/// Kinds are independent — a pass for tabs may overlap a pass for clipboard
/// entries — while passes within a kind are serialized by its engine.
pub struct SyncService {
    tabs: SyncScheduler<Tab>,
    clipboard: SyncScheduler<ClipEntry>,
    events: broadcast::Sender<ChangeNotice>,
}

impl SyncService {
    pub fn new(
        local: Arc<dyn LocalStore>,
        tab_transport: Arc<dyn RemoteTransport<Tab>>,
        clip_transport: Arc<dyn RemoteTransport<ClipEntry>>,
        config: SchedulerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let tabs = SyncScheduler::new(
            SyncEngine::new(Arc::clone(&local), tab_transport, events.clone()),
            config.clone(),
        );
        let clipboard = SyncScheduler::new(
            SyncEngine::new(local, clip_transport, events.clone()),
            config,
        );
        Self {
            tabs,
            clipboard,
            events,
        }
    }

    /// Hydrate both collections from their local snapshots.
    pub async fn load_local(&self) -> Result<()> {
        self.tabs.engine().load_local().await?;
        self.clipboard.engine().load_local().await?;
        Ok(())
    }

    #[must_use]
    pub fn tabs(&self) -> &SyncScheduler<Tab> {
        &self.tabs
    }

    #[must_use]
    pub fn clipboard(&self) -> &SyncScheduler<ClipEntry> {
        &self.clipboard
    }

    /// Subscribe to partitioned change notifications from both kinds.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotice> {
        self.events.subscribe()
    }

    pub async fn enable(&self) {
        self.tabs.enable().await;
        self.clipboard.enable().await;
    }

    pub async fn disable(&self) {
        self.tabs.disable().await;
        self.clipboard.disable().await;
    }

    /// App came to the foreground.
    pub async fn foreground(&self) {
        self.tabs.trigger(SyncTrigger::Foreground).await;
        self.clipboard.trigger(SyncTrigger::Foreground).await;
    }

    /// The remote store signalled a change.
    pub async fn remote_changed(&self) {
        self.tabs.trigger(SyncTrigger::RemoteChanged).await;
        self.clipboard.trigger(SyncTrigger::RemoteChanged).await;
    }

    /// Run one pass for each kind right now (e.g. `scrib sync now`).
    pub async fn sync_now(&self) -> Result<()> {
        let (tab_result, clip_result) = tokio::join!(
            self.tabs.engine().run_pass(),
            self.clipboard.engine().run_pass()
        );
        tab_result?;
        clip_result?;
        Ok(())
    }
}
