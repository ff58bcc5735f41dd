//! Sync scheduler
//!
//! Drives when a collection pulls, merges, and pushes: on enable (with a
//! short retry burst to absorb remote propagation lag), on foreground and
//! remote-change signals, on a periodic timer, and with exponential backoff
//! after failures. Disabling cancels the schedule, waits out any in-flight
//! pass, and then clears remote state as its own explicit step.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::models::Document;

use super::engine::SyncEngine;

/// Scheduler cadence and retry tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Steady-state poll cadence.
    pub poll_interval: Duration,
    /// Number of passes in the post-enable burst.
    pub retry_burst_count: u32,
    /// Fixed delay between burst passes.
    pub retry_burst_delay: Duration,
    /// Backoff base delay after a failed pass.
    pub backoff_base: Duration,
    /// Backoff doubles up to this exponent.
    pub backoff_max_exponent: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            retry_burst_count: 3,
            retry_burst_delay: Duration::from_secs(2),
            backoff_base: Duration::from_secs(5),
            backoff_max_exponent: 8,
        }
    }
}

/// Exponential backoff with cap.
#[must_use]
pub fn backoff_delay(config: &SchedulerConfig, consecutive_failures: u32) -> Duration {
    let exponent = consecutive_failures
        .saturating_sub(1)
        .min(config.backoff_max_exponent);
    config.backoff_base * 2_u32.pow(exponent)
}

/// Scheduler lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Disabled,
    Starting,
    Steady,
}

/// Introspection snapshot for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub last_sync_ms: Option<i64>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

/// External wake-up reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    Foreground,
    RemoteChanged,
    Manual,
}

const PHASE_DISABLED: u8 = 0;
const PHASE_STARTING: u8 = 1;
const PHASE_STEADY: u8 = 2;

#[derive(Debug, Default)]
struct SchedulerShared {
    phase: AtomicU8,
    consecutive_failures: AtomicU32,
    last_error: std::sync::Mutex<Option<String>>,
}

impl SchedulerShared {
    fn set_phase(&self, phase: SyncPhase) {
        let value = match phase {
            SyncPhase::Disabled => PHASE_DISABLED,
            SyncPhase::Starting => PHASE_STARTING,
            SyncPhase::Steady => PHASE_STEADY,
        };
        self.phase.store(value, Ordering::SeqCst);
    }

    fn phase(&self) -> SyncPhase {
        match self.phase.load(Ordering::SeqCst) {
            PHASE_STARTING => SyncPhase::Starting,
            PHASE_STEADY => SyncPhase::Steady,
            _ => SyncPhase::Disabled,
        }
    }

    fn record_result(&self, result: &crate::error::Result<crate::merge::ChangeSet>) {
        match result {
            Ok(_) => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                if let Ok(mut last_error) = self.last_error.lock() {
                    *last_error = None;
                }
            }
            Err(error) => {
                self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                if let Ok(mut last_error) = self.last_error.lock() {
                    *last_error = Some(error.to_string());
                }
            }
        }
    }
}

struct Driver {
    task: JoinHandle<()>,
    triggers: mpsc::Sender<SyncTrigger>,
}

/// Schedules sync passes for one collection kind.
pub struct SyncScheduler<D: Document> {
    engine: SyncEngine<D>,
    config: SchedulerConfig,
    shared: Arc<SchedulerShared>,
    driver: Mutex<Option<Driver>>,
}

impl<D: Document> SyncScheduler<D> {
    #[must_use]
    pub fn new(engine: SyncEngine<D>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            config,
            shared: Arc::new(SchedulerShared::default()),
            driver: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &SyncEngine<D> {
        &self.engine
    }

    /// Turn sync on: burst a few passes to absorb propagation lag, then poll.
    pub async fn enable(&self) {
        let mut driver = self.driver.lock().await;
        if driver.is_some() {
            return;
        }
        self.engine.set_enabled(true);
        self.shared.set_phase(SyncPhase::Starting);

        let (triggers, rx) = mpsc::channel(16);
        let task = tokio::spawn(drive(
            self.engine.clone(),
            self.config.clone(),
            Arc::clone(&self.shared),
            rx,
        ));
        *driver = Some(Driver { task, triggers });
        tracing::info!("Sync enabled for {}", D::KIND);
    }

    /// Turn sync off and clear remote state (the "unsync" operation).
    ///
    /// An in-flight pass is never cancelled; we wait for it to complete and
    /// apply before clearing.
    pub async fn disable(&self) {
        let Some(driver) = self.driver.lock().await.take() else {
            return;
        };
        self.engine.set_enabled(false);
        driver.task.abort();
        self.engine.cancel_pending_flush().await;
        self.engine.wait_idle().await;

        if let Err(error) = self.engine.clear_remote().await {
            tracing::warn!("Clearing remote {} state failed: {error}", D::KIND);
        }
        self.shared.set_phase(SyncPhase::Disabled);
        self.shared.consecutive_failures.store(0, Ordering::SeqCst);
        tracing::info!("Sync disabled for {}", D::KIND);
    }

    /// Deliver an external trigger; ignored while disabled.
    pub async fn trigger(&self, trigger: SyncTrigger) {
        let driver = self.driver.lock().await;
        if let Some(driver) = driver.as_ref() {
            if driver.triggers.try_send(trigger).is_err() {
                tracing::debug!("Trigger queue full for {}; pass already due", D::KIND);
            }
        }
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            phase: self.shared.phase(),
            last_sync_ms: self.engine.last_sync_ms(),
            consecutive_failures: self.shared.consecutive_failures.load(Ordering::SeqCst),
            last_error: self
                .shared
                .last_error
                .lock()
                .map_or(None, |last_error| last_error.clone()),
        }
    }
}

/// Run one pass shielded from driver cancellation: the pass task survives an
/// abort of the driver, so a merge always completes and applies.
async fn run_shielded_pass<D: Document>(engine: &SyncEngine<D>, shared: &SchedulerShared) {
    let pass_engine = engine.clone();
    let joined = tokio::spawn(async move { pass_engine.run_pass().await }).await;
    match joined {
        Ok(result) => {
            if let Err(error) = &result {
                tracing::warn!("Sync pass for {} failed: {error}", D::KIND);
            }
            shared.record_result(&result);
        }
        Err(error) => {
            tracing::warn!("Sync pass task for {} aborted: {error}", D::KIND);
        }
    }
}

async fn drive<D: Document>(
    engine: SyncEngine<D>,
    config: SchedulerConfig,
    shared: Arc<SchedulerShared>,
    mut triggers: mpsc::Receiver<SyncTrigger>,
) {
    // Post-enable burst: the remote store is itself eventually consistent,
    // so retry a few times at a fixed short delay.
    for attempt in 0..config.retry_burst_count {
        run_shielded_pass(&engine, &shared).await;
        if attempt + 1 < config.retry_burst_count {
            tokio::time::sleep(config.retry_burst_delay).await;
        }
    }
    shared.set_phase(SyncPhase::Steady);

    loop {
        let failures = shared.consecutive_failures.load(Ordering::SeqCst);
        let delay = if failures == 0 {
            config.poll_interval
        } else {
            backoff_delay(&config, failures)
        };

        tokio::select! {
            trigger = triggers.recv() => match trigger {
                Some(trigger) => {
                    tracing::debug!("{} woken by {trigger:?}", D::KIND);
                    run_shielded_pass(&engine, &shared).await;
                }
                None => break,
            },
            () = tokio::time::sleep(delay) => {
                run_shielded_pass(&engine, &shared).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClipEntry, Tab};
    use crate::store::{LocalStore, MemoryStore};
    use crate::sync::engine::ChangeNotice;
    use crate::transport::{BlobTransport, MemoryKv, RemoteKv, RemoteTransport};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeSet;
    use tokio::sync::broadcast;
    use tokio::time::sleep;

    fn quick_config() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_millis(40),
            retry_burst_count: 2,
            retry_burst_delay: Duration::from_millis(5),
            backoff_base: Duration::from_millis(20),
            backoff_max_exponent: 3,
        }
    }

    fn scheduler_over(
        kv: &Arc<MemoryKv>,
    ) -> (SyncScheduler<Tab>, broadcast::Receiver<ChangeNotice>) {
        let (events, rx) = broadcast::channel(16);
        let transport: Arc<dyn RemoteTransport<Tab>> =
            Arc::new(BlobTransport::new(Arc::clone(kv) as Arc<dyn RemoteKv>));
        let local = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(local as Arc<dyn LocalStore>, transport, events);
        (SyncScheduler::new(engine, quick_config()), rx)
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let config = SchedulerConfig::default();
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(5));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(10));
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(20));
        assert_eq!(backoff_delay(&config, 20), backoff_delay(&config, 9));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enable_runs_burst_and_reaches_steady() {
        let kv = Arc::new(MemoryKv::new());
        let remote_tab = Tab::new("Remote", "already there");
        let seed: BlobTransport<Tab> =
            BlobTransport::new(Arc::clone(&kv) as Arc<dyn RemoteKv>);
        seed.push(&[remote_tab.clone()], &BTreeSet::new())
            .await
            .unwrap();

        let (scheduler, _rx) = scheduler_over(&kv);
        assert_eq!(scheduler.status().phase, SyncPhase::Disabled);

        scheduler.enable().await;
        sleep(Duration::from_millis(150)).await;

        assert_eq!(scheduler.status().phase, SyncPhase::Steady);
        let pulled = scheduler.engine().get(remote_tab.id).await.unwrap();
        assert_eq!(pulled.text, "already there");

        scheduler.disable().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn disable_clears_remote_state() {
        let kv = Arc::new(MemoryKv::new());
        let (scheduler, _rx) = scheduler_over(&kv);

        scheduler.enable().await;
        scheduler.engine().upsert(Tab::new("Mine", "data")).await;
        scheduler.engine().flush_now().await.unwrap();
        assert!(kv.raw("tabs").await.is_some());

        scheduler.disable().await;
        assert_eq!(scheduler.status().phase, SyncPhase::Disabled);
        assert!(kv.raw("tabs").await.is_none());
        assert!(kv.raw("deletedTabIDs").await.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn triggers_wake_a_steady_scheduler() {
        let kv = Arc::new(MemoryKv::new());
        let (scheduler, mut rx) = scheduler_over(&kv);
        // Slow cadence so only a trigger can explain a new pass.
        let scheduler = SyncScheduler::new(
            scheduler.engine.clone(),
            SchedulerConfig {
                poll_interval: Duration::from_secs(3600),
                retry_burst_count: 1,
                ..quick_config()
            },
        );

        scheduler.enable().await;
        sleep(Duration::from_millis(50)).await;

        let remote_tab = Tab::new("Late", "arrived after enable");
        let seed: BlobTransport<Tab> =
            BlobTransport::new(Arc::clone(&kv) as Arc<dyn RemoteKv>);
        seed.push(&[remote_tab.clone()], &BTreeSet::new())
            .await
            .unwrap();

        scheduler.trigger(SyncTrigger::RemoteChanged).await;

        let notice = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("change notice")
            .unwrap();
        assert_eq!(notice.changes.inserted, vec![remote_tab.id]);

        scheduler.disable().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failures_raise_backoff_and_recover() {
        let kv = Arc::new(MemoryKv::new());
        kv.set_offline(true);
        let (scheduler, _rx) = scheduler_over(&kv);

        scheduler.enable().await;
        sleep(Duration::from_millis(100)).await;
        assert!(scheduler.status().consecutive_failures >= 1);
        assert!(scheduler.status().last_error.is_some());

        kv.set_offline(false);
        sleep(Duration::from_millis(300)).await;
        assert_eq!(scheduler.status().consecutive_failures, 0);
        assert!(scheduler.status().last_error.is_none());

        scheduler.disable().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn passes_for_different_kinds_run_independently() {
        let kv = Arc::new(MemoryKv::new());
        let (tab_events, _tab_rx) = broadcast::channel(16);
        let (clip_events, _clip_rx) = broadcast::channel(16);

        let tab_transport: Arc<dyn RemoteTransport<Tab>> =
            Arc::new(BlobTransport::new(Arc::clone(&kv) as Arc<dyn RemoteKv>));
        let clip_transport: Arc<dyn RemoteTransport<ClipEntry>> =
            Arc::new(BlobTransport::new(Arc::clone(&kv) as Arc<dyn RemoteKv>));

        let tab_engine = SyncEngine::new(
            Arc::new(MemoryStore::new()) as Arc<dyn LocalStore>,
            tab_transport,
            tab_events,
        );
        let clip_engine = SyncEngine::new(
            Arc::new(MemoryStore::new()) as Arc<dyn LocalStore>,
            clip_transport,
            clip_events,
        );
        tab_engine.set_enabled(true);
        clip_engine.set_enabled(true);

        tab_engine.upsert(Tab::new("T", "tab text")).await;
        clip_engine.upsert(ClipEntry::new("clip text")).await;

        let (tab_result, clip_result) =
            tokio::join!(tab_engine.run_pass(), clip_engine.run_pass());
        tab_result.unwrap();
        clip_result.unwrap();

        assert!(kv.raw("tabs").await.unwrap().contains("tab text"));
        assert!(kv.raw("clipboard").await.unwrap().contains("clip text"));
    }
}
