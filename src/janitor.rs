use chrono::Duration;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::Weak;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::config::CacheConfig;
use crate::persistent::PersistentTier;
use crate::traits::CacheMaintenance;
use crate::traits::Clock;

/// What a single janitor pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JanitorReport {
    /// Timestamp records inspected.
    pub scanned:        usize,
    /// Expired or corrupt persisted entries removed.
    pub removed:        usize,
    /// Memory tier entries dropped for being older than the validity window.
    pub memory_expired: usize,
    /// `true` if the combined memory tier size was over the ceiling and every cache got shrunk.
    pub aggressive:     bool,
}

/// Recurring background sweep over both tiers.
///
/// A pass checks at most `batch_size` persisted timestamp records and removes the expired pairs. A cursor carries over
/// to the next pass, so consecutive passes walk the whole persistent tier and start over once its end is reached.
/// Then the pass drops memory entries past the validity window and, if the memory tiers together hold more than the
/// ceiling, shrinks each of them to a fraction of its normal capacity.
///
/// Passes never overlap: one started while another is running returns `None` immediately.
pub struct Janitor {
    persistent:          Arc<PersistentTier>,
    caches:              Vec<Arc<dyn CacheMaintenance>>,
    clock:               Arc<dyn Clock>,
    ttl:                 Duration,
    interval:            std::time::Duration,
    batch_size:          usize,
    memory_ceiling:      usize,
    aggressive_fraction: f64,
    pass_lock:           tokio::sync::Mutex<()>,
    // Last timestamp key checked by the previous pass.
    cursor:              Mutex<Option<String>>,
    task:                Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl Janitor {
    pub(crate) fn new(
        persistent: Arc<PersistentTier>,
        caches: Vec<Arc<dyn CacheMaintenance>>,
        clock: Arc<dyn Clock>,
        config: &CacheConfig,
    ) -> Self {
        Self {
            persistent,
            caches,
            clock,
            ttl: config.ttl(),
            interval: config.janitor_interval(),
            batch_size: config.janitor_batch_size().max(1),
            memory_ceiling: config.memory_ceiling(),
            aggressive_fraction: config.aggressive_fraction().clamp(0.0, 1.0),
            pass_lock: tokio::sync::Mutex::new(()),
            cursor: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> std::time::Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Start the recurring task. Returns `false` if it is already running. A stopped janitor can be started again.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return false;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(Self::run(Arc::downgrade(self), self.interval, cancel_rx));
        *task = Some((cancel_tx, handle));
        debug!("[janitor] Started, interval {:?}", self.interval);
        true
    }

    /// Cancel the recurring task and wait for it. A pass in progress is allowed to finish.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some((cancel, handle)) = task {
            let _ = cancel.send(true);
            if let Err(err) = handle.await {
                warn!("[janitor] Task failed: {err}");
            }
            debug!("[janitor] Stopped");
        }
    }

    async fn run(janitor: Weak<Self>, interval: std::time::Duration, mut cancel: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // The owner is gone without stopping us.
                    let Some(janitor) = janitor.upgrade()
                    else {
                        break;
                    };
                    if janitor.run_pass().await.is_none() {
                        debug!("[janitor] Previous pass is still running, skipping");
                    }
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Run one pass now. Returns `None` if another pass is in progress.
    #[instrument(level = "trace", skip(self))]
    pub async fn run_pass(&self) -> Option<JanitorReport> {
        let Ok(_pass) = self.pass_lock.try_lock()
        else {
            return None;
        };

        let now = self.clock.now();
        let mut report = JanitorReport::default();

        match self.persistent.stamp_keys().await {
            Ok(stamp_keys) => {
                let batch = self.next_batch(stamp_keys);
                for stamp_key in &batch {
                    report.scanned += 1;
                    match self.persistent.sweep_stamp(stamp_key, now, self.ttl).await {
                        Ok(true) => report.removed += 1,
                        Ok(false) => (),
                        Err(err) => warn!("[janitor] Failed to sweep '{stamp_key}': {err}"),
                    }
                    tokio::task::yield_now().await;
                }
                *self.cursor.lock() = batch.last().cloned();
            }
            Err(err) => warn!("[janitor] Failed to list timestamp records: {err}"),
        }

        for cache in &self.caches {
            report.memory_expired += cache.purge_expired(now);
        }

        let total = self.memory_total();
        info!(
            "[janitor] Memory tier holds {total} entries ({})",
            self.caches
                .iter()
                .map(|c| format!("{}: {}", c.name(), c.len()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        if total > self.memory_ceiling {
            report.aggressive = true;
            let mut evicted = 0;
            for cache in self.caches.iter().filter(|c| !c.is_pinned()) {
                let keep = (cache.capacity() as f64 * self.aggressive_fraction).floor() as usize;
                evicted += cache.shrink_to(keep);
            }
            warn!(
                "[janitor] {total} entries over the ceiling of {}, evicted {evicted}",
                self.memory_ceiling
            );
        }

        info!(
            "[janitor] Pass done: {} scanned, {} removed, {} expired in memory",
            report.scanned, report.removed, report.memory_expired
        );
        Some(report)
    }

    // Up to `batch_size` keys following the cursor, starting over from the first key when the cursor is at the end.
    fn next_batch(&self, mut stamp_keys: Vec<String>) -> Vec<String> {
        stamp_keys.sort_unstable();
        let start = match self.cursor.lock().as_deref() {
            Some(cursor) => stamp_keys.partition_point(|k| k.as_str() <= cursor),
            None => 0,
        };
        let start = if start >= stamp_keys.len() { 0 } else { start };
        stamp_keys.into_iter().skip(start).take(self.batch_size).collect()
    }

    /// Combined number of entries held by the memory tiers the ceiling applies to. Pinned caches don't count.
    pub fn memory_total(&self) -> usize {
        self.caches.iter().filter(|c| !c.is_pinned()).map(|c| c.len()).sum()
    }
}
