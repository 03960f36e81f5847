use parking_lot::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::persistent::EncodedEntry;
use crate::persistent::PersistentTier;

#[derive(Debug)]
pub(crate) enum PersistOp {
    Entries(Vec<EncodedEntry>),
    Raw(Vec<(String, String)>),
    Delete(Vec<String>),
    Flush(oneshot::Sender<()>),
}

/// Bounded queue of persistent-tier writes served by a single background worker.
///
/// One queue per typed cache. Operations are applied in submission order, so a delete queued after a write of the same
/// key always wins. Failed writes are logged and dropped; the memory tier stays authoritative for the process lifetime
/// and the next `set` of the key supersedes the lost write.
pub struct WriteQueue {
    name:       &'static str,
    persistent: Arc<PersistentTier>,
    capacity:   usize,
    sender:     Mutex<Option<mpsc::Sender<PersistOp>>>,
    worker:     Mutex<Option<JoinHandle<()>>>,
    closed:     AtomicBool,
}

impl WriteQueue {
    pub fn new(name: &'static str, persistent: Arc<PersistentTier>, capacity: usize) -> Self {
        Self {
            name,
            persistent,
            capacity: capacity.max(1),
            sender: Mutex::new(None),
            worker: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // The worker is started on demand and restarted if it ever died.
    fn sender(&self) -> Option<mpsc::Sender<PersistOp>> {
        if self.is_closed() {
            return None;
        }

        let mut sender = self.sender.lock();
        let mut worker = self.worker.lock();
        let alive = worker.as_ref().is_some_and(|w| !w.is_finished()) && sender.is_some();
        if !alive {
            debug!("[{}] Starting persistence worker", self.name);
            let (tx, rx) = mpsc::channel(self.capacity);
            *worker = Some(tokio::spawn(Self::serve(
                self.name,
                Arc::clone(&self.persistent),
                rx,
            )));
            *sender = Some(tx);
        }
        sender.clone()
    }

    pub(crate) async fn submit(&self, op: PersistOp) -> bool {
        let Some(sender) = self.sender()
        else {
            debug!("[{}] Queue is closed, dropping {op:?}", self.name);
            return false;
        };
        if let Err(err) = sender.send(op).await {
            warn!("[{}] Persistence worker is gone, dropping {:?}", self.name, err.0);
            return false;
        }
        true
    }

    pub async fn write_entries(&self, entries: Vec<EncodedEntry>) -> bool {
        if entries.is_empty() {
            return true;
        }
        self.submit(PersistOp::Entries(entries)).await
    }

    pub async fn write_raw(&self, records: Vec<(String, String)>) -> bool {
        if records.is_empty() {
            return true;
        }
        self.submit(PersistOp::Raw(records)).await
    }

    pub async fn delete(&self, keys: Vec<String>) -> bool {
        if keys.is_empty() {
            return true;
        }
        self.submit(PersistOp::Delete(keys)).await
    }

    /// Wait until every operation queued before this call has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.submit(PersistOp::Flush(tx)).await {
            let _ = rx.await;
        }
    }

    /// Stop accepting operations and let the worker drain what is already queued.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        // Dropping the only sender ends the worker loop once the queue is empty.
        drop(self.sender.lock().take());
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                warn!("[{}] Persistence worker failed: {err}", self.name);
            }
        }
        debug!("[{}] Persistence queue closed", self.name);
    }

    async fn serve(name: &'static str, persistent: Arc<PersistentTier>, mut rx: mpsc::Receiver<PersistOp>) {
        while let Some(op) = rx.recv().await {
            Self::apply(name, &persistent, op).await;
        }
        debug!("[{name}] Persistence worker stopped");
    }

    #[instrument(level = "trace", skip(persistent, op))]
    async fn apply(name: &'static str, persistent: &PersistentTier, op: PersistOp) {
        match op {
            PersistOp::Entries(entries) => {
                for entry in &entries {
                    if let Err(err) = persistent.write_entry(entry).await {
                        warn!("[{name}] Failed to persist '{}': {err}", entry.record_key);
                    }
                }
            }
            PersistOp::Raw(records) => {
                for (key, value) in &records {
                    if let Err(err) = persistent.write_raw(key, value).await {
                        warn!("[{name}] Failed to persist '{key}': {err}");
                    }
                }
            }
            PersistOp::Delete(keys) => {
                if let Err(err) = persistent.delete_keys(&keys).await {
                    warn!("[{name}] Failed to delete {} key(s): {err}", keys.len());
                }
            }
            PersistOp::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::traits::KeyValueStore;

    #[tokio::test]
    async fn operations_apply_in_order() {
        let store = Arc::new(MemoryStore::new());
        let persistent = Arc::new(PersistentTier::new(store.clone(), "cache"));
        let queue = WriteQueue::new("test", persistent, 2);

        for i in 0..10 {
            queue.write_raw(vec![("k".to_string(), i.to_string())]).await;
        }
        queue.delete(vec!["k".to_string()]).await;
        queue.write_raw(vec![("k".to_string(), "last".to_string())]).await;
        queue.flush().await;

        assert_eq!(store.get_string("k").await.unwrap().as_deref(), Some("last"));
    }

    #[tokio::test]
    async fn close_drains_and_rejects_afterwards() {
        let store = Arc::new(MemoryStore::new());
        let persistent = Arc::new(PersistentTier::new(store.clone(), "cache"));
        let queue = WriteQueue::new("test", persistent, 4);

        for i in 0..20 {
            queue.write_raw(vec![(format!("k{i}"), "v".to_string())]).await;
        }
        queue.close().await;
        assert_eq!(store.len(), 20);

        assert!(!queue.write_raw(vec![("late".to_string(), "v".to_string())]).await);
        assert!(!store.contains_key("late"));
    }
}
