use async_trait::async_trait;
use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::batch;
use crate::memory::MemoryTier;
use crate::persistent::PersistentTier;
use crate::traits::CacheEntity;
use crate::traits::CacheMaintenance;
use crate::traits::Clock;
use crate::types::CacheStats;
use crate::write_queue::WriteQueue;

/// Cache of one entity type: memory tier in front of the persistent tier.
///
/// * `get` looks in memory, then in the persistent tier, re-populating memory on a persistent hit. A miss means the
///   caller fetches from the remote service and calls `set`.
/// * `set` is visible to the very next `get`; the persistent write is queued and best-effort.
/// * Going over `capacity` evicts the least recently touched entries from memory only. Their persisted copies stay
///   until the TTL sweep removes them.
pub struct EntityCache<E>
where
    E: CacheEntity,
{
    name:       &'static str,
    capacity:   usize,
    ttl:        Duration,
    batch_size: usize,
    pinned:     bool,
    clock:      Arc<dyn Clock>,
    memory:     MemoryTier<E>,
    persistent: Arc<PersistentTier>,
    queue:      WriteQueue,
}

impl<E> EntityCache<E>
where
    E: CacheEntity,
{
    pub(crate) fn new(
        name: &'static str,
        capacity: usize,
        ttl: Duration,
        batch_size: usize,
        queue_capacity: usize,
        clock: Arc<dyn Clock>,
        persistent: Arc<PersistentTier>,
    ) -> Self {
        Self {
            name,
            capacity,
            ttl,
            batch_size,
            pinned: false,
            clock,
            memory: MemoryTier::new(),
            queue: WriteQueue::new(name, Arc::clone(&persistent), queue_capacity),
            persistent,
        }
    }

    /// Keep this cache out of the janitor's aggressive shrinking.
    pub(crate) fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &str) -> Option<E> {
        let now = self.clock.now();

        if let Some(value) = self.memory.get(key, now, self.ttl) {
            debug!("[{}] GET({key}) memory hit", self.name);
            return Some(value);
        }

        let epoch = self.memory.epoch();
        let stamped = self.persistent.read::<E>(E::KIND, key, now, self.ttl).await?;
        debug!("[{}] GET({key}) persistent hit, stored at {}", self.name, stamped.at);

        match self
            .memory
            .insert_if_unchanged(epoch, key.to_owned(), stamped.value.clone(), now, self.capacity)
        {
            Some(evicted) => {
                self.log_evicted(&evicted);
                Some(stamped.value)
            }
            None => {
                debug!("[{}] GET({key}) not re-populated, memory changed meanwhile", self.name);
                // A write that landed during the read wins over what was just loaded.
                self.memory.peek(key).or(Some(stamped.value))
            }
        }
    }

    /// Memory-only lookup that does not refresh the access time.
    pub fn peek(&self, key: &str) -> Option<E> {
        self.memory.peek(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.memory.contains(key)
    }

    pub async fn set(&self, key: impl Into<String>, value: E) {
        let key = key.into();
        let now = self.clock.now();

        let entry = self.persistent.encode(E::KIND, &key, &value, now);
        let evicted = self.memory.insert(key.clone(), value, now, self.capacity);
        debug!("[{}] SET({key})", self.name);
        self.log_evicted(&evicted);

        match entry {
            Ok(entry) => {
                self.queue.write_entries(vec![entry]).await;
            }
            Err(err) => warn!("[{}] Not persisting '{key}': {err}", self.name),
        }
    }

    /// Write many entities at once. Memory is updated before this returns; persistence goes through the batch
    /// serializer.
    #[instrument(level = "trace", skip(self, items), fields(cache = self.name, count = items.len()))]
    pub async fn set_many(&self, items: Vec<(String, E)>) {
        if items.is_empty() {
            return;
        }

        let now = self.clock.now();
        let batches = batch::partition(items, self.batch_size);

        for (key, value) in batches.iter().flatten() {
            let evicted = self.memory.insert(key.clone(), value.clone(), now, self.capacity);
            self.log_evicted(&evicted);
        }

        for entries in batch::encode_batches(self.name, &self.persistent, E::KIND, batches, now).await {
            self.queue.write_entries(entries).await;
        }
    }

    /// Memory-only bulk insert for data that has an always-available source of its own.
    pub fn preload(&self, items: Vec<(String, E)>) -> usize {
        let now = self.clock.now();
        let count = items.len();
        for (key, value) in items {
            let evicted = self.memory.insert(key, value, now, self.capacity);
            self.log_evicted(&evicted);
        }
        debug!("[{}] Preloaded {count} entries", self.name);
        count
    }

    /// Remove from both tiers. Returns once the persisted pair is gone.
    pub async fn remove(&self, key: &str) -> Option<E> {
        let removed = self.memory.remove(key);
        debug!("[{}] REMOVE({key}) in memory: {}", self.name, removed.is_some());
        self.queue
            .delete(vec![
                self.persistent.stamp_key(E::KIND, key),
                self.persistent.record_key(E::KIND, key),
            ])
            .await;
        self.queue.flush().await;
        removed
    }

    pub async fn remove_many(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let mut doomed = Vec::with_capacity(keys.len() * 2);
        for key in keys {
            self.memory.remove(key);
            doomed.push(self.persistent.stamp_key(E::KIND, key));
            doomed.push(self.persistent.record_key(E::KIND, key));
        }
        debug!("[{}] REMOVE {} key(s)", self.name, keys.len());
        self.queue.delete(doomed).await;
        self.queue.flush().await;
    }

    /// Drop every entry of this type from both tiers.
    pub async fn clear(&self) {
        let dropped = self.memory.clear();
        // Anything still queued must land before the listing, or it would survive the clear.
        self.queue.flush().await;
        match self.persistent.keys_of_kind(E::KIND).await {
            Ok(keys) => {
                self.queue.delete(keys).await;
                self.queue.flush().await;
            }
            Err(err) => warn!("[{}] Failed to list persisted entries: {err}", self.name),
        }
        debug!("[{}] Cleared, {dropped} memory entries dropped", self.name);
    }

    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name:             self.name,
            item_count:       self.memory.len(),
            capacity:         self.capacity,
            oldest_timestamp: self.memory.oldest(),
            newest_timestamp: self.memory.newest(),
        }
    }

    /// Last access time of a key held in memory.
    pub fn last_access(&self, key: &str) -> Option<DateTime<Utc>> {
        self.memory.timestamp_of(key)
    }

    pub async fn flush(&self) {
        self.queue.flush().await;
    }

    pub(crate) async fn close(&self) {
        self.queue.close().await;
    }

    fn log_evicted(&self, evicted: &[String]) {
        if !evicted.is_empty() {
            debug!("[{}] Evicted {} entries over capacity {}", self.name, evicted.len(), self.capacity);
        }
    }
}

#[async_trait]
impl<E> CacheMaintenance for EntityCache<E>
where
    E: CacheEntity,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn len(&self) -> usize {
        self.memory.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn is_pinned(&self) -> bool {
        self.pinned
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        self.memory.purge_expired(now, self.ttl).len()
    }

    fn shrink_to(&self, max: usize) -> usize {
        self.memory.evict_to(max).len()
    }

    async fn flush(&self) {
        self.queue.flush().await;
    }
}
