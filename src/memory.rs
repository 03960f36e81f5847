use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;

struct Slots<V> {
    values:  HashMap<String, V>,
    touched: HashMap<String, DateTime<Utc>>,
    // Bumped by every insert, removal and eviction. A reader that went to the persistent tier re-populates memory
    // only if the epoch is unchanged, so it can neither undo a concurrent `remove` nor shadow a newer `set`.
    epoch:   u64,
}

impl<V> Slots<V> {
    fn drop_key(&mut self, key: &str) -> Option<V> {
        self.touched.remove(key);
        self.values.remove(key)
    }

    // Oldest first; equal timestamps fall back to key order so the outcome is reproducible.
    fn oldest_keys(&self, count: usize, spare: Option<&str>) -> Vec<String> {
        let mut by_age = self
            .touched
            .iter()
            .filter(|(k, _)| Some(k.as_str()) != spare)
            .map(|(k, ts)| (*ts, k.as_str()))
            .collect::<Vec<_>>();
        by_age.sort_unstable();
        by_age.into_iter().take(count).map(|(_, k)| k.to_owned()).collect()
    }

    fn evict_over(&mut self, max: usize, spare: Option<&str>) -> Vec<String> {
        let excess = self.values.len().saturating_sub(max);
        if excess == 0 {
            return Vec::new();
        }
        let victims = self.oldest_keys(excess, spare);
        self.epoch += 1;
        for key in &victims {
            self.drop_key(key);
        }
        victims
    }
}

/// In-process map of one entity type plus the last-access timestamp of each key.
///
/// The same timestamp drives TTL expiry and oldest-first eviction. Both maps sit behind a single lock so they never
/// disagree about which keys exist.
pub struct MemoryTier<V> {
    slots: Mutex<Slots<V>>,
}

impl<V> MemoryTier<V>
where
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                values:  HashMap::new(),
                touched: HashMap::new(),
                epoch:   0,
            }),
        }
    }

    /// Return a live entry and refresh its access time. An entry older than `ttl` is dropped and reported as a miss.
    pub fn get(&self, key: &str, now: DateTime<Utc>, ttl: Duration) -> Option<V> {
        let mut slots = self.slots.lock();
        let ts = *slots.touched.get(key)?;
        if now.signed_duration_since(ts) > ttl {
            slots.drop_key(key);
            slots.epoch += 1;
            return None;
        }
        slots.touched.insert(key.to_owned(), now);
        slots.values.get(key).cloned()
    }

    /// Read without touching. Expired entries are still returned.
    pub fn peek(&self, key: &str) -> Option<V> {
        self.slots.lock().values.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.slots.lock().values.contains_key(key)
    }

    pub fn touch(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut slots = self.slots.lock();
        if slots.values.contains_key(key) {
            slots.touched.insert(key.to_owned(), now);
            true
        }
        else {
            false
        }
    }

    /// Insert or overwrite, then evict the oldest entries beyond `max`. The key just written is never a victim.
    pub fn insert(&self, key: String, value: V, now: DateTime<Utc>, max: usize) -> Vec<String> {
        let mut slots = self.slots.lock();
        slots.epoch += 1;
        slots.touched.insert(key.clone(), now);
        slots.values.insert(key.clone(), value);
        slots.evict_over(max, Some(&key))
    }

    /// Like [`insert`](Self::insert), but only if nothing was written or removed since `epoch` was observed.
    pub(crate) fn insert_if_unchanged(
        &self,
        epoch: u64,
        key: String,
        value: V,
        now: DateTime<Utc>,
        max: usize,
    ) -> Option<Vec<String>> {
        let mut slots = self.slots.lock();
        if slots.epoch != epoch {
            return None;
        }
        slots.epoch += 1;
        slots.touched.insert(key.clone(), now);
        slots.values.insert(key.clone(), value);
        Some(slots.evict_over(max, Some(&key)))
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.slots.lock().epoch
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        let mut slots = self.slots.lock();
        slots.epoch += 1;
        slots.drop_key(key)
    }

    /// Evict oldest-first until at most `max` entries remain. Returns the evicted keys.
    pub fn evict_to(&self, max: usize) -> Vec<String> {
        self.slots.lock().evict_over(max, None)
    }

    pub fn purge_expired(&self, now: DateTime<Utc>, ttl: Duration) -> Vec<String> {
        let mut slots = self.slots.lock();
        let expired = slots
            .touched
            .iter()
            .filter(|(_, ts)| now.signed_duration_since(**ts) > ttl)
            .map(|(k, _)| k.clone())
            .collect::<Vec<_>>();
        if !expired.is_empty() {
            slots.epoch += 1;
        }
        for key in &expired {
            slots.drop_key(key);
        }
        expired
    }

    pub fn clear(&self) -> usize {
        let mut slots = self.slots.lock();
        let count = slots.values.len();
        slots.values.clear();
        slots.touched.clear();
        slots.epoch += 1;
        count
    }

    pub fn len(&self) -> usize {
        self.slots.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.slots.lock().values.keys().cloned().collect()
    }

    pub fn timestamp_of(&self, key: &str) -> Option<DateTime<Utc>> {
        self.slots.lock().touched.get(key).copied()
    }

    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.slots.lock().touched.values().min().copied()
    }

    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.slots.lock().touched.values().max().copied()
    }
}

impl<V> Default for MemoryTier<V>
where
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
