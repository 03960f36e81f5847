use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;

use crate::error::Result;

/// A value that can live in one of the typed caches.
///
/// The cache never looks inside an entity. All it needs is a stable kind name, used to namespace persisted records,
/// and a text encoding. Decoding must tolerate unknown and missing fields so that records written by another version
/// of the application still load.
pub trait CacheEntity: Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Persisted records of this entity type are stored under this kind.
    const KIND: &'static str;
}

/// Device-local string store backing the persistent tier.
///
/// This is the whole contract: any store that can get, set and remove a string by key and list its keys will do.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get_string(&self, key: &str) -> Result<Option<String>>;
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn keys(&self) -> Result<Vec<String>>;

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

/// Source of "now" for TTL and eviction decisions.
pub trait Clock: Debug + Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// Housekeeping hooks the janitor drives on every typed cache.
#[async_trait]
pub trait CacheMaintenance: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Number of entries currently held in memory.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normal capacity ceiling of the memory tier.
    fn capacity(&self) -> usize;

    /// A pinned cache is bounded by its own capacity only. It neither counts towards the combined memory ceiling nor
    /// gets shrunk when that ceiling is exceeded.
    fn is_pinned(&self) -> bool {
        false
    }

    /// Drop memory entries whose last access is older than the validity window. Returns the number dropped.
    fn purge_expired(&self, now: DateTime<Utc>) -> usize;

    /// Evict the oldest entries until at most `max` remain. Returns the number evicted.
    fn shrink_to(&self, max: usize) -> usize;

    /// Wait until every queued persistent write has been applied.
    async fn flush(&self);
}
