use chrono::DateTime;
use chrono::Duration;
use chrono::SecondsFormat;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use tracing::warn;

use crate::error::Result;
use crate::locks::KeyLocks;
use crate::traits::KeyValueStore;

/// Serialized form of one cache entry: the record itself plus its timestamp record.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedEntry {
    pub record_key: String,
    pub record:     String,
    pub stamp_key:  String,
    pub stamp:      String,
}

/// A value read back from the persistent tier together with its stored timestamp.
#[derive(Debug, Clone)]
pub struct Stamped<V> {
    pub value: V,
    pub at:    DateTime<Utc>,
}

/// Record layout and hygiene on top of a [`KeyValueStore`].
///
/// Layout, with `ns` being the configured namespace:
///
/// | key                     | value                          |
/// |-------------------------|--------------------------------|
/// | `ns:<kind>:<key>`       | JSON of the entity             |
/// | `ns_ts:<kind>:<key>`    | RFC 3339 timestamp of the entry|
/// | `ns_idx:<parent>`       | JSON list of child keys        |
/// | `ns_usage:<user>:<name>`| decimal counter                |
///
/// All corruption handling lives here. A record whose timestamp is missing or unparsable, or whose body does not
/// decode, is deleted on read and reported as a miss.
pub struct PersistentTier {
    store:     Arc<dyn KeyValueStore>,
    namespace: String,
    key_locks: KeyLocks,
}

impl PersistentTier {
    pub fn new(store: Arc<dyn KeyValueStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            key_locks: KeyLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    pub fn record_key(&self, kind: &str, key: &str) -> String {
        format!("{}:{kind}:{key}", self.namespace)
    }

    pub fn stamp_key(&self, kind: &str, key: &str) -> String {
        format!("{}_ts:{kind}:{key}", self.namespace)
    }

    pub fn index_key(&self, parent: &str) -> String {
        format!("{}_idx:{parent}", self.namespace)
    }

    pub fn usage_key(&self, user_id: &str, counter: &str) -> String {
        format!("{}_usage:{user_id}:{counter}", self.namespace)
    }

    fn record_prefix(&self) -> String {
        format!("{}:", self.namespace)
    }

    fn stamp_prefix(&self) -> String {
        format!("{}_ts:", self.namespace)
    }

    fn index_prefix(&self) -> String {
        format!("{}_idx:", self.namespace)
    }

    /// Record key that a timestamp key belongs to.
    pub fn record_key_for_stamp(&self, stamp_key: &str) -> Option<String> {
        stamp_key
            .strip_prefix(&self.stamp_prefix())
            .map(|rest| format!("{}{rest}", self.record_prefix()))
    }

    pub fn format_stamp(at: DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse_stamp(raw: &str) -> Result<DateTime<Utc>> {
        Ok(DateTime::parse_from_rfc3339(raw.trim())?.with_timezone(&Utc))
    }

    pub fn encode<V: Serialize>(&self, kind: &str, key: &str, value: &V, at: DateTime<Utc>) -> Result<EncodedEntry> {
        Ok(EncodedEntry {
            record_key: self.record_key(kind, key),
            record:     serde_json::to_string(value)?,
            stamp_key:  self.stamp_key(kind, key),
            stamp:      Self::format_stamp(at),
        })
    }

    // This method blocks the lock map for no longer than it takes to find or create one entry.
    /// Read an entry, healing it if necessary. Never fails: anything wrong turns into a miss.
    pub async fn read<V: DeserializeOwned>(
        &self,
        kind: &str,
        key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Option<Stamped<V>> {
        let record_key = self.record_key(kind, key);
        let _guard = self.key_locks.lock(&record_key).await;
        self.read_locked(kind, key, &record_key, now, ttl).await
    }

    async fn read_locked<V: DeserializeOwned>(
        &self,
        kind: &str,
        key: &str,
        record_key: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Option<Stamped<V>> {
        let stamp_key = self.stamp_key(kind, key);

        let (stamp, record) = match (
            self.store.get_string(&stamp_key).await,
            self.store.get_string(record_key).await,
        ) {
            (Ok(stamp), Ok(record)) => (stamp, record),
            (Err(err), _) | (_, Err(err)) => {
                warn!("[{kind}] Failed to read persisted entry '{key}': {err}");
                return None;
            }
        };

        let (stamp, record) = match (stamp, record) {
            (None, None) => return None,
            (Some(stamp), Some(record)) => (stamp, record),
            _ => {
                debug!("[{kind}] Entry '{key}' is half-written, discarding");
                self.discard_pair(record_key, &stamp_key).await;
                return None;
            }
        };

        let at = match Self::parse_stamp(&stamp) {
            Ok(at) => at,
            Err(err) => {
                warn!("[{kind}] Entry '{key}' has a bad timestamp, discarding: {err}");
                self.discard_pair(record_key, &stamp_key).await;
                return None;
            }
        };

        if now.signed_duration_since(at) > ttl {
            debug!("[{kind}] Entry '{key}' stored at {at} has expired");
            self.discard_pair(record_key, &stamp_key).await;
            return None;
        }

        match serde_json::from_str::<V>(&record) {
            Ok(value) => Some(Stamped { value, at }),
            Err(err) => {
                warn!("[{kind}] Entry '{key}' does not decode, discarding: {err}");
                self.discard_pair(record_key, &stamp_key).await;
                None
            }
        }
    }

    async fn discard_pair(&self, record_key: &str, stamp_key: &str) {
        // Timestamp first: a record without one is healed on the next read anyway.
        for key in [stamp_key, record_key] {
            if let Err(err) = self.store.remove(key).await {
                warn!("Failed to remove '{key}': {err}");
            }
        }
    }

    /// Write record then timestamp, serialized with readers and sweepers of the same key.
    pub async fn write_entry(&self, entry: &EncodedEntry) -> Result<()> {
        let _guard = self.key_locks.lock(&entry.record_key).await;
        self.store.set_string(&entry.record_key, &entry.record).await?;
        self.store.set_string(&entry.stamp_key, &entry.stamp).await
    }

    pub async fn write_raw(&self, key: &str, value: &str) -> Result<()> {
        self.store.set_string(key, value).await
    }

    /// Delete keys, attempting every one of them. The first error is returned.
    pub async fn delete_keys(&self, keys: &[String]) -> Result<()> {
        let mut first_err = None;
        for key in keys {
            if let Err(err) = self.store.remove(key).await {
                warn!("Failed to remove '{key}': {err}");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Read a plain string record. Storage errors are logged and reported as absence.
    pub async fn read_string(&self, key: &str) -> Option<String> {
        match self.store.get_string(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!("Failed to read '{key}': {err}");
                None
            }
        }
    }

    /// Read-modify-write of a single key. Concurrent updates of the same key are applied one after another.
    pub async fn update_string<F>(&self, key: &str, update: F) -> Result<String>
    where
        F: FnOnce(Option<String>) -> String + Send,
    {
        let _guard = self.key_locks.lock(key).await;
        let next = update(self.store.get_string(key).await?);
        self.store.set_string(key, &next).await?;
        Ok(next)
    }

    pub async fn stamp_keys(&self) -> Result<Vec<String>> {
        self.store.keys_with_prefix(&self.stamp_prefix()).await
    }

    /// Record and timestamp keys of one entity kind.
    pub async fn keys_of_kind(&self, kind: &str) -> Result<Vec<String>> {
        let mut keys = self
            .store
            .keys_with_prefix(&format!("{}{kind}:", self.record_prefix()))
            .await?;
        keys.extend(
            self.store
                .keys_with_prefix(&format!("{}{kind}:", self.stamp_prefix()))
                .await?,
        );
        Ok(keys)
    }

    /// Check one timestamp key and remove its pair when expired or corrupt. Returns `true` if removed.
    pub async fn sweep_stamp(&self, stamp_key: &str, now: DateTime<Utc>, ttl: Duration) -> Result<bool> {
        let Some(record_key) = self.record_key_for_stamp(stamp_key)
        else {
            return Ok(false);
        };

        let _guard = self.key_locks.lock(&record_key).await;
        match self.store.get_string(stamp_key).await {
            // Removed by someone else since the key listing.
            Ok(None) => Ok(false),
            Ok(Some(raw)) => {
                let stale = Self::parse_stamp(&raw).map_or(true, |at| now.signed_duration_since(at) > ttl);
                if stale {
                    self.delete_keys(&[stamp_key.to_owned(), record_key.clone()])
                        .await
                        .map(|_| true)
                }
                else {
                    Ok(false)
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Remove every cache record, timestamp and index record of this namespace. Usage counters stay.
    pub async fn clear_cache_records(&self) -> Result<usize> {
        let mut keys = Vec::new();
        for prefix in [self.record_prefix(), self.stamp_prefix(), self.index_prefix()] {
            keys.extend(self.store.keys_with_prefix(&prefix).await?);
        }
        self.delete_keys(&keys).await?;
        Ok(keys.len())
    }
}
