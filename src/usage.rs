use std::sync::Arc;
use tracing::debug;
use tracing::warn;

use crate::error::Result;
use crate::persistent::PersistentTier;

/// Per-user counters kept next to the cache records, e.g. OCR calls made today.
///
/// Counters are not cache entries: they never expire and `clear()` of the cache leaves them alone. Increments of the
/// same counter are serialized, so concurrent callers never lose one.
pub struct UsageCounters {
    persistent: Arc<PersistentTier>,
}

impl UsageCounters {
    pub fn new(persistent: Arc<PersistentTier>) -> Self {
        Self { persistent }
    }

    fn parse(user_id: &str, counter: &str, raw: Option<String>) -> u64 {
        match raw {
            None => 0,
            Some(raw) => raw.trim().parse().unwrap_or_else(|err| {
                warn!("[usage] Counter '{counter}' of '{user_id}' is corrupt, restarting from 0: {err}");
                0
            }),
        }
    }

    /// Add `by` to the counter and return the new value.
    pub async fn increment(&self, user_id: &str, counter: &str, by: u64) -> Result<u64> {
        let key = self.persistent.usage_key(user_id, counter);
        let updated = self
            .persistent
            .update_string(&key, |current| {
                Self::parse(user_id, counter, current).saturating_add(by).to_string()
            })
            .await?;
        debug!("[usage] {user_id}/{counter} = {updated}");
        Ok(updated.parse().unwrap_or(0))
    }

    pub async fn get(&self, user_id: &str, counter: &str) -> u64 {
        let key = self.persistent.usage_key(user_id, counter);
        Self::parse(user_id, counter, self.persistent.read_string(&key).await)
    }

    pub async fn reset(&self, user_id: &str, counter: &str) -> Result<()> {
        self.persistent
            .delete_keys(&[self.persistent.usage_key(user_id, counter)])
            .await
    }
}
