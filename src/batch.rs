//! Bulk serialization.
//!
//! Caching all pages of a note means encoding many entities at once. Instead of doing that one by one on the caller's
//! task, the items are cut into fixed-size batches and every batch is encoded on its own blocking worker. Total
//! latency is bounded by the slowest batch rather than by the sum of all items.

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::debug;
use tracing::warn;

use crate::persistent::EncodedEntry;
use crate::persistent::PersistentTier;

/// Cut `items` into batches of at most `batch_size`. A key seen more than once keeps only its last value.
pub fn partition<V>(items: Vec<(String, V)>, batch_size: usize) -> Vec<Vec<(String, V)>> {
    let batch_size = batch_size.max(1);

    let mut last_seen = HashMap::with_capacity(items.len());
    for (idx, (key, _)) in items.iter().enumerate() {
        last_seen.insert(key.clone(), idx);
    }

    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut current = Vec::with_capacity(batch_size);
    for (idx, item) in items.into_iter().enumerate() {
        if last_seen.get(&item.0) != Some(&idx) {
            continue;
        }
        current.push(item);
        if current.len() == batch_size {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(batch_size)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Encode every batch on a separate worker. Batches come back in their original order; items that fail to encode are
/// logged and left out.
pub async fn encode_batches<V>(
    name: &'static str,
    persistent: &Arc<PersistentTier>,
    kind: &'static str,
    batches: Vec<Vec<(String, V)>>,
    at: DateTime<Utc>,
) -> Vec<Vec<EncodedEntry>>
where
    V: Serialize + Send + 'static,
{
    let batch_count = batches.len();
    let mut workers = JoinSet::new();

    for (batch_idx, batch) in batches.into_iter().enumerate() {
        let persistent = Arc::clone(persistent);
        workers.spawn_blocking(move || {
            let encoded = batch
                .iter()
                .filter_map(|(key, value)| match persistent.encode(kind, key, value, at) {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        warn!("[{name}] Failed to encode '{key}': {err}");
                        None
                    }
                })
                .collect::<Vec<_>>();
            (batch_idx, encoded)
        });
    }

    let mut encoded = Vec::with_capacity(batch_count);
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(done) => encoded.push(done),
            Err(err) => warn!("[{name}] Batch encoder failed: {err}"),
        }
    }
    encoded.sort_unstable_by_key(|(idx, _)| *idx);

    debug!("[{name}] Encoded {} batch(es)", encoded.len());
    encoded.into_iter().map(|(_, entries)| entries).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn items(n: usize) -> Vec<(String, usize)> {
        (0..n).map(|i| (format!("p{i}"), i)).collect()
    }

    #[test]
    fn partitions_into_fixed_size_batches() {
        let batches = partition(items(25), 10);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), vec![10, 10, 5]);
        assert_eq!(batches[2][4].0, "p24");
        assert!(partition(Vec::<(String, u8)>::new(), 10).is_empty());
    }

    #[test]
    fn duplicate_keys_keep_the_last_value() {
        let batches = partition(
            vec![("a".to_string(), 1), ("b".to_string(), 2), ("a".to_string(), 3)],
            10,
        );
        assert_eq!(batches, vec![vec![("b".to_string(), 2), ("a".to_string(), 3)]]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn encodes_every_batch_in_order() {
        let persistent = Arc::new(PersistentTier::new(Arc::new(MemoryStore::new()), "cache"));
        let at = Utc::now();
        let encoded = encode_batches("test", &persistent, "page", partition(items(23), 10), at).await;

        assert_eq!(encoded.len(), 3);
        let keys = encoded
            .iter()
            .flatten()
            .map(|e| e.record_key.clone())
            .collect::<Vec<_>>();
        assert_eq!(keys.len(), 23);
        assert_eq!(keys[0], "cache:page:p0");
        assert_eq!(keys[22], "cache:page:p22");
        assert!(encoded.iter().flatten().all(|e| e.stamp == PersistentTier::format_stamp(at)));
    }
}
