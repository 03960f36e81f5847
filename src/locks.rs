use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

type KeyMutex = Arc<tokio::sync::Mutex<()>>;

/// Async locks created on demand, one per key. A lock is dropped from the map once nobody holds or awaits it.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, KeyMutex>>,
}

/// Held lock of one key. Releasing happens on drop.
pub struct KeyGuard<'a> {
    owner: &'a KeyLocks,
    key:   String,
    lock:  KeyMutex,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let lock = Arc::clone(self.locks.lock().entry(key.to_owned()).or_default());
        let guard = Arc::clone(&lock).lock_owned().await;
        KeyGuard {
            owner: self,
            key: key.to_owned(),
            lock,
            guard: Some(guard),
        }
    }

    /// Lock several keys at once. Keys are taken in sorted order so two callers with overlapping sets can't deadlock.
    pub async fn lock_all<'k, I>(&self, keys: I) -> Vec<KeyGuard<'_>>
    where
        I: IntoIterator<Item = &'k str>,
    {
        let mut keys = keys.into_iter().collect::<Vec<_>>();
        keys.sort_unstable();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.lock(key).await);
        }
        guards
    }

    /// Number of keys currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.owner.locks.lock();
        // One reference is held by the map, the other one is ours.
        if Arc::strong_count(&self.lock) <= 2 {
            locks.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn released_locks_leave_the_map() {
        let locks = KeyLocks::new();
        {
            let _a = locks.lock("a").await;
            let _b = locks.lock("b").await;
            assert_eq!(locks.len(), 2);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn same_key_is_exclusive() {
        let locks = Arc::new(KeyLocks::new());
        let guard = locks.lock("a").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.lock("a").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn lock_all_dedups() {
        let locks = KeyLocks::new();
        let guards = locks.lock_all(["b", "a", "b"]).await;
        assert_eq!(guards.len(), 2);
        drop(guards);
        assert!(locks.is_empty());
    }
}
