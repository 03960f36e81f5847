use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::warn;

use crate::persistent::PersistentTier;
use crate::write_queue::WriteQueue;

#[derive(Default)]
struct IndexState {
    children: HashMap<String, Vec<String>>,
    parents:  HashMap<String, String>,
    // Parents whose persisted list has been merged into memory already.
    loaded:   HashSet<String>,
}

/// Parent key → ordered, duplicate-free list of child keys. Notes to their pages, in practice.
///
/// The index only records which children were cached under a parent; it does not promise those children are still
/// in either tier. A child missing from the caches is a partial hit that the caller resolves by re-fetching it.
///
/// Each parent's list is persisted as one JSON string-list record. Updates of the in-memory state and the queueing of
/// the matching persistent write happen under one lock, so persisted lists are written in the same order the
/// in-memory lists change.
pub struct RelationshipIndex {
    persistent: Arc<PersistentTier>,
    queue:      WriteQueue,
    state:      Mutex<IndexState>,
}

impl RelationshipIndex {
    pub fn new(persistent: Arc<PersistentTier>, queue_capacity: usize) -> Self {
        Self {
            queue: WriteQueue::new("index", Arc::clone(&persistent), queue_capacity),
            persistent,
            state: Mutex::new(IndexState::default()),
        }
    }

    async fn ensure_loaded(&self, state: &mut IndexState, parent: &str) {
        if state.loaded.contains(parent) {
            return;
        }

        let key = self.persistent.index_key(parent);
        let persisted = match self.persistent.read_string(&key).await {
            None => Vec::new(),
            Some(raw) => match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(children) => children,
                Err(err) => {
                    warn!("[index] Children list of '{parent}' does not decode, discarding: {err}");
                    if let Err(err) = self.persistent.delete_keys(&[key]).await {
                        warn!("[index] Failed to discard children list of '{parent}': {err}");
                    }
                    Vec::new()
                }
            },
        };

        let children = state.children.entry(parent.to_owned()).or_default();
        for child in persisted {
            if !children.contains(&child) {
                children.push(child.clone());
                state.parents.insert(child, parent.to_owned());
            }
        }
        state.loaded.insert(parent.to_owned());
    }

    async fn persist(&self, state: &IndexState, parent: &str) {
        let key = self.persistent.index_key(parent);
        match state.children.get(parent).filter(|c| !c.is_empty()) {
            Some(children) => match serde_json::to_string(children) {
                Ok(raw) => {
                    self.queue.write_raw(vec![(key, raw)]).await;
                }
                Err(err) => warn!("[index] Failed to encode children of '{parent}': {err}"),
            },
            None => {
                self.queue.delete(vec![key]).await;
            }
        }
    }

    /// Append `child` under `parent` unless already there. Returns `true` if it was added.
    pub async fn add_child(&self, parent: &str, child: &str) -> bool {
        self.add_children(parent, &[child.to_owned()]).await == 1
    }

    /// Append every child not yet listed, keeping the given order. Returns the number added.
    pub async fn add_children(&self, parent: &str, children: &[String]) -> usize {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.ensure_loaded(state, parent).await;

        let mut added = 0;
        for child in children {
            // A child moved to another parent leaves the old one first.
            if let Some(previous) = state.parents.get(child).cloned() {
                if previous != parent {
                    Self::unlink(state, &previous, child);
                    self.persist(state, &previous).await;
                }
            }
            let list = state.children.entry(parent.to_owned()).or_default();
            if !list.contains(child) {
                list.push(child.clone());
                state.parents.insert(child.clone(), parent.to_owned());
                added += 1;
            }
        }

        if added > 0 {
            debug!("[index] {added} child(ren) added under '{parent}'");
            self.persist(state, parent).await;
        }
        added
    }

    fn unlink(state: &mut IndexState, parent: &str, child: &str) -> bool {
        state.parents.remove(child);
        match state.children.get_mut(parent) {
            Some(list) => {
                let before = list.len();
                list.retain(|c| c != child);
                before != list.len()
            }
            None => false,
        }
    }

    /// Remove `child` from `parent`'s list. Returns `true` if it was listed.
    pub async fn remove_child(&self, parent: &str, child: &str) -> bool {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state, parent).await;
        let removed = Self::unlink(&mut state, parent, child);
        if removed {
            self.persist(&state, parent).await;
        }
        removed
    }

    /// Parent of a child, as far as the loaded part of the index knows.
    pub async fn parent_of(&self, child: &str) -> Option<String> {
        self.state.lock().await.parents.get(child).cloned()
    }

    pub async fn children(&self, parent: &str) -> Vec<String> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state, parent).await;
        state.children.get(parent).cloned().unwrap_or_default()
    }

    /// `true` if the parent has a non-empty child list. Says nothing about the children still being cached.
    pub async fn has_children(&self, parent: &str) -> bool {
        !self.children(parent).await.is_empty()
    }

    /// Forget a parent and all its children. Returns the children it had.
    pub async fn remove_parent(&self, parent: &str) -> Vec<String> {
        let mut state = self.state.lock().await;
        self.ensure_loaded(&mut state, parent).await;
        let children = state.children.remove(parent).unwrap_or_default();
        for child in &children {
            state.parents.remove(child);
        }
        self.persist(&state, parent).await;
        children
    }

    /// Drop the in-memory index. Persisted lists are removed by the caller together with the other records.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        // Writes still in the queue would otherwise resurrect lists after the caller wipes the store.
        self.queue.flush().await;
        *state = IndexState::default();
    }

    pub async fn flush(&self) {
        self.queue.flush().await;
    }

    pub(crate) async fn close(&self) {
        self.queue.close().await;
    }
}
