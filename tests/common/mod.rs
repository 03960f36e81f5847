#![allow(dead_code)]

use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;
use std::sync::Arc;
use study_cache::prelude::*;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 1, 9, 0, 0).unwrap()
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub cache: Arc<StudyCache>,
}

impl Harness {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(t0())), config)
    }

    pub fn with_store(store: Arc<MemoryStore>, clock: Arc<ManualClock>, config: CacheConfig) -> Self {
        let cache = StudyCache::open_with_clock(store.clone(), config, clock.clone()).unwrap();
        Self { store, clock, cache }
    }

    /// A fresh cache instance over the same store and clock, as after a process restart.
    pub async fn restart(self) -> Self {
        self.cache.shutdown().await;
        let config = self.cache.config().clone();
        Self::with_store(self.store, self.clock, config)
    }
}

pub fn note(id: &str) -> Note {
    Note {
        id: id.to_string(),
        owner_id: "u1".to_string(),
        title: format!("Note {id}"),
        ..Default::default()
    }
}

pub fn page(id: &str, note_id: &str, number: u32, text: &str) -> Page {
    Page {
        id: id.to_string(),
        note_id: note_id.to_string(),
        page_number: number,
        original_text: text.to_string(),
        ..Default::default()
    }
}
