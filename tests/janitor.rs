mod common;

use chrono::Duration;
use study_cache::prelude::*;

use common::note;
use common::page;
use common::Harness;

#[tokio::test]
async fn passes_sweep_expired_pairs_a_batch_at_a_time() {
    let h = Harness::new(CacheConfig::builder().janitor_batch_size(3).build().unwrap());
    for i in 0..5 {
        h.cache.cache_note(note(&format!("old{i}"))).await;
    }
    h.clock.advance(Duration::hours(23));
    h.cache.cache_note(note("fresh")).await;
    h.cache.flush().await;

    h.clock.advance(Duration::hours(2));
    // Timestamp keys in order: fresh, old0 .. old4.
    let first = h.cache.run_janitor_pass().await.unwrap();
    assert_eq!(first.scanned, 3);
    assert_eq!(first.removed, 2);
    assert_eq!(first.memory_expired, 5);
    assert!(!first.aggressive);

    let second = h.cache.run_janitor_pass().await.unwrap();
    assert_eq!(second.scanned, 3);
    assert_eq!(second.removed, 3);
    assert_eq!(second.memory_expired, 0);

    assert_eq!(h.store.len(), 2);
    assert!(h.store.contains_key("cache:note:fresh"));
    assert_eq!(h.cache.notes().len(), 1);

    // Past the last key the walk starts over.
    let third = h.cache.run_janitor_pass().await.unwrap();
    assert_eq!(third.scanned, 1);
    assert_eq!(third.removed, 0);
}

#[tokio::test]
async fn corrupt_timestamps_are_swept() {
    let h = Harness::new(CacheConfig::default());
    h.store.set_string("cache:page:p1", "{}").await.unwrap();
    h.store.set_string("cache_ts:page:p1", "garbage").await.unwrap();

    let report = h.cache.run_janitor_pass().await.unwrap();
    assert_eq!(report.removed, 1);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn over_the_ceiling_every_cache_shrinks() {
    let config = CacheConfig::builder()
        .max_notes(10)
        .max_pages(10)
        .memory_ceiling(12)
        .aggressive_fraction(0.3)
        .build()
        .unwrap();
    let h = Harness::new(config);
    for i in 0..8 {
        h.cache.cache_note(note(&format!("n{i}"))).await;
        h.cache.cache_page("n0", page(&format!("p{i}"), "n0", i, "")).await;
        h.clock.advance(Duration::seconds(1));
    }
    assert_eq!(h.cache.stats().total_items, 16);

    let report = h.cache.run_janitor_pass().await.unwrap();
    assert!(report.aggressive);
    assert_eq!(h.cache.notes().len(), 3);
    assert_eq!(h.cache.pages().len(), 3);
    // The newest survive.
    for i in 5..8 {
        assert!(h.cache.notes().contains(&format!("n{i}")));
    }

    // Shrinking bounds memory; the persisted copies stay readable.
    h.cache.flush().await;
    assert!(h.cache.get_note("n0").await.is_some());
}

fn dictionary(count: usize) -> Vec<DictionaryEntry> {
    (0..count)
        .map(|i| DictionaryEntry {
            word: format!("w{i}"),
            meaning: format!("meaning {i}"),
            source: DictionarySource::Bundled,
            ..Default::default()
        })
        .collect()
}

#[tokio::test]
async fn full_dictionary_survives_a_pass_with_default_sizes() {
    let h = Harness::new(CacheConfig::default());
    let capacity = h.cache.config().max_dictionary_entries();
    assert_eq!(h.cache.preload_dictionary(dictionary(capacity)), capacity);
    h.cache.cache_note(note("n1")).await;

    let report = h.cache.run_janitor_pass().await.unwrap();
    assert!(!report.aggressive);
    assert_eq!(h.cache.dictionary().len(), capacity);
    assert!(h.cache.lookup_word("w0").await.is_some());
}

#[tokio::test]
async fn aggressive_pass_leaves_the_dictionary_alone() {
    let config = CacheConfig::builder()
        .max_notes(10)
        .memory_ceiling(5)
        .aggressive_fraction(0.2)
        .build()
        .unwrap();
    let h = Harness::new(config);
    h.cache.preload_dictionary(dictionary(100));
    for i in 0..8 {
        h.cache.cache_note(note(&format!("n{i}"))).await;
        h.clock.advance(Duration::seconds(1));
    }

    let report = h.cache.run_janitor_pass().await.unwrap();
    assert!(report.aggressive);
    assert_eq!(h.cache.notes().len(), 2);
    assert_eq!(h.cache.dictionary().len(), 100);
}

#[tokio::test]
async fn passes_never_overlap() {
    let h = Harness::new(CacheConfig::builder().janitor_batch_size(1).build().unwrap());
    for i in 0..4 {
        h.cache.cache_note(note(&format!("n{i}"))).await;
    }
    h.cache.flush().await;

    let (first, second) = tokio::join!(h.cache.run_janitor_pass(), h.cache.run_janitor_pass());
    assert!(first.is_some() != second.is_some());

    // Once the running pass is over the next one goes through.
    assert!(h.cache.run_janitor_pass().await.is_some());
}

#[tokio::test]
async fn janitor_is_restartable() {
    let h = Harness::new(CacheConfig::default());
    let janitor = h.cache.janitor();

    h.cache.init().unwrap();
    assert!(janitor.is_running());
    assert!(!janitor.start());

    janitor.stop().await;
    assert!(!janitor.is_running());

    assert!(janitor.start());
    assert!(janitor.is_running());

    h.cache.shutdown().await;
    assert!(!janitor.is_running());
    assert!(matches!(h.cache.init(), Err(CacheError::Closed(_))));
}

#[tokio::test]
async fn background_task_sweeps_on_its_own() {
    let h = Harness::new(CacheConfig::builder().janitor_interval_secs(1).build().unwrap());
    h.cache.cache_note(note("n1")).await;
    h.cache.flush().await;
    h.cache.init().unwrap();

    h.clock.advance(Duration::hours(25));

    let mut swept = false;
    for _ in 0..40 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if h.store.is_empty() && h.cache.notes().is_empty() {
            swept = true;
            break;
        }
    }
    assert!(swept, "the janitor did not run within 4 seconds");

    h.cache.shutdown().await;
}

#[tokio::test]
async fn clear_does_not_stop_the_janitor() {
    let h = Harness::new(CacheConfig::default());
    h.cache.init().unwrap();
    h.cache.cache_note(note("n1")).await;
    h.cache.clear().await;
    assert!(h.cache.janitor().is_running());
    h.cache.shutdown().await;
}
