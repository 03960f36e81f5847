mod common;

use std::sync::Arc;
use study_cache::prelude::*;

use common::note;
use common::page;
use common::Harness;

fn ids(pages: &[Page]) -> Vec<&str> {
    pages.iter().map(|p| p.id.as_str()).collect()
}

#[tokio::test]
async fn pages_come_back_in_insertion_order() {
    let h = Harness::new(CacheConfig::default());
    h.cache.cache_page("n1", page("p1", "n1", 1, "一")).await;
    h.cache.cache_page("n1", page("p2", "n1", 2, "二")).await;

    assert!(h.cache.has_all_pages_cached("n1").await);
    assert_eq!(ids(&h.cache.get_pages_for_note("n1").await), vec!["p1", "p2"]);

    h.cache.remove_page("p1").await;
    assert_eq!(ids(&h.cache.get_pages_for_note("n1").await), vec!["p2"]);
    assert!(h.cache.get_page("p1").await.is_none());
}

#[tokio::test]
async fn recaching_a_page_does_not_duplicate_it() {
    let h = Harness::new(CacheConfig::default());
    let p1 = page("p1", "n1", 1, "一");
    h.cache.cache_page("n1", p1.clone()).await;
    h.cache.cache_page("n1", p1.clone()).await;
    h.cache.cache_page("n1", page("p2", "n1", 2, "二")).await;
    h.cache.cache_page("n1", p1).await;

    assert_eq!(ids(&h.cache.get_pages_for_note("n1").await), vec!["p1", "p2"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cache_page_keeps_children_unique() {
    let h = Harness::new(CacheConfig::default());
    let mut tasks = tokio::task::JoinSet::new();
    for round in 0..16 {
        let cache = Arc::clone(&h.cache);
        tasks.spawn(async move {
            cache.cache_page("n1", page("p1", "n1", 1, "一")).await;
            cache.cache_page("n1", page(&format!("p{}", 2 + round % 2), "n1", 2, "二")).await;
        });
    }
    while let Some(done) = tasks.join_next().await {
        done.unwrap();
    }

    let lookup = h.cache.pages_for_note("n1").await;
    let mut listed = ids(&lookup.pages);
    listed.sort_unstable();
    assert_eq!(listed, vec!["p1", "p2", "p3"]);

    h.cache.flush().await;
    let raw = h.store.get_string("cache_idx:n1").await.unwrap().unwrap();
    let persisted: Vec<String> = serde_json::from_str(&raw).unwrap();
    assert_eq!(persisted.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_cache_and_remove_keep_page_and_listing_in_step() {
    let h = Harness::new(CacheConfig::default());
    for round in 0..50 {
        h.cache.cache_page("n1", page("p1", "n1", 1, "一")).await;

        let (adder, remover) = (Arc::clone(&h.cache), Arc::clone(&h.cache));
        let add = tokio::spawn(async move { adder.cache_page("n1", page("p1", "n1", 1, "一")).await });
        let remove = tokio::spawn(async move { remover.remove_page("p1").await });
        add.await.unwrap();
        remove.await.unwrap();

        let lookup = h.cache.pages_for_note("n1").await;
        let cached = h.cache.get_page("p1").await.is_some();
        assert!(lookup.missing.is_empty(), "round {round}: listed but not cached");
        assert_eq!(ids(&lookup.pages).contains(&"p1"), cached, "round {round}: cached but not listed");
    }
}

#[tokio::test]
async fn missing_children_are_a_partial_hit() {
    let h = Harness::new(CacheConfig::default());
    h.cache
        .cache_pages(
            "n1",
            vec![page("p1", "n1", 1, "一"), page("p2", "n1", 2, "二"), page("p3", "n1", 3, "三")],
        )
        .await;
    h.cache.flush().await;

    // p2 vanishes from both tiers behind the index's back.
    let h = h.restart().await;
    h.store.remove("cache:page:p2").await.unwrap();
    h.store.remove("cache_ts:page:p2").await.unwrap();

    assert!(h.cache.has_all_pages_cached("n1").await);
    let lookup = h.cache.pages_for_note("n1").await;
    assert_eq!(ids(&lookup.pages), vec!["p1", "p3"]);
    assert_eq!(lookup.missing, vec!["p2".to_string()]);
    assert!(!lookup.is_complete());

    // The caller re-fetches and writes the page back.
    h.cache.cache_page("n1", page("p2", "n1", 2, "二")).await;
    let lookup = h.cache.pages_for_note("n1").await;
    assert!(lookup.is_complete());
    assert_eq!(ids(&lookup.pages), vec!["p1", "p2", "p3"]);
}

#[tokio::test]
async fn evicted_pages_are_still_listed_and_found() {
    let h = Harness::new(CacheConfig::builder().max_pages(1).build().unwrap());
    h.cache.cache_page("n1", page("p1", "n1", 1, "一")).await;
    h.cache.cache_page("n1", page("p2", "n1", 2, "二")).await;
    assert!(!h.cache.pages().contains("p1"));

    h.cache.flush().await;
    assert_eq!(ids(&h.cache.get_pages_for_note("n1").await), vec!["p1", "p2"]);
}

#[tokio::test]
async fn remove_page_works_for_an_evicted_page() {
    let h = Harness::new(CacheConfig::default());
    h.cache.cache_page("n1", page("p1", "n1", 1, "一")).await;
    h.cache.cache_page("n1", page("p2", "n1", 2, "二")).await;
    h.cache.flush().await;

    // Gone from both tiers, only the index still knows its parent.
    h.cache.pages().remove("p1").await;
    assert!(h.cache.remove_page("p1").await.is_none());
    assert_eq!(ids(&h.cache.get_pages_for_note("n1").await), vec!["p2"]);
}

#[tokio::test]
async fn index_survives_a_restart() {
    let h = Harness::new(CacheConfig::default());
    h.cache
        .cache_pages("n1", vec![page("p1", "n1", 1, "一"), page("p2", "n1", 2, "二")])
        .await;
    let h = h.restart().await;

    assert!(h.cache.has_all_pages_cached("n1").await);
    assert_eq!(ids(&h.cache.get_pages_for_note("n1").await), vec!["p1", "p2"]);
}

#[tokio::test]
async fn bulk_caching_goes_through_batches() {
    let h = Harness::new(CacheConfig::builder().write_batch_size(4).build().unwrap());
    let pages = (0..23)
        .map(|i| page(&format!("p{i:02}"), "n1", i, &format!("text {i}")))
        .collect::<Vec<_>>();
    h.cache.cache_pages("n1", pages).await;

    // Memory is updated before the call returns.
    assert_eq!(h.cache.pages().len(), 23);

    h.cache.flush().await;
    let persisted = h.store.keys_with_prefix("cache:page:").await.unwrap();
    assert_eq!(persisted.len(), 23);
    let listed = ids(&h.cache.get_pages_for_note("n1").await)
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>();
    assert_eq!(listed, (0..23).map(|i| format!("p{i:02}")).collect::<Vec<_>>());
}

#[tokio::test]
async fn changed_page_text_invalidates_processed_text() {
    let h = Harness::new(CacheConfig::default());
    h.cache.cache_page("n1", page("p1", "n1", 1, "旧")).await;
    for mode in [TextProcessingMode::Segment, TextProcessingMode::Paragraph] {
        h.cache
            .cache_processed_text(
                "p1",
                ProcessedText {
                    mode,
                    original_text: "旧".to_string(),
                    ..Default::default()
                },
            )
            .await;
    }

    // Same text: processed output stays.
    h.cache.cache_page("n1", page("p1", "n1", 1, "旧")).await;
    assert!(h
        .cache
        .get_processed_text("p1", TextProcessingMode::Segment)
        .await
        .is_some());

    h.cache.cache_page("n1", page("p1", "n1", 1, "新")).await;
    assert!(h
        .cache
        .get_processed_text("p1", TextProcessingMode::Segment)
        .await
        .is_none());
    assert!(h
        .cache
        .get_processed_text("p1", TextProcessingMode::Paragraph)
        .await
        .is_none());
}

#[tokio::test]
async fn removing_a_note_takes_its_pages_along() {
    let h = Harness::new(CacheConfig::default());
    h.cache.cache_note(note("n1")).await;
    h.cache
        .cache_pages("n1", vec![page("p1", "n1", 1, "一"), page("p2", "n1", 2, "二")])
        .await;
    h.cache
        .cache_processed_text("p1", ProcessedText::default())
        .await;
    h.cache.cache_note(note("n2")).await;
    h.cache.cache_page("n2", page("p9", "n2", 1, "九")).await;

    assert!(h.cache.remove_note("n1").await.is_some());

    assert!(h.cache.get_note("n1").await.is_none());
    assert!(h.cache.get_page("p1").await.is_none());
    assert!(h.cache.get_page("p2").await.is_none());
    assert!(h
        .cache
        .get_processed_text("p1", TextProcessingMode::Segment)
        .await
        .is_none());
    assert!(!h.cache.has_all_pages_cached("n1").await);

    h.cache.flush().await;
    assert!(!h.store.contains_key("cache_idx:n1"));
    assert!(h.store.contains_key("cache_idx:n2"));
    assert_eq!(ids(&h.cache.get_pages_for_note("n2").await), vec!["p9"]);
}

#[tokio::test]
async fn moving_a_page_to_another_note() {
    let h = Harness::new(CacheConfig::default());
    h.cache.cache_page("n1", page("p1", "n1", 1, "一")).await;
    h.cache.cache_page("n2", page("p1", "n2", 1, "一")).await;

    assert!(h.cache.get_pages_for_note("n1").await.is_empty());
    assert_eq!(ids(&h.cache.get_pages_for_note("n2").await), vec!["p1"]);
}
