use fieldx::fxstruct;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use strum::IntoEnumIterator;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use crate::clock::system_clock;
use crate::config::CacheConfig;
use crate::entity_cache::EntityCache;
use crate::error::CacheError;
use crate::error::Result;
use crate::index::RelationshipIndex;
use crate::janitor::Janitor;
use crate::janitor::JanitorReport;
use crate::key;
use crate::locks::KeyLocks;
use crate::persistent::PersistentTier;
use crate::traits::CacheEntity;
use crate::traits::CacheMaintenance;
use crate::traits::Clock;
use crate::traits::KeyValueStore;
use crate::types::*;
use crate::usage::UsageCounters;

/// The process-wide cache. Construct it once at startup and hand it to the services that need it.
///
/// ```ignore
/// let cache = StudyCache::open(Arc::new(FileStore::open(dir).await?), CacheConfig::default())?;
/// cache.init()?;
///
/// let page = match cache.get_page(&page_id).await {
///     Some(page) => page,
///     None => {
///         let page = documents.fetch_page(&page_id).await?;
///         cache.cache_page(&page.note_id, page.clone()).await;
///         page
///     }
/// };
///
/// cache.shutdown().await;
/// ```
///
/// Nothing here ever talks to the network. A miss is reported as `None` and the caller fetches from the remote
/// service, then writes the result through with the matching `cache_*` method.
///
/// Every typed cache is also reachable directly (`notes()`, `pages()`, ...) for generic get/set/remove use.
#[fxstruct(sync, no_new, default(off), builder)]
pub struct StudyCache {
    #[fieldx(get(clone), builder(required))]
    store: Arc<dyn KeyValueStore>,

    #[fieldx(get, default(CacheConfig::default()))]
    config: CacheConfig,

    #[fieldx(get(clone), default(system_clock()))]
    clock: Arc<dyn Clock>,

    #[fieldx(get(off), builder(off), default(AtomicBool::new(false)))]
    closed: AtomicBool,

    // Serializes a page's entry with its index listing.
    #[fieldx(get(off), builder(off), default(KeyLocks::new()))]
    page_locks: KeyLocks,

    #[fieldx(lazy, get(clone), builder(off))]
    persistent: Arc<PersistentTier>,

    #[fieldx(lazy, get(clone), builder(off))]
    notes: Arc<EntityCache<Note>>,

    #[fieldx(lazy, get(clone), builder(off))]
    pages: Arc<EntityCache<Page>>,

    #[fieldx(lazy, get(clone), builder(off))]
    processed_texts: Arc<EntityCache<ProcessedText>>,

    #[fieldx(lazy, get(clone), builder(off))]
    translations: Arc<EntityCache<Translation>>,

    #[fieldx(lazy, get(clone), builder(off))]
    pronunciations: Arc<EntityCache<Pronunciation>>,

    #[fieldx(lazy, get(clone), builder(off))]
    dictionary: Arc<EntityCache<DictionaryEntry>>,

    #[fieldx(lazy, get(clone), builder(off))]
    index: Arc<RelationshipIndex>,

    #[fieldx(lazy, get(clone), builder(off))]
    janitor: Arc<Janitor>,

    #[fieldx(lazy, get(clone), builder(off))]
    usage_counters: Arc<UsageCounters>,
}

impl StudyCache {
    pub fn open(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Result<Arc<Self>> {
        Self::open_with_clock(store, config, system_clock())
    }

    /// Same as [`open`](Self::open) with an explicit time source.
    pub fn open_with_clock(store: Arc<dyn KeyValueStore>, config: CacheConfig, clock: Arc<dyn Clock>) -> Result<Arc<Self>> {
        config.check()?;
        let cache = Self::builder()
            .store(store)
            .config(config)
            .clock(clock)
            .build()
            .map_err(|err| CacheError::Build(err.to_string()))?;
        Ok(Arc::new(cache))
    }

    fn build_persistent(&self) -> Arc<PersistentTier> {
        Arc::new(PersistentTier::new(self.store(), self.config().namespace().clone()))
    }

    fn entity_cache<E: CacheEntity>(&self, name: &'static str, capacity: usize) -> EntityCache<E> {
        let config = self.config();
        EntityCache::new(
            name,
            capacity,
            config.ttl(),
            config.write_batch_size(),
            config.write_queue_capacity(),
            self.clock(),
            self.persistent(),
        )
    }

    fn build_notes(&self) -> Arc<EntityCache<Note>> {
        Arc::new(self.entity_cache("notes", self.config().max_notes()))
    }

    fn build_pages(&self) -> Arc<EntityCache<Page>> {
        Arc::new(self.entity_cache("pages", self.config().max_pages()))
    }

    fn build_processed_texts(&self) -> Arc<EntityCache<ProcessedText>> {
        Arc::new(self.entity_cache("processed_texts", self.config().max_processed_texts()))
    }

    fn build_translations(&self) -> Arc<EntityCache<Translation>> {
        Arc::new(self.entity_cache("translations", self.config().max_translations()))
    }

    fn build_pronunciations(&self) -> Arc<EntityCache<Pronunciation>> {
        Arc::new(self.entity_cache("pronunciations", self.config().max_pronunciations()))
    }

    fn build_dictionary(&self) -> Arc<EntityCache<DictionaryEntry>> {
        // Preloaded entries live in memory only, the janitor must not shrink them away.
        Arc::new(
            self.entity_cache("dictionary", self.config().max_dictionary_entries())
                .pinned(),
        )
    }

    fn build_index(&self) -> Arc<RelationshipIndex> {
        Arc::new(RelationshipIndex::new(
            self.persistent(),
            self.config().write_queue_capacity(),
        ))
    }

    fn build_janitor(&self) -> Arc<Janitor> {
        Arc::new(Janitor::new(
            self.persistent(),
            self.maintained(),
            self.clock(),
            self.config(),
        ))
    }

    fn build_usage_counters(&self) -> Arc<UsageCounters> {
        Arc::new(UsageCounters::new(self.persistent()))
    }

    fn maintained(&self) -> Vec<Arc<dyn CacheMaintenance>> {
        vec![
            self.notes() as Arc<dyn CacheMaintenance>,
            self.pages() as Arc<dyn CacheMaintenance>,
            self.processed_texts() as Arc<dyn CacheMaintenance>,
            self.translations() as Arc<dyn CacheMaintenance>,
            self.pronunciations() as Arc<dyn CacheMaintenance>,
            self.dictionary() as Arc<dyn CacheMaintenance>,
        ]
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Start background maintenance. Calling it again while the janitor runs is a no-op.
    pub fn init(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CacheError::Closed("cache"));
        }
        if self.janitor().start() {
            info!(
                "[cache] Initialized, janitor every {:?}, TTL {}s",
                self.config().janitor_interval(),
                self.config().ttl_secs()
            );
        }
        Ok(())
    }

    /// Stop the janitor and drain every write queue. Queued writes complete; nothing is accepted afterwards.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.janitor().stop().await;
        self.notes().close().await;
        self.pages().close().await;
        self.processed_texts().close().await;
        self.translations().close().await;
        self.pronunciations().close().await;
        self.dictionary().close().await;
        self.index().close().await;
        info!("[cache] Shut down");
    }

    /// Wait until every persistent write queued so far has been applied.
    pub async fn flush(&self) {
        for cache in self.maintained() {
            cache.flush().await;
        }
        self.index().flush().await;
    }

    /// Drop every cache entry of every type from both tiers, and the relationship index. Usage counters stay. The
    /// janitor keeps running.
    #[instrument(level = "trace", skip(self))]
    pub async fn clear(&self) {
        self.notes().clear().await;
        self.pages().clear().await;
        self.processed_texts().clear().await;
        self.translations().clear().await;
        self.pronunciations().clear().await;
        self.dictionary().clear().await;
        self.index().clear().await;
        // Catches index lists and records of kinds this version does not know about.
        match self.persistent().clear_cache_records().await {
            Ok(removed) => info!("[cache] Cleared, {removed} leftover persisted record(s) removed"),
            Err(err) => warn!("[cache] Failed to clear persisted records: {err}"),
        }
    }

    // --- Notes

    pub async fn get_note(&self, note_id: &str) -> Option<Note> {
        self.notes().get(&key::entity_key(note_id)).await
    }

    pub async fn cache_note(&self, note: Note) {
        self.notes().set(key::entity_key(&note.id), note).await;
    }

    /// Remove a note together with its pages, their processed texts and its index entry.
    pub async fn remove_note(&self, note_id: &str) -> Option<Note> {
        let pages = self.remove_all_pages_for_note(note_id).await;
        debug!("[cache] Note '{note_id}' removed with {pages} page(s)");
        self.notes().remove(&key::entity_key(note_id)).await
    }

    // --- Pages

    pub async fn get_page(&self, page_id: &str) -> Option<Page> {
        self.pages().get(&key::entity_key(page_id)).await
    }

    /// Cache a page and list it under its note. A changed original text invalidates the page's processed texts.
    pub async fn cache_page(&self, note_id: &str, page: Page) {
        let page_key = key::entity_key(&page.id);
        let _page_lock = self.page_locks.lock(&page_key).await;
        if let Some(previous) = self.pages().get(&page_key).await {
            if previous.original_text != page.original_text {
                self.invalidate_processed_text(&page.id).await;
            }
        }
        self.pages().set(page_key.clone(), page).await;
        self.index().add_child(note_id, &page_key).await;
    }

    /// Cache all pages of a note at once. The index keeps the given order.
    #[instrument(level = "trace", skip(self, pages), fields(count = pages.len()))]
    pub async fn cache_pages(&self, note_id: &str, pages: Vec<Page>) {
        if pages.is_empty() {
            return;
        }

        let keys = pages.iter().map(|p| key::entity_key(&p.id)).collect::<Vec<_>>();
        let _page_locks = self.page_locks.lock_all(keys.iter().map(String::as_str)).await;

        let mut items = Vec::with_capacity(pages.len());
        for (page_key, page) in keys.iter().cloned().zip(pages) {
            if let Some(previous) = self.pages().get(&page_key).await {
                if previous.original_text != page.original_text {
                    self.invalidate_processed_text(&page.id).await;
                }
            }
            items.push((page_key, page));
        }

        self.pages().set_many(items).await;
        self.index().add_children(note_id, &keys).await;
    }

    /// Remove a page from both tiers, from its note's list and drop its processed texts.
    pub async fn remove_page(&self, page_id: &str) -> Option<Page> {
        let page_key = key::entity_key(page_id);
        let _page_lock = self.page_locks.lock(&page_key).await;
        let cached = self.pages().get(&page_key).await;

        let parent = match cached.as_ref().map(|p| p.note_id.clone()).filter(|id| !id.is_empty()) {
            Some(note_id) => Some(note_id),
            None => self.index().parent_of(&page_key).await,
        };

        self.pages().remove(&page_key).await;
        if let Some(note_id) = parent {
            self.index().remove_child(&note_id, &page_key).await;
        }
        self.invalidate_processed_text(page_id).await;
        cached
    }

    /// Pages the index lists under a note, in index order, plus the ids neither tier holds anymore.
    pub async fn pages_for_note(&self, note_id: &str) -> PageLookup {
        let mut lookup = PageLookup::default();
        for page_key in self.index().children(note_id).await {
            match self.pages().get(&page_key).await {
                Some(page) => lookup.pages.push(page),
                None => lookup.missing.push(page_key),
            }
        }
        if !lookup.missing.is_empty() {
            debug!(
                "[cache] Partial hit for note '{note_id}': {} of {} page(s) missing",
                lookup.missing.len(),
                lookup.missing.len() + lookup.pages.len()
            );
        }
        lookup
    }

    /// Cached pages of a note in index order. Pages missing from both tiers are skipped.
    pub async fn get_pages_for_note(&self, note_id: &str) -> Vec<Page> {
        self.pages_for_note(note_id).await.pages
    }

    /// `true` if the index lists at least one page for the note. Individual pages may still miss.
    pub async fn has_all_pages_cached(&self, note_id: &str) -> bool {
        self.index().has_children(note_id).await
    }

    /// Remove every page of a note and the note's index entry. Returns the number of pages the index listed.
    pub async fn remove_all_pages_for_note(&self, note_id: &str) -> usize {
        let listed = self.index().children(note_id).await;
        let _page_locks = self.page_locks.lock_all(listed.iter().map(String::as_str)).await;
        let page_keys = self.index().remove_parent(note_id).await;
        self.pages().remove_many(&page_keys).await;

        let processed = page_keys
            .iter()
            .flat_map(|page_id| TextProcessingMode::iter().map(move |mode| key::processed_text_key(page_id, mode)))
            .collect::<Vec<_>>();
        self.processed_texts().remove_many(&processed).await;

        page_keys.len()
    }

    // --- Processed texts

    pub async fn get_processed_text(&self, page_id: &str, mode: TextProcessingMode) -> Option<ProcessedText> {
        self.processed_texts()
            .get(&key::processed_text_key(page_id, mode))
            .await
    }

    pub async fn cache_processed_text(&self, page_id: &str, processed: ProcessedText) {
        self.processed_texts()
            .set(key::processed_text_key(page_id, processed.mode), processed)
            .await;
    }

    /// Drop the processed texts of a page in every mode.
    pub async fn invalidate_processed_text(&self, page_id: &str) {
        let keys = TextProcessingMode::iter()
            .map(|mode| key::processed_text_key(page_id, mode))
            .collect::<Vec<_>>();
        self.processed_texts().remove_many(&keys).await;
    }

    // --- Translations and pronunciations

    pub async fn get_translation(&self, text: &str, target_language: &str) -> Option<String> {
        self.translations()
            .get(&key::content_key(text, target_language))
            .await
            .map(|t| t.translated_text)
    }

    pub async fn cache_translation(&self, text: &str, target_language: &str, translated: impl Into<String>) {
        let translation = Translation {
            target_language: target_language.to_owned(),
            translated_text: translated.into(),
        };
        self.translations()
            .set(key::content_key(text, target_language), translation)
            .await;
    }

    pub async fn get_pronunciation(&self, text: &str, language: &str) -> Option<String> {
        self.pronunciations()
            .get(&key::content_key(text, language))
            .await
            .map(|p| p.pronunciation)
    }

    pub async fn cache_pronunciation(&self, text: &str, language: &str, pronunciation: impl Into<String>) {
        let pronunciation = Pronunciation {
            language:      language.to_owned(),
            pronunciation: pronunciation.into(),
        };
        self.pronunciations()
            .set(key::content_key(text, language), pronunciation)
            .await;
    }

    // --- Dictionary

    /// Load bundled entries into memory. They are not persisted: the bundled source is always at hand.
    pub fn preload_dictionary(&self, entries: Vec<DictionaryEntry>) -> usize {
        self.dictionary()
            .preload(entries.into_iter().map(|e| (e.word.clone(), e)).collect())
    }

    pub async fn lookup_word(&self, word: &str) -> Option<DictionaryEntry> {
        self.dictionary().get(word).await
    }

    /// Add the result of a fallback lookup. Unlike preloaded entries it goes through both tiers.
    pub async fn merge_dictionary_entry(&self, entry: DictionaryEntry) {
        self.dictionary().set(entry.word.clone(), entry).await;
    }

    // --- Usage counters

    /// Add `by` to a per-user counter and return the new value.
    pub async fn increment_usage(&self, user_id: &str, counter: &str, by: u64) -> Result<u64> {
        self.usage_counters().increment(user_id, counter, by).await
    }

    pub async fn usage(&self, user_id: &str, counter: &str) -> u64 {
        self.usage_counters().get(user_id, counter).await
    }

    // --- Diagnostics

    pub fn stats(&self) -> CacheReport {
        let caches = vec![
            self.notes().stats(),
            self.pages().stats(),
            self.processed_texts().stats(),
            self.translations().stats(),
            self.pronunciations().stats(),
            self.dictionary().stats(),
        ];
        let total_items = caches.iter().map(|s| s.item_count).sum();
        CacheReport { caches, total_items }
    }

    /// Run one janitor pass right away. `None` if a pass is already in progress.
    pub async fn run_janitor_pass(&self) -> Option<JanitorReport> {
        self.janitor().run_pass().await
    }
}
