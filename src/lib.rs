//! # study-cache
//!
//! Two-tier entity cache for offline-capable note and flashcard clients.
//!
//! The client keeps asking for the same remote-backed entities: notes, their pages, OCR and translation output,
//! pronunciations, dictionary entries. This crate keeps them close:
//!
//! - an in-process **memory tier** per entity type, bounded by a capacity ceiling with oldest-first eviction;
//! - a device-local **persistent tier** on top of any string key/value store, surviving restarts;
//! - a single **validity window** checked at read time in both tiers;
//! - **content-hash keys** for translations and pronunciations of arbitrarily long text;
//! - a **relationship index** of note → ordered pages;
//! - a **batch serializer** for bulk writes and a recurring **janitor** for expired records.
//!
//! # Read and write paths
//!
//! A read checks memory, then the persistent tier, re-populating memory on a persistent hit. A miss is returned as
//! `None`; the caller fetches from the remote service and writes the result through. A write updates memory before
//! returning, so the very next read sees it, and queues the persistent write for a background worker.
//!
//! Cache failures are invisible to the caller. Corrupt persisted records are deleted on read and reported as a miss;
//! failed persistent writes are logged and dropped, the memory tier being authoritative for the process lifetime.
//!
//! # Lifecycle
//!
//! ```ignore
//! let store = Arc::new(FileStore::open(cache_dir).await?);
//! let cache = StudyCache::open(store, CacheConfig::default())?;
//! cache.init()?;
//! // ...
//! cache.clear().await; // on sign-out
//! cache.shutdown().await;
//! ```

pub mod batch;
pub mod cache;
pub mod clock;
pub mod config;
pub mod entity_cache;
pub mod error;
pub mod index;
pub mod janitor;
pub mod key;
pub mod locks;
pub mod logging;
pub mod memory;
pub mod persistent;
pub mod store;
pub mod traits;
pub mod types;
pub mod usage;
pub mod write_queue;

#[doc(inline)]
pub use cache::StudyCache;
#[doc(inline)]
pub use config::CacheConfig;
#[doc(inline)]
pub use error::CacheError;

pub mod prelude {
    pub use crate::cache::StudyCache;
    pub use crate::clock::ManualClock;
    pub use crate::clock::SystemClock;
    pub use crate::config::CacheConfig;
    pub use crate::entity_cache::EntityCache;
    pub use crate::error::CacheError;
    pub use crate::janitor::JanitorReport;
    pub use crate::store::FileStore;
    pub use crate::store::MemoryStore;
    pub use crate::traits::CacheEntity;
    pub use crate::traits::CacheMaintenance;
    pub use crate::traits::Clock;
    pub use crate::traits::KeyValueStore;
    pub use crate::types::*;
}
