use fieldx::fxstruct;
use garde::Validate;
use serde::Deserialize;
use serde::Serialize;

use crate::error::CacheError;
use crate::error::Result;

/// Tunables of the cache. Every field has a default, so a partial JSON document is a valid configuration.
///
/// ```ignore
/// let config = CacheConfig::builder().ttl_secs(3600).max_pages(1_000).build()?;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[fxstruct(no_new, default, builder, get(copy))]
#[serde(default)]
pub struct CacheConfig {
    /// Validity window of every entry, in seconds.
    #[fieldx(default(86_400))]
    #[garde(range(min = 1))]
    ttl_secs: u64,

    #[fieldx(default(100))]
    #[garde(range(min = 1))]
    max_notes: usize,

    #[fieldx(default(500))]
    #[garde(range(min = 1))]
    max_pages: usize,

    #[fieldx(default(200))]
    #[garde(range(min = 1))]
    max_processed_texts: usize,

    #[fieldx(default(1_000))]
    #[garde(range(min = 1))]
    max_translations: usize,

    #[fieldx(default(1_000))]
    #[garde(range(min = 1))]
    max_pronunciations: usize,

    #[fieldx(default(10_000))]
    #[garde(range(min = 1))]
    max_dictionary_entries: usize,

    /// Combined memory tier size above which the janitor shrinks every cache. The dictionary, whose preloaded
    /// entries exist in memory only, neither counts nor shrinks.
    #[fieldx(default(10_000))]
    #[garde(range(min = 1))]
    memory_ceiling: usize,

    /// Fraction of its normal capacity each cache keeps after an aggressive pass.
    #[fieldx(default(0.5))]
    #[garde(range(min = 0.0, max = 1.0))]
    aggressive_fraction: f64,

    #[fieldx(default(300))]
    #[garde(range(min = 1))]
    janitor_interval_secs: u64,

    /// Timestamp records checked by one janitor pass. The next pass continues where this one stopped.
    #[fieldx(default(50))]
    #[garde(range(min = 1))]
    janitor_batch_size: usize,

    /// Entities serialized by one worker of a bulk write.
    #[fieldx(default(10))]
    #[garde(range(min = 1))]
    write_batch_size: usize,

    /// Pending persistence operations per cache before writers have to wait.
    #[fieldx(default(256))]
    #[garde(range(min = 1))]
    write_queue_capacity: usize,

    /// Prefix of every persisted key.
    #[fieldx(get(copy(off)), builder(into), default(String::from("cache")))]
    #[garde(length(min = 1))]
    namespace: String,
}

impl CacheConfig {
    /// Validity window. Values beyond what a `chrono::Duration` can hold mean "never expires".
    pub fn ttl(&self) -> chrono::Duration {
        i64::try_from(self.ttl_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn janitor_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.janitor_interval_secs)
    }

    pub fn check(&self) -> Result<()> {
        self.validate().map_err(|err| CacheError::InvalidConfig(err.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }
}
