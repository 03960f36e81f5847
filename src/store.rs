//! Implementations of the device-local string store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use tracing::debug;

use crate::error::Result;
use crate::traits::KeyValueStore;

/// Process-local store. Survives cache re-instantiation as long as the same instance is reused, which is all tests
/// and ephemeral sessions need.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_owned()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

const RECORD_EXT: &str = "rec";
const TEMP_EXT: &str = "tmp";

/// One file per key under a directory.
///
/// File names are the hex encoding of the key, so any key is representable and the key list can be recovered from a
/// directory listing. Values are written to a temporary file first and renamed into place, hence a crash never leaves
/// a half-written record behind.
#[derive(Debug)]
pub struct FileStore {
    root:       PathBuf,
    temp_nonce: AtomicU64,
}

impl FileStore {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Self::remove_stale_temps(&root).await?;
        debug!("File store opened at {}", root.display());
        Ok(Self {
            root,
            temp_nonce: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{RECORD_EXT}", hex::encode(key)))
    }

    fn key_of(path: &Path) -> Option<String> {
        if path.extension()?.to_str()? != RECORD_EXT {
            return None;
        }
        let bytes = hex::decode(path.file_stem()?.to_str()?).ok()?;
        String::from_utf8(bytes).ok()
    }

    // Leftovers of writes interrupted by a crash.
    async fn remove_stale_temps(root: &Path) -> Result<()> {
        let mut dir = tokio::fs::read_dir(root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(TEMP_EXT) {
                debug!("Removing stale temporary file {}", path.display());
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_of(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        let nonce = self.temp_nonce.fetch_add(1, Ordering::Relaxed);
        let temp = self
            .root
            .join(format!("{}-{nonce}.{TEMP_EXT}", hex::encode(key)));
        tokio::fs::write(&temp, value.as_bytes()).await?;
        if let Err(err) = tokio::fs::rename(&temp, self.path_of(key)).await {
            if let Err(cleanup) = tokio::fs::remove_file(&temp).await {
                debug!("Failed to remove temporary file {}: {cleanup}", temp.display());
            }
            return Err(err.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_of(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if let Some(key) = Self::key_of(&entry.path()) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
