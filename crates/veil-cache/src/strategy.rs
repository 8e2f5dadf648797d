//! Storage strategies: what a registry does as entries come and go

use crate::entry::CacheEntry;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use veil_store::StoreError;

/// Where a registry keeps entry payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Sealed chunks stay resident
    Memory,
    /// Sealed chunks are spilled to a backing file on `add`
    Stored,
}

impl StorageMode {
    pub(crate) fn strategy(self) -> Box<dyn StorageStrategy> {
        match self {
            Self::Memory => Box::new(MemoryStrategy),
            Self::Stored => Box::new(StoredStrategy),
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Stored => f.write_str("stored"),
        }
    }
}

/// Hooks a registry runs around its map operations
pub(crate) trait StorageStrategy: Send + Sync {
    /// Runs before `entry` is inserted. An error leaves the map untouched.
    fn on_adding(&self, entry: &CacheEntry) -> Result<()>;

    /// Runs after `entry` left the map, before it is cleared
    fn on_removed(&self, _entry: &CacheEntry) {}

    /// Runs on every hit before the entry is handed out
    fn on_fetched(&self, entry: Arc<CacheEntry>) -> Arc<CacheEntry> {
        entry
    }
}

struct MemoryStrategy;

impl StorageStrategy for MemoryStrategy {
    fn on_adding(&self, _entry: &CacheEntry) -> Result<()> {
        Ok(())
    }
}

struct StoredStrategy;

impl StorageStrategy for StoredStrategy {
    fn on_adding(&self, entry: &CacheEntry) -> Result<()> {
        let Some(store) = entry.data() else {
            return Ok(());
        };
        if store.is_spilled() {
            return Ok(());
        }
        match store.store() {
            Ok(path) => {
                tracing::debug!(key = %entry.key(), path = %path.display(), "spilled entry on add");
                Ok(())
            }
            // Another `add` of the same entry got there first
            Err(StoreError::Spilled) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn on_removed(&self, entry: &CacheEntry) {
        if let Some(path) = entry.data().and_then(|store| store.backing_file()) {
            tracing::trace!(key = %entry.key(), path = %path.display(), "dropping spilled entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_crypto::CipherContext;
    use veil_store::{ChunkStore, StoreOptions};

    fn entry_in(dir: &tempfile::TempDir) -> Arc<CacheEntry> {
        let options = StoreOptions {
            arena_increment: 4,
            spill_dir: dir.path().to_path_buf(),
        };
        let store = ChunkStore::with_options(Arc::new(CipherContext::new().unwrap()), options);
        store.append(b"payload").unwrap();
        CacheEntry::bind("k", store)
    }

    #[test]
    fn test_memory_keeps_resident() {
        let dir = tempfile::TempDir::new().unwrap();
        let entry = entry_in(&dir);
        StorageMode::Memory.strategy().on_adding(&entry).unwrap();
        assert!(!entry.data().unwrap().is_spilled());
    }

    #[test]
    fn test_stored_spills_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let entry = entry_in(&dir);
        let strategy = StorageMode::Stored.strategy();

        strategy.on_adding(&entry).unwrap();
        let store = entry.data().unwrap();
        assert!(store.is_spilled());
        let path = store.backing_file().unwrap();

        // Re-adding an already spilled entry leaves the file alone
        strategy.on_adding(&entry).unwrap();
        assert_eq!(store.backing_file(), Some(path));
        assert_eq!(store.peek_stored(None).unwrap().as_slice(), b"payload");
    }

    #[test]
    fn test_fetch_is_pass_through() {
        let dir = tempfile::TempDir::new().unwrap();
        let entry = entry_in(&dir);
        for mode in [StorageMode::Memory, StorageMode::Stored] {
            let fetched = mode.strategy().on_fetched(Arc::clone(&entry));
            assert!(Arc::ptr_eq(&fetched, &entry));
        }
    }

    #[test]
    fn test_mode_serde_names() {
        assert_eq!(serde_json::to_string(&StorageMode::Stored).unwrap(), "\"stored\"");
        assert_eq!(StorageMode::Memory.to_string(), "memory");
    }
}
