//! The set of all registries plus the resources they share
//!
//! One `CacheRegistries` owns the cipher pool and the maintenance worker.
//! Registries are created on first lookup and live until shutdown.

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::Result;
use crate::maintenance::{MaintenanceFailure, MaintenanceWorker};
use crate::namespace::Namespace;
use crate::registry::CacheRegistry;
use crate::strategy::StorageMode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use veil_crypto::CipherPool;
use veil_store::ChunkStore;

pub struct CacheRegistries {
    config: CacheConfig,
    pool: Arc<CipherPool>,
    registries: Mutex<HashMap<(Namespace, StorageMode), Arc<CacheRegistry>>>,
    worker: MaintenanceWorker,
}

impl CacheRegistries {
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let worker = MaintenanceWorker::spawn()?;
        tracing::info!(
            max_age_secs = config.default_max_age_secs,
            pool_capacity = config.cipher_pool_capacity,
            "cache registries ready"
        );
        Ok(Self {
            pool: Arc::new(CipherPool::new(config.cipher_pool_capacity)),
            config,
            registries: Mutex::new(HashMap::new()),
            worker,
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(CacheConfig::default())
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn cipher_pool(&self) -> &Arc<CipherPool> {
        &self.pool
    }

    /// The registry for `namespace` and `mode`, created on first use.
    /// Every caller asking for the same pair gets the same instance.
    pub fn registry(&self, namespace: impl Into<Namespace>, mode: StorageMode) -> Arc<CacheRegistry> {
        let namespace = namespace.into();
        let mut registries = self.registries.lock();
        let registry = registries
            .entry((namespace.clone(), mode))
            .or_insert_with(|| {
                CacheRegistry::new(namespace, mode, self.config.default_max_age(), self.worker.handle())
            });
        Arc::clone(registry)
    }

    /// An empty chunk store using a pooled cipher and the configured options
    pub fn new_store(&self) -> Result<ChunkStore> {
        Ok(ChunkStore::from_pool_with_options(
            &self.pool,
            self.config.store_options(),
        )?)
    }

    /// A fresh entry holding `bytes`, not yet added to any registry
    pub fn bind(&self, identifier: impl Into<crate::key::CacheKey>, bytes: &[u8]) -> Result<Arc<CacheEntry>> {
        let store = self.new_store()?;
        store.append(bytes)?;
        Ok(CacheEntry::bind(identifier, store))
    }

    /// Failures of background jobs from now on
    pub fn subscribe_failures(&self) -> broadcast::Receiver<MaintenanceFailure> {
        self.worker.subscribe()
    }

    /// Number of registries created so far
    pub fn len(&self) -> usize {
        self.registries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registries.lock().is_empty()
    }

    /// Stop the worker after its queue drains, then destroy every entry.
    /// Later `clear`/`recycle` tickets resolve to `ShutDown`. Idempotent.
    pub fn shutdown(&self) {
        self.worker.shutdown();

        let registries: Vec<Arc<CacheRegistry>> = self.registries.lock().values().cloned().collect();
        let destroyed: usize = registries.iter().map(|r| r.clear_now()).sum();
        let reclaimed = self.pool.reclaim_idle();
        if destroyed > 0 || reclaimed > 0 {
            tracing::info!(destroyed, reclaimed, "cache registries shut down");
        }
    }
}

impl Drop for CacheRegistries {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CacheRegistries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistries")
            .field("config", &self.config)
            .field("registries", &self.len())
            .field("pool", &self.pool)
            .finish()
    }
}
