//! Cache registry: one namespaced, expiring map of entries
//!
//! The map is a `DashMap`, so operations on unrelated keys do not block
//! each other. Expired entries are hidden by `get` immediately and
//! destroyed later by a sweep on the maintenance worker.

use crate::entry::CacheEntry;
use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use crate::maintenance::{MaintenanceHandle, MaintenanceTask, MaintenanceTicket};
use crate::namespace::Namespace;
use crate::strategy::{StorageMode, StorageStrategy};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

pub struct CacheRegistry {
    namespace: Namespace,
    mode: StorageMode,
    strategy: Box<dyn StorageStrategy>,
    entries: DashMap<CacheKey, Arc<CacheEntry>>,
    max_age: RwLock<Duration>,
    recycle_pending: AtomicBool,
    maintenance: MaintenanceHandle,
    this: Weak<CacheRegistry>,
}

impl CacheRegistry {
    pub(crate) fn new(
        namespace: Namespace,
        mode: StorageMode,
        max_age: Duration,
        maintenance: MaintenanceHandle,
    ) -> Arc<Self> {
        Self::with_strategy(namespace, mode, mode.strategy(), max_age, maintenance)
    }

    pub(crate) fn with_strategy(
        namespace: Namespace,
        mode: StorageMode,
        strategy: Box<dyn StorageStrategy>,
        max_age: Duration,
        maintenance: MaintenanceHandle,
    ) -> Arc<Self> {
        tracing::debug!(%namespace, %mode, "created cache registry");
        Arc::new_cyclic(|this| Self {
            namespace,
            mode,
            strategy,
            entries: DashMap::new(),
            max_age: RwLock::new(max_age),
            recycle_pending: AtomicBool::new(false),
            maintenance,
            this: this.clone(),
        })
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Max age given to entries by later `add` calls
    pub fn max_age(&self) -> Duration {
        *self.max_age.read()
    }

    /// Change the max age for later `add` calls. Entries already added keep
    /// their deadline.
    pub fn set_max_age(&self, max_age: Duration) {
        *self.max_age.write() = max_age;
    }

    /// Number of mapped entries, expired ones included until swept
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn exists(&self, id: impl Into<CacheKey>) -> bool {
        self.get(id).exists_data()
    }

    /// The live entry for `id`, or the empty sentinel.
    ///
    /// Finding an expired entry schedules a sweep.
    pub fn get(&self, id: impl Into<CacheKey>) -> Arc<CacheEntry> {
        let key = id.into();
        let Some(entry) = self.entries.get(&key).map(|e| Arc::clone(e.value())) else {
            return CacheEntry::empty();
        };

        if entry.is_expired() {
            tracing::trace!(namespace = %self.namespace, %key, "expired entry hit");
            self.schedule_recycle();
            return CacheEntry::empty();
        }

        self.strategy.on_fetched(entry)
    }

    /// Insert `entry` with this registry's max age.
    ///
    /// A different entry already under the same key is destroyed. In stored
    /// mode the payload is spilled before the map is touched, so a failed
    /// spill returns the error and leaves any previous entry in place.
    pub fn add(&self, entry: Arc<CacheEntry>) -> Result<()> {
        if !entry.exists_data() {
            return Err(CacheError::EmptyEntry);
        }

        if let Err(e) = self.strategy.on_adding(&entry) {
            tracing::warn!(namespace = %self.namespace, key = %entry.key(), error = %e, "add hook failed");
            return Err(e);
        }

        entry.set_max_age(self.max_age());
        let key = entry.key();

        if let Some(old) = self.entries.insert(key, Arc::clone(&entry)) {
            if !Arc::ptr_eq(&old, &entry) {
                tracing::debug!(namespace = %self.namespace, %key, "replacing cache entry");
                self.destroy(&old);
            }
        }
        Ok(())
    }

    /// Remove and destroy the entry for `id`. Returns whether one existed.
    pub fn remove(&self, id: impl Into<CacheKey>) -> bool {
        match self.entries.remove(&id.into()) {
            Some((_, entry)) => {
                self.destroy(&entry);
                true
            }
            None => false,
        }
    }

    /// Remove `entry` only if it is still the one mapped under its key
    pub fn remove_entry(&self, entry: &Arc<CacheEntry>) -> bool {
        match self
            .entries
            .remove_if(&entry.key(), |_, current| Arc::ptr_eq(current, entry))
        {
            Some((_, removed)) => {
                self.destroy(&removed);
                true
            }
            None => false,
        }
    }

    /// Empty the registry in the background.
    ///
    /// From async code, `.await` the ticket instead of calling
    /// [`MaintenanceTicket::wait`], which panics on a runtime thread.
    pub fn clear(&self) -> MaintenanceTicket {
        self.submit(MaintenanceTask::Clear)
    }

    /// Sweep expired entries in the background. The same `wait`/`.await`
    /// rule as [`clear`](Self::clear) applies to the ticket.
    pub fn recycle(&self) -> MaintenanceTicket {
        self.submit(MaintenanceTask::Recycle)
    }

    fn submit(&self, task: MaintenanceTask) -> MaintenanceTicket {
        match self.this.upgrade() {
            Some(this) => self.maintenance.submit(this, task),
            // Only reachable while the registry itself is being dropped
            None => MaintenanceTicket::rejected(),
        }
    }

    /// Queue at most one sweep at a time from `get`
    fn schedule_recycle(&self) {
        if self.recycle_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let queued = self
            .this
            .upgrade()
            .map(|this| self.maintenance.submit_detached(this, MaintenanceTask::Recycle))
            .unwrap_or(false);
        if !queued {
            self.recycle_pending.store(false, Ordering::Release);
            tracing::debug!(namespace = %self.namespace, "maintenance worker gone, sweep skipped");
        }
    }

    fn destroy(&self, entry: &CacheEntry) {
        self.strategy.on_removed(entry);
        entry.clear();
    }

    /// Remove and destroy every entry. Runs on the maintenance worker and
    /// during shutdown.
    pub(crate) fn clear_now(&self) -> usize {
        let keys: Vec<CacheKey> = self.entries.iter().map(|e| *e.key()).collect();
        let mut destroyed = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                self.destroy(&entry);
                destroyed += 1;
            }
        }
        destroyed
    }

    /// Remove and destroy expired entries.
    ///
    /// The expiry check is repeated under the shard lock at removal time,
    /// so an entry refreshed after the scan stays mapped.
    pub(crate) fn sweep_expired(&self) -> usize {
        self.recycle_pending.store(false, Ordering::Release);

        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|e| e.value().is_expired())
            .map(|e| *e.key())
            .collect();

        let mut destroyed = 0;
        for key in expired {
            if let Some((_, entry)) = self.entries.remove_if(&key, |_, current| current.is_expired()) {
                self.destroy(&entry);
                destroyed += 1;
            }
        }
        destroyed
    }
}

impl std::fmt::Debug for CacheRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegistry")
            .field("namespace", &self.namespace)
            .field("mode", &self.mode)
            .field("entries", &self.entries.len())
            .field("max_age", &self.max_age())
            .finish()
    }
}
