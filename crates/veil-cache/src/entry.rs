//! Cache entries: a key bound to one chunk store plus an expiry

use crate::key::CacheKey;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use veil_store::ChunkStore;

static EMPTY: Lazy<Arc<CacheEntry>> = Lazy::new(|| {
    Arc::new(CacheEntry {
        key: CacheKey::new(b""),
        data: RwLock::new(None),
        created: Instant::now(),
        created_at: Utc::now(),
        expiry: Mutex::new(None),
        expired: AtomicBool::new(false),
    })
});

pub struct CacheEntry {
    key: CacheKey,
    data: RwLock<Option<Arc<ChunkStore>>>,
    created: Instant,
    created_at: DateTime<Utc>,
    /// `None` until a max age is set, or when the deadline overflows
    expiry: Mutex<Option<Instant>>,
    /// Latched once expiry has been observed
    expired: AtomicBool,
}

impl CacheEntry {
    /// Bind `store` to the key derived from `identifier`
    pub fn bind(identifier: impl Into<CacheKey>, store: ChunkStore) -> Arc<Self> {
        Arc::new(Self {
            key: identifier.into(),
            data: RwLock::new(Some(Arc::new(store))),
            created: Instant::now(),
            created_at: Utc::now(),
            expiry: Mutex::new(None),
            expired: AtomicBool::new(false),
        })
    }

    /// The shared "nothing here" entry returned for misses
    pub fn empty() -> Arc<Self> {
        Arc::clone(&EMPTY)
    }

    pub fn is_empty_sentinel(self: &Arc<Self>) -> bool {
        Arc::ptr_eq(self, &EMPTY)
    }

    pub fn key(&self) -> CacheKey {
        self.key
    }

    /// The bound chunk store, if any
    pub fn data(&self) -> Option<Arc<ChunkStore>> {
        self.data.read().clone()
    }

    pub fn exists_data(&self) -> bool {
        self.data.read().is_some()
    }

    /// Expire `max_age` after creation. May be called again to move the
    /// deadline, but an entry already seen as expired stays expired.
    pub fn set_max_age(&self, max_age: Duration) {
        if std::ptr::eq(self, &**EMPTY) {
            return;
        }
        *self.expiry.lock() = self.created.checked_add(max_age);
    }

    pub fn is_expired(&self) -> bool {
        if self.expired.load(Ordering::Acquire) {
            return true;
        }
        match *self.expiry.lock() {
            Some(deadline) if Instant::now() > deadline => {
                self.expired.store(true, Ordering::Release);
                true
            }
            _ => false,
        }
    }

    /// Time left before expiry; `None` when no deadline is set
    pub fn expires_in(&self) -> Option<Duration> {
        if self.is_expired() {
            return Some(Duration::ZERO);
        }
        let deadline = *self.expiry.lock();
        deadline.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Destroy the bound chunk store and let go of it
    pub fn clear(&self) {
        if let Some(store) = self.data.write().take() {
            store.destroy();
            tracing::trace!(key = %self.key, store = %store.id(), "cleared cache entry");
        }
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("exists_data", &self.exists_data())
            .field("created_at", &self.created_at)
            .field("expired", &self.expired.load(Ordering::Relaxed))
            .finish()
    }
}
