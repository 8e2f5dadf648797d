//! Bounded pool of cipher contexts
//!
//! Chunk stores check a context out once and hold it for their whole life.
//! The pool keeps one strong reference per slot, so a context whose strong
//! count is 1 has no other holder and is idle. Idle contexts are handed out
//! before live ones are shared, and `reclaim_idle` drops them so their keys
//! are wiped at a point the caller chooses.

use crate::cipher::{CipherContext, Result};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;

pub struct CipherPool {
    capacity: usize,
    slots: Mutex<Vec<Arc<CipherContext>>>,
}

impl CipherPool {
    pub const DEFAULT_CAPACITY: usize = 8;

    /// Create an empty pool. A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            slots: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Hand out a context.
    ///
    /// Under capacity a new context is created. At capacity an idle context
    /// is reused if there is one, otherwise a random live context is shared.
    pub fn checkout(&self) -> Result<Arc<CipherContext>> {
        let mut slots = self.slots.lock();

        if slots.len() < self.capacity {
            let ctx = Arc::new(CipherContext::new()?);
            tracing::trace!(context = ctx.id(), slot = slots.len(), "created cipher context");
            slots.push(Arc::clone(&ctx));
            return Ok(ctx);
        }

        if let Some(idle) = slots.iter().find(|ctx| Arc::strong_count(ctx) == 1) {
            tracing::trace!(context = idle.id(), "reusing idle cipher context");
            return Ok(Arc::clone(idle));
        }

        let pick = rand::thread_rng().gen_range(0..slots.len());
        tracing::trace!(context = slots[pick].id(), "sharing live cipher context");
        Ok(Arc::clone(&slots[pick]))
    }

    /// Drop every context nobody else holds. Returns how many were dropped.
    pub fn reclaim_idle(&self) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|ctx| Arc::strong_count(ctx) > 1);
        let reclaimed = before - slots.len();
        if reclaimed > 0 {
            tracing::debug!(reclaimed, remaining = slots.len(), "reclaimed idle cipher contexts");
        }
        reclaimed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of contexts currently pooled
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of pooled contexts with no holder outside the pool
    pub fn idle(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|ctx| Arc::strong_count(ctx) == 1)
            .count()
    }
}

impl Default for CipherPool {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for CipherPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherPool")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_creates_up_to_capacity() {
        let pool = CipherPool::new(3);
        let held: Vec<_> = (0..3).map(|_| pool.checkout().unwrap()).collect();
        let ids: HashSet<u64> = held.iter().map(|c| c.id()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_never_exceeds_capacity() {
        let pool = CipherPool::new(2);
        let held: Vec<_> = (0..10).map(|_| pool.checkout().unwrap()).collect();
        let ids: HashSet<u64> = held.iter().map(|c| c.id()).collect();
        assert!(ids.len() <= 2);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_idle_context_preferred_over_sharing() {
        let pool = CipherPool::new(2);
        let a = pool.checkout().unwrap();
        let b = pool.checkout().unwrap();
        let released = b.id();
        drop(b);

        assert_eq!(pool.idle(), 1);
        let c = pool.checkout().unwrap();
        assert_eq!(c.id(), released);
        assert_ne!(c.id(), a.id());
    }

    #[test]
    fn test_reclaim_idle_frees_slots() {
        let pool = CipherPool::new(2);
        let keep = pool.checkout().unwrap();
        drop(pool.checkout().unwrap());

        assert_eq!(pool.reclaim_idle(), 1);
        assert_eq!(pool.len(), 1);

        // The freed slot gets a brand new context
        let fresh = pool.checkout().unwrap();
        assert_ne!(fresh.id(), keep.id());
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let pool = CipherPool::new(0);
        assert_eq!(pool.capacity(), 1);
        assert!(pool.is_empty());
        pool.checkout().unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_concurrent_checkout() {
        let pool = Arc::new(CipherPool::new(4));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    let ctx = pool.checkout().unwrap();
                    let block = ctx.encrypt(b"payload").unwrap();
                    assert_eq!(ctx.decrypt(&block).unwrap().as_slice(), b"payload");
                    ctx
                })
            })
            .collect();

        let held: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(held.len(), 16);
        assert_eq!(pool.len(), 4);
    }
}
