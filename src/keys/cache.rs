//! Bounded cache of parsed signers, keyed by key name.
//!
//! Entries are invalidated on key create and delete. When full, the oldest
//! inserted entry is evicted.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use super::Signer;

/// Signer cache with FIFO eviction.
pub struct SignerCache {
    capacity: usize,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, Arc<Signer>>,
    order: VecDeque<String>,
}

impl CacheState {
    fn remove(&mut self, name: &str) -> bool {
        if self.entries.remove(name).is_some() {
            self.order.retain(|n| n != name);
            true
        } else {
            false
        }
    }
}

impl SignerCache {
    /// Create a cache holding at most `capacity` signers. Zero disables it.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a signer.
    pub fn get(&self, name: &str) -> Option<Arc<Signer>> {
        let found = self.state.lock().entries.get(name).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Insert or replace a signer, evicting the oldest entry when full.
    pub fn insert(&self, name: &str, signer: Arc<Signer>) {
        if self.capacity == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.remove(name);
        while state.entries.len() >= self.capacity {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            state.entries.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        state.entries.insert(name.to_string(), signer);
        state.order.push_back(name.to_string());
    }

    /// Drop the entry for `name`, if any.
    pub fn invalidate(&self, name: &str) {
        self.state.lock().remove(name);
    }

    /// Number of cached signers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> SignerCacheStats {
        SignerCacheStats {
            size: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time signer cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SignerCacheStats {
    /// Current entry count
    pub size: usize,
    /// Maximum entry count
    pub capacity: usize,
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that missed
    pub misses: u64,
    /// Entries dropped to make room
    pub evictions: u64,
}
