//! Decision cache with SIEVE eviction.
//!
//! SIEVE is a cache eviction algorithm from the NSDI 2024 paper that achieves
//! a better hit rate than LRU with O(1) operations and a simpler
//! implementation.
//!
//! # Algorithm
//!
//! - On access (hit): set the entry's `visited` bit to `true`.
//! - On insert (miss + full): scan from the `hand` position:
//!   - If `visited == true` → reset to `false`, advance hand.
//!   - If `visited == false` → evict this entry, insert the new one here.
//!
//! Visited bits are atomics, so lookups only need the shared lock and many
//! readers can hit the cache at once. Inserts and invalidation take the
//! exclusive lock.
//!
//! # Versioning
//!
//! Every entry belongs to exactly one policy-tree version. The cache only
//! accepts entries for the version it was last invalidated to; an insert
//! computed against any other tree is dropped, so a decision computed
//! against a replaced tree can never be served.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

use crate::attributes::Fingerprint;
use crate::decision::Decision;

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Inserts dropped because their tree version was no longer current.
    pub stale_inserts: u64,
    pub len: usize,
    pub capacity: usize,
}

/// A bounded, versioned decision cache.
#[derive(Debug)]
pub struct DecisionCache {
    sieve: RwLock<Sieve>,
    hits: AtomicU64,
    misses: AtomicU64,
    stale_inserts: AtomicU64,
}

impl DecisionCache {
    /// Creates a cache for tree `version` holding at most `capacity` decisions.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize, version: u64) -> Self {
        assert!(capacity > 0, "decision cache capacity must be > 0");

        Self {
            sieve: RwLock::new(Sieve::new(capacity, version)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_inserts: AtomicU64::new(0),
        }
    }

    /// Returns the cached decision for `fingerprint` under tree `version`,
    /// marking it as recently used.
    pub fn get(&self, version: u64, fingerprint: &Fingerprint) -> Option<Decision> {
        let sieve = self.sieve.read().unwrap_or_else(PoisonError::into_inner);
        let found = if sieve.version == version {
            sieve.get(fingerprint)
        } else {
            None
        };

        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Stores a decision computed against tree `version`.
    ///
    /// Returns `false` (and stores nothing) when `version` is not the
    /// version the cache currently accepts.
    pub fn insert(&self, version: u64, fingerprint: Fingerprint, decision: Decision) -> bool {
        let mut sieve = self.sieve.write().unwrap_or_else(PoisonError::into_inner);
        if sieve.version != version {
            self.stale_inserts.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        sieve.insert(fingerprint, decision);
        true
    }

    /// Returns the cached decision or computes, stores and returns a new one.
    pub fn get_or_compute<F>(&self, version: u64, fingerprint: Fingerprint, compute: F) -> Decision
    where
        F: FnOnce() -> Decision,
    {
        if let Some(decision) = self.get(version, &fingerprint) {
            return decision;
        }
        let decision = compute();
        self.insert(version, fingerprint, decision.clone());
        decision
    }

    /// Drops every entry and starts accepting entries for `version` only.
    ///
    /// Versions only move forward: invalidating to a version at or below the
    /// current one is a no-op, so racing swaps settle on the newest tree.
    pub fn invalidate(&self, version: u64) {
        let mut sieve = self.sieve.write().unwrap_or_else(PoisonError::into_inner);
        if version > sieve.version {
            sieve.clear(version);
        }
    }

    /// Version whose entries the cache currently accepts.
    pub fn version(&self) -> u64 {
        self.sieve.read().unwrap_or_else(PoisonError::into_inner).version
    }

    pub fn len(&self) -> usize {
        self.sieve.read().unwrap_or_else(PoisonError::into_inner).len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let sieve = self.sieve.read().unwrap_or_else(PoisonError::into_inner);
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_inserts: self.stale_inserts.load(Ordering::Relaxed),
            len: sieve.len,
            capacity: sieve.capacity,
        }
    }
}

// ============================================================================
// SIEVE
// ============================================================================

#[derive(Debug)]
struct Entry {
    key: Fingerprint,
    decision: Decision,
    visited: AtomicBool,
}

/// Circular buffer of entries with a `HashMap` for O(1) lookups.
#[derive(Debug)]
struct Sieve {
    version: u64,
    entries: Vec<Option<Entry>>,
    /// Maps keys to their index in `entries`.
    index: HashMap<Fingerprint, usize>,
    /// Current hand position for the SIEVE scan.
    hand: usize,
    capacity: usize,
    /// Current number of live entries.
    len: usize,
}

impl Sieve {
    fn new(capacity: usize, version: u64) -> Self {
        Self {
            version,
            entries: (0..capacity).map(|_| None).collect(),
            index: HashMap::with_capacity(capacity),
            hand: 0,
            capacity,
            len: 0,
        }
    }

    fn get(&self, key: &Fingerprint) -> Option<Decision> {
        let &idx = self.index.get(key)?;
        let entry = self.entries[idx].as_ref()?;
        entry.visited.store(true, Ordering::Relaxed);
        Some(entry.decision.clone())
    }

    fn insert(&mut self, key: Fingerprint, decision: Decision) {
        // If key already exists, update in place
        if let Some(&idx) = self.index.get(&key) {
            if let Some(entry) = &mut self.entries[idx] {
                entry.decision = decision;
                *entry.visited.get_mut() = true;
                return;
            }
        }

        let slot = if self.len < self.capacity {
            self.entries.iter().position(Option::is_none)
        } else {
            None
        };

        let idx = match slot {
            Some(free) => {
                self.len += 1;
                free
            }
            None => {
                let evict = self.find_eviction_target();
                match self.entries[evict].take() {
                    Some(old) => {
                        self.index.remove(&old.key);
                    }
                    None => self.len += 1,
                }
                evict
            }
        };

        self.entries[idx] = Some(Entry {
            key,
            decision,
            visited: AtomicBool::new(false),
        });
        self.index.insert(key, idx);
    }

    fn clear(&mut self, version: u64) {
        self.entries.iter_mut().for_each(|slot| *slot = None);
        self.index.clear();
        self.hand = 0;
        self.len = 0;
        self.version = version;
    }

    /// Scans from `hand` to find an entry with `visited == false`,
    /// resetting `visited` bits along the way.
    fn find_eviction_target(&mut self) -> usize {
        // At most two full scans: the first resets every visited bit.
        for _ in 0..self.capacity * 2 {
            let current = self.hand;
            self.hand = (self.hand + 1) % self.capacity;
            match &self.entries[current] {
                Some(entry) if entry.visited.load(Ordering::Relaxed) => {
                    entry.visited.store(false, Ordering::Relaxed);
                }
                _ => return current,
            }
        }

        let target = self.hand;
        self.hand = (self.hand + 1) % self.capacity;
        target
    }
}
