//! Bounded memoization caches
//!
//! Every cached value is a pure function of its key, so caches can be
//! shared between bank sessions. Concurrent writers racing on one key
//! store the same value; last write wins.
//!
//! # Eviction
//!
//! Once a cache holds more than `max_entries`, the oldest inserted
//! `eviction_fraction` of entries are purged in one sweep. Eviction order
//! carries no meaning beyond bounding memory.

use crate::config::CacheConfig;
use crate::types::StopId;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Hit/miss counters for one cache
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Lookups served from cache
    pub hits: u64,
    /// Lookups that had to compute
    pub misses: u64,
    /// Entries purged by eviction
    pub evictions: u64,
    /// Current entry count
    pub size: usize,
}

impl CacheStats {
    /// Hit rate in percent
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64) / (total as f64) * 100.0
        }
    }
}

struct Entries<K, V> {
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

/// Size-bounded map with bulk eviction of the oldest entries
pub struct BoundedCache<K, V> {
    name: &'static str,
    entries: Mutex<Entries<K, V>>,
    max_entries: usize,
    eviction_fraction: f64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    lifetime_evictions: AtomicU64,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty cache
    pub fn new(name: &'static str, config: &CacheConfig) -> Self {
        Self {
            name,
            entries: Mutex::new(Entries {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            max_entries: config.max_entries.max(1),
            eviction_fraction: config.eviction_fraction,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            lifetime_evictions: AtomicU64::new(0),
        }
    }

    /// Cached value for `key`, if present
    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.entries.lock().map.get(key).cloned();
        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        value
    }

    /// Store `value`, returning how many entries were evicted
    pub fn insert(&self, key: K, value: V) -> usize {
        let mut entries = self.entries.lock();

        if entries.map.insert(key.clone(), value).is_none() {
            entries.order.push_back(key);
        }

        if entries.map.len() <= self.max_entries {
            return 0;
        }

        let purge = ((entries.map.len() as f64 * self.eviction_fraction).ceil() as usize).max(1);
        let mut evicted = 0;
        while evicted < purge {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.map.remove(&oldest);
            evicted += 1;
        }

        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        self.lifetime_evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        debug!(cache = self.name, evicted, remaining = entries.map.len(), "Cache eviction");
        evicted
    }

    /// Cached value, or compute, store and return it
    pub fn get_or_insert_with(&self, key: K, compute: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(&key) {
            return value;
        }
        // Computed outside the lock
        let value = compute();
        self.insert(key, value.clone());
        value
    }

    /// Drop every entry and reset counters (lifetime evictions survive)
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.map.clear();
        entries.order.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    /// Entry count
    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    /// True when empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evictions since creation, never reset
    pub fn lifetime_evictions(&self) -> u64 {
        self.lifetime_evictions.load(Ordering::Relaxed)
    }

    /// Counters snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}

impl<K, V> std::fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCache")
            .field("name", &self.name)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

/// Key of a stop's recovery history: schedule content hash + stop
pub type HistoryKey = (u64, StopId);

/// Key of a flexibility score
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlexibilityKey {
    /// Category
    pub stop_type: crate::types::StopType,
    /// Sample count
    pub sample_count: usize,
    /// Sample values in order
    pub samples: Vec<Decimal>,
    /// Variance sample cap
    pub max_samples: usize,
}

/// Key of a transaction score: every numeric input of the formula
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionScoreKey {
    /// Lender stop
    pub lender: StopId,
    /// Borrower stop
    pub borrower: StopId,
    /// Minutes
    pub amount: Decimal,
    /// Lender debt at scoring time
    pub lender_debt: Decimal,
    /// Borrower debt at scoring time
    pub borrower_debt: Decimal,
    /// Lender credit ceiling
    pub lender_max_credit: Decimal,
    /// Borrower debt ceiling
    pub borrower_max_recovery: Decimal,
    /// Lender flexibility (bit pattern)
    pub lender_flexibility: u64,
    /// Borrower flexibility (bit pattern)
    pub borrower_flexibility: u64,
    /// Distance penalty basis
    pub penalty_basis: String,
}

/// Key of an allocation sub-result: the request, the bank-state version
/// and every validation and scoring setting the search reads
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AllocationKey {
    /// Borrower
    pub to_stop_id: StopId,
    /// Requested lender
    pub from_stop_id: Option<StopId>,
    /// Minutes
    pub amount: Decimal,
    /// Request priority
    pub priority: u32,
    /// Bank-state version
    pub state_version: u64,
    /// Deviation constraint
    pub constraints: Option<crate::types::OptimizationConstraints>,
    /// Lender debt ratio cap (bit pattern)
    pub max_lender_debt_ratio: u64,
    /// Distance penalty basis
    pub penalty_basis: String,
    /// Variance sample cap
    pub max_variance_samples: usize,
}

/// Lender picked for a request
#[derive(Debug, Clone, PartialEq)]
pub struct LenderChoice {
    /// Chosen lender
    pub lender: StopId,
    /// Transaction score of the pair
    pub score: f64,
}

/// The four memoized computations of a bank session
#[derive(Debug)]
pub struct ScoreCaches {
    /// Historical recovery minutes per stop
    pub history: BoundedCache<HistoryKey, Vec<Decimal>>,
    /// Flexibility scores
    pub flexibility: BoundedCache<FlexibilityKey, f64>,
    /// Transaction scores
    pub transaction: BoundedCache<TransactionScoreKey, f64>,
    /// Best-lender search results
    pub allocation: BoundedCache<AllocationKey, Option<LenderChoice>>,
}

impl ScoreCaches {
    /// Create empty caches
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            history: BoundedCache::new("history", config),
            flexibility: BoundedCache::new("flexibility", config),
            transaction: BoundedCache::new("transaction", config),
            allocation: BoundedCache::new("allocation", config),
        }
    }

    /// Drop all entries
    pub fn clear_all(&self) {
        self.history.clear();
        self.flexibility.clear();
        self.transaction.clear();
        self.allocation.clear();
    }

    /// Stats per cache, by name
    pub fn stats(&self) -> Vec<(&'static str, CacheStats)> {
        vec![
            ("history", self.history.stats()),
            ("flexibility", self.flexibility.stats()),
            ("transaction", self.transaction.stats()),
            ("allocation", self.allocation.stats()),
        ]
    }

    /// Evictions across caches since creation; `clear_all` does not reset it
    pub fn total_evictions(&self) -> u64 {
        self.history.lifetime_evictions()
            + self.flexibility.lifetime_evictions()
            + self.transaction.lifetime_evictions()
            + self.allocation.lifetime_evictions()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small(max_entries: usize) -> CacheConfig {
        CacheConfig {
            max_entries,
            eviction_fraction: 0.2,
        }
    }

    #[test]
    fn test_get_or_insert_with_memoizes() {
        let cache: BoundedCache<u32, u32> = BoundedCache::new("test", &small(10));
        let mut calls = 0;
        let first = cache.get_or_insert_with(7, || {
            calls += 1;
            49
        });
        let second = cache.get_or_insert_with(7, || {
            calls += 1;
            0
        });

        assert_eq!(first, 49);
        assert_eq!(second, 49);
        assert_eq!(calls, 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[test]
    fn test_eviction_purges_oldest() {
        let cache: BoundedCache<u32, u32> = BoundedCache::new("test", &small(10));
        for i in 0..10 {
            assert_eq!(cache.insert(i, i), 0);
        }
        // 11 entries > 10: purge ceil(11 * 0.2) = 3 oldest
        assert_eq!(cache.insert(10, 10), 3);
        assert_eq!(cache.len(), 8);
        assert!(cache.get(&0).is_none());
        assert!(cache.get(&2).is_none());
        assert_eq!(cache.get(&3), Some(3));
        assert_eq!(cache.get(&10), Some(10));
        assert_eq!(cache.stats().evictions, 3);
    }

    #[test]
    fn test_overwrite_does_not_grow() {
        let cache: BoundedCache<&str, u32> = BoundedCache::new("test", &small(2));
        cache.insert("a", 1);
        cache.insert("a", 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"a"), Some(2));
    }

    #[test]
    fn test_clear() {
        let caches = ScoreCaches::new(&small(10));
        caches.flexibility.insert(
            FlexibilityKey {
                stop_type: crate::types::StopType::Mall,
                sample_count: 0,
                samples: vec![],
                max_samples: 1000,
            },
            0.8,
        );
        assert_eq!(caches.flexibility.len(), 1);
        caches.clear_all();
        assert!(caches.flexibility.is_empty());
        assert_eq!(caches.total_evictions(), 0);
    }

    #[test]
    fn test_lifetime_evictions_survive_clear() {
        let cache: BoundedCache<u32, u32> = BoundedCache::new("test", &small(2));
        for i in 0..3 {
            cache.insert(i, i);
        }
        assert_eq!(cache.lifetime_evictions(), 1);

        cache.clear();
        assert_eq!(cache.stats().evictions, 0);
        for i in 10..13 {
            cache.insert(i, i);
        }
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.lifetime_evictions(), 2);
    }
}
