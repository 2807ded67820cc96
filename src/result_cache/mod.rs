//! Result cache — fingerprinted memoization of fog computations.
//!
//! A pure memoization layer, never independent truth: a hit is exactly
//! what a fresh computation produced for the same key at insertion time.
//! Entries are cloned out so eviction cannot invalidate a result a caller
//! still holds.

mod fingerprint;
mod stats;

pub use fingerprint::{FogCacheKey, QUANTIZATION_DEGREES};
pub use stats::CacheStats;

use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rstar::{Envelope, AABB};
use tracing::debug;

use crate::feature::FogComputationResult;

/// Result cache configuration.
#[derive(Debug, Clone)]
pub struct ResultCacheConfig {
    /// Maximum number of cached results (default: 64).
    pub max_entries: usize,
    /// Entry time-to-live; expired entries are dropped on read
    /// (default: 5 minutes).
    pub ttl: Duration,
}

impl Default for ResultCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 64,
            ttl: Duration::from_secs(300),
        }
    }
}

/// One cached fog result. Owned exclusively by the cache.
#[derive(Debug, Clone)]
struct CacheEntry {
    result: FogComputationResult,
    created_at: Instant,
    last_accessed: Instant,
    access_count: u64,
}

impl CacheEntry {
    fn new(result: FogComputationResult) -> Self {
        let now = Instant::now();
        Self {
            result,
            created_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }
}

/// Memoization cache for fog computation results.
pub struct FogResultCache {
    entries: DashMap<FogCacheKey, CacheEntry>,
    config: ResultCacheConfig,
    stats: Mutex<CacheStats>,
}

impl FogResultCache {
    pub fn new(config: ResultCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            stats: Mutex::new(CacheStats::default()),
        }
    }

    /// Look up a cached result, cloning it out.
    ///
    /// Updates LRU bookkeeping on hit; drops and misses on expired entries.
    pub fn get(&self, key: &FogCacheKey) -> Option<FogComputationResult> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if entry.created_at.elapsed() > self.config.ttl {
                drop(entry);
                self.entries.remove(key);
                let mut stats = self.lock_stats();
                stats.record_expiration();
                stats.record_miss();
                return None;
            }
            entry.touch();
            let result = entry.result.clone();
            drop(entry);
            self.lock_stats().record_hit(result.calculation_time_ms);
            return Some(result);
        }
        self.lock_stats().record_miss();
        None
    }

    /// Store a result, evicting the least recently used entry when full.
    pub fn set(&self, key: FogCacheKey, result: FogComputationResult) {
        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(&key) {
            self.evict_lru();
        }
        self.entries.insert(key, CacheEntry::new(result));
    }

    /// Clear everything. Safe default when revealed areas change.
    pub fn invalidate(&self) {
        let removed = self.entries.len();
        self.entries.clear();
        if removed > 0 {
            debug!(removed, "result cache invalidated");
        }
    }

    /// Evict only entries whose viewport could intersect `changed`.
    ///
    /// Over-invalidation is acceptable; under-invalidation would serve
    /// stale fog, so envelope intersection is the exact lower bound used.
    pub fn invalidate_region(&self, changed: &AABB<[f64; 2]>) {
        let affected: Vec<FogCacheKey> = self
            .entries
            .iter()
            .filter(|entry| entry.key().viewport_envelope().intersects(changed))
            .map(|entry| *entry.key())
            .collect();
        let removed = affected.len();
        for key in affected {
            self.entries.remove(&key);
        }
        if removed > 0 {
            debug!(removed, "result cache region-invalidated");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.lock_stats().clone()
    }

    fn evict_lru(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().last_accessed)
            .map(|entry| *entry.key());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.lock_stats().record_eviction(1);
        }
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, CacheStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for FogResultCache {
    fn default() -> Self {
        Self::new(ResultCacheConfig::default())
    }
}
