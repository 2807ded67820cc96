//! Result cache statistics.
//!
//! Observability only — hit/miss accounting never affects correctness.

/// Counters for cache effectiveness.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Sum of the original calculation times of served hits — an estimate
    /// of recomputation time the cache saved.
    pub time_saved_ms: f64,
}

impl CacheStats {
    pub fn record_hit(&mut self, saved_ms: f64) {
        self.hits += 1;
        self.time_saved_ms += saved_ms;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self, count: u64) {
        self.evictions += count;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    /// Hit rate in [0, 1]; 0 when no lookups have happened.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}
