//! Engine configuration.

use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::result_cache::ResultCacheConfig;
use crate::spatial_index::DEFAULT_MEMORY_BUDGET_BYTES;

/// Complete engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay applied to viewport-driven recalculation; the newest request
    /// within the window replaces any pending one (default: 300 ms).
    pub debounce: Duration,
    /// Radius in meters for revealing a visited location (default: 100).
    pub reveal_radius_m: f64,
    /// Cap on spatial index query results per fog computation
    /// (default: 2500).
    pub max_query_results: usize,
    /// Spatial index memory budget in bytes.
    pub index_memory_budget_bytes: usize,
    /// Result cache sizing and TTL.
    pub cache: ResultCacheConfig,
    /// Breaker around whole fog calculations: loose thresholds, long
    /// recovery — protects the user-visible pipeline.
    pub calculation_breaker: CircuitBreakerConfig,
    /// Breaker around individual geometry operations: tight thresholds,
    /// short recovery — keeps one bad geometry from poisoning many calls.
    pub geometry_breaker: CircuitBreakerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            reveal_radius_m: 100.0,
            max_query_results: 2_500,
            index_memory_budget_bytes: DEFAULT_MEMORY_BUDGET_BYTES,
            cache: ResultCacheConfig::default(),
            calculation_breaker: CircuitBreakerConfig {
                failure_threshold: 8,
                failure_window: Duration::from_secs(120),
                recovery_timeout: Duration::from_secs(60),
            },
            geometry_breaker: CircuitBreakerConfig {
                failure_threshold: 4,
                failure_window: Duration::from_secs(30),
                recovery_timeout: Duration::from_secs(10),
            },
        }
    }
}

impl EngineConfig {
    /// Set the viewport debounce window.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the reveal radius in meters.
    pub fn with_reveal_radius_m(mut self, radius: f64) -> Self {
        self.reveal_radius_m = radius;
        self
    }

    /// Set the query result cap.
    pub fn with_max_query_results(mut self, max: usize) -> Self {
        self.max_query_results = max;
        self
    }

    /// Set the result cache configuration.
    pub fn with_cache(mut self, cache: ResultCacheConfig) -> Self {
        self.cache = cache;
        self
    }
}
