//! Integration tests for the fog engine.
//!
//! Exercises the orchestrator with a real store, spatial index, and result
//! cache wired together, plus failure injection via a failing store double.

use std::sync::Arc;
use std::time::Duration;

use fogmap::circuit_breaker::CircuitState;
use fogmap::config::EngineConfig;
use fogmap::feature::{Feature, GeometryPayload};
use fogmap::orchestrator::FogOrchestrator;
use fogmap::store::{MemoryStore, RevealedAreaStore, StoreError};
use fogmap::viewport::ViewportBounds;

// ============================================================================
// Test doubles
// ============================================================================

/// Store that fails every call, simulating unreachable persistence.
struct FailingStore;

impl RevealedAreaStore for FailingStore {
    fn list(&self) -> Result<Vec<Feature>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn append(&self, _feature: Feature) -> Result<u64, StoreError> {
        Err(StoreError::WriteFailed("connection refused".to_string()))
    }
}

fn sf_viewport() -> ViewportBounds {
    ViewportBounds::new(-122.5, 37.7, -122.3, 37.8).unwrap()
}

fn engine_with(store: Arc<dyn RevealedAreaStore>) -> Arc<FogOrchestrator> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    FogOrchestrator::new(store, EngineConfig::default())
}

// ============================================================================
// Accurate paths
// ============================================================================

#[tokio::test]
async fn test_empty_store_produces_full_viewport_fog() {
    let engine = engine_with(Arc::new(MemoryStore::new()));
    engine.initialize();
    engine.update_viewport(sf_viewport(), 14);

    let result = engine.recompute().await;
    assert!(!result.used_fallback);
    assert!(result.used_spatial_index);
    assert_eq!(result.features.len(), 1);

    // A single rectangle with no holes
    match &result.features[0].geometry {
        GeometryPayload::Polygon(rings) => assert_eq!(rings.len(), 1),
        other => panic!("expected polygon fog, got {}", other.type_name()),
    }
}

#[tokio::test]
async fn test_revealed_circle_becomes_fog_hole() {
    let engine = engine_with(Arc::new(MemoryStore::new()));
    engine.initialize();
    engine.update_viewport(sf_viewport(), 16);

    let result = engine.update_location(37.7749, -122.4194).await;
    assert!(!result.used_fallback);
    assert!(result.used_spatial_index);
    assert!(result.errors.is_empty());
    assert_eq!(result.features.len(), 1);

    match &result.features[0].geometry {
        GeometryPayload::Polygon(rings) => {
            assert_eq!(rings.len(), 2, "exterior plus one revealed hole");
        }
        other => panic!("expected polygon fog, got {}", other.type_name()),
    }
}

#[tokio::test]
async fn test_malformed_store_record_skipped_with_warning() {
    let store = MemoryStore::new().with_features(vec![
        Feature::new(GeometryPayload::Point([-122.4, 37.75])),
        Feature::polygon(vec![
            [-122.45, 37.72],
            [-122.40, 37.72],
            [-122.40, 37.76],
            [-122.45, 37.76],
            [-122.45, 37.72],
        ]),
    ]);
    // Skip initialize() so the store-backed path runs and surfaces its
    // sanitation warnings in the result
    let engine = engine_with(Arc::new(store));
    engine.update_viewport(sf_viewport(), 14);

    let result = engine.recompute().await;
    assert!(!result.used_fallback);
    assert!(!result.used_spatial_index);
    assert!(
        result.warnings.iter().any(|w| w.contains("rejected")),
        "malformed record should be reported: {:?}",
        result.warnings
    );
    // The valid square still carves the fog
    match &result.features[0].geometry {
        GeometryPayload::Polygon(rings) => assert!(!rings.is_empty()),
        GeometryPayload::MultiPolygon(_) => {}
        other => panic!("expected polygonal fog, got {}", other.type_name()),
    }
}

// ============================================================================
// Degraded paths
// ============================================================================

#[tokio::test]
async fn test_failing_store_degrades_to_fogged_viewport() {
    let engine = engine_with(Arc::new(FailingStore));
    engine.update_viewport(sf_viewport(), 14);

    let result = engine.recompute().await;
    assert!(result.used_fallback);
    assert!(!result.used_spatial_index);
    assert!(!result.errors.is_empty());
    assert_eq!(result.features.len(), 1);
}

#[tokio::test]
async fn test_no_viewport_degrades_to_world_fog() {
    let engine = engine_with(Arc::new(FailingStore));

    let result = engine.recompute().await;
    assert!(result.used_fallback);
    assert_eq!(result.features.len(), 1);
    assert!(result.warnings.iter().any(|w| w.contains("world")));
    // The failed store read surfaces in the result, not just in logs
    assert!(!result.errors.is_empty());
}

#[tokio::test]
async fn test_repeated_failures_open_calculation_breaker() {
    let engine = engine_with(Arc::new(FailingStore));
    engine.update_viewport(sf_viewport(), 14);

    // Each attempt fails both the indexed and the store tier
    for _ in 0..5 {
        let result = engine.recompute().await;
        assert!(result.used_fallback, "every attempt must still yield fog");
    }
    assert_eq!(engine.calculation_breaker().state(), CircuitState::Open);

    // Open breaker short-circuits but the fallback chain still answers
    let result = engine.recompute().await;
    assert!(result.used_fallback);
    assert!(!result.features.is_empty());
}

// ============================================================================
// Debounce and cache behavior
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_viewport_burst_computes_only_newest() {
    let config = EngineConfig::default().with_debounce(Duration::from_millis(50));
    let engine = FogOrchestrator::new(Arc::new(MemoryStore::new()), config);
    engine.initialize();
    let mut rx = engine.subscribe();

    engine.update_viewport(ViewportBounds::new(-122.5, 37.7, -122.3, 37.8).unwrap(), 14);
    engine.update_viewport(ViewportBounds::new(-122.6, 37.6, -122.4, 37.7).unwrap(), 14);
    let last = ViewportBounds::new(-122.7, 37.5, -122.5, 37.6).unwrap();
    engine.update_viewport(last, 14);

    rx.changed().await.unwrap();
    let published = rx.borrow().clone().unwrap();

    let stats = engine.stats();
    assert_eq!(stats.viewport_updates, 3);
    assert_eq!(stats.computations, 1, "burst coalesces into one computation");

    // The published fog covers the newest viewport
    match &published.features[0].geometry {
        GeometryPayload::Polygon(rings) => {
            assert!(rings[0].iter().any(|p| p[0] == -122.7 && p[1] == 37.5));
        }
        other => panic!("expected polygon fog, got {}", other.type_name()),
    }
}

#[tokio::test]
async fn test_identical_viewport_served_from_cache() {
    let engine = engine_with(Arc::new(MemoryStore::new()));
    engine.initialize();
    engine.update_viewport(sf_viewport(), 14);

    let first = engine.recompute().await;
    let second = engine.recompute().await;
    assert_eq!(first, second);

    let stats = engine.stats();
    assert_eq!(stats.computations, 1);
    assert_eq!(stats.cache_hits, 1);
}

#[tokio::test]
async fn test_location_update_invalidates_cached_fog() {
    let engine = engine_with(Arc::new(MemoryStore::new()));
    engine.initialize();
    engine.update_viewport(sf_viewport(), 16);

    let before = engine.recompute().await;
    let after = engine.update_location(37.7749, -122.4194).await;
    assert_ne!(
        before.features, after.features,
        "new revealed area must change the fog"
    );

    // Both the dataset version and the explicit invalidation force a
    // fresh computation
    let stats = engine.stats();
    assert_eq!(stats.cache_hits, 0);
    assert_eq!(stats.computations, 2);
}

#[tokio::test]
async fn test_shutdown_stops_publishing() {
    let engine = engine_with(Arc::new(MemoryStore::new()));
    engine.initialize();
    engine.update_viewport(sf_viewport(), 14);
    engine.shutdown();

    engine.recompute().await;
    let rx = engine.subscribe();
    assert!(rx.borrow().is_none());
}
