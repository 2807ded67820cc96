//! Fog orchestrator tying the engine together.
//!
//! Two entry points: [`FogOrchestrator::update_location`] recomputes
//! immediately (GPS updates are rate-limited upstream), while
//! [`FogOrchestrator::update_viewport`] coalesces bursts behind a debounce
//! window so only the newest viewport in a burst is ever computed.
//!
//! Results are published on a watch channel. A monotonic apply-sequence
//! guarantees a slow earlier calculation can never overwrite a later one,
//! and teardown discards any in-flight result.
//!
//! # Fallback chain
//!
//! 1. spatial-indexed viewport fog
//! 2. non-indexed viewport fog read directly from the store
//! 3. fully-fogged viewport rectangle
//! 4. world-extent fog (no viewport known; tiers 1-2 rerun at world
//!    bounds, degrading to a static world rectangle)
//! 5. empty feature collection
//!
//! Each step down records a warning so consumers can tell accurate from
//! degraded output.

mod fallback;

pub use fallback::FOG_KIND_PROPERTY;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use geo::MultiPolygon;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::circuit_breaker::{BreakerError, CircuitBreaker};
use crate::config::EngineConfig;
use crate::feature::{Feature, FogComputationResult, RevealedArea};
use crate::geometry::{self, ComplexityLevel, GeometryComplexity, OpEnvelope, OpOutcome};
use crate::result_cache::{FogCacheKey, FogResultCache};
use crate::spatial_index::RevealedAreaIndex;
use crate::store::{RevealedAreaStore, StoreError};
use crate::viewport::ViewportBounds;

/// Internal calculation errors driving the fallback chain. Never escape
/// the orchestrator boundary.
#[derive(Debug, Error)]
enum CalcError {
    #[error("spatial index not initialized")]
    IndexUnavailable,

    #[error("geometry: {0}")]
    Geometry(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("worker task failed: {0}")]
    Join(String),

    #[error("circuit breaker '{0}' is open")]
    CircuitOpen(String),
}

fn flatten<T>(result: Result<T, BreakerError<CalcError>>) -> Result<T, CalcError> {
    match result {
        Ok(value) => Ok(value),
        Err(BreakerError::Open { name }) => Err(CalcError::CircuitOpen(name)),
        Err(BreakerError::Operation(e)) => Err(e),
    }
}

/// Orchestrator counters for monitoring.
#[derive(Debug, Default)]
pub struct OrchestratorStats {
    /// Fog computations actually performed (cache misses).
    pub computations: AtomicU64,
    /// Requests served from the result cache.
    pub cache_hits: AtomicU64,
    /// Viewport updates received.
    pub viewport_updates: AtomicU64,
    /// Location updates received.
    pub location_updates: AtomicU64,
    /// Requests superseded before their result was applied.
    pub superseded: AtomicU64,
}

impl OrchestratorStats {
    pub fn snapshot(&self) -> OrchestratorStatsSnapshot {
        OrchestratorStatsSnapshot {
            computations: self.computations.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            viewport_updates: self.viewport_updates.load(Ordering::Relaxed),
            location_updates: self.location_updates.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of orchestrator statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrchestratorStatsSnapshot {
    pub computations: u64,
    pub cache_hits: u64,
    pub viewport_updates: u64,
    pub location_updates: u64,
    pub superseded: u64,
}

/// The fog computation engine.
///
/// Explicitly constructed with its store injected; owns its spatial index,
/// result cache, and circuit breakers. Lifecycle is tied to the consumer:
/// call [`FogOrchestrator::shutdown`] on teardown and any in-flight
/// calculation is discarded.
pub struct FogOrchestrator {
    /// Self-handle for spawning debounce tasks that outlive the caller's
    /// borrow.
    weak: Weak<FogOrchestrator>,
    config: EngineConfig,
    store: Arc<dyn RevealedAreaStore>,
    index: Arc<RevealedAreaIndex>,
    cache: Arc<FogResultCache>,
    calculation_breaker: CircuitBreaker,
    geometry_breaker: CircuitBreaker,
    viewport: Mutex<Option<(ViewportBounds, u8)>>,
    index_ready: AtomicBool,
    /// Debounce generation: a new viewport request supersedes the pending
    /// one by bumping this.
    generation: AtomicU64,
    /// Monotonic sequence assigned when a computation starts.
    apply_seq: AtomicU64,
    /// Highest sequence whose result has been published.
    last_applied: AtomicU64,
    pending: Mutex<Option<JoinHandle<()>>>,
    result_tx: watch::Sender<Option<FogComputationResult>>,
    cancel: CancellationToken,
    stats: OrchestratorStats,
}

impl FogOrchestrator {
    /// Create an engine over the given store.
    pub fn new(store: Arc<dyn RevealedAreaStore>, config: EngineConfig) -> Arc<Self> {
        let (result_tx, _) = watch::channel(None);
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            index: Arc::new(RevealedAreaIndex::with_memory_budget(
                config.index_memory_budget_bytes,
            )),
            cache: Arc::new(FogResultCache::new(config.cache.clone())),
            calculation_breaker: CircuitBreaker::new(
                "fog-calculation",
                config.calculation_breaker.clone(),
            ),
            geometry_breaker: CircuitBreaker::new(
                "geometry-operation",
                config.geometry_breaker.clone(),
            ),
            viewport: Mutex::new(None),
            index_ready: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            apply_seq: AtomicU64::new(0),
            last_applied: AtomicU64::new(0),
            pending: Mutex::new(None),
            result_tx,
            cancel: CancellationToken::new(),
            stats: OrchestratorStats::default(),
            config,
            store,
        })
    }

    /// Load all revealed areas from the store into the spatial index.
    ///
    /// A failed load is not fatal: the index stays unavailable and fog
    /// computation takes the non-indexed path until a later refresh
    /// succeeds.
    pub fn initialize(&self) {
        match self.index.refresh_from_store(self.store.as_ref()) {
            Ok(report) => {
                self.index_ready.store(true, Ordering::SeqCst);
                info!(
                    loaded = report.loaded,
                    skipped = report.skipped,
                    "fog engine initialized from store"
                );
                self.maybe_relieve_memory();
            }
            Err(e) => {
                warn!(error = %e, "initial store load failed, running without spatial index");
            }
        }
    }

    /// Subscribe to computed fog results.
    pub fn subscribe(&self) -> watch::Receiver<Option<FogComputationResult>> {
        self.result_tx.subscribe()
    }

    /// Coalesced viewport-change entry point.
    ///
    /// Schedules a recalculation after the debounce window; a newer
    /// request arriving first cancels and replaces it. Must be called
    /// within a tokio runtime.
    pub fn update_viewport(&self, bounds: ViewportBounds, zoom: u8) {
        self.stats.viewport_updates.fetch_add(1, Ordering::Relaxed);
        *self.lock_viewport() = Some((bounds, zoom));
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Upgrade always succeeds while a caller holds the engine
        let Some(this) = self.weak.upgrade() else {
            return;
        };
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = this.cancel.cancelled() => return,
                _ = tokio::time::sleep(this.config.debounce) => {}
            }
            if this.generation.load(Ordering::SeqCst) != generation {
                this.stats.superseded.fetch_add(1, Ordering::Relaxed);
                return;
            }
            let seq = this.apply_seq.fetch_add(1, Ordering::SeqCst) + 1;
            let result = this.compute_fog(Some((bounds, zoom))).await;
            this.publish(seq, result);
        });

        let mut pending = self.lock_pending();
        if let Some(old) = pending.replace(task) {
            old.abort();
        }
    }

    /// Immediate location-change entry point.
    ///
    /// Buffers the point into a revealed area, persists it, keeps the
    /// index and cache coherent, and recomputes fog for the current
    /// viewport. Never debounced.
    pub async fn update_location(&self, latitude: f64, longitude: f64) -> FogComputationResult {
        self.stats.location_updates.fetch_add(1, Ordering::Relaxed);
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let buffered = geometry::buffer(longitude, latitude, self.config.reveal_radius_m);
        warnings.extend(buffered.warnings.iter().cloned());
        match buffered.outcome {
            OpOutcome::Computed(circle) => {
                self.persist_revealed_area(&circle, &mut errors);
            }
            OpOutcome::Empty => {
                warnings.push("location buffer produced no geometry".to_string());
            }
            OpOutcome::Failed(reason) => {
                errors.push(format!("location rejected: {reason}"));
            }
        }

        let viewport = *self.lock_viewport();
        let seq = self.apply_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut result = self.compute_fog(viewport).await;
        result.warnings.extend(warnings);
        result.errors.extend(errors);
        self.publish(seq, result.clone());
        result
    }

    /// Recompute fog for the current viewport immediately, bypassing the
    /// debounce. Used by consumers that force a refresh.
    pub async fn recompute(&self) -> FogComputationResult {
        let viewport = *self.lock_viewport();
        let seq = self.apply_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.compute_fog(viewport).await;
        self.publish(seq, result.clone());
        result
    }

    /// Tear down: cancel pending work and discard in-flight results.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.lock_pending().take() {
            task.abort();
        }
        debug!("fog orchestrator shut down");
    }

    pub fn stats(&self) -> OrchestratorStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn spatial_index(&self) -> &RevealedAreaIndex {
        &self.index
    }

    pub fn result_cache(&self) -> &FogResultCache {
        &self.cache
    }

    pub fn calculation_breaker(&self) -> &CircuitBreaker {
        &self.calculation_breaker
    }

    pub fn geometry_breaker(&self) -> &CircuitBreaker {
        &self.geometry_breaker
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Append a new revealed area to the store and the index, then
    /// invalidate the cache, keeping the three coherent.
    fn persist_revealed_area(&self, circle: &MultiPolygon<f64>, errors: &mut Vec<String>) {
        let feature = Feature::from_multi_polygon(circle).with_property(
            FOG_KIND_PROPERTY,
            serde_json::Value::String("revealed".to_string()),
        );
        match self.store.append(feature.clone()) {
            Ok(id) => {
                debug!(id, "revealed area persisted");
                if let Some(area) = geometry::sanitize(&feature) {
                    self.index.add_features(&[area]);
                    self.maybe_relieve_memory();
                }
                self.cache.invalidate();
            }
            Err(e) => {
                warn!(error = %e, "failed to persist revealed area");
                errors.push(format!("store append failed: {e}"));
            }
        }
    }

    /// Run an aggressive optimization pass when the index exceeds its
    /// memory budget.
    fn maybe_relieve_memory(&self) {
        let stats = self.index.memory_stats();
        if !stats.over_budget() {
            return;
        }
        let report = self.index.optimize_memory(true);
        info!(
            bytes_before = report.bytes_before,
            bytes_after = report.bytes_after,
            evicted = report.evicted,
            simplified = report.simplified,
            budget = stats.budget_bytes,
            "spatial index over budget, optimized"
        );
    }

    async fn compute_fog(&self, viewport: Option<(ViewportBounds, u8)>) -> FogComputationResult {
        let start = Instant::now();
        let Some((bounds, zoom)) = viewport else {
            return self.world_fallback(start).await;
        };

        let key = FogCacheKey::new(&bounds, zoom, self.index.version());
        if let Some(hit) = self.cache.get(&key) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
            return hit;
        }
        self.stats.computations.fetch_add(1, Ordering::Relaxed);

        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        // Tier 1: spatial-indexed viewport fog
        match self.indexed_fog(bounds, zoom).await {
            Ok((features, mut tier_warnings)) => {
                warnings.append(&mut tier_warnings);
                let result = FogComputationResult {
                    features,
                    calculation_time_ms: elapsed_ms(start),
                    used_fallback: false,
                    used_spatial_index: true,
                    warnings,
                    errors,
                };
                self.cache.set(key, result.clone());
                return result;
            }
            Err(e) => {
                warn!(error = %e, "spatial-indexed fog failed, trying store path");
                warnings.push(format!("spatial-indexed fog unavailable: {e}"));
            }
        }

        // Tier 2: non-indexed fog straight from the authoritative store
        match self.store_fog(bounds).await {
            Ok((features, mut tier_warnings)) => {
                warnings.append(&mut tier_warnings);
                let result = FogComputationResult {
                    features,
                    calculation_time_ms: elapsed_ms(start),
                    used_fallback: false,
                    used_spatial_index: false,
                    warnings,
                    errors,
                };
                self.cache.set(key, result.clone());
                return result;
            }
            Err(e) => {
                warn!(error = %e, "store fog failed, degrading to fogged viewport");
                errors.push(format!("fog computation failed: {e}"));
            }
        }

        // Tier 3: fully-fogged viewport, no holes cut. Degraded results
        // are not cached so the next request retries the accurate path.
        warnings.push("degraded to fully-fogged viewport".to_string());
        FogComputationResult {
            features: vec![fallback::viewport_fog(&bounds)],
            calculation_time_ms: elapsed_ms(start),
            used_fallback: true,
            used_spatial_index: false,
            warnings,
            errors,
        }
    }

    /// Tiers 4 and 5: no viewport is known at all.
    ///
    /// World-extent fog still runs through the indexed and store tiers so
    /// revealed areas are carved out of it; failures there surface in the
    /// result's warnings and errors before falling back to the static
    /// world rectangle.
    async fn world_fallback(&self, start: Instant) -> FogComputationResult {
        self.stats.computations.fetch_add(1, Ordering::Relaxed);
        let mut warnings = vec!["no viewport known, computing world-extent fog".to_string()];
        let mut errors = Vec::new();
        let bounds = ViewportBounds::world();

        match self.indexed_fog(bounds, 0).await {
            Ok((features, mut tier_warnings)) => {
                warnings.append(&mut tier_warnings);
                return FogComputationResult {
                    features,
                    calculation_time_ms: elapsed_ms(start),
                    used_fallback: true,
                    used_spatial_index: true,
                    warnings,
                    errors,
                };
            }
            Err(e) => {
                warnings.push(format!("spatial-indexed fog unavailable: {e}"));
            }
        }

        match self.store_fog(bounds).await {
            Ok((features, mut tier_warnings)) => {
                warnings.append(&mut tier_warnings);
                return FogComputationResult {
                    features,
                    calculation_time_ms: elapsed_ms(start),
                    used_fallback: true,
                    used_spatial_index: false,
                    warnings,
                    errors,
                };
            }
            Err(e) => {
                warn!(error = %e, "world fog failed, degrading to static rectangle");
                errors.push(format!("fog computation failed: {e}"));
            }
        }

        let world = fallback::world_fog();
        if geometry::sanitize(&world).is_none() {
            // Tier 5: even the static world rectangle failed sanitation
            errors.push("world fog construction failed".to_string());
            return fallback::empty_result(elapsed_ms(start), warnings, errors);
        }
        FogComputationResult {
            features: vec![world],
            calculation_time_ms: elapsed_ms(start),
            used_fallback: true,
            used_spatial_index: false,
            warnings,
            errors,
        }
    }

    /// Tier 1: revealed areas from the spatial index, carved out of the
    /// viewport rectangle. The whole tier runs under the calculation
    /// breaker; union and difference additionally run under the geometry
    /// breaker.
    async fn indexed_fog(
        &self,
        bounds: ViewportBounds,
        zoom: u8,
    ) -> Result<(Vec<Feature>, Vec<String>), CalcError> {
        flatten(
            self.calculation_breaker
                .execute(|| async {
                    if !self.index_ready.load(Ordering::SeqCst) {
                        return Err(CalcError::IndexUnavailable);
                    }
                    let areas =
                        self.index
                            .query(&bounds, self.config.max_query_results, Some(zoom));
                    if areas.is_empty() {
                        // Nothing revealed in view: the whole viewport is
                        // fog, and that is an accurate result
                        return Ok((vec![fallback::viewport_fog(&bounds)], Vec::new()));
                    }
                    let union = self.guarded_union(areas).await?;
                    let mut warnings = union.warnings.clone();
                    match union.outcome {
                        OpOutcome::Computed(revealed) => {
                            let (features, mut diff_warnings) =
                                self.carve_viewport(bounds, revealed).await?;
                            warnings.append(&mut diff_warnings);
                            Ok((features, warnings))
                        }
                        OpOutcome::Empty => {
                            Ok((vec![fallback::viewport_fog(&bounds)], warnings))
                        }
                        OpOutcome::Failed(reason) => Err(CalcError::Geometry(reason)),
                    }
                })
                .await,
        )
    }

    /// Tier 2: revealed areas listed directly from the store.
    async fn store_fog(
        &self,
        bounds: ViewportBounds,
    ) -> Result<(Vec<Feature>, Vec<String>), CalcError> {
        flatten(
            self.calculation_breaker
                .execute(|| async {
                    let features = self.store.list().map_err(CalcError::Store)?;
                    if features.is_empty() {
                        return Ok((vec![fallback::viewport_fog(&bounds)], Vec::new()));
                    }
                    let union = flatten(
                        self.geometry_breaker
                            .execute(|| async {
                                geometry::union_features(&features)
                                    .into_result()
                                    .map_err(|e| CalcError::Geometry(e.to_string()))
                            })
                            .await,
                    )?;
                    let mut warnings = union.warnings.clone();
                    match union.outcome {
                        OpOutcome::Computed(revealed) => {
                            let (fog, mut diff_warnings) =
                                self.carve_viewport(bounds, revealed).await?;
                            warnings.append(&mut diff_warnings);
                            Ok((fog, warnings))
                        }
                        OpOutcome::Empty => {
                            Ok((vec![fallback::viewport_fog(&bounds)], warnings))
                        }
                        OpOutcome::Failed(reason) => Err(CalcError::Geometry(reason)),
                    }
                })
                .await,
        )
    }

    /// Union revealed areas under the geometry breaker, offloading heavy
    /// inputs to the blocking pool.
    async fn guarded_union(&self, areas: Vec<RevealedArea>) -> Result<OpEnvelope, CalcError> {
        let complexity = areas
            .iter()
            .map(|a| geometry::measure(&a.geometry))
            .fold(GeometryComplexity::empty(), |acc, c| acc.combine(c));

        flatten(
            self.geometry_breaker
                .execute(|| async move {
                    let envelope = if complexity.level == ComplexityLevel::High {
                        tokio::task::spawn_blocking(move || geometry::union_areas(&areas))
                            .await
                            .map_err(|e| CalcError::Join(e.to_string()))?
                    } else {
                        geometry::union_areas(&areas)
                    };
                    envelope
                        .into_result()
                        .map_err(|e| CalcError::Geometry(e.to_string()))
                })
                .await,
        )
    }

    /// Difference the revealed union out of the viewport rectangle, under
    /// the geometry breaker.
    async fn carve_viewport(
        &self,
        bounds: ViewportBounds,
        revealed: MultiPolygon<f64>,
    ) -> Result<(Vec<Feature>, Vec<String>), CalcError> {
        let viewport_mp = MultiPolygon(vec![bounds.to_polygon()]);
        let diff = flatten(
            self.geometry_breaker
                .execute(|| async move {
                    geometry::difference(&viewport_mp, &revealed)
                        .into_result()
                        .map_err(|e| CalcError::Geometry(e.to_string()))
                })
                .await,
        )?;
        let warnings = diff.warnings.clone();
        match diff.outcome {
            OpOutcome::Computed(fog) => Ok((vec![fallback::fog_feature(&fog)], warnings)),
            // The viewport is fully revealed: empty fog, not an error
            OpOutcome::Empty => Ok((Vec::new(), warnings)),
            OpOutcome::Failed(reason) => Err(CalcError::Geometry(reason)),
        }
    }

    /// Publish a result unless it was superseded or the engine was torn
    /// down.
    fn publish(&self, seq: u64, result: FogComputationResult) {
        if self.cancel.is_cancelled() {
            return;
        }
        let mut last = self.last_applied.load(Ordering::SeqCst);
        loop {
            if seq <= last {
                self.stats.superseded.fetch_add(1, Ordering::Relaxed);
                debug!(seq, last, "stale fog result dropped");
                return;
            }
            match self
                .last_applied
                .compare_exchange(last, seq, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => break,
                Err(current) => last = current,
            }
        }
        // send_replace retains the value even with no receivers, so late
        // subscribers observe the latest result
        self.result_tx.send_replace(Some(result));
    }

    fn lock_viewport(&self) -> std::sync::MutexGuard<'_, Option<(ViewportBounds, u8)>> {
        self.viewport.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1_000.0
}
