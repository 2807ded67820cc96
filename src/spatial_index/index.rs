//! R-tree index over revealed-area envelopes.

use std::sync::RwLock;

use geo::BoundingRect;
use rstar::{RTree, RTreeObject, AABB};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::lod::simplify_for_zoom;
use super::memory::{self, IndexMemoryStats, OptimizeReport};
use crate::feature::RevealedArea;
use crate::geometry::{measure, sanitize};
use crate::store::{RevealedAreaStore, StoreError};
use crate::viewport::ViewportBounds;

/// Default memory budget for indexed geometry (32 MB).
pub const DEFAULT_MEMORY_BUDGET_BYTES: usize = 32 * 1024 * 1024;

/// Index errors.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The authoritative store could not be read during a refresh
    #[error("index refresh failed: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of a store refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshReport {
    /// Features loaded into the index
    pub loaded: usize,
    /// Store records rejected by sanitation
    pub skipped: usize,
}

/// One indexed revealed area.
#[derive(Debug, Clone)]
pub(super) struct IndexedArea {
    pub(super) seq: u64,
    pub(super) envelope: AABB<[f64; 2]>,
    pub(super) vertex_count: usize,
    pub(super) approx_bytes: usize,
    pub(super) area: RevealedArea,
}

impl IndexedArea {
    pub(super) fn new(seq: u64, area: RevealedArea) -> Self {
        let envelope = area
            .geometry
            .bounding_rect()
            .map(|rect| AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]))
            .unwrap_or_else(|| AABB::from_point([0.0, 0.0]));
        let vertex_count = measure(&area.geometry).vertices;
        Self {
            seq,
            envelope,
            vertex_count,
            approx_bytes: memory::estimate_bytes(vertex_count),
            area,
        }
    }

    /// Coarsen this entry's geometry in place, updating the accounting.
    pub(super) fn resimplify(&mut self, tolerance: f64) {
        self.area.geometry = memory::resimplify_geometry(&self.area.geometry, tolerance);
        self.vertex_count = measure(&self.area.geometry).vertices;
        self.approx_bytes = memory::estimate_bytes(self.vertex_count);
    }
}

impl RTreeObject for IndexedArea {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

struct IndexInner {
    tree: RTree<IndexedArea>,
    next_seq: u64,
    version: u64,
}

/// Bounding-box index over revealed-area features.
///
/// # Thread Safety
///
/// Inner state behind `RwLock`; store rebuilds are constructed outside
/// the lock and swapped in atomically, so readers see either the pre- or
/// post-mutation index, while optimization passes mutate under the write
/// lock so concurrent inserts are never lost. A poisoned lock is
/// recovered rather than
/// propagated — index corruption degrades to "treat as empty" at the
/// orchestrator, never to a crash.
pub struct RevealedAreaIndex {
    inner: RwLock<IndexInner>,
    budget_bytes: usize,
}

impl RevealedAreaIndex {
    /// Create an empty index with the default memory budget.
    pub fn new() -> Self {
        Self::with_memory_budget(DEFAULT_MEMORY_BUDGET_BYTES)
    }

    /// Create an empty index with an explicit memory budget in bytes.
    pub fn with_memory_budget(budget_bytes: usize) -> Self {
        Self {
            inner: RwLock::new(IndexInner {
                tree: RTree::new(),
                next_seq: 0,
                version: 0,
            }),
            budget_bytes,
        }
    }

    /// Insert new revealed areas incrementally.
    ///
    /// Does not rebuild the tree; bumps the dataset version once so cached
    /// fog keyed on the previous version can never be served again.
    pub fn add_features(&self, areas: &[RevealedArea]) -> usize {
        if areas.is_empty() {
            return 0;
        }
        let mut inner = self.write_lock();
        for area in areas {
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.tree.insert(IndexedArea::new(seq, area.clone()));
        }
        inner.version += 1;
        debug!(
            added = areas.len(),
            total = inner.tree.size(),
            version = inner.version,
            "added features to spatial index"
        );
        areas.len()
    }

    /// Revealed areas whose envelope intersects the viewport.
    ///
    /// Deterministic for a given index state: ordered most recent insertion
    /// first, capped at `max_results`. An optional zoom level applies
    /// level-of-detail simplification to the returned geometry.
    pub fn query(
        &self,
        bounds: &ViewportBounds,
        max_results: usize,
        zoom: Option<u8>,
    ) -> Vec<RevealedArea> {
        let inner = self.read_lock();
        let mut hits: Vec<&IndexedArea> = inner
            .tree
            .locate_in_envelope_intersecting(&bounds.to_envelope())
            .collect();
        hits.sort_by(|a, b| b.seq.cmp(&a.seq));
        hits.truncate(max_results);

        hits.into_iter()
            .map(|entry| match zoom {
                Some(z) => RevealedArea {
                    geometry: simplify_for_zoom(&entry.area.geometry, z),
                    properties: entry.area.properties.clone(),
                },
                None => entry.area.clone(),
            })
            .collect()
    }

    /// Rebuild from the authoritative store.
    ///
    /// The replacement tree is built outside the lock and swapped in
    /// atomically. Store records failing sanitation are skipped and
    /// counted, not fatal.
    pub fn refresh_from_store(
        &self,
        store: &dyn RevealedAreaStore,
    ) -> Result<RefreshReport, IndexError> {
        let features = store.list()?;
        let mut skipped = 0;
        let mut entries = Vec::with_capacity(features.len());
        for feature in &features {
            match sanitize(feature) {
                Some(area) => entries.push(area),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            warn!(skipped, "store records failed sanitation during refresh");
        }

        let indexed: Vec<IndexedArea> = entries
            .into_iter()
            .enumerate()
            .map(|(i, area)| IndexedArea::new(i as u64, area))
            .collect();
        let loaded = indexed.len();
        let tree = RTree::bulk_load(indexed);

        let mut inner = self.write_lock();
        inner.tree = tree;
        inner.next_seq = loaded as u64;
        inner.version += 1;
        info!(loaded, skipped, version = inner.version, "spatial index rebuilt from store");
        Ok(RefreshReport { loaded, skipped })
    }

    /// Monotonic dataset version, bumped on every mutation.
    ///
    /// Feeds the result-cache fingerprint.
    pub fn version(&self) -> u64 {
        self.read_lock().version
    }

    pub fn len(&self) -> usize {
        self.read_lock().tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current memory accounting.
    pub fn memory_stats(&self) -> IndexMemoryStats {
        let inner = self.read_lock();
        let entries: Vec<&IndexedArea> = inner.tree.iter().collect();
        IndexMemoryStats {
            feature_count: entries.len(),
            total_vertices: entries.iter().map(|e| e.vertex_count).sum(),
            estimated_bytes: entries.iter().map(|e| e.approx_bytes).sum(),
            budget_bytes: self.budget_bytes,
        }
    }

    /// Relieve memory pressure by evicting or simplifying low-value
    /// entries.
    ///
    /// Normal mode only removes clearly redundant entries; aggressive mode
    /// trades fidelity for a firmer ceiling. Any change bumps the dataset
    /// version.
    pub fn optimize_memory(&self, aggressive: bool) -> OptimizeReport {
        // Hold the write lock across the whole pass; a snapshot-then-swap
        // here would drop features inserted in between
        let mut inner = self.write_lock();
        let entries: Vec<IndexedArea> = inner.tree.iter().cloned().collect();

        let (kept, report) = memory::optimize(entries, aggressive, self.budget_bytes);
        if report.evicted == 0 && report.simplified == 0 {
            return report;
        }

        inner.tree = RTree::bulk_load(kept);
        inner.version += 1;
        info!(
            aggressive,
            evicted = report.evicted,
            simplified = report.simplified,
            bytes_after = report.bytes_after,
            "spatial index memory optimized"
        );
        report
    }

    // Poisoned locks are recovered: a panicking writer leaves the last
    // consistent swap in place, and degrading beats crashing here.
    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, IndexInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, IndexInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for RevealedAreaIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{Feature, GeometryPayload};
    use crate::store::MemoryStore;
    use geo::MultiPolygon;
    use serde_json::Map;

    fn square(min_lng: f64, min_lat: f64, size: f64) -> RevealedArea {
        let ring = vec![
            [min_lng, min_lat],
            [min_lng + size, min_lat],
            [min_lng + size, min_lat + size],
            [min_lng, min_lat + size],
            [min_lng, min_lat],
        ];
        RevealedArea {
            geometry: MultiPolygon(vec![crate::feature::rings_to_polygon(&[ring])]),
            properties: Map::new(),
        }
    }

    fn bounds(min_lng: f64, min_lat: f64, max_lng: f64, max_lat: f64) -> ViewportBounds {
        ViewportBounds::new(min_lng, min_lat, max_lng, max_lat).unwrap()
    }

    #[test]
    fn test_new_index_empty() {
        let index = RevealedAreaIndex::new();
        assert!(index.is_empty());
        assert_eq!(index.version(), 0);
    }

    #[test]
    fn test_add_and_query() {
        let index = RevealedAreaIndex::new();
        index.add_features(&[square(0.0, 0.0, 1.0), square(50.0, 50.0, 1.0)]);

        let hits = index.query(&bounds(-1.0, -1.0, 2.0, 2.0), 100, None);
        assert_eq!(hits.len(), 1);

        let all = index.query(&bounds(-60.0, -60.0, 60.0, 60.0), 100, None);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_query_misses_outside_viewport() {
        let index = RevealedAreaIndex::new();
        index.add_features(&[square(10.0, 10.0, 1.0)]);
        assert!(index.query(&bounds(-5.0, -5.0, 5.0, 5.0), 100, None).is_empty());
    }

    #[test]
    fn test_query_recency_order_and_cap() {
        let index = RevealedAreaIndex::new();
        for i in 0..5 {
            index.add_features(&[square(i as f64 * 0.1, 0.0, 1.0)]);
        }
        let hits = index.query(&bounds(-1.0, -1.0, 2.0, 2.0), 3, None);
        assert_eq!(hits.len(), 3, "results capped at max_results");

        // Most recent insertion first: the last-added square starts at 0.4
        let first_lng = hits[0].geometry.0[0].exterior().coords().next().unwrap().x;
        assert!((first_lng - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_add_bumps_version() {
        let index = RevealedAreaIndex::new();
        let v0 = index.version();
        index.add_features(&[square(0.0, 0.0, 1.0)]);
        assert_eq!(index.version(), v0 + 1);
        // Empty add is a no-op
        index.add_features(&[]);
        assert_eq!(index.version(), v0 + 1);
    }

    #[test]
    fn test_refresh_from_store() {
        let store = MemoryStore::new().with_features(vec![
            square(0.0, 0.0, 1.0).to_feature(),
            square(5.0, 5.0, 1.0).to_feature(),
        ]);
        let index = RevealedAreaIndex::new();
        index.add_features(&[square(100.0, 80.0, 1.0)]);

        let report = index.refresh_from_store(&store).unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(index.len(), 2);
        // The pre-refresh entry is gone
        assert!(index
            .query(&bounds(99.0, 79.0, 102.0, 82.0), 10, None)
            .is_empty());
    }

    #[test]
    fn test_refresh_skips_malformed_records() {
        let store = MemoryStore::new().with_features(vec![
            square(0.0, 0.0, 1.0).to_feature(),
            Feature::new(GeometryPayload::Point([1.0, 2.0])),
        ]);
        let index = RevealedAreaIndex::new();
        let report = index.refresh_from_store(&store).unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_query_applies_lod() {
        let ring: Vec<[f64; 2]> = (0..=512)
            .map(|i| {
                let theta = (i as f64 / 512.0) * std::f64::consts::TAU;
                [theta.cos(), theta.sin()]
            })
            .collect();
        let area = RevealedArea {
            geometry: MultiPolygon(vec![crate::feature::rings_to_polygon(&[ring])]),
            properties: Map::new(),
        };
        let index = RevealedAreaIndex::new();
        index.add_features(&[area]);

        let full = index.query(&bounds(-2.0, -2.0, 2.0, 2.0), 10, Some(16));
        let coarse = index.query(&bounds(-2.0, -2.0, 2.0, 2.0), 10, Some(5));
        let count = |areas: &[RevealedArea]| {
            use geo::CoordsIter;
            areas[0].geometry.coords_count()
        };
        assert!(count(&coarse) < count(&full));
    }

    #[test]
    fn test_memory_stats() {
        let index = RevealedAreaIndex::with_memory_budget(10_000);
        index.add_features(&[square(0.0, 0.0, 1.0)]);
        let stats = index.memory_stats();
        assert_eq!(stats.feature_count, 1);
        assert_eq!(stats.total_vertices, 5);
        assert!(stats.estimated_bytes > 0);
        assert_eq!(stats.budget_bytes, 10_000);
        assert!(!stats.over_budget());
    }

    #[test]
    fn test_optimize_memory_bumps_version_only_on_change() {
        let index = RevealedAreaIndex::new();
        index.add_features(&[square(0.0, 0.0, 1.0), square(50.0, 50.0, 1.0)]);
        let v = index.version();

        // Nothing redundant: version unchanged
        let report = index.optimize_memory(false);
        assert_eq!(report.evicted, 0);
        assert_eq!(index.version(), v);

        // A small old square covered by a newer big one gets evicted
        index.add_features(&[square(-10.0, -10.0, 70.0)]);
        let v2 = index.version();
        let report = index.optimize_memory(false);
        assert!(report.evicted >= 1);
        assert_eq!(index.version(), v2 + 1);
    }

    #[test]
    fn test_optimize_memory_keeps_concurrent_adds() {
        use std::sync::Arc;
        use std::thread;

        let index = Arc::new(RevealedAreaIndex::new());

        // Writer inserts 50 distinct squares in a band no optimize pass
        // can treat as redundant
        let writer_index = Arc::clone(&index);
        let writer = thread::spawn(move || {
            for i in 0..50 {
                writer_index.add_features(&[square(-170.0 + i as f64 * 0.6, -50.0, 0.5)]);
            }
        });

        // Meanwhile, repeated optimize passes evict covered entries
        for i in 0..20 {
            let lng = (i * 2) as f64;
            index.add_features(&[square(lng, 10.0, 1.0)]);
            index.add_features(&[square(lng - 1.0, 9.0, 5.0)]);
            index.optimize_memory(false);
        }
        writer.join().expect("writer thread panicked");

        // Every concurrently-added square survives
        let hits = index.query(&bounds(-171.0, -51.0, -139.0, -49.0), 100, None);
        assert_eq!(hits.len(), 50);
    }

    #[test]
    fn test_concurrent_reads_and_writes() {
        use std::sync::Arc;
        use std::thread;

        let index = Arc::new(RevealedAreaIndex::new());

        let writer_index = Arc::clone(&index);
        let writer = thread::spawn(move || {
            for i in 0..50 {
                writer_index.add_features(&[square(i as f64, 0.0, 0.5)]);
            }
        });

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let idx = Arc::clone(&index);
                thread::spawn(move || {
                    for _ in 0..50 {
                        // May see partial data; must never panic or tear
                        let _ = idx.query(&bounds(-1.0, -1.0, 60.0, 1.0), 100, None);
                    }
                })
            })
            .collect();

        writer.join().expect("writer thread panicked");
        for h in handles {
            h.join().expect("reader thread panicked");
        }
        assert_eq!(index.len(), 50);
    }
}
