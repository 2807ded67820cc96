//! Memory accounting and pressure relief for the spatial index.

use rstar::{Envelope, AABB};

use super::index::IndexedArea;
use crate::geometry;

/// Estimated bytes per stored coordinate pair.
const BYTES_PER_VERTEX: usize = 16;

/// Fixed per-feature overhead estimate (ring vectors, property bag, R-tree
/// node share).
const BYTES_PER_FEATURE: usize = 256;

/// Vertex count above which aggressive optimization simplifies a feature.
const AGGRESSIVE_SIMPLIFY_VERTICES: usize = 256;

/// Coarse tolerance (degrees) used by aggressive simplification.
const AGGRESSIVE_SIMPLIFY_TOLERANCE: f64 = 1e-4;

/// Snapshot of index memory usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexMemoryStats {
    pub feature_count: usize,
    pub total_vertices: usize,
    pub estimated_bytes: usize,
    pub budget_bytes: usize,
}

impl IndexMemoryStats {
    pub fn over_budget(&self) -> bool {
        self.estimated_bytes > self.budget_bytes
    }
}

/// What an optimization pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptimizeReport {
    pub evicted: usize,
    pub simplified: usize,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

pub(super) fn estimate_bytes(vertex_count: usize) -> usize {
    BYTES_PER_FEATURE + vertex_count * BYTES_PER_VERTEX
}

pub(super) fn total_bytes(entries: &[IndexedArea]) -> usize {
    entries.iter().map(|e| e.approx_bytes).sum()
}

/// Reduce a set of index entries under memory pressure.
///
/// Normal mode only drops clearly redundant entries: an entry whose
/// envelope is fully covered by a newer entry's envelope contributes
/// nothing a query could distinguish. Aggressive mode additionally
/// simplifies high-vertex geometries and evicts oldest-first until the
/// estimate fits the budget.
pub(super) fn optimize(
    mut entries: Vec<IndexedArea>,
    aggressive: bool,
    budget_bytes: usize,
) -> (Vec<IndexedArea>, OptimizeReport) {
    let bytes_before = total_bytes(&entries);
    let mut report = OptimizeReport {
        bytes_before,
        ..Default::default()
    };

    // Redundancy pass: envelope fully covered by a newer, larger entry.
    let covered: Vec<bool> = entries
        .iter()
        .map(|e| {
            entries.iter().any(|other| {
                other.seq > e.seq && covers(&other.envelope, &e.envelope)
            })
        })
        .collect();
    let mut idx = 0;
    entries.retain(|_| {
        let keep = !covered[idx];
        idx += 1;
        keep
    });
    report.evicted = covered.iter().filter(|c| **c).count();

    if aggressive {
        for entry in entries.iter_mut() {
            if entry.vertex_count > AGGRESSIVE_SIMPLIFY_VERTICES {
                entry.resimplify(AGGRESSIVE_SIMPLIFY_TOLERANCE);
                report.simplified += 1;
            }
        }

        // Oldest-first eviction until under budget
        entries.sort_by_key(|e| e.seq);
        while total_bytes(&entries) > budget_bytes && !entries.is_empty() {
            entries.remove(0);
            report.evicted += 1;
        }
    }

    report.bytes_after = total_bytes(&entries);
    (entries, report)
}

fn covers(outer: &AABB<[f64; 2]>, inner: &AABB<[f64; 2]>) -> bool {
    outer.contains_envelope(inner)
}

pub(super) fn resimplify_geometry(
    geometry: &geo::MultiPolygon<f64>,
    tolerance: f64,
) -> geo::MultiPolygon<f64> {
    geometry::simplify(geometry, tolerance)
}

#[cfg(test)]
mod tests {
    use super::super::index::IndexedArea;
    use super::*;
    use crate::feature::RevealedArea;
    use geo::MultiPolygon;
    use serde_json::Map;

    fn entry(seq: u64, min: f64, max: f64, points: usize) -> IndexedArea {
        let ring: Vec<[f64; 2]> = (0..points)
            .map(|i| {
                let theta = (i as f64 / points as f64) * std::f64::consts::TAU;
                let mid = (min + max) / 2.0;
                let r = (max - min) / 2.0;
                [mid + r * theta.cos(), mid + r * theta.sin()]
            })
            .chain(std::iter::once({
                let mid = (min + max) / 2.0;
                [mid + (max - min) / 2.0, mid]
            }))
            .collect();
        let area = RevealedArea {
            geometry: MultiPolygon(vec![crate::feature::rings_to_polygon(&[ring])]),
            properties: Map::new(),
        };
        IndexedArea::new(seq, area)
    }

    #[test]
    fn test_estimate_scales_with_vertices() {
        assert!(estimate_bytes(1_000) > estimate_bytes(10));
        assert_eq!(estimate_bytes(0), BYTES_PER_FEATURE);
    }

    #[test]
    fn test_normal_mode_keeps_distinct_entries() {
        let entries = vec![entry(1, 0.0, 1.0, 16), entry(2, 5.0, 6.0, 16)];
        let (kept, report) = optimize(entries, false, usize::MAX);
        assert_eq!(kept.len(), 2);
        assert_eq!(report.evicted, 0);
        assert_eq!(report.simplified, 0);
    }

    #[test]
    fn test_normal_mode_evicts_covered_older_entry() {
        // Entry 1 sits entirely inside entry 2's envelope and is older
        let entries = vec![entry(1, 2.0, 3.0, 16), entry(2, 0.0, 10.0, 16)];
        let (kept, report) = optimize(entries, false, usize::MAX);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].seq, 2);
        assert_eq!(report.evicted, 1);
    }

    #[test]
    fn test_newer_covered_entry_survives() {
        // Coverage only evicts the *older* of the pair
        let entries = vec![entry(2, 2.0, 3.0, 16), entry(1, 0.0, 10.0, 16)];
        let (kept, _) = optimize(entries, false, usize::MAX);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_aggressive_mode_simplifies_large_features() {
        // Small radius keeps chord deviation within the coarse tolerance
        // so simplification can actually drop vertices
        let entries = vec![entry(1, 0.0, 1.0, 600)];
        let before = entries[0].vertex_count;
        let (kept, report) = optimize(entries, true, usize::MAX);
        assert_eq!(report.simplified, 1);
        assert!(kept[0].vertex_count < before);
    }

    #[test]
    fn test_aggressive_mode_evicts_oldest_to_budget() {
        let entries = vec![
            entry(1, 0.0, 1.0, 32),
            entry(2, 5.0, 6.0, 32),
            entry(3, 10.0, 11.0, 32),
        ];
        let one_entry_budget = estimate_bytes(33);
        let (kept, report) = optimize(entries, true, one_entry_budget);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].seq, 3, "newest entry survives");
        assert_eq!(report.evicted, 2);
        assert!(report.bytes_after <= one_entry_budget);
    }
}
