//! Cache key fingerprinting.
//!
//! A key combines the viewport bounds rounded to a quantization grid (to
//! absorb sub-pixel jitter between re-renders), the zoom level, and the
//! spatial index's dataset version. Any mutation of the revealed-area set
//! bumps the version, so a stale key can never collide with fresh state.

use rstar::AABB;

use crate::viewport::ViewportBounds;

/// Quantization step in degrees (~11 m); sub-pixel viewport jitter
/// collapses onto the same key.
pub const QUANTIZATION_DEGREES: f64 = 1e-4;

/// Fingerprint identifying one (viewport, zoom, dataset-state) request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FogCacheKey {
    quantized_bounds: [i64; 4],
    zoom: u8,
    dataset_version: u64,
}

impl FogCacheKey {
    pub fn new(bounds: &ViewportBounds, zoom: u8, dataset_version: u64) -> Self {
        let q = |v: f64| (v / QUANTIZATION_DEGREES).round() as i64;
        Self {
            quantized_bounds: [
                q(bounds.min_lng),
                q(bounds.min_lat),
                q(bounds.max_lng),
                q(bounds.max_lat),
            ],
            zoom,
            dataset_version,
        }
    }

    /// The viewport envelope this key was derived from, reconstructed from
    /// the quantized bounds. Used by scoped invalidation.
    pub fn viewport_envelope(&self) -> AABB<[f64; 2]> {
        let d = |v: i64| v as f64 * QUANTIZATION_DEGREES;
        AABB::from_corners(
            [d(self.quantized_bounds[0]), d(self.quantized_bounds[1])],
            [d(self.quantized_bounds[2]), d(self.quantized_bounds[3])],
        )
    }

    pub fn dataset_version(&self) -> u64 {
        self.dataset_version
    }
}
