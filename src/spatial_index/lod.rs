//! Level-of-detail simplification keyed by zoom level.
//!
//! Queries at low zoom return pre-simplified geometry so the Geometry Core
//! never unions more vertices than the viewport can visually distinguish.

use geo::{BoundingRect, MultiPolygon, Simplify};

/// Zoom level at and above which geometry is returned unsimplified.
pub const FULL_DETAIL_ZOOM: u8 = 16;

/// Tile size used to derive the on-screen size of one pixel, in CSS pixels.
const TILE_PIXELS: f64 = 256.0;

/// Douglas-Peucker tolerance in degrees for a zoom level.
///
/// Half a pixel at the given zoom; `None` at high zoom where simplification
/// would be visible.
pub fn tolerance_for_zoom(zoom: u8) -> Option<f64> {
    if zoom >= FULL_DETAIL_ZOOM {
        return None;
    }
    let degrees_per_pixel = 360.0 / (TILE_PIXELS * f64::powi(2.0, zoom as i32));
    Some(degrees_per_pixel / 2.0)
}

/// Simplify geometry appropriately for `zoom`.
///
/// Features smaller than a few tolerance units are returned unchanged:
/// simplifying them would collapse their rings into degenerate shapes.
pub fn simplify_for_zoom(mp: &MultiPolygon<f64>, zoom: u8) -> MultiPolygon<f64> {
    let Some(tolerance) = tolerance_for_zoom(zoom) else {
        return mp.clone();
    };
    let Some(rect) = mp.bounding_rect() else {
        return mp.clone();
    };
    if rect.width().max(rect.height()) < tolerance * 8.0 {
        return mp.clone();
    }
    mp.simplify(&tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::CoordsIter;

    fn circle(radius_deg: f64, points: usize) -> MultiPolygon<f64> {
        let ring: Vec<[f64; 2]> = (0..=points)
            .map(|i| {
                let theta = (i as f64 / points as f64) * std::f64::consts::TAU;
                [radius_deg * theta.cos(), radius_deg * theta.sin()]
            })
            .collect();
        MultiPolygon(vec![crate::feature::rings_to_polygon(&[ring])])
    }

    #[test]
    fn test_high_zoom_has_no_tolerance() {
        assert!(tolerance_for_zoom(16).is_none());
        assert!(tolerance_for_zoom(20).is_none());
    }

    #[test]
    fn test_tolerance_halves_per_zoom_level() {
        let z8 = tolerance_for_zoom(8).unwrap();
        let z9 = tolerance_for_zoom(9).unwrap();
        assert!((z8 / z9 - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_simplify_reduces_vertices_at_low_zoom() {
        let mp = circle(1.0, 512);
        let simplified = simplify_for_zoom(&mp, 6);
        assert!(simplified.coords_count() < mp.coords_count());
    }

    #[test]
    fn test_full_detail_zoom_unchanged() {
        let mp = circle(1.0, 512);
        let out = simplify_for_zoom(&mp, 16);
        assert_eq!(out.coords_count(), mp.coords_count());
    }

    #[test]
    fn test_tiny_feature_not_collapsed() {
        // ~100 m circle at zoom 5: tolerance far exceeds the feature size,
        // so it must be passed through rather than degenerated
        let mp = circle(0.001, 64);
        let out = simplify_for_zoom(&mp, 5);
        assert_eq!(out.coords_count(), mp.coords_count());
    }
}
