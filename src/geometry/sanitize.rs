//! Defensive validation and sanitation of feature geometry.
//!
//! `sanitize` collapses invalid input to `None` (never panics);
//! `validate` runs the same checks but reports structured diagnostics.
//! Warnings (e.g. an unclosed ring, which `sanitize` closes itself) do not
//! invalidate — only notify.

use geo::MultiPolygon;

use crate::feature::{rings_to_polygon, Feature, GeometryPayload, Position, RevealedArea};

/// Minimum coordinate count for a closed ring (triangle + closing point).
pub const MIN_RING_POINTS: usize = 4;

/// Structured validation diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Sanitize a feature into a revealed area.
///
/// Rejects non-polygonal types and malformed rings; closes rings whose
/// first and last coordinates differ. Invalid input yields `None`.
pub fn sanitize(feature: &Feature) -> Option<RevealedArea> {
    let geometry = sanitize_geometry(&feature.geometry)?;
    Some(RevealedArea {
        geometry,
        properties: feature.properties.clone(),
    })
}

/// Sanitize a bare geometry payload.
///
/// The feature-wrapping counterpart of [`sanitize`], for callers holding a
/// payload without a property bag.
pub fn sanitize_geometry(payload: &GeometryPayload) -> Option<MultiPolygon<f64>> {
    let polys = payload.polygon_rings()?;
    if polys.is_empty() {
        return None;
    }

    let mut clean_polys = Vec::with_capacity(polys.len());
    for rings in &polys {
        if rings.is_empty() {
            return None;
        }
        let mut clean_rings = Vec::with_capacity(rings.len());
        for ring in rings {
            clean_rings.push(sanitize_ring(ring)?);
        }
        clean_polys.push(rings_to_polygon(&clean_rings));
    }
    Some(MultiPolygon(clean_polys))
}

/// Validate a feature, reporting diagnostics instead of collapsing to
/// `None`.
pub fn validate(feature: &Feature) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    match feature.geometry.polygon_rings() {
        None => {
            errors.push(format!(
                "geometry type {} is not polygonal",
                feature.geometry.type_name()
            ));
        }
        Some(polys) if polys.is_empty() => {
            errors.push("geometry has no polygons".to_string());
        }
        Some(polys) => {
            for (p, rings) in polys.iter().enumerate() {
                if rings.is_empty() {
                    errors.push(format!("polygon {p} has no rings"));
                    continue;
                }
                for (r, ring) in rings.iter().enumerate() {
                    validate_ring(ring, p, r, &mut errors, &mut warnings);
                }
            }
        }
    }

    ValidationReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Sanitize one ring: finite/in-range coordinates, closure, minimum size.
fn sanitize_ring(ring: &[Position]) -> Option<Vec<Position>> {
    for &[lng, lat] in ring {
        if !lng.is_finite() || !lat.is_finite() {
            return None;
        }
        if !(-180.0..=180.0).contains(&lng) || !(-90.0..=90.0).contains(&lat) {
            return None;
        }
    }

    let mut closed = ring.to_vec();
    if closed.first() != closed.last() {
        if let Some(&first) = closed.first() {
            closed.push(first);
        }
    }
    if closed.len() < MIN_RING_POINTS {
        return None;
    }
    Some(closed)
}

fn validate_ring(
    ring: &[Position],
    poly_idx: usize,
    ring_idx: usize,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    let label = format!("polygon {poly_idx} ring {ring_idx}");

    for &[lng, lat] in ring {
        if !lng.is_finite() || !lat.is_finite() {
            errors.push(format!("{label} has a non-finite coordinate"));
            return;
        }
        if !(-180.0..=180.0).contains(&lng) || !(-90.0..=90.0).contains(&lat) {
            errors.push(format!(
                "{label} has an out-of-range coordinate ({lng}, {lat})"
            ));
            return;
        }
    }

    let closed = ring.first() == ring.last();
    let effective_len = if closed { ring.len() } else { ring.len() + 1 };
    if effective_len < MIN_RING_POINTS {
        errors.push(format!(
            "{label} has {} points, need at least {MIN_RING_POINTS}",
            ring.len()
        ));
        return;
    }
    if !closed {
        warnings.push(format!("{label} is not closed"));
    }
}
