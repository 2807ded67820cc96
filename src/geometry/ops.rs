//! Set-algebra operations: union, difference, buffer.
//!
//! The boolean-ops backend can panic on pathological input, so every
//! backend call runs under `catch_unwind` and failures surface as `Failed`
//! outcomes. Union prefers the whole-collection path and degrades to
//! pairwise folding, skipping members that poison the fold — at least one
//! good feature out of many beats all-or-nothing.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use geo::{Area, BooleanOps, MultiPolygon, Simplify};
use tracing::{debug, warn};

use super::complexity::{measure, ComplexityLevel, GeometryComplexity};
use super::envelope::{GeometryOp, OpEnvelope, OpMetrics, OpOutcome};
use super::sanitize::sanitize;
use crate::feature::{Feature, RevealedArea};

/// Number of segments used to approximate a buffered point's circle.
pub const BUFFER_SEGMENTS: usize = 64;

/// Meters per degree of latitude (and of longitude at the equator).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Douglas-Peucker tolerance (degrees, ~1 m) applied to `High` complexity
/// inputs before union/difference.
const PRESIMPLIFY_TOLERANCE: f64 = 1e-5;

/// Area below which a boolean-op result is treated as empty, absorbing
/// backend slivers.
const EMPTY_AREA_EPSILON: f64 = 1e-12;

/// Union raw feature records, filtering invalid members with warnings.
///
/// Sanitation failures never abort the whole operation; only a collection
/// with no usable member at all fails.
pub fn union_features(features: &[Feature]) -> OpEnvelope {
    let mut warnings = Vec::new();
    let mut areas = Vec::with_capacity(features.len());
    for (i, feature) in features.iter().enumerate() {
        match sanitize(feature) {
            Some(area) => areas.push(area),
            None => warnings.push(format!(
                "feature {i} rejected: {} geometry failed sanitation",
                feature.geometry.type_name()
            )),
        }
    }
    union_with_warnings(&areas, warnings)
}

/// Union already-sanitized revealed areas.
pub fn union_areas(areas: &[RevealedArea]) -> OpEnvelope {
    union_with_warnings(areas, Vec::new())
}

fn union_with_warnings(areas: &[RevealedArea], mut warnings: Vec<String>) -> OpEnvelope {
    let start = Instant::now();
    let mut errors = Vec::new();

    if areas.is_empty() {
        errors.push("union of empty feature collection".to_string());
        return finish(
            GeometryOp::Union,
            OpOutcome::Failed(errors[0].clone()),
            GeometryComplexity::empty(),
            start,
            false,
            errors,
            warnings,
        );
    }

    let input_complexity = areas
        .iter()
        .map(|a| measure(&a.geometry))
        .fold(GeometryComplexity::empty(), |acc, c| acc.combine(c));

    // Single member: no geometry-library round trip.
    if areas.len() == 1 {
        return finish(
            GeometryOp::Union,
            OpOutcome::Computed(areas[0].geometry.clone()),
            input_complexity,
            start,
            false,
            errors,
            warnings,
        );
    }

    // Large inputs are simplified within tolerance before the expensive
    // union; cost grows superlinearly with vertex count.
    let geometries: Vec<MultiPolygon<f64>> = if input_complexity.level == ComplexityLevel::High {
        warnings.push(format!(
            "input complexity high ({} vertices), simplified before union",
            input_complexity.vertices
        ));
        areas
            .iter()
            .map(|a| simplify(&a.geometry, PRESIMPLIFY_TOLERANCE))
            .collect()
    } else {
        areas.iter().map(|a| a.geometry.clone()).collect()
    };

    // Whole-collection union first, member-skipping fold as the degraded
    // path.
    let mut fallback_used = false;
    let unioned = match catch_unwind(AssertUnwindSafe(|| whole_union(&geometries))) {
        Ok(mp) => Some(mp),
        Err(_) => {
            warn!(
                members = geometries.len(),
                "whole-collection union panicked, falling back to pairwise fold"
            );
            warnings.push("whole-collection union failed, used pairwise fold".to_string());
            fallback_used = true;
            pairwise_union(&geometries, &mut warnings)
        }
    };

    let outcome = match unioned {
        Some(mp) if !mp.0.is_empty() => OpOutcome::Computed(mp),
        Some(_) => OpOutcome::Empty,
        None => {
            let reason = "union failed for every member".to_string();
            errors.push(reason.clone());
            OpOutcome::Failed(reason)
        }
    };
    finish(
        GeometryOp::Union,
        outcome,
        input_complexity,
        start,
        fallback_used,
        errors,
        warnings,
    )
}

/// Union the whole collection, all-or-nothing. A panic anywhere aborts
/// the fold; the caller recovers with [`pairwise_union`].
fn whole_union(geometries: &[MultiPolygon<f64>]) -> MultiPolygon<f64> {
    let mut members = geometries.iter();
    let first = members.next().cloned().unwrap_or_else(|| MultiPolygon(vec![]));
    members.fold(first, |acc, mp| acc.union(mp))
}

/// Fold members pairwise, skipping any member that poisons the fold.
fn pairwise_union(
    geometries: &[MultiPolygon<f64>],
    warnings: &mut Vec<String>,
) -> Option<MultiPolygon<f64>> {
    let mut acc: Option<MultiPolygon<f64>> = None;
    for (i, mp) in geometries.iter().enumerate() {
        acc = match acc {
            None => Some(mp.clone()),
            Some(current) => match catch_unwind(AssertUnwindSafe(|| current.union(mp))) {
                Ok(merged) => Some(merged),
                Err(_) => {
                    warnings.push(format!("member {i} skipped: union panicked"));
                    // Keep what we have; the skipped member is lost
                    Some(current)
                }
            },
        };
    }
    acc
}

/// Compute `minuend - subtrahend`.
///
/// A subtrahend fully covering the minuend is the legitimate `Empty`
/// outcome (the user revealed the entire viewport), never an error.
pub fn difference(minuend: &MultiPolygon<f64>, subtrahend: &MultiPolygon<f64>) -> OpEnvelope {
    let start = Instant::now();
    let input_complexity = measure(minuend).combine(measure(subtrahend));

    let subtrahend = if input_complexity.level == ComplexityLevel::High {
        simplify(subtrahend, PRESIMPLIFY_TOLERANCE)
    } else {
        subtrahend.clone()
    };

    match catch_unwind(AssertUnwindSafe(|| minuend.difference(&subtrahend))) {
        Ok(mp) => {
            let outcome = if mp.0.is_empty() || mp.unsigned_area() < EMPTY_AREA_EPSILON {
                OpOutcome::Empty
            } else {
                OpOutcome::Computed(mp)
            };
            finish(
                GeometryOp::Difference,
                outcome,
                input_complexity,
                start,
                false,
                Vec::new(),
                Vec::new(),
            )
        }
        Err(_) => {
            let reason = "difference operation panicked in geometry backend".to_string();
            finish(
                GeometryOp::Difference,
                OpOutcome::Failed(reason.clone()),
                input_complexity,
                start,
                false,
                vec![reason],
                Vec::new(),
            )
        }
    }
}

/// Buffer a point into a circular polygon of `distance_m` meters radius.
///
/// Longitude radius is latitude-corrected; coordinates are clamped to the
/// valid lon/lat range near map edges. Circles straddling the antimeridian
/// are flattened against the +-180 edge rather than split into two parts,
/// matching how the viewport model treats longitude as a plain interval.
pub fn buffer(lng: f64, lat: f64, distance_m: f64) -> OpEnvelope {
    let start = Instant::now();

    let reject = |reason: String| {
        finish(
            GeometryOp::Buffer,
            OpOutcome::Failed(reason.clone()),
            GeometryComplexity::empty(),
            start,
            false,
            vec![reason],
            Vec::new(),
        )
    };

    if !lng.is_finite() || !lat.is_finite() {
        return reject(format!("buffer point is not finite: ({lng}, {lat})"));
    }
    if !(-180.0..=180.0).contains(&lng) || !(-90.0..=90.0).contains(&lat) {
        return reject(format!("buffer point out of range: ({lng}, {lat})"));
    }
    if !distance_m.is_finite() || distance_m <= 0.0 {
        return reject(format!("buffer distance must be positive: {distance_m}"));
    }

    let radius_lat = distance_m / METERS_PER_DEGREE;
    // cos(lat) shrinks toward the poles; clamp to keep the radius bounded
    let radius_lng = distance_m / (METERS_PER_DEGREE * lat.to_radians().cos().max(0.01));

    let mut ring: Vec<[f64; 2]> = (0..BUFFER_SEGMENTS)
        .map(|i| {
            let theta = (i as f64 / BUFFER_SEGMENTS as f64) * std::f64::consts::TAU;
            [
                (lng + radius_lng * theta.cos()).clamp(-180.0, 180.0),
                (lat + radius_lat * theta.sin()).clamp(-90.0, 90.0),
            ]
        })
        .collect();
    // Close bit-exactly; trig at TAU does not land back on the start
    ring.push(ring[0]);

    let polygon = crate::feature::rings_to_polygon(&[ring]);
    let mp = MultiPolygon(vec![polygon]);
    debug!(lng, lat, distance_m, "buffered point into circle");
    finish(
        GeometryOp::Buffer,
        OpOutcome::Computed(mp),
        GeometryComplexity::empty(),
        start,
        false,
        Vec::new(),
        Vec::new(),
    )
}

/// Douglas-Peucker simplification within `tolerance` degrees.
pub fn simplify(mp: &MultiPolygon<f64>, tolerance: f64) -> MultiPolygon<f64> {
    mp.simplify(&tolerance)
}

#[allow(clippy::too_many_arguments)]
fn finish(
    operation: GeometryOp,
    outcome: OpOutcome,
    input_complexity: GeometryComplexity,
    start: Instant,
    fallback_used: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
) -> OpEnvelope {
    let output_complexity = match &outcome {
        OpOutcome::Computed(mp) => Some(measure(mp)),
        _ => None,
    };
    OpEnvelope {
        metrics: OpMetrics {
            operation,
            execution_time_ms: start.elapsed().as_secs_f64() * 1_000.0,
            input_complexity,
            output_complexity,
            had_errors: !errors.is_empty(),
            fallback_used,
        },
        outcome,
        errors,
        warnings,
    }
}
