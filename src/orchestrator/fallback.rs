//! Degraded fog construction: the shapes returned when precise computation
//! is unavailable.

use serde_json::Value;

use crate::feature::{Feature, FogComputationResult};
use crate::viewport::ViewportBounds;

/// Property key marking engine-produced fog features.
pub const FOG_KIND_PROPERTY: &str = "kind";

/// Wrap computed fog geometry as a renderable feature.
pub(super) fn fog_feature(geometry: &geo::MultiPolygon<f64>) -> Feature {
    Feature::from_multi_polygon(geometry)
        .with_property(FOG_KIND_PROPERTY, Value::String("fog".to_string()))
}

/// A fully-fogged viewport rectangle: no holes cut.
pub(super) fn viewport_fog(bounds: &ViewportBounds) -> Feature {
    fog_feature(&geo::MultiPolygon(vec![bounds.to_polygon()]))
}

/// A world-covering fog rectangle, for when no viewport is known at all.
pub(super) fn world_fog() -> Feature {
    viewport_fog(&ViewportBounds::world())
}

/// The absolute last resort: an empty feature collection.
///
/// Still a valid result — the consumer renders nothing fogged rather than
/// receiving an error.
pub(super) fn empty_result(
    calculation_time_ms: f64,
    warnings: Vec<String>,
    errors: Vec<String>,
) -> FogComputationResult {
    FogComputationResult {
        features: vec![],
        calculation_time_ms,
        used_fallback: true,
        used_spatial_index: false,
        warnings,
        errors,
    }
}
