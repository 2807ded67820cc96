//! Feature records exchanged with the revealed-area store and the map
//! consumer.
//!
//! The store boundary speaks GeoJSON-shaped records: a geometry payload
//! tagged by type plus an opaque property bag. Non-polygonal payloads are
//! representable on purpose — a corrupted store can hand us a `Point` where
//! a `Polygon` belongs, and sanitation (not deserialization) is where that
//! gets rejected.

use geo::{LineString, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A lon/lat coordinate pair in degrees.
pub type Position = [f64; 2];

/// GeoJSON-style geometry payload.
///
/// Only `Polygon` and `MultiPolygon` are meaningful to the engine; the
/// other variants exist so malformed store records survive deserialization
/// and can be filtered with a warning instead of aborting a whole load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum GeometryPayload {
    Point(Position),
    LineString(Vec<Position>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

impl GeometryPayload {
    /// Whether this payload is a polygonal type the engine can operate on.
    pub fn is_polygonal(&self) -> bool {
        matches!(self, Self::Polygon(_) | Self::MultiPolygon(_))
    }

    /// Human-readable type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Point(_) => "Point",
            Self::LineString(_) => "LineString",
            Self::Polygon(_) => "Polygon",
            Self::MultiPolygon(_) => "MultiPolygon",
        }
    }

    /// Polygon rings as a uniform multi-polygon view.
    ///
    /// Returns `None` for non-polygonal payloads.
    pub fn polygon_rings(&self) -> Option<Vec<Vec<Vec<Position>>>> {
        match self {
            Self::Polygon(rings) => Some(vec![rings.clone()]),
            Self::MultiPolygon(polys) => Some(polys.clone()),
            _ => None,
        }
    }
}

/// A feature record: geometry payload plus opaque properties.
///
/// Features are immutable value types. Operations that transform geometry
/// return new features rather than mutating in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub properties: Map<String, Value>,
    pub geometry: GeometryPayload,
}

impl Feature {
    /// Create a feature from a geometry payload with empty properties.
    pub fn new(geometry: GeometryPayload) -> Self {
        Self {
            properties: Map::new(),
            geometry,
        }
    }

    /// Create a single-ring polygon feature.
    pub fn polygon(exterior: Vec<Position>) -> Self {
        Self::new(GeometryPayload::Polygon(vec![exterior]))
    }

    /// Create a feature from a `geo` multi-polygon.
    pub fn from_multi_polygon(mp: &MultiPolygon<f64>) -> Self {
        Self::new(multi_polygon_to_payload(mp))
    }

    /// Attach a property, builder style.
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }
}

/// A sanitized revealed area: validated polygon geometry plus the original
/// property bag. Produced only by the sanitation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct RevealedArea {
    pub geometry: MultiPolygon<f64>,
    pub properties: Map<String, Value>,
}

impl RevealedArea {
    /// Convert back to a plain feature record.
    pub fn to_feature(&self) -> Feature {
        Feature {
            properties: self.properties.clone(),
            geometry: multi_polygon_to_payload(&self.geometry),
        }
    }
}

/// Result of a fog computation.
///
/// Always a valid value: an engine that cannot compute a precise fog still
/// returns *some* feature collection with `used_fallback` set and the
/// degradation recorded in `warnings`/`errors`.
#[derive(Debug, Clone, PartialEq)]
pub struct FogComputationResult {
    /// Fog feature collection to render. Empty when the whole viewport is
    /// revealed.
    pub features: Vec<Feature>,
    /// Wall-clock time spent computing, in milliseconds.
    pub calculation_time_ms: f64,
    /// True when a degraded fallback tier produced this result.
    pub used_fallback: bool,
    /// True when the spatial index supplied the revealed areas.
    pub used_spatial_index: bool,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

/// Convert a `geo` multi-polygon into a serializable payload.
///
/// A single-polygon input collapses to the `Polygon` variant, matching what
/// consumers expect for the common case.
pub fn multi_polygon_to_payload(mp: &MultiPolygon<f64>) -> GeometryPayload {
    let mut polys: Vec<Vec<Vec<Position>>> = mp.0.iter().map(polygon_rings).collect();
    if polys.len() == 1 {
        GeometryPayload::Polygon(polys.remove(0))
    } else {
        GeometryPayload::MultiPolygon(polys)
    }
}

/// Build a `geo` polygon from exterior + interior rings.
pub(crate) fn rings_to_polygon(rings: &[Vec<Position>]) -> Polygon<f64> {
    let to_line_string = |ring: &Vec<Position>| {
        LineString::from(ring.iter().map(|p| (p[0], p[1])).collect::<Vec<_>>())
    };
    let exterior = rings
        .first()
        .map(to_line_string)
        .unwrap_or_else(|| LineString::new(vec![]));
    let interiors: Vec<LineString<f64>> = rings.iter().skip(1).map(to_line_string).collect();
    Polygon::new(exterior, interiors)
}

fn polygon_rings(poly: &Polygon<f64>) -> Vec<Vec<Position>> {
    let ring_coords =
        |ls: &LineString<f64>| ls.coords().map(|c| [c.x, c.y]).collect::<Vec<Position>>();
    let mut rings = vec![ring_coords(poly.exterior())];
    rings.extend(poly.interiors().iter().map(ring_coords));
    rings
}
