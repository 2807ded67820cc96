//! Viewport bounds: the rectangular lon/lat region currently visible on the
//! map.
//!
//! Construction validates every invariant up front so downstream geometry
//! code never sees a degenerate rectangle. An invalid bounds is a rejection
//! signal to the caller, never a panic.

use geo::{Coord, Polygon, Rect};
use rstar::AABB;
use thiserror::Error;

/// Errors rejecting an invalid viewport.
#[derive(Debug, Error)]
pub enum ViewportError {
    /// A coordinate is NaN or infinite
    #[error("viewport coordinate is not finite: ({min_lng}, {min_lat}, {max_lng}, {max_lat})")]
    NonFinite {
        min_lng: f64,
        min_lat: f64,
        max_lng: f64,
        max_lat: f64,
    },

    /// Min/max ordering violated on an axis
    #[error("viewport is inverted or empty: min ({min}) must be < max ({max}) on {axis}")]
    Inverted {
        axis: &'static str,
        min: f64,
        max: f64,
    },

    /// Longitude outside [-180, 180] or latitude outside [-90, 90]
    #[error("viewport coordinate out of range: {axis} = {value}")]
    OutOfRange { axis: &'static str, value: f64 },
}

/// Rectangular lon/lat bounds, validated at construction.
///
/// Invariants: `min_lng < max_lng`, `min_lat < max_lat`, all coordinates
/// finite, longitudes in [-180, 180], latitudes in [-90, 90].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportBounds {
    pub min_lng: f64,
    pub min_lat: f64,
    pub max_lng: f64,
    pub max_lat: f64,
}

impl ViewportBounds {
    /// Create validated bounds.
    pub fn new(
        min_lng: f64,
        min_lat: f64,
        max_lng: f64,
        max_lat: f64,
    ) -> Result<Self, ViewportError> {
        let values = [min_lng, min_lat, max_lng, max_lat];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ViewportError::NonFinite {
                min_lng,
                min_lat,
                max_lng,
                max_lat,
            });
        }
        for (axis, value, limit) in [
            ("min_lng", min_lng, 180.0),
            ("max_lng", max_lng, 180.0),
            ("min_lat", min_lat, 90.0),
            ("max_lat", max_lat, 90.0),
        ] {
            if value < -limit || value > limit {
                return Err(ViewportError::OutOfRange { axis, value });
            }
        }
        if min_lng >= max_lng {
            return Err(ViewportError::Inverted {
                axis: "longitude",
                min: min_lng,
                max: max_lng,
            });
        }
        if min_lat >= max_lat {
            return Err(ViewportError::Inverted {
                axis: "latitude",
                min: min_lat,
                max: max_lat,
            });
        }
        Ok(Self {
            min_lng,
            min_lat,
            max_lng,
            max_lat,
        })
    }

    /// The whole-world bounds, used as the coarsest fog fallback.
    pub fn world() -> Self {
        Self {
            min_lng: -180.0,
            min_lat: -90.0,
            max_lng: 180.0,
            max_lat: 90.0,
        }
    }

    /// The viewport as a closed `geo` rectangle polygon.
    pub fn to_polygon(&self) -> Polygon<f64> {
        Rect::new(
            Coord {
                x: self.min_lng,
                y: self.min_lat,
            },
            Coord {
                x: self.max_lng,
                y: self.max_lat,
            },
        )
        .to_polygon()
    }

    /// The viewport as an R-tree query envelope.
    pub fn to_envelope(&self) -> AABB<[f64; 2]> {
        AABB::from_corners([self.min_lng, self.min_lat], [self.max_lng, self.max_lat])
    }

    /// Width in degrees of longitude.
    pub fn width(&self) -> f64 {
        self.max_lng - self.min_lng
    }

    /// Height in degrees of latitude.
    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }
}
