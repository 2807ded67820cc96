//! Geometry complexity classification.
//!
//! Union/difference cost grows superlinearly with ring complexity, so the
//! engine measures inputs up front and simplifies `High` inputs before
//! expensive operations.

use geo::{CoordsIter, MultiPolygon};

/// Vertex count below which geometry is considered `Low` complexity.
pub const LOW_VERTEX_THRESHOLD: usize = 200;

/// Vertex count below which geometry is considered `Medium` complexity.
pub const MEDIUM_VERTEX_THRESHOLD: usize = 2_000;

/// Coarse complexity level driving fast-vs-accurate mode selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ComplexityLevel {
    Low,
    Medium,
    High,
}

/// Measured complexity of a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryComplexity {
    pub vertices: usize,
    pub rings: usize,
    pub level: ComplexityLevel,
}

impl GeometryComplexity {
    /// Complexity of empty input.
    pub fn empty() -> Self {
        Self {
            vertices: 0,
            rings: 0,
            level: ComplexityLevel::Low,
        }
    }

    /// Combine measurements from several inputs (e.g. all members of a
    /// union).
    pub fn combine(self, other: Self) -> Self {
        from_counts(self.vertices + other.vertices, self.rings + other.rings)
    }
}

/// Measure a multi-polygon's complexity.
pub fn measure(mp: &MultiPolygon<f64>) -> GeometryComplexity {
    let vertices = mp.coords_count();
    let rings = mp
        .0
        .iter()
        .map(|poly| 1 + poly.interiors().len())
        .sum::<usize>();
    from_counts(vertices, rings)
}

fn from_counts(vertices: usize, rings: usize) -> GeometryComplexity {
    let level = if vertices < LOW_VERTEX_THRESHOLD {
        ComplexityLevel::Low
    } else if vertices < MEDIUM_VERTEX_THRESHOLD {
        ComplexityLevel::Medium
    } else {
        ComplexityLevel::High
    };
    GeometryComplexity {
        vertices,
        rings,
        level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, Polygon};

    fn circle(points: usize) -> MultiPolygon<f64> {
        let mut ring: Vec<(f64, f64)> = (0..points)
            .map(|i| {
                let theta = (i as f64 / points as f64) * std::f64::consts::TAU;
                (theta.cos(), theta.sin())
            })
            .collect();
        // Close bit-exactly so the polygon constructor does not append
        // another coordinate
        ring.push(ring[0]);
        MultiPolygon(vec![Polygon::new(LineString::from(ring), vec![])])
    }

    #[test]
    fn test_low_complexity() {
        let c = measure(&circle(16));
        assert_eq!(c.level, ComplexityLevel::Low);
        assert_eq!(c.rings, 1);
        assert_eq!(c.vertices, 17);
    }

    #[test]
    fn test_medium_complexity() {
        let c = measure(&circle(500));
        assert_eq!(c.level, ComplexityLevel::Medium);
    }

    #[test]
    fn test_high_complexity() {
        let c = measure(&circle(5_000));
        assert_eq!(c.level, ComplexityLevel::High);
    }

    #[test]
    fn test_ring_count_includes_interiors() {
        let outer = LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 0.0)]);
        let hole = LineString::from(vec![(1.0, 1.0), (2.0, 1.0), (2.0, 2.0), (1.0, 1.0)]);
        let mp = MultiPolygon(vec![Polygon::new(outer, vec![hole])]);
        assert_eq!(measure(&mp).rings, 2);
    }

    #[test]
    fn test_combine_sums_counts() {
        let a = measure(&circle(150));
        let b = measure(&circle(150));
        let combined = a.combine(b);
        assert_eq!(combined.vertices, a.vertices + b.vertices);
        assert_eq!(combined.level, ComplexityLevel::Medium);
    }

    #[test]
    fn test_empty() {
        let c = GeometryComplexity::empty();
        assert_eq!(c.vertices, 0);
        assert_eq!(c.level, ComplexityLevel::Low);
    }
}
