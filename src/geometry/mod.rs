//! Geometry Core — pure, deterministic set algebra over polygon features.
//!
//! Every operation returns the same structurally-typed [`OpEnvelope`], so
//! the orchestrator composes operations without per-operation special
//! casing. Operations never panic on bad input: invalid geometry is
//! rejected, filtered, or reported, and backend panics are caught and
//! converted into `Failed` outcomes.

mod complexity;
mod envelope;
mod ops;
mod sanitize;

pub use complexity::{measure, ComplexityLevel, GeometryComplexity};
pub use envelope::{GeometryError, GeometryOp, OpEnvelope, OpMetrics, OpOutcome};
pub use ops::{buffer, difference, simplify, union_areas, union_features};
pub use sanitize::{sanitize, sanitize_geometry, validate, ValidationReport};
