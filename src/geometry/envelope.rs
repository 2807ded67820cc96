//! Uniform operation envelope returned by every Geometry Core call.

use geo::MultiPolygon;
use thiserror::Error;

use super::complexity::GeometryComplexity;

/// Which geometry operation produced an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryOp {
    Union,
    Difference,
    Buffer,
}

/// Tri-state operation outcome.
///
/// `Empty` is a legitimate result, not a failure: a difference whose
/// subtrahend fully covers the minuend (the user revealed the whole
/// viewport) produces `Empty` fog. Callers must never conflate it with
/// `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutcome {
    /// The operation produced geometry.
    Computed(MultiPolygon<f64>),
    /// The operation legitimately produced nothing.
    Empty,
    /// The operation could not be completed.
    Failed(String),
}

/// Per-operation metrics, reported for observability.
#[derive(Debug, Clone, PartialEq)]
pub struct OpMetrics {
    pub operation: GeometryOp,
    pub execution_time_ms: f64,
    pub input_complexity: GeometryComplexity,
    /// Complexity of the produced geometry; `None` for `Empty`/`Failed`.
    pub output_complexity: Option<GeometryComplexity>,
    pub had_errors: bool,
    /// True when a degraded strategy (e.g. pairwise union after a failed
    /// whole-collection union) produced the result.
    pub fallback_used: bool,
}

/// The envelope every Geometry Core operation returns.
#[derive(Debug, Clone, PartialEq)]
pub struct OpEnvelope {
    pub outcome: OpOutcome,
    pub metrics: OpMetrics,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl OpEnvelope {
    /// The computed geometry, if any.
    pub fn geometry(&self) -> Option<&MultiPolygon<f64>> {
        match &self.outcome {
            OpOutcome::Computed(mp) => Some(mp),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, OpOutcome::Failed(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.outcome, OpOutcome::Empty)
    }

    /// Convert a failed envelope into an error, passing other outcomes
    /// through. Used where an operation feeds a circuit breaker.
    pub fn into_result(self) -> Result<OpEnvelope, GeometryError> {
        match &self.outcome {
            OpOutcome::Failed(reason) => Err(GeometryError::OperationFailed {
                operation: self.metrics.operation,
                reason: reason.clone(),
            }),
            _ => Ok(self),
        }
    }
}

/// Geometry operation errors, for circuit-breaker accounting.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("{operation:?} failed: {reason}")]
    OperationFailed {
        operation: GeometryOp,
        reason: String,
    },
}
