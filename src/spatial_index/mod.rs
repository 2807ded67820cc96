//! Spatial index over revealed-area features.
//!
//! Answers "which revealed areas intersect this viewport" without scanning
//! the full set, via an R-tree over feature envelopes. Mutation follows the
//! build-outside-the-lock, swap-atomically discipline: readers see either
//! the old or the new index state, never a torn intermediate one.

mod index;
mod lod;
mod memory;

pub use index::{IndexError, RefreshReport, RevealedAreaIndex, DEFAULT_MEMORY_BUDGET_BYTES};
pub use lod::{simplify_for_zoom, tolerance_for_zoom};
pub use memory::{IndexMemoryStats, OptimizeReport};
