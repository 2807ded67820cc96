//! FogMap - fog-of-war geometry engine for map reveal
//!
//! Computes the fog polygons left after revealed areas are carved out of
//! a map viewport: buffering visited locations into revealed circles,
//! unioning them, and differencing the result from the viewport
//! rectangle. Built for interactive map frontends where viewport changes
//! arrive in bursts and geometry backends occasionally fail.
//!
//! # High-Level API
//!
//! The [`orchestrator`] module provides the engine facade:
//!
//! ```ignore
//! use std::sync::Arc;
//! use fogmap::config::EngineConfig;
//! use fogmap::orchestrator::FogOrchestrator;
//! use fogmap::store::MemoryStore;
//! use fogmap::viewport::ViewportBounds;
//!
//! let engine = FogOrchestrator::new(Arc::new(MemoryStore::new()), EngineConfig::default());
//! engine.initialize();
//!
//! let bounds = ViewportBounds::new(-122.5, 37.7, -122.3, 37.8)?;
//! engine.update_viewport(bounds, 14);
//! let fog = engine.update_location(37.7749, -122.4194).await;
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod feature;
pub mod geometry;
pub mod orchestrator;
pub mod result_cache;
pub mod spatial_index;
pub mod store;
pub mod viewport;

/// Version of the fogmap library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
