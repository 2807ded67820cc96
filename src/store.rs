//! Revealed-area store collaborator contract.
//!
//! The store is the single source of truth for revealed areas. The engine's
//! spatial index and result cache are derived views and never assumed
//! authoritative over it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use thiserror::Error;

use crate::feature::Feature;

/// Store access errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backing storage could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write was rejected or lost
    #[error("store write failed: {0}")]
    WriteFailed(String),
}

/// Persistent source of truth for revealed-area features.
///
/// Implementations are external collaborators (on-device persistence, test
/// doubles). The engine only calls `list` and `append`; schema and transport
/// are the implementor's concern.
pub trait RevealedAreaStore: Send + Sync {
    /// All revealed-area features currently persisted.
    fn list(&self) -> Result<Vec<Feature>, StoreError>;

    /// Persist a new revealed-area feature, returning its assigned id.
    fn append(&self, feature: Feature) -> Result<u64, StoreError>;
}

/// In-memory store for tests and embedding without persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    features: RwLock<Vec<Feature>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate, builder style.
    pub fn with_features(self, features: Vec<Feature>) -> Self {
        {
            let mut stored = self.features.write().unwrap_or_else(|e| e.into_inner());
            *stored = features;
        }
        self.next_id.store(
            self.features.read().unwrap_or_else(|e| e.into_inner()).len() as u64,
            Ordering::SeqCst,
        );
        self
    }

    pub fn len(&self) -> usize {
        self.features.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RevealedAreaStore for MemoryStore {
    fn list(&self) -> Result<Vec<Feature>, StoreError> {
        Ok(self.features.read().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn append(&self, feature: Feature) -> Result<u64, StoreError> {
        let mut features = self.features.write().unwrap_or_else(|e| e.into_inner());
        features.push(feature);
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }
}
