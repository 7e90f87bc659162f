//! Nearest-neighbour index trait and types.
//!
//! Defines the primitives a concrete algorithm implements. Callers go
//! through [`crate::LifecycleIndex`], which validates input before any
//! primitive runs.

use retrieval_types::DescriptorId;

use crate::error::IndexError;

/// One `(identifier, vector)` pair of a build or update batch.
pub type IndexEntry = (DescriptorId, Vec<f32>);

/// Result of a neighbour query
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    /// Identifier of the indexed descriptor
    pub id: DescriptorId,
    /// Distance to the query (lower = closer)
    pub distance: f32,
}

impl Neighbor {
    pub fn new(id: DescriptorId, distance: f32) -> Self {
        Self { id, distance }
    }
}

/// Lifecycle state of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Nothing ingested yet
    Empty,
    /// Initialized from a bulk build
    Built,
    /// Built, then extended by at least one incremental update
    Updated,
}

impl IndexState {
    /// Whether the index holds a build (possibly updated since).
    pub fn is_built(&self) -> bool {
        !matches!(self, IndexState::Empty)
    }
}

/// Trait for concrete nearest-neighbour algorithms.
///
/// Primitives are only ever called with a non-empty, de-duplicated batch
/// whose vectors all share one dimension, and `search_entries` only when
/// `count() > 0` and `n >= 1`. Implementations must be safe for concurrent
/// `&self` searches; mutation takes `&mut self`.
pub trait NeighborIndex: Send + Sync {
    /// Algorithm name used for logging
    fn name(&self) -> &str;

    /// Number of indexed entries
    fn count(&self) -> usize;

    /// Dimension of the indexed vectors, once known.
    fn dimension(&self) -> Option<usize>;

    /// Replace the index contents with `entries`.
    fn build_entries(&mut self, entries: Vec<IndexEntry>) -> Result<(), IndexError>;

    /// Merge `entries` into the existing contents. An identifier that is
    /// already present has its vector replaced.
    fn update_entries(&mut self, entries: Vec<IndexEntry>) -> Result<(), IndexError>;

    /// Up to `n` nearest entries, ascending by distance.
    fn search_entries(&self, query: &[f32], n: usize) -> Result<Vec<Neighbor>, IndexError>;

    /// Persist the index, for algorithms that support it.
    fn save(&self) -> Result<(), IndexError> {
        Ok(())
    }
}
