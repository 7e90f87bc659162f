//! # retrieval-index
//!
//! Nearest-neighbour indexing behind a fixed lifecycle contract.
//!
//! Concrete algorithms only implement the [`NeighborIndex`] primitives. The
//! [`LifecycleIndex`] wrapper enforces the universal rules once, before any
//! algorithm-specific work runs:
//! - a build or update batch must not be empty
//! - an index must hold entries before it can be queried
//! - vectors in one index share one dimension
//!
//! ## Algorithms
//! - `flat`: exhaustive Euclidean scan
//! - `lsh`: random-hyperplane locality-sensitive hashing with exact re-rank
//! - `hnsw`: usearch-powered HNSW graph with optional on-disk persistence
//!
//! Algorithms are picked by name through the [`IndexRegistry`].

pub mod distance;
pub mod error;
pub mod flat;
pub mod hnsw;
pub mod index;
pub mod lifecycle;
pub mod lsh;
pub mod registry;

pub use error::IndexError;
pub use flat::FlatIndex;
pub use hnsw::{HnswConfig, HnswIndex};
pub use index::{IndexEntry, IndexState, Neighbor, NeighborIndex};
pub use lifecycle::{IndexPolicy, LifecycleIndex};
pub use lsh::{LshConfig, LshIndex};
pub use registry::{IndexFactory, IndexRegistry};
