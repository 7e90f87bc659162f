//! Index lifecycle contract.
//!
//! Wraps a concrete [`NeighborIndex`] and enforces the rules every algorithm
//! shares. All checks run before the algorithm is touched, so a rejected call
//! never mutates the index.
//!
//! Mutation takes `&mut self` while queries take `&self`. Sharing one index
//! between query workers and a writer therefore needs an outer `RwLock`
//! (or equivalent) held by the caller; the contract adds no locking itself.

use std::collections::HashMap;

use retrieval_types::{DescriptorId, IndexSettings};
use tracing::{debug, info};

use crate::distance::sort_neighbors;
use crate::error::IndexError;
use crate::index::{IndexEntry, IndexState, Neighbor, NeighborIndex};

/// Behaviour switches for the lifecycle contract.
#[derive(Debug, Clone)]
pub struct IndexPolicy {
    /// A build on a built index replaces its contents (otherwise rejected)
    pub allow_rebuild: bool,
    /// An update on an empty index acts as the initial build (otherwise rejected)
    pub allow_update_as_build: bool,
    /// Fixed vector dimension; `None` learns it from the first build
    pub dimension: Option<usize>,
}

impl Default for IndexPolicy {
    fn default() -> Self {
        Self {
            allow_rebuild: true,
            allow_update_as_build: false,
            dimension: None,
        }
    }
}

impl From<&IndexSettings> for IndexPolicy {
    fn from(settings: &IndexSettings) -> Self {
        Self {
            allow_rebuild: settings.allow_rebuild,
            allow_update_as_build: settings.allow_update_as_build,
            dimension: (settings.dimension > 0).then_some(settings.dimension),
        }
    }
}

/// A nearest-neighbour index with validated build/update/query operations.
pub struct LifecycleIndex {
    inner: Box<dyn NeighborIndex>,
    policy: IndexPolicy,
    state: IndexState,
    dimension: Option<usize>,
}

impl LifecycleIndex {
    /// Wrap an algorithm. An algorithm that already holds entries (e.g. one
    /// loaded from disk) starts in the `Built` state with its dimension.
    pub fn new(inner: Box<dyn NeighborIndex>, policy: IndexPolicy) -> Self {
        let state = if inner.count() > 0 {
            IndexState::Built
        } else {
            IndexState::Empty
        };
        let dimension = policy.dimension.or_else(|| inner.dimension());
        Self {
            inner,
            policy,
            state,
            dimension,
        }
    }

    /// Number of entries currently indexed.
    pub fn count(&self) -> usize {
        self.inner.count()
    }

    pub fn state(&self) -> IndexState {
        self.state
    }

    /// Vector dimension, once known.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Name of the wrapped algorithm.
    pub fn algorithm(&self) -> &str {
        self.inner.name()
    }

    /// Build the index from `batch`, replacing any previous contents.
    ///
    /// The batch is consumed fully before the index is modified. Duplicate
    /// identifiers keep their last vector.
    pub fn build_index<I>(&mut self, batch: I) -> Result<(), IndexError>
    where
        I: IntoIterator<Item = IndexEntry>,
    {
        let entries = collect_batch(batch);
        if entries.is_empty() {
            return Err(empty_batch("build"));
        }
        if self.state.is_built() && !self.policy.allow_rebuild {
            return Err(IndexError::InvalidArgument(
                "Index is already built and rebuilding is disabled".to_string(),
            ));
        }
        let dimension = match self.policy.dimension {
            Some(fixed) => fixed,
            None => entries[0].1.len(),
        };
        check_dimensions(&entries, dimension)?;

        let count = entries.len();
        self.inner.build_entries(entries)?;
        self.dimension = Some(dimension);
        self.state = IndexState::Built;

        info!(
            algorithm = self.inner.name(),
            entries = count,
            dimension = dimension,
            "Built index"
        );
        Ok(())
    }

    /// Merge `batch` into the built index without discarding prior entries.
    ///
    /// An identifier already present has its vector replaced.
    pub fn update_index<I>(&mut self, batch: I) -> Result<(), IndexError>
    where
        I: IntoIterator<Item = IndexEntry>,
    {
        let entries = collect_batch(batch);
        if entries.is_empty() {
            return Err(empty_batch("update"));
        }
        if !self.state.is_built() {
            if self.policy.allow_update_as_build {
                debug!("Update on an empty index, treating as initial build");
                return self.build_index(entries);
            }
            return Err(IndexError::InvalidArgument(
                "Cannot update an index that has not been built".to_string(),
            ));
        }
        let dimension = match self.dimension {
            Some(d) => d,
            None => entries[0].1.len(),
        };
        check_dimensions(&entries, dimension)?;

        let count = entries.len();
        self.inner.update_entries(entries)?;
        self.dimension = Some(dimension);
        self.state = IndexState::Updated;

        info!(
            algorithm = self.inner.name(),
            entries = count,
            total = self.inner.count(),
            "Updated index"
        );
        Ok(())
    }

    /// Up to `n` nearest entries to `item`, ascending by distance.
    ///
    /// Asking for more entries than are indexed returns all of them.
    pub fn query(&self, item: &[f32], n: usize) -> Result<Vec<Neighbor>, IndexError> {
        if self.inner.count() == 0 {
            return Err(IndexError::InvalidArgument(
                "No index currently set to query from".to_string(),
            ));
        }
        if n == 0 {
            return Err(IndexError::InvalidArgument(
                "Number of neighbours must be at least 1".to_string(),
            ));
        }
        if let Some(expected) = self.dimension {
            if item.len() != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: item.len(),
                });
            }
        }

        let mut neighbors = self.inner.search_entries(item, n)?;
        sort_neighbors(&mut neighbors);
        neighbors.truncate(n);
        Ok(neighbors)
    }

    /// Persist the wrapped algorithm, where supported.
    pub fn save(&self) -> Result<(), IndexError> {
        self.inner.save()
    }
}

fn empty_batch(operation: &str) -> IndexError {
    IndexError::InvalidArgument(format!(
        "No descriptors in the given batch to {operation} the index with"
    ))
}

/// Materialize a batch, keeping first-seen order and last-seen vectors.
fn collect_batch<I>(batch: I) -> Vec<IndexEntry>
where
    I: IntoIterator<Item = IndexEntry>,
{
    let mut positions: HashMap<DescriptorId, usize> = HashMap::new();
    let mut entries: Vec<IndexEntry> = Vec::new();
    for (id, vector) in batch {
        match positions.get(&id) {
            Some(&pos) => entries[pos].1 = vector,
            None => {
                positions.insert(id.clone(), entries.len());
                entries.push((id, vector));
            }
        }
    }
    entries
}

fn check_dimensions(entries: &[IndexEntry], expected: usize) -> Result<(), IndexError> {
    if expected == 0 {
        return Err(IndexError::InvalidArgument(
            "Vectors must have at least one component".to_string(),
        ));
    }
    for (_, vector) in entries {
        if vector.len() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
    }
    Ok(())
}
