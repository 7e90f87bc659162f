//! Exhaustive-scan index.
//!
//! Exact Euclidean search over every entry. Serves as the reference the
//! approximate algorithms are measured against.

use std::collections::HashMap;

use retrieval_types::DescriptorId;
use tracing::debug;

use crate::distance::{euclidean, sort_neighbors};
use crate::error::IndexError;
use crate::index::{IndexEntry, Neighbor, NeighborIndex};

/// Brute-force index storing vectors contiguously.
#[derive(Debug, Default)]
pub struct FlatIndex {
    ids: Vec<DescriptorId>,
    vectors: Vec<Vec<f32>>,
    positions: HashMap<DescriptorId, usize>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, id: DescriptorId, vector: Vec<f32>) {
        match self.positions.get(&id) {
            Some(&pos) => self.vectors[pos] = vector,
            None => {
                self.positions.insert(id.clone(), self.ids.len());
                self.ids.push(id);
                self.vectors.push(vector);
            }
        }
    }
}

impl NeighborIndex for FlatIndex {
    fn name(&self) -> &str {
        "flat"
    }

    fn count(&self) -> usize {
        self.ids.len()
    }

    fn dimension(&self) -> Option<usize> {
        self.vectors.first().map(Vec::len)
    }

    fn build_entries(&mut self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let mut fresh = FlatIndex::new();
        for (id, vector) in entries {
            fresh.insert(id, vector);
        }
        *self = fresh;
        Ok(())
    }

    fn update_entries(&mut self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        for (id, vector) in entries {
            self.insert(id, vector);
        }
        Ok(())
    }

    fn search_entries(&self, query: &[f32], n: usize) -> Result<Vec<Neighbor>, IndexError> {
        let mut neighbors: Vec<Neighbor> = self
            .ids
            .iter()
            .zip(self.vectors.iter())
            .map(|(id, v)| Neighbor::new(id.clone(), euclidean(query, v)))
            .collect();
        sort_neighbors(&mut neighbors);
        neighbors.truncate(n);
        debug!(n = n, found = neighbors.len(), "Flat search complete");
        Ok(neighbors)
    }
}
