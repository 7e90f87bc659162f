//! Locality-sensitive hashing index.
//!
//! Each vector is hashed to a bit code by the signs of its projections onto
//! random hyperplanes. Queries visit buckets in order of Hamming distance to
//! the query code until enough candidates are gathered, then re-rank the
//! candidates by exact Euclidean distance.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use retrieval_types::{DescriptorId, IndexSettings};
use tracing::debug;

use crate::distance::{euclidean, sort_neighbors};
use crate::error::IndexError;
use crate::index::{IndexEntry, Neighbor, NeighborIndex};

/// Candidates gathered per requested neighbour before re-ranking.
const CANDIDATE_FACTOR: usize = 4;

/// LSH index configuration
#[derive(Debug, Clone)]
pub struct LshConfig {
    /// Code length in bits (1-64)
    pub bits: usize,
    /// Hyperplane seed; equal seeds give equal codes
    pub seed: u64,
}

impl Default for LshConfig {
    fn default() -> Self {
        Self { bits: 16, seed: 42 }
    }
}

impl LshConfig {
    pub fn new(bits: usize, seed: u64) -> Self {
        Self { bits, seed }
    }
}

impl From<&IndexSettings> for LshConfig {
    fn from(settings: &IndexSettings) -> Self {
        Self::new(settings.lsh_bits, settings.lsh_seed)
    }
}

/// Random-hyperplane LSH index.
pub struct LshIndex {
    config: LshConfig,
    planes: Vec<Vec<f32>>,
    ids: Vec<DescriptorId>,
    vectors: Vec<Vec<f32>>,
    codes: Vec<u64>,
    positions: HashMap<DescriptorId, usize>,
    buckets: HashMap<u64, Vec<usize>>,
}

impl LshIndex {
    pub fn new(config: LshConfig) -> Result<Self, IndexError> {
        if !(1..=64).contains(&config.bits) {
            return Err(IndexError::InvalidArgument(format!(
                "LSH code length must be 1-64 bits, got {}",
                config.bits
            )));
        }
        Ok(Self {
            config,
            planes: Vec::new(),
            ids: Vec::new(),
            vectors: Vec::new(),
            codes: Vec::new(),
            positions: HashMap::new(),
            buckets: HashMap::new(),
        })
    }

    /// Number of distinct codes currently in use
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn reset(&mut self, dimension: usize) {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        self.planes = (0..self.config.bits)
            .map(|_| (0..dimension).map(|_| rng.random_range(-1.0f32..1.0)).collect())
            .collect();
        self.ids.clear();
        self.vectors.clear();
        self.codes.clear();
        self.positions.clear();
        self.buckets.clear();
    }

    fn hash(&self, vector: &[f32]) -> u64 {
        self.planes
            .iter()
            .enumerate()
            .fold(0u64, |code, (bit, plane)| {
                let dot: f32 = plane.iter().zip(vector.iter()).map(|(p, v)| p * v).sum();
                if dot > 0.0 {
                    code | (1u64 << bit)
                } else {
                    code
                }
            })
    }

    fn insert(&mut self, id: DescriptorId, vector: Vec<f32>) {
        let code = self.hash(&vector);
        match self.positions.get(&id) {
            Some(&pos) => {
                let old = self.codes[pos];
                if let Some(bucket) = self.buckets.get_mut(&old) {
                    bucket.retain(|&p| p != pos);
                    if bucket.is_empty() {
                        self.buckets.remove(&old);
                    }
                }
                self.vectors[pos] = vector;
                self.codes[pos] = code;
                self.buckets.entry(code).or_default().push(pos);
            }
            None => {
                let pos = self.ids.len();
                self.positions.insert(id.clone(), pos);
                self.ids.push(id);
                self.vectors.push(vector);
                self.codes.push(code);
                self.buckets.entry(code).or_default().push(pos);
            }
        }
    }
}

impl NeighborIndex for LshIndex {
    fn name(&self) -> &str {
        "lsh"
    }

    fn count(&self) -> usize {
        self.ids.len()
    }

    fn dimension(&self) -> Option<usize> {
        self.vectors.first().map(Vec::len)
    }

    fn build_entries(&mut self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let dimension = entries.first().map(|(_, v)| v.len()).unwrap_or(0);
        self.reset(dimension);
        for (id, vector) in entries {
            self.insert(id, vector);
        }
        debug!(
            entries = self.ids.len(),
            buckets = self.buckets.len(),
            "Built LSH index"
        );
        Ok(())
    }

    fn update_entries(&mut self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        for (id, vector) in entries {
            self.insert(id, vector);
        }
        Ok(())
    }

    fn search_entries(&self, query: &[f32], n: usize) -> Result<Vec<Neighbor>, IndexError> {
        let query_code = self.hash(query);
        let target = n.saturating_mul(CANDIDATE_FACTOR);

        let mut ranked: Vec<(u32, &Vec<usize>)> = self
            .buckets
            .iter()
            .map(|(code, members)| ((code ^ query_code).count_ones(), members))
            .collect();
        ranked.sort_by_key(|(hamming, _)| *hamming);

        // Visit whole Hamming shells so equally distant buckets are treated alike.
        let mut candidates: Vec<usize> = Vec::new();
        let mut shell = None;
        for (hamming, members) in ranked {
            if candidates.len() >= target && shell != Some(hamming) {
                break;
            }
            shell = Some(hamming);
            candidates.extend(members.iter().copied());
        }

        let mut neighbors: Vec<Neighbor> = candidates
            .into_iter()
            .map(|pos| Neighbor::new(self.ids[pos].clone(), euclidean(query, &self.vectors[pos])))
            .collect();
        sort_neighbors(&mut neighbors);
        neighbors.truncate(n);
        debug!(n = n, found = neighbors.len(), "LSH search complete");
        Ok(neighbors)
    }
}
