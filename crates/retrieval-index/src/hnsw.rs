//! HNSW index implementation using usearch.
//!
//! Descriptor identifiers are mapped to the `u64` keys usearch stores. A
//! replaced identifier gets a fresh key so the graph never sees a key reused.
//! With an `index_path` the graph and the key map are persisted side by side.

use std::collections::HashMap;
use std::path::PathBuf;

use retrieval_types::{DescriptorId, IndexSettings};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::error::IndexError;
use crate::index::{IndexEntry, Neighbor, NeighborIndex};

const GRAPH_FILE: &str = "hnsw.usearch";
const KEYS_FILE: &str = "hnsw.keys.json";

/// HNSW index configuration
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Number of connections per layer (M parameter)
    pub connectivity: usize,
    /// Build-time search depth (ef_construction)
    pub expansion_add: usize,
    /// Query-time search depth (ef_search)
    pub expansion_search: usize,
    /// Directory for persisted files; `None` keeps the index in memory only
    pub index_path: Option<PathBuf>,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            connectivity: 16,
            expansion_add: 200,
            expansion_search: 100,
            index_path: None,
        }
    }
}

impl HnswConfig {
    pub fn with_connectivity(mut self, m: usize) -> Self {
        self.connectivity = m;
        self
    }

    pub fn with_expansion(mut self, ef_add: usize, ef_search: usize) -> Self {
        self.expansion_add = ef_add;
        self.expansion_search = ef_search;
        self
    }

    pub fn with_index_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = Some(path.into());
        self
    }
}

impl From<&IndexSettings> for HnswConfig {
    fn from(settings: &IndexSettings) -> Self {
        Self {
            connectivity: settings.hnsw_connectivity,
            expansion_add: settings.hnsw_expansion_add,
            expansion_search: settings.hnsw_expansion_search,
            index_path: settings.index_path.as_ref().map(PathBuf::from),
        }
    }
}

/// Key map persisted next to the graph file.
#[derive(Debug, Serialize, Deserialize)]
struct KeyMap {
    dimension: usize,
    next_key: u64,
    entries: Vec<(u64, DescriptorId)>,
}

/// Graph plus the identifier <-> key mapping, swapped in as one unit.
struct Graph {
    index: Index,
    dimension: usize,
    keys: HashMap<DescriptorId, u64>,
    ids: HashMap<u64, DescriptorId>,
    next_key: u64,
}

/// HNSW index wrapper around usearch.
pub struct HnswIndex {
    config: HnswConfig,
    graph: Option<Graph>,
}

impl HnswIndex {
    /// Create an empty index, or load a persisted one from `index_path`.
    pub fn open_or_create(config: HnswConfig) -> Result<Self, IndexError> {
        let mut hnsw = Self {
            config,
            graph: None,
        };

        if let Some(dir) = hnsw.config.index_path.clone() {
            let graph_file = dir.join(GRAPH_FILE);
            let keys_file = dir.join(KEYS_FILE);
            if graph_file.exists() && keys_file.exists() {
                info!(path = ?graph_file, "Opening existing vector index");
                let key_map: KeyMap = serde_json::from_slice(&std::fs::read(&keys_file)?)?;
                let mut graph = hnsw.new_graph(key_map.dimension, 0)?;
                graph
                    .index
                    .load(path_str(&graph_file)?)
                    .map_err(|e| IndexError::Backend(format!("Failed to load: {}", e)))?;
                graph.next_key = key_map.next_key;
                for (key, id) in key_map.entries {
                    graph.keys.insert(id.clone(), key);
                    graph.ids.insert(key, id);
                }
                hnsw.graph = Some(graph);
            }
        }

        Ok(hnsw)
    }

    fn new_graph(&self, dimension: usize, capacity: usize) -> Result<Graph, IndexError> {
        let options = IndexOptions {
            dimensions: dimension,
            metric: MetricKind::L2sq,
            quantization: ScalarKind::F32,
            connectivity: self.config.connectivity,
            expansion_add: self.config.expansion_add,
            expansion_search: self.config.expansion_search,
            multi: false,
        };
        let index = Index::new(&options).map_err(|e| IndexError::Backend(e.to_string()))?;
        if capacity > 0 {
            index
                .reserve(capacity)
                .map_err(|e| IndexError::Backend(e.to_string()))?;
        }
        Ok(Graph {
            index,
            dimension,
            keys: HashMap::new(),
            ids: HashMap::new(),
            next_key: 0,
        })
    }
}

impl Graph {
    /// Every vector must match the graph dimension before any is inserted.
    fn check_batch(&self, entries: &[IndexEntry]) -> Result<(), IndexError> {
        match entries.iter().find(|(_, v)| v.len() != self.dimension) {
            Some((_, v)) => Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: v.len(),
            }),
            None => Ok(()),
        }
    }

    /// Add the new key first so a failed add leaves the old entry intact.
    fn insert(&mut self, id: DescriptorId, vector: &[f32]) -> Result<(), IndexError> {
        let key = self.next_key;
        self.index
            .add(key, vector)
            .map_err(|e| IndexError::Backend(e.to_string()))?;
        self.next_key += 1;
        if let Some(old) = self.keys.insert(id.clone(), key) {
            self.ids.remove(&old);
            self.index
                .remove(old)
                .map_err(|e| IndexError::Backend(e.to_string()))?;
        }
        self.ids.insert(key, id);
        Ok(())
    }
}

impl NeighborIndex for HnswIndex {
    fn name(&self) -> &str {
        "hnsw"
    }

    fn count(&self) -> usize {
        self.graph.as_ref().map(|g| g.keys.len()).unwrap_or(0)
    }

    fn dimension(&self) -> Option<usize> {
        self.graph.as_ref().map(|g| g.dimension)
    }

    fn build_entries(&mut self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let dimension = entries.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut graph = self.new_graph(dimension, entries.len())?;
        graph.check_batch(&entries)?;
        for (id, vector) in entries {
            graph.insert(id, &vector)?;
        }
        info!(dim = dimension, vectors = graph.keys.len(), "Built HNSW graph");
        self.graph = Some(graph);
        Ok(())
    }

    fn update_entries(&mut self, entries: Vec<IndexEntry>) -> Result<(), IndexError> {
        let graph = self.graph.as_mut().ok_or_else(|| {
            IndexError::InvalidArgument("HNSW graph has not been built".to_string())
        })?;
        graph.check_batch(&entries)?;
        let needed = graph.index.size() + entries.len();
        if needed > graph.index.capacity() {
            graph
                .index
                .reserve(needed)
                .map_err(|e| IndexError::Backend(e.to_string()))?;
        }
        for (id, vector) in entries {
            graph.insert(id, &vector)?;
        }
        debug!(vectors = graph.keys.len(), "Updated HNSW graph");
        Ok(())
    }

    fn search_entries(&self, query: &[f32], n: usize) -> Result<Vec<Neighbor>, IndexError> {
        let graph = self.graph.as_ref().ok_or_else(|| {
            IndexError::InvalidArgument("HNSW graph has not been built".to_string())
        })?;
        if query.len() != graph.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: graph.dimension,
                actual: query.len(),
            });
        }

        let matches = graph
            .index
            .search(query, n)
            .map_err(|e| IndexError::Backend(e.to_string()))?;

        let neighbors: Vec<Neighbor> = matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .filter_map(|(key, dist)| {
                graph
                    .ids
                    .get(key)
                    .map(|id| Neighbor::new(id.clone(), dist.max(0.0).sqrt()))
            })
            .collect();

        debug!(k = n, found = neighbors.len(), "Search complete");
        Ok(neighbors)
    }

    fn save(&self) -> Result<(), IndexError> {
        let (Some(dir), Some(graph)) = (self.config.index_path.as_ref(), self.graph.as_ref())
        else {
            debug!("No index path or empty graph, nothing to save");
            return Ok(());
        };
        std::fs::create_dir_all(dir)?;

        let graph_file = dir.join(GRAPH_FILE);
        graph
            .index
            .save(path_str(&graph_file)?)
            .map_err(|e| IndexError::Backend(format!("Failed to save: {}", e)))?;

        let key_map = KeyMap {
            dimension: graph.dimension,
            next_key: graph.next_key,
            entries: graph.ids.iter().map(|(k, id)| (*k, id.clone())).collect(),
        };
        std::fs::write(dir.join(KEYS_FILE), serde_json::to_vec(&key_map)?)?;

        info!(path = ?graph_file, vectors = graph.keys.len(), "Saved vector index");
        Ok(())
    }
}

fn path_str(path: &std::path::Path) -> Result<&str, IndexError> {
    path.to_str()
        .ok_or_else(|| IndexError::Backend("Invalid path encoding".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use tempfile::TempDir;

    fn random_entries(count: usize, dim: usize) -> Vec<IndexEntry> {
        let mut rng = rand::rng();
        (0..count)
            .map(|i| {
                let v: Vec<f32> = (0..dim).map(|_| rng.random()).collect();
                (DescriptorId::from(format!("d{i}")), v)
            })
            .collect()
    }

    #[test]
    fn test_create_index() {
        let index = HnswIndex::open_or_create(HnswConfig::default()).unwrap();
        assert_eq!(index.count(), 0);
        assert_eq!(index.name(), "hnsw");
    }

    #[test]
    fn test_build_and_search() {
        let mut index = HnswIndex::open_or_create(HnswConfig::default()).unwrap();
        let entries = random_entries(50, 32);
        let probe = entries[7].clone();
        index.build_entries(entries).unwrap();
        assert_eq!(index.count(), 50);

        let results = index.search_entries(&probe.1, 5).unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(results[0].id, probe.0);
        for pair in results.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn test_update_replaces_identifier() {
        let mut index = HnswIndex::open_or_create(HnswConfig::default()).unwrap();
        index
            .build_entries(vec![
                (DescriptorId::from("a"), vec![0.0, 0.0]),
                (DescriptorId::from("b"), vec![5.0, 5.0]),
            ])
            .unwrap();
        index
            .update_entries(vec![
                (DescriptorId::from("a"), vec![9.0, 9.0]),
                (DescriptorId::from("c"), vec![0.1, 0.1]),
            ])
            .unwrap();
        assert_eq!(index.count(), 3);

        let results = index.search_entries(&[0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].id.as_str(), "c");
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let config = HnswConfig::default().with_index_path(temp.path());

        {
            let mut index = HnswIndex::open_or_create(config.clone()).unwrap();
            index.build_entries(random_entries(5, 16)).unwrap();
            index.save().unwrap();
        }

        let index = HnswIndex::open_or_create(config).unwrap();
        assert_eq!(index.count(), 5);
        let results = index.search_entries(&[0.5; 16], 2).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_query_dimension_mismatch() {
        let mut index = HnswIndex::open_or_create(HnswConfig::default()).unwrap();
        index.build_entries(random_entries(3, 8)).unwrap();
        let result = index.search_entries(&[0.0; 4], 1);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_mismatched_update_leaves_graph_untouched() {
        let mut index = HnswIndex::open_or_create(HnswConfig::default()).unwrap();
        let entries = random_entries(4, 8);
        let kept = entries[0].clone();
        index.build_entries(entries).unwrap();
        assert_eq!(index.dimension(), Some(8));

        let result = index.update_entries(vec![
            (DescriptorId::from("d9"), vec![0.0; 8]),
            (kept.0.clone(), vec![0.0; 2]),
        ]);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
        assert_eq!(index.count(), 4);

        let results = index.search_entries(&kept.1, 1).unwrap();
        assert_eq!(results[0].id, kept.0);
    }
}
