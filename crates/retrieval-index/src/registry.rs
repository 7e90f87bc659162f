//! Name-keyed registry of index algorithms.
//!
//! The algorithm behind a [`LifecycleIndex`] is chosen at construction time
//! from configuration, so callers never name a concrete type.

use std::collections::BTreeMap;

use retrieval_types::IndexSettings;
use tracing::info;

use crate::error::IndexError;
use crate::flat::FlatIndex;
use crate::hnsw::{HnswConfig, HnswIndex};
use crate::index::NeighborIndex;
use crate::lifecycle::{IndexPolicy, LifecycleIndex};
use crate::lsh::{LshConfig, LshIndex};

/// Constructor for one algorithm.
pub type IndexFactory =
    Box<dyn Fn(&IndexSettings) -> Result<Box<dyn NeighborIndex>, IndexError> + Send + Sync>;

/// Registry of index algorithms keyed by name.
pub struct IndexRegistry {
    factories: BTreeMap<String, IndexFactory>,
}

impl IndexRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// A registry with the built-in `flat`, `lsh` and `hnsw` algorithms.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("flat", |_| Ok(Box::new(FlatIndex::new())));
        registry.register("lsh", |settings| {
            Ok(Box::new(LshIndex::new(LshConfig::from(settings))?))
        });
        registry.register("hnsw", |settings| {
            Ok(Box::new(HnswIndex::open_or_create(HnswConfig::from(settings))?))
        });
        registry
    }

    /// Register (or replace) an algorithm under `name`.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&IndexSettings) -> Result<Box<dyn NeighborIndex>, IndexError> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Registered algorithm names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Construct the algorithm named by `settings.algorithm`.
    pub fn create(&self, settings: &IndexSettings) -> Result<Box<dyn NeighborIndex>, IndexError> {
        let factory =
            self.factories
                .get(&settings.algorithm)
                .ok_or_else(|| IndexError::UnknownAlgorithm {
                    name: settings.algorithm.clone(),
                    known: self.names().join(", "),
                })?;
        factory(settings)
    }

    /// Construct the configured algorithm wrapped in the lifecycle contract.
    pub fn create_lifecycle(&self, settings: &IndexSettings) -> Result<LifecycleIndex, IndexError> {
        let inner = self.create(settings)?;
        let index = LifecycleIndex::new(inner, IndexPolicy::from(settings));
        info!(
            algorithm = %settings.algorithm,
            entries = index.count(),
            "Created index"
        );
        Ok(index)
    }
}

impl Default for IndexRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
