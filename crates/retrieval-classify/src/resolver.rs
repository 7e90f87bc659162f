//! Identifier resolution.
//!
//! The pipeline's first stage turns identifiers into descriptors through a
//! [`DescriptorResolver`]. The bundled store loads a JSON-lines file of
//! `{"id": ..., "vector": [...]}` records into memory.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use retrieval_types::{Descriptor, DescriptorId, RetrievalError};
use tracing::info;

/// Resolves an identifier to its descriptor.
///
/// Implementations must be safe to call from many worker threads at once.
pub trait DescriptorResolver: Send + Sync {
    /// Fails with `NotFound` for an unknown identifier.
    fn resolve(&self, id: &DescriptorId) -> Result<Descriptor, RetrievalError>;
}

/// In-memory descriptor store loaded from JSON lines.
#[derive(Debug, Default)]
pub struct JsonLinesDescriptorStore {
    descriptors: HashMap<DescriptorId, Vec<f32>>,
    order: Vec<DescriptorId>,
}

impl JsonLinesDescriptorStore {
    /// Load every record of a JSON-lines file. Blank lines are skipped; a
    /// later record with the same identifier replaces an earlier one.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RetrievalError> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut store = Self::default();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let descriptor: Descriptor = serde_json::from_str(&line).map_err(|e| {
                RetrievalError::InvalidArgument(format!(
                    "{}:{}: {}",
                    path.display(),
                    lineno + 1,
                    e
                ))
            })?;
            store.insert(descriptor);
        }
        info!(path = %path.display(), descriptors = store.len(), "Loaded descriptors");
        Ok(store)
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = Descriptor>) -> Self {
        let mut store = Self::default();
        for descriptor in descriptors {
            store.insert(descriptor);
        }
        store
    }

    fn insert(&mut self, descriptor: Descriptor) {
        if !self.descriptors.contains_key(&descriptor.id) {
            self.order.push(descriptor.id.clone());
        }
        self.descriptors.insert(descriptor.id, descriptor.vector);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// `(identifier, vector)` pairs in file order, for index batches.
    pub fn entries(&self) -> impl Iterator<Item = (DescriptorId, Vec<f32>)> + '_ {
        self.order.iter().filter_map(|id| {
            self.descriptors
                .get(id)
                .map(|vector| (id.clone(), vector.clone()))
        })
    }
}

impl DescriptorResolver for JsonLinesDescriptorStore {
    fn resolve(&self, id: &DescriptorId) -> Result<Descriptor, RetrievalError> {
        self.descriptors
            .get(id)
            .map(|vector| Descriptor::new(id.clone(), vector.clone()))
            .ok_or_else(|| RetrievalError::NotFound(format!("no descriptor for '{}'", id)))
    }
}
