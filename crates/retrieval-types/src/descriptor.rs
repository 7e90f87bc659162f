//! Descriptor identifiers and vectors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of one descriptor (one unit of work).
///
/// Identifiers are compared by string equality, so keys read from a plain
/// text list match keys stored alongside the vectors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DescriptorId(String);

impl DescriptorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DescriptorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DescriptorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A feature vector keyed by its identifier. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    pub id: DescriptorId,
    pub vector: Vec<f32>,
}

impl Descriptor {
    pub fn new(id: impl Into<DescriptorId>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            vector,
        }
    }

    /// Number of components in the vector
    pub fn dimension(&self) -> usize {
        self.vector.len()
    }

    /// Split into the `(identifier, vector)` pair consumed by index batches.
    pub fn into_entry(self) -> (DescriptorId, Vec<f32>) {
        (self.id, self.vector)
    }
}
