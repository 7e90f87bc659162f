//! End-to-end test infrastructure for descriptor retrieval.
//!
//! Provides a shared TestHarness and helpers for generating descriptor
//! fixtures used by the pipeline, index and classification tests.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use retrieval_index::{IndexError, IndexRegistry, LifecycleIndex};
use retrieval_types::{Descriptor, IndexSettings};

/// Shared test harness for E2E tests.
///
/// Owns a temp directory and writes fixture files into it.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Root of the fixture files
    pub root: PathBuf,
}

impl TestHarness {
    /// Create a new test harness with an empty temp directory.
    pub fn new() -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        Self {
            _temp_dir: temp_dir,
            root,
        }
    }

    /// Path of a file inside the harness directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Write descriptors as JSON lines and return the file path.
    pub fn write_descriptors(&self, name: &str, descriptors: &[Descriptor]) -> PathBuf {
        let path = self.path(name);
        let mut contents = String::new();
        for descriptor in descriptors {
            contents.push_str(
                &serde_json::to_string(descriptor).expect("Failed to encode descriptor"),
            );
            contents.push('\n');
        }
        fs::write(&path, contents).expect("Failed to write descriptors");
        path
    }

    /// Write one identifier per line and return the file path.
    pub fn write_ids<S: AsRef<str>>(&self, name: &str, ids: &[S]) -> PathBuf {
        let path = self.path(name);
        let contents: String = ids.iter().map(|id| format!("{}\n", id.as_ref())).collect();
        fs::write(&path, contents).expect("Failed to write identifiers");
        path
    }

    /// Write any serializable value as JSON.
    pub fn write_json<T: serde::Serialize>(&self, name: &str, value: &T) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, serde_json::to_vec(value).expect("Failed to encode JSON"))
            .expect("Failed to write JSON");
        path
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic random descriptors `d0..d{count}` with components in [-1, 1).
pub fn random_descriptors(count: usize, dimension: usize, seed: u64) -> Vec<Descriptor> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let vector = (0..dimension)
                .map(|_| rng.random_range(-1.0f32..1.0))
                .collect();
            Descriptor::new(format!("d{i}"), vector)
        })
        .collect()
}

/// Descriptors clustered around `centers`, labelled by center index.
pub fn clustered_descriptors(
    centers: &[Vec<f32>],
    per_center: usize,
    spread: f32,
    seed: u64,
) -> Vec<(usize, Descriptor)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(centers.len() * per_center);
    for (label, center) in centers.iter().enumerate() {
        for i in 0..per_center {
            let vector = center
                .iter()
                .map(|c| c + rng.random_range(-spread..spread))
                .collect();
            out.push((label, Descriptor::new(format!("c{label}-{i}"), vector)));
        }
    }
    out
}

/// Fresh lifecycle index for a registered algorithm with default settings.
pub fn lifecycle(algorithm: &str) -> Result<LifecycleIndex, IndexError> {
    IndexRegistry::with_defaults().create_lifecycle(&IndexSettings::for_algorithm(algorithm))
}

/// Whether `path` exists and is non-empty.
pub fn non_empty_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}
