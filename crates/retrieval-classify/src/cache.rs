//! Per-descriptor classification cache.
//!
//! Each classification is stored as one JSON file named after the hex
//! encoding of its identifier, so any identifier maps to a safe file name.
//! Encodings longer than [`NAME_CHUNK`] are split into nested directories so
//! no path component exceeds file system name limits. Workers may read and write concurrently; writes go through a temporary
//! file and a rename.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use retrieval_types::{Classification, Descriptor, DescriptorId, RetrievalError};
use tracing::{debug, trace};

use crate::classifier::Classifier;

/// Longest hex run used as a single path component.
const NAME_CHUNK: usize = 128;

/// Directory of cached classifications.
#[derive(Debug, Clone)]
pub struct ClassificationCache {
    dir: PathBuf,
}

impl ClassificationCache {
    /// Open (creating if needed) a cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, RetrievalError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &DescriptorId) -> PathBuf {
        let name: String = id
            .as_str()
            .bytes()
            .map(|b| format!("{b:02x}"))
            .collect();
        let mut path = self.dir.clone();
        let mut rest = name.as_str();
        while rest.len() > NAME_CHUNK {
            let (head, tail) = rest.split_at(NAME_CHUNK);
            path.push(head);
            rest = tail;
        }
        path.push(format!("{rest}.json"));
        path
    }

    pub fn get(&self, id: &DescriptorId) -> Result<Option<Classification>, RetrievalError> {
        match fs::read(self.path_for(id)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn put(&self, classification: &Classification) -> Result<(), RetrievalError> {
        let path = self.path_for(&classification.id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension(format!("{:?}.tmp", thread::current().id()));
        fs::write(&tmp, serde_json::to_vec(classification)?)?;
        fs::rename(&tmp, &path)?;
        trace!(id = %classification.id, path = %path.display(), "Cached classification");
        Ok(())
    }

    pub fn contains(&self, id: &DescriptorId) -> bool {
        self.path_for(id).exists()
    }
}

/// Classifier wrapper that reuses cached results unless `overwrite` is set.
///
/// With `overwrite` the wrapped classifier always runs and its result
/// replaces the cached one.
pub struct CachingClassifier {
    inner: Arc<dyn Classifier>,
    cache: ClassificationCache,
    overwrite: bool,
}

impl CachingClassifier {
    pub fn new(inner: Arc<dyn Classifier>, cache: ClassificationCache, overwrite: bool) -> Self {
        Self {
            inner,
            cache,
            overwrite,
        }
    }
}

impl Classifier for CachingClassifier {
    fn labels(&self) -> &[String] {
        self.inner.labels()
    }

    fn classify(&self, descriptor: &Descriptor) -> Result<Classification, RetrievalError> {
        if !self.overwrite {
            if let Some(cached) = self.cache.get(&descriptor.id)? {
                debug!(id = %descriptor.id, "Using cached classification");
                return Ok(cached);
            }
        }
        let classification = self.inner.classify(descriptor)?;
        self.cache.put(&classification)?;
        Ok(classification)
    }
}
