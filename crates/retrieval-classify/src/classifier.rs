//! Classifiers applied by the second pipeline stage.
//!
//! Two implementations ship with the crate:
//! - [`CentroidClassifier`]: one centroid per label, confidences from a
//!   softmax over negative Euclidean distance.
//! - [`NeighborVoteClassifier`]: k nearest labelled examples from a
//!   [`LifecycleIndex`], votes weighted by inverse distance.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use retrieval_index::{LifecycleIndex, Neighbor};
use retrieval_types::{Classification, Descriptor, DescriptorId, RetrievalError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Produces per-label confidences for a descriptor.
///
/// Shared by every worker of the classification stage.
pub trait Classifier: Send + Sync {
    /// Labels in the order scores are reported. Fixed for the classifier's
    /// lifetime; sinks use it as the CSV header.
    fn labels(&self) -> &[String];

    fn classify(&self, descriptor: &Descriptor) -> Result<Classification, RetrievalError>;
}

/// One labelled centroid in a model file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelCentroid {
    pub label: String,
    pub vector: Vec<f32>,
}

/// On-disk centroid model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentroidModel {
    pub centroids: Vec<LabelCentroid>,
}

/// Nearest-centroid classifier.
#[derive(Debug, Clone)]
pub struct CentroidClassifier {
    labels: Vec<String>,
    centroids: Vec<Vec<f32>>,
    dimension: usize,
}

impl CentroidClassifier {
    /// Build from explicit centroids. All centroids must share one
    /// non-zero dimension and labels must be unique.
    pub fn new(model: CentroidModel) -> Result<Self, RetrievalError> {
        if model.centroids.is_empty() {
            return Err(RetrievalError::InvalidArgument(
                "centroid model has no labels".to_string(),
            ));
        }

        let dimension = model.centroids[0].vector.len();
        if dimension == 0 {
            return Err(RetrievalError::InvalidArgument(
                "centroid vectors must not be empty".to_string(),
            ));
        }

        let mut labels = Vec::with_capacity(model.centroids.len());
        let mut centroids = Vec::with_capacity(model.centroids.len());
        for centroid in model.centroids {
            if centroid.vector.len() != dimension {
                return Err(RetrievalError::InvalidArgument(format!(
                    "centroid '{}' has dimension {}, expected {}",
                    centroid.label,
                    centroid.vector.len(),
                    dimension
                )));
            }
            if labels.contains(&centroid.label) {
                return Err(RetrievalError::InvalidArgument(format!(
                    "duplicate label '{}'",
                    centroid.label
                )));
            }
            labels.push(centroid.label);
            centroids.push(centroid.vector);
        }

        Ok(Self {
            labels,
            centroids,
            dimension,
        })
    }

    /// Load a JSON model file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RetrievalError> {
        let path = path.as_ref();
        let model: CentroidModel = serde_json::from_slice(&fs::read(path)?)?;
        let classifier = Self::new(model)?;
        info!(
            path = %path.display(),
            labels = classifier.labels.len(),
            dimension = classifier.dimension,
            "Loaded centroid model"
        );
        Ok(classifier)
    }

    /// Average labelled examples into one centroid per label. Labels keep
    /// the order in which they first appear.
    pub fn train<I>(examples: I) -> Result<Self, RetrievalError>
    where
        I: IntoIterator<Item = (String, Vec<f32>)>,
    {
        let mut order: Vec<String> = Vec::new();
        let mut sums: HashMap<String, (Vec<f64>, usize)> = HashMap::new();

        for (label, vector) in examples {
            match sums.get_mut(&label) {
                Some((sum, count)) => {
                    if sum.len() != vector.len() {
                        return Err(RetrievalError::InvalidArgument(format!(
                            "example for '{}' has dimension {}, expected {}",
                            label,
                            vector.len(),
                            sum.len()
                        )));
                    }
                    for (s, v) in sum.iter_mut().zip(&vector) {
                        *s += f64::from(*v);
                    }
                    *count += 1;
                }
                None => {
                    order.push(label.clone());
                    let sum = vector.iter().map(|v| f64::from(*v)).collect();
                    sums.insert(label, (sum, 1));
                }
            }
        }

        let centroids = order
            .into_iter()
            .filter_map(|label| {
                sums.remove(&label).map(|(sum, count)| LabelCentroid {
                    vector: sum.iter().map(|s| (s / count as f64) as f32).collect(),
                    label,
                })
            })
            .collect();
        Self::new(CentroidModel { centroids })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// The model in its on-disk form.
    pub fn to_model(&self) -> CentroidModel {
        CentroidModel {
            centroids: self
                .labels
                .iter()
                .zip(&self.centroids)
                .map(|(label, vector)| LabelCentroid {
                    label: label.clone(),
                    vector: vector.clone(),
                })
                .collect(),
        }
    }
}

impl Classifier for CentroidClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn classify(&self, descriptor: &Descriptor) -> Result<Classification, RetrievalError> {
        if descriptor.dimension() != self.dimension {
            return Err(RetrievalError::OperationFailure(format!(
                "descriptor '{}' has dimension {}, model expects {}",
                descriptor.id,
                descriptor.dimension(),
                self.dimension
            )));
        }

        let logits: Vec<f64> = self
            .centroids
            .iter()
            .map(|c| -f64::from(retrieval_index::distance::euclidean(&descriptor.vector, c)))
            .collect();
        let probabilities = softmax(&logits);

        Ok(Classification::new(
            descriptor.id.clone(),
            self.labels.iter().cloned().zip(probabilities).collect(),
        ))
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// k-nearest-neighbour vote over labelled examples.
pub struct NeighborVoteClassifier {
    index: LifecycleIndex,
    labels_by_id: HashMap<DescriptorId, String>,
    labels: Vec<String>,
    k: usize,
}

impl NeighborVoteClassifier {
    /// Build the index from labelled examples. `k` must be positive.
    pub fn new(
        mut index: LifecycleIndex,
        examples: Vec<(String, Descriptor)>,
        k: usize,
    ) -> Result<Self, RetrievalError> {
        if k == 0 {
            return Err(RetrievalError::InvalidArgument(
                "neighbour count must be positive".to_string(),
            ));
        }

        let mut labels: Vec<String> = Vec::new();
        let mut labels_by_id = HashMap::with_capacity(examples.len());
        let mut entries = Vec::with_capacity(examples.len());
        for (label, descriptor) in examples {
            if !labels.contains(&label) {
                labels.push(label.clone());
            }
            labels_by_id.insert(descriptor.id.clone(), label);
            entries.push(descriptor.into_entry());
        }

        index.build_index(entries)?;
        info!(
            algorithm = index.algorithm(),
            examples = index.count(),
            labels = labels.len(),
            k,
            "Built neighbour vote classifier"
        );

        Ok(Self {
            index,
            labels_by_id,
            labels,
            k,
        })
    }

    pub fn index(&self) -> &LifecycleIndex {
        &self.index
    }

    fn vote(&self, neighbors: &[Neighbor]) -> Vec<f64> {
        let mut weights = vec![0.0f64; self.labels.len()];
        for neighbor in neighbors {
            let Some(label) = self.labels_by_id.get(&neighbor.id) else {
                continue;
            };
            if let Some(slot) = self.labels.iter().position(|l| l == label) {
                weights[slot] += 1.0 / (1.0 + f64::from(neighbor.distance));
            }
        }
        let total: f64 = weights.iter().sum();
        if total > 0.0 {
            weights.iter_mut().for_each(|w| *w /= total);
        }
        weights
    }
}

impl Classifier for NeighborVoteClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn classify(&self, descriptor: &Descriptor) -> Result<Classification, RetrievalError> {
        let neighbors = self.index.query(&descriptor.vector, self.k)?;
        debug!(id = %descriptor.id, neighbors = neighbors.len(), "Voting");
        let weights = self.vote(&neighbors);
        Ok(Classification::new(
            descriptor.id.clone(),
            self.labels.iter().cloned().zip(weights).collect(),
        ))
    }
}

/// A labelled example line: `{"id": ..., "label": ..., "vector": [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct LabelledDescriptor {
    pub id: DescriptorId,
    pub label: String,
    pub vector: Vec<f32>,
}

/// Read labelled examples from a JSON-lines file.
pub fn read_labelled(path: impl AsRef<Path>) -> Result<Vec<(String, Descriptor)>, RetrievalError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(lineno, line)| {
            let example: LabelledDescriptor = serde_json::from_str(line).map_err(|e| {
                RetrievalError::InvalidArgument(format!(
                    "{}:{}: {}",
                    path.display(),
                    lineno + 1,
                    e
                ))
            })?;
            Ok((example.label, Descriptor::new(example.id, example.vector)))
        })
        .collect()
}
