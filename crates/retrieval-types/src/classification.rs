//! Classification results.

use serde::{Deserialize, Serialize};

use crate::descriptor::DescriptorId;

/// Per-label confidence scores produced for one descriptor.
///
/// Scores are kept in the classifier's label order so rows line up with the
/// header a sink writes from `Classifier::labels`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Identifier of the classified descriptor
    pub id: DescriptorId,
    /// `(label, confidence)` pairs
    pub scores: Vec<(String, f64)>,
}

impl Classification {
    pub fn new(id: DescriptorId, scores: Vec<(String, f64)>) -> Self {
        Self { id, scores }
    }

    /// Confidence for a label, if the classifier produced one.
    pub fn score(&self, label: &str) -> Option<f64> {
        self.scores
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, s)| *s)
    }

    /// Label with the highest confidence. Ties resolve to the earliest label.
    pub fn best_label(&self) -> Option<&str> {
        let mut best: Option<&(String, f64)> = None;
        for entry in &self.scores {
            match best {
                Some((_, s)) if *s >= entry.1 => {}
                _ => best = Some(entry),
            }
        }
        best.map(|(l, _)| l.as_str())
    }
}
