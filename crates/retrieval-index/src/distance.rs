//! Distance helpers shared by the in-process algorithms.

use std::cmp::Ordering;

use crate::index::Neighbor;

/// Euclidean distance. Callers guarantee equal lengths.
pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Sort ascending by distance, ties broken by identifier so results are stable.
pub fn sort_neighbors(neighbors: &mut [Neighbor]) {
    neighbors.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}
