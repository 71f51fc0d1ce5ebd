// Utility functions for recommendation-engine

use crate::models::ScoredItem;
use ndarray::Array2;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

/// Rank by score descending, ties broken by ascending item id
pub fn sort_scored(items: &mut [ScoredItem]) {
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
}

/// Content hash of a labelled feature matrix, used to key cached
/// similarity matrices. Identical data always yields the same fingerprint.
pub fn matrix_fingerprint(ids: &[i64], matrix: &Array2<f64>) -> String {
    let mut hasher = Sha256::new();
    let (rows, cols) = matrix.dim();
    hasher.update((rows as u64).to_le_bytes());
    hasher.update((cols as u64).to_le_bytes());
    for id in ids {
        hasher.update(id.to_le_bytes());
    }
    for value in matrix.iter() {
        hasher.update(value.to_bits().to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Arithmetic mean, 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_sort_scored_ties_by_id() {
        let mut items = vec![
            ScoredItem::new(9, 0.5),
            ScoredItem::new(2, 0.9),
            ScoredItem::new(4, 0.5),
        ];
        sort_scored(&mut items);
        let ids: Vec<_> = items.iter().map(|i| i.item_id).collect();
        assert_eq!(ids, vec![2, 4, 9]);
    }

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let m = array![[1.0, 0.0], [0.5, 2.0]];
        let a = matrix_fingerprint(&[1, 2], &m);
        let b = matrix_fingerprint(&[1, 2], &m.clone());
        let c = matrix_fingerprint(&[1, 3], &m);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[]), 0.0);
        assert!((mean(&[1.0, 2.0, 3.0]) - 2.0).abs() < 1e-12);
    }
}
