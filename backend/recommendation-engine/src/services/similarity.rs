//! Cosine similarity between the rows of a non-negative feature matrix.

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("non-finite value at ({row}, {col})")]
    NonFinite { row: usize, col: usize },

    #[error("negative value {value} at ({row}, {col})")]
    Negative { row: usize, col: usize, value: f64 },

    #[error("{ids} ids for {rows} rows")]
    ShapeMismatch { ids: usize, rows: usize },
}

/// Pairwise cosine similarity of `matrix` rows.
///
/// Fewer than two rows yields an empty 0x0 matrix. An all-zero row has
/// similarity 0 with everything, itself included. The result is exactly
/// symmetric and clamped to [-1, 1].
pub fn cosine_similarity(matrix: ArrayView2<f64>) -> Result<Array2<f64>, SimilarityError> {
    let (rows, _) = matrix.dim();
    if rows < 2 {
        return Ok(Array2::zeros((0, 0)));
    }

    for ((row, col), &value) in matrix.indexed_iter() {
        if !value.is_finite() {
            return Err(SimilarityError::NonFinite { row, col });
        }
        if value < 0.0 {
            return Err(SimilarityError::Negative { row, col, value });
        }
    }

    let norms: Vec<f64> = matrix
        .rows()
        .into_iter()
        .map(|row| row.dot(&row).sqrt())
        .collect();
    let gram = matrix.dot(&matrix.t());

    let mut result = Array2::<f64>::zeros((rows, rows));
    for i in 0..rows {
        if norms[i] == 0.0 {
            continue;
        }
        result[[i, i]] = 1.0;
        for j in (i + 1)..rows {
            if norms[j] == 0.0 {
                continue;
            }
            let value = (gram[[i, j]] / (norms[i] * norms[j])).clamp(-1.0, 1.0);
            result[[i, j]] = value;
            result[[j, i]] = value;
        }
    }

    Ok(result)
}

/// Similarity matrix labelled with the ids of its rows (ascending)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatrix {
    ids: Vec<i64>,
    values: Array2<f64>,
}

impl SimilarityMatrix {
    /// Compute from a feature matrix whose row `r` belongs to `ids[r]`
    pub fn compute(ids: Vec<i64>, features: ArrayView2<f64>) -> Result<Self, SimilarityError> {
        if ids.len() != features.nrows() {
            return Err(SimilarityError::ShapeMismatch {
                ids: ids.len(),
                rows: features.nrows(),
            });
        }
        let values = cosine_similarity(features)?;
        if values.is_empty() {
            return Ok(Self::empty());
        }
        Ok(Self { ids, values })
    }

    pub fn empty() -> Self {
        Self {
            ids: Vec::new(),
            values: Array2::zeros((0, 0)),
        }
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn index_of(&self, id: i64) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    pub fn get(&self, a: i64, b: i64) -> Option<f64> {
        let i = self.index_of(a)?;
        let j = self.index_of(b)?;
        Some(self.values[[i, j]])
    }

    pub fn row(&self, id: i64) -> Option<ArrayView1<'_, f64>> {
        self.index_of(id).map(|i| self.values.row(i))
    }

    /// Structural check run once when a snapshot is loaded
    pub fn validate(&self) -> Result<(), String> {
        let (rows, cols) = self.values.dim();
        if rows != cols || rows != self.ids.len() {
            return Err(format!(
                "similarity matrix is {}x{} for {} ids",
                rows,
                cols,
                self.ids.len()
            ));
        }
        if self.ids.windows(2).any(|w| w[0] >= w[1]) {
            return Err("similarity ids are not strictly ascending".to_string());
        }
        Ok(())
    }

    pub fn is_symmetric(&self, tolerance: f64) -> bool {
        let n = self.values.nrows();
        (0..n).all(|i| (i..n).all(|j| (self.values[[i, j]] - self.values[[j, i]]).abs() <= tolerance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_symmetric_with_unit_diagonal() {
        let m = array![[3.0, 3.0, 0.0], [3.0, 3.0, 2.0], [0.0, 1.0, 4.0], [1.0, 0.0, 0.0]];
        let sim = cosine_similarity(m.view()).unwrap();
        assert_eq!(sim.dim(), (4, 4));
        for i in 0..4 {
            assert!((sim[[i, i]] - 1.0).abs() < 1e-12);
            for j in 0..4 {
                assert_eq!(sim[[i, j]], sim[[j, i]]);
                assert!((-1.0..=1.0).contains(&sim[[i, j]]));
            }
        }
        // Identical direction
        let m = array![[1.0, 2.0], [2.0, 4.0]];
        let sim = cosine_similarity(m.view()).unwrap();
        assert!((sim[[0, 1]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_row_is_zero_not_nan() {
        let m = array![[0.0, 0.0], [1.0, 1.0], [0.0, 2.0]];
        let sim = cosine_similarity(m.view()).unwrap();
        assert_eq!(sim[[0, 0]], 0.0);
        assert_eq!(sim[[0, 1]], 0.0);
        assert_eq!(sim[[2, 0]], 0.0);
        assert!(sim.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_fewer_than_two_rows_is_empty() {
        let m = array![[1.0, 2.0]];
        assert_eq!(cosine_similarity(m.view()).unwrap().dim(), (0, 0));
        let labelled = SimilarityMatrix::compute(vec![7], m.view()).unwrap();
        assert!(labelled.is_empty());
    }

    #[test]
    fn test_rejects_malformed_input() {
        let m = array![[1.0, -2.0], [1.0, 1.0]];
        assert!(matches!(
            cosine_similarity(m.view()),
            Err(SimilarityError::Negative { row: 0, col: 1, .. })
        ));
        let m = array![[1.0, f64::NAN], [1.0, 1.0]];
        assert!(matches!(
            cosine_similarity(m.view()),
            Err(SimilarityError::NonFinite { .. })
        ));
        let m = array![[1.0], [1.0]];
        assert!(matches!(
            SimilarityMatrix::compute(vec![1], m.view()),
            Err(SimilarityError::ShapeMismatch { ids: 1, rows: 2 })
        ));
    }

    #[test]
    fn test_labelled_lookup() {
        let m = array![[1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
        let sim = SimilarityMatrix::compute(vec![10, 20, 30], m.view()).unwrap();
        assert!(sim.validate().is_ok());
        assert!(sim.is_symmetric(1e-12));
        assert_eq!(sim.get(10, 30), Some(0.0));
        assert!((sim.get(10, 20).unwrap() - 1.0 / 2f64.sqrt()).abs() < 1e-12);
        assert_eq!(sim.get(10, 99), None);
        assert_eq!(sim.row(20).map(|r| r.len()), Some(3));
    }
}
