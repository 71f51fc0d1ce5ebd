//! Signal generators: each independently ranks unseen items for a learner.

mod collaborative;
mod content;
mod popularity;
mod tfidf;

pub use collaborative::CollaborativeSignal;
pub use content::ContentSignal;
pub use popularity::PopularitySignal;
pub use tfidf::{tokenize, ItemFeatures, TfidfVectorizer};

use crate::models::{CatalogItem, Interaction, ItemId, LearnerId};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Attractiveness weights: enrollment, completion rate, modules, quizzes, assignments
const ATTRACTIVENESS_WEIGHTS: [f64; 5] = [0.3, 0.4, 0.1, 0.1, 0.1];

/// Dense learner x item strength matrix. Rows and columns are ascending ids;
/// only items seen by at least one learner get a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionMatrix {
    learner_ids: Vec<LearnerId>,
    item_ids: Vec<ItemId>,
    values: Array2<f64>,
}

impl InteractionMatrix {
    /// Build from raw interactions. Duplicate pairs keep the strongest value.
    pub fn from_interactions(interactions: &[Interaction]) -> Self {
        let mut cells: BTreeMap<(LearnerId, ItemId), f64> = BTreeMap::new();
        for interaction in interactions {
            let cell = cells
                .entry((interaction.learner_id, interaction.item_id))
                .or_insert(interaction.strength);
            if interaction.strength > *cell {
                *cell = interaction.strength;
            }
        }

        let learner_ids: Vec<LearnerId> = cells
            .keys()
            .map(|(l, _)| *l)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let item_ids: Vec<ItemId> = cells
            .keys()
            .map(|(_, i)| *i)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut values = Array2::<f64>::zeros((learner_ids.len(), item_ids.len()));
        for ((learner, item), strength) in cells {
            // Both ids were collected from `cells`, so the searches succeed
            if let (Ok(row), Ok(col)) = (learner_ids.binary_search(&learner), item_ids.binary_search(&item)) {
                values[[row, col]] = strength;
            }
        }

        Self {
            learner_ids,
            item_ids,
            values,
        }
    }

    pub fn learner_ids(&self) -> &[LearnerId] {
        &self.learner_ids
    }

    pub fn item_ids(&self) -> &[ItemId] {
        &self.item_ids
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn learner_index(&self, learner_id: LearnerId) -> Option<usize> {
        self.learner_ids.binary_search(&learner_id).ok()
    }

    pub fn item_index(&self, item_id: ItemId) -> Option<usize> {
        self.item_ids.binary_search(&item_id).ok()
    }

    pub fn strength(&self, learner_id: LearnerId, item_id: ItemId) -> f64 {
        match (self.learner_index(learner_id), self.item_index(item_id)) {
            (Some(row), Some(col)) => self.values[[row, col]],
            _ => 0.0,
        }
    }

    /// Items the learner interacted with; empty for unknown learners
    pub fn history(&self, learner_id: LearnerId) -> HashSet<ItemId> {
        match self.learner_index(learner_id) {
            Some(row) => self
                .values
                .row(row)
                .iter()
                .zip(&self.item_ids)
                .filter(|(strength, _)| **strength > 0.0)
                .map(|(_, item)| *item)
                .collect(),
            None => HashSet::new(),
        }
    }

    pub fn n_learners(&self) -> usize {
        self.learner_ids.len()
    }

    pub fn n_items(&self) -> usize {
        self.item_ids.len()
    }

    /// Number of non-zero cells
    pub fn interaction_count(&self) -> usize {
        self.values.iter().filter(|v| **v > 0.0).count()
    }

    /// Share of empty cells, 1.0 for an empty matrix
    pub fn sparsity(&self) -> f64 {
        let cells = self.values.len();
        if cells == 0 {
            return 1.0;
        }
        1.0 - self.interaction_count() as f64 / cells as f64
    }

    pub fn validate(&self) -> Result<(), String> {
        let (rows, cols) = self.values.dim();
        if rows != self.learner_ids.len() || cols != self.item_ids.len() {
            return Err(format!(
                "interaction matrix is {}x{} for {} learners and {} items",
                rows,
                cols,
                self.learner_ids.len(),
                self.item_ids.len()
            ));
        }
        Ok(())
    }
}

/// Weighted z-score composite per catalog item, aligned with `catalog`.
///
/// Each feature is standardised with the population standard deviation; a
/// constant feature contributes 0. With fewer than two items every score is 1.0.
pub fn attractiveness_scores(catalog: &[CatalogItem]) -> Vec<f64> {
    if catalog.len() < 2 {
        return vec![1.0; catalog.len()];
    }

    let features: Vec<[f64; 5]> = catalog
        .iter()
        .map(|item| {
            [
                item.enrollment_count as f64,
                item.completion_rate,
                item.module_count as f64,
                item.quiz_count as f64,
                item.assignment_count as f64,
            ]
        })
        .collect();

    let n = features.len() as f64;
    let mut means = [0.0; 5];
    let mut stds = [0.0; 5];
    for f in 0..5 {
        means[f] = features.iter().map(|row| row[f]).sum::<f64>() / n;
        let variance = features
            .iter()
            .map(|row| (row[f] - means[f]).powi(2))
            .sum::<f64>()
            / n;
        stds[f] = variance.sqrt();
    }

    features
        .iter()
        .map(|row| {
            (0..5)
                .map(|f| {
                    if stds[f] > 0.0 {
                        ATTRACTIVENESS_WEIGHTS[f] * (row[f] - means[f]) / stds[f]
                    } else {
                        0.0
                    }
                })
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn interaction(learner_id: LearnerId, item_id: ItemId, strength: f64) -> Interaction {
        Interaction {
            learner_id,
            item_id,
            strength,
            occurred_at: Utc::now(),
        }
    }

    fn catalog_item(id: ItemId, enrollment_count: u64, completion_rate: f64) -> CatalogItem {
        CatalogItem {
            id,
            title: format!("Course {}", id),
            description: String::new(),
            category: String::new(),
            department_id: None,
            enrollment_count,
            completion_rate,
            module_count: 4,
            quiz_count: 2,
            assignment_count: 1,
        }
    }

    #[test]
    fn test_matrix_layout_and_duplicates() {
        let matrix = InteractionMatrix::from_interactions(&[
            interaction(3, 20, 1.0),
            interaction(1, 10, 2.0),
            interaction(1, 10, 3.5),
            interaction(3, 10, 0.5),
        ]);
        assert_eq!(matrix.learner_ids(), &[1, 3]);
        assert_eq!(matrix.item_ids(), &[10, 20]);
        assert_eq!(matrix.strength(1, 10), 3.5);
        assert_eq!(matrix.strength(1, 20), 0.0);
        assert_eq!(matrix.strength(99, 10), 0.0);
        assert_eq!(matrix.interaction_count(), 3);
        assert!((matrix.sparsity() - 0.25).abs() < 1e-12);
        assert_eq!(matrix.history(3), [10, 20].into_iter().collect());
        assert!(matrix.history(42).is_empty());
        assert!(matrix.validate().is_ok());
    }

    #[test]
    fn test_attractiveness_single_item_is_constant() {
        assert_eq!(attractiveness_scores(&[catalog_item(1, 10, 0.5)]), vec![1.0]);
        assert!(attractiveness_scores(&[]).is_empty());
    }

    #[test]
    fn test_attractiveness_prefers_popular_and_completed() {
        let catalog = vec![
            catalog_item(1, 10, 0.2),
            catalog_item(2, 100, 0.9),
            catalog_item(3, 50, 0.5),
        ];
        let scores = attractiveness_scores(&catalog);
        assert!(scores[1] > scores[2]);
        assert!(scores[2] > scores[0]);
        // z-scores are centred, constant features contribute nothing
        assert!(scores.iter().sum::<f64>().abs() < 1e-9);
    }
}
