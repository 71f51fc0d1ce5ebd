use super::InteractionMatrix;
use crate::models::{LearnerId, ScoredItem, SignalList, SignalSource};
use crate::services::similarity::SimilarityMatrix;
use crate::utils::sort_scored;
use std::cmp::Ordering;
use tracing::debug;

/// User-based collaborative filtering
///
/// Algorithm:
/// 1. Take the `neighbours` learners most similar to the target (self excluded)
///    whose similarity exceeds `threshold`
/// 2. For each item the target has not interacted with, average the
///    neighbours' strengths weighted by similarity, over the neighbours that
///    interacted with it
/// 3. Rank by score, ties by ascending item id
///
/// Never fails: unknown learners or learners without qualifying neighbours
/// get an empty list.
#[derive(Debug, Clone)]
pub struct CollaborativeSignal {
    threshold: f64,
    neighbours: usize,
}

impl CollaborativeSignal {
    pub fn new(threshold: f64, neighbours: usize) -> Self {
        Self {
            threshold,
            neighbours,
        }
    }

    pub fn recommend(
        &self,
        interactions: &InteractionMatrix,
        learner_similarity: &SimilarityMatrix,
        learner_id: LearnerId,
        k: usize,
    ) -> SignalList {
        let (Some(target_row), Some(similarities)) = (
            interactions.learner_index(learner_id),
            learner_similarity.row(learner_id),
        ) else {
            debug!(learner_id, "Collaborative signal: learner not in matrix");
            return SignalList::empty(SignalSource::Collaborative);
        };

        let mut candidates: Vec<(LearnerId, f64)> = learner_similarity
            .ids()
            .iter()
            .zip(similarities.iter())
            .filter(|(id, _)| **id != learner_id)
            .map(|(id, sim)| (*id, *sim))
            .collect();
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let neighbours: Vec<(usize, f64)> = candidates
            .into_iter()
            .take(self.neighbours)
            .filter(|(_, sim)| *sim > self.threshold)
            .filter_map(|(id, sim)| interactions.learner_index(id).map(|row| (row, sim)))
            .collect();

        if neighbours.is_empty() {
            debug!(learner_id, "Collaborative signal: no qualifying neighbours");
            return SignalList::empty(SignalSource::Collaborative);
        }

        let values = interactions.values();
        let mut scored = Vec::new();
        for (col, &item_id) in interactions.item_ids().iter().enumerate() {
            if values[[target_row, col]] > 0.0 {
                continue;
            }

            let mut weighted = 0.0;
            let mut similarity_sum = 0.0;
            for &(row, sim) in &neighbours {
                let strength = values[[row, col]];
                if strength > 0.0 {
                    weighted += sim * strength;
                    similarity_sum += sim.abs();
                }
            }

            if similarity_sum > 0.0 {
                scored.push(ScoredItem::new(item_id, weighted / similarity_sum));
            }
        }

        sort_scored(&mut scored);
        scored.truncate(k);
        SignalList::new(SignalSource::Collaborative, scored)
    }
}
