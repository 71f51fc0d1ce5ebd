//! Offline evaluation: temporal hold-out accuracy, catalog diversity and
//! popularity bias.
//!
//! Evaluation trains a throwaway snapshot on the early partition and never
//! touches the active model.

use crate::config::EvaluationConfig;
use crate::models::{CatalogItem, Interaction, ItemId, LearnerId, RecommendationEntry};
use crate::services::lifecycle::{ModelSnapshot, SnapshotBuilder};
use crate::utils::mean;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

pub const PRECISION_KS: [usize; 3] = [3, 5, 10];
pub const RECALL_KS: [usize; 3] = [3, 5, 10];
pub const NDCG_KS: [usize; 2] = [5, 10];

/// Recommendations requested per learner for diversity
const DIVERSITY_LIST_SIZE: usize = 10;
/// Recommendations requested per learner for popularity bias
const BIAS_LIST_SIZE: usize = 5;

/// Produces recommendations against an explicit snapshot, bypassing the cache
#[async_trait]
pub trait SnapshotRecommender: Send + Sync {
    async fn recommend_from(
        &self,
        snapshot: &ModelSnapshot,
        learner_id: LearnerId,
        n: usize,
    ) -> Vec<RecommendationEntry>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    /// `precision@k`, `recall@k`, `ndcg@k` averaged over evaluated learners
    pub metrics: BTreeMap<String, f64>,
    pub evaluated_users: usize,
    pub total_test_users: usize,
    pub evaluation_coverage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiversityMetrics {
    pub unique_items_recommended: usize,
    pub total_recommendations: usize,
    pub diversity_ratio: f64,
    pub avg_recommendations_per_user: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopularityBiasMetrics {
    pub avg_catalog_popularity: f64,
    pub avg_recommended_popularity: f64,
    pub popularity_bias_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub generated_at: DateTime<Utc>,
    pub held_out_fraction: f64,
    pub train_interactions: usize,
    pub test_interactions: usize,
    pub accuracy: Option<AccuracyMetrics>,
    pub diversity: Option<DiversityMetrics>,
    pub popularity_bias: Option<PopularityBiasMetrics>,
}

pub struct Evaluator {
    config: EvaluationConfig,
}

impl Evaluator {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }

    /// Split at the `1 - held_out_fraction` quantile of interaction dates
    /// (linear interpolation). Interactions on or before the split date train,
    /// later ones are held out.
    pub fn temporal_split(&self, interactions: &[Interaction]) -> (Vec<Interaction>, Vec<Interaction>) {
        if interactions.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let mut stamps: Vec<i64> = interactions
            .iter()
            .map(|i| i.occurred_at.timestamp_millis())
            .collect();
        stamps.sort_unstable();

        let q = 1.0 - self.config.held_out_fraction;
        let position = q * (stamps.len() - 1) as f64;
        let lower = position.floor() as usize;
        let upper = position.ceil() as usize;
        let fraction = position - lower as f64;
        let split_millis =
            stamps[lower] as f64 + (stamps[upper] - stamps[lower]) as f64 * fraction;

        let split: DateTime<Utc> = Utc
            .timestamp_millis_opt(split_millis.floor() as i64)
            .single()
            .unwrap_or_else(Utc::now);

        interactions
            .iter()
            .cloned()
            .partition(|i| i.occurred_at <= split)
    }

    pub fn precision_at_k(recommended: &[ItemId], relevant: &HashSet<ItemId>, k: usize) -> f64 {
        if recommended.is_empty() || relevant.is_empty() || k == 0 {
            return 0.0;
        }
        let top = &recommended[..k.min(recommended.len())];
        let hits = top.iter().filter(|id| relevant.contains(*id)).count();
        hits as f64 / top.len() as f64
    }

    pub fn recall_at_k(recommended: &[ItemId], relevant: &HashSet<ItemId>, k: usize) -> f64 {
        if recommended.is_empty() || relevant.is_empty() || k == 0 {
            return 0.0;
        }
        let top = &recommended[..k.min(recommended.len())];
        let hits = top.iter().filter(|id| relevant.contains(*id)).count();
        hits as f64 / relevant.len() as f64
    }

    /// Binary-relevance NDCG, normalised by placing every relevant item first
    pub fn ndcg_at_k(recommended: &[ItemId], relevant: &HashSet<ItemId>, k: usize) -> f64 {
        if recommended.is_empty() || relevant.is_empty() || k == 0 {
            return 0.0;
        }
        let discount = |rank: usize| 1.0 / ((rank + 2) as f64).log2();

        let dcg: f64 = recommended
            .iter()
            .take(k)
            .enumerate()
            .filter(|(_, id)| relevant.contains(*id))
            .map(|(rank, _)| discount(rank))
            .sum();
        let idcg: f64 = (0..k.min(relevant.len())).map(discount).sum();

        if idcg > 0.0 {
            dcg / idcg
        } else {
            0.0
        }
    }

    pub async fn evaluate(
        &self,
        interactions: Vec<Interaction>,
        catalog: Vec<CatalogItem>,
        builder: &SnapshotBuilder,
        active: Option<Arc<ModelSnapshot>>,
        recommender: &dyn SnapshotRecommender,
    ) -> EvaluationReport {
        let (train, test) = self.temporal_split(&interactions);
        info!(train = train.len(), test = test.len(), "Evaluation split created");

        let mut report = EvaluationReport {
            generated_at: Utc::now(),
            held_out_fraction: self.config.held_out_fraction,
            train_interactions: train.len(),
            test_interactions: test.len(),
            accuracy: None,
            diversity: None,
            popularity_bias: None,
        };

        let holdout_snapshot = match builder.build(train, catalog, 0).await {
            Ok(snapshot) => Some(Arc::new(snapshot)),
            Err(e) => {
                warn!(error = %e, "Hold-out snapshot could not be trained");
                None
            }
        };

        if let Some(snapshot) = &holdout_snapshot {
            report.accuracy = self.accuracy(snapshot, &test, recommender).await;
        }

        // Diversity and bias describe the model actually serving
        if let Some(snapshot) = active.or(holdout_snapshot) {
            let sample = self.sample_learners(snapshot.interactions.learner_ids(), self.config.diversity_sample);
            report.diversity = self.diversity(&snapshot, &sample, recommender).await;
            report.popularity_bias = self.popularity_bias(&snapshot, &sample, recommender).await;
        }

        report
    }

    async fn accuracy(
        &self,
        snapshot: &ModelSnapshot,
        test: &[Interaction],
        recommender: &dyn SnapshotRecommender,
    ) -> Option<AccuracyMetrics> {
        let mut held_out: BTreeMap<LearnerId, HashSet<ItemId>> = BTreeMap::new();
        for interaction in test {
            held_out
                .entry(interaction.learner_id)
                .or_default()
                .insert(interaction.item_id);
        }

        let test_users: Vec<LearnerId> = held_out.keys().copied().collect();
        if test_users.len() < self.config.min_test_users {
            warn!(
                test_users = test_users.len(),
                required = self.config.min_test_users,
                "Insufficient test users"
            );
            return None;
        }
        let test_users = self.sample_learners(&test_users, self.config.max_test_users);

        let max_k = PRECISION_KS
            .iter()
            .chain(RECALL_KS.iter())
            .chain(NDCG_KS.iter())
            .copied()
            .max()
            .unwrap_or(10);

        let mut collected: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut evaluated_users = 0;
        for learner_id in &test_users {
            let Some(relevant) = held_out.get(learner_id) else {
                continue;
            };
            let recommended: Vec<ItemId> = recommender
                .recommend_from(snapshot, *learner_id, max_k)
                .await
                .iter()
                .map(|entry| entry.item_id)
                .collect();
            if recommended.is_empty() {
                continue;
            }

            for k in PRECISION_KS {
                collected
                    .entry(format!("precision@{}", k))
                    .or_default()
                    .push(Self::precision_at_k(&recommended, relevant, k));
            }
            for k in RECALL_KS {
                collected
                    .entry(format!("recall@{}", k))
                    .or_default()
                    .push(Self::recall_at_k(&recommended, relevant, k));
            }
            for k in NDCG_KS {
                collected
                    .entry(format!("ndcg@{}", k))
                    .or_default()
                    .push(Self::ndcg_at_k(&recommended, relevant, k));
            }
            evaluated_users += 1;
        }

        if evaluated_users == 0 {
            warn!("No users could be evaluated");
            return None;
        }

        info!(evaluated_users, "Model evaluation completed");
        Some(AccuracyMetrics {
            metrics: collected
                .into_iter()
                .map(|(name, values)| (name, mean(&values)))
                .collect(),
            evaluated_users,
            total_test_users: test_users.len(),
            evaluation_coverage: evaluated_users as f64 / test_users.len() as f64,
        })
    }

    async fn diversity(
        &self,
        snapshot: &ModelSnapshot,
        sample: &[LearnerId],
        recommender: &dyn SnapshotRecommender,
    ) -> Option<DiversityMetrics> {
        if sample.is_empty() {
            return None;
        }

        let mut unique: BTreeSet<ItemId> = BTreeSet::new();
        let mut total = 0;
        for learner_id in sample {
            let entries = recommender
                .recommend_from(snapshot, *learner_id, DIVERSITY_LIST_SIZE)
                .await;
            total += entries.len();
            unique.extend(entries.iter().map(|e| e.item_id));
        }

        if total == 0 {
            return None;
        }
        Some(DiversityMetrics {
            unique_items_recommended: unique.len(),
            total_recommendations: total,
            diversity_ratio: unique.len() as f64 / total as f64,
            avg_recommendations_per_user: total as f64 / sample.len() as f64,
        })
    }

    async fn popularity_bias(
        &self,
        snapshot: &ModelSnapshot,
        sample: &[LearnerId],
        recommender: &dyn SnapshotRecommender,
    ) -> Option<PopularityBiasMetrics> {
        if snapshot.items.is_empty() {
            return None;
        }

        let mut recommended = Vec::new();
        for learner_id in sample {
            for entry in recommender
                .recommend_from(snapshot, *learner_id, BIAS_LIST_SIZE)
                .await
            {
                if let Some(profile) = snapshot.item_profile(entry.item_id) {
                    recommended.push(profile.enrollment_count as f64);
                }
            }
        }
        if recommended.is_empty() {
            return None;
        }

        let catalog: Vec<f64> = snapshot
            .items
            .iter()
            .map(|p| p.enrollment_count as f64)
            .collect();
        let avg_catalog = mean(&catalog);
        let avg_recommended = mean(&recommended);

        Some(PopularityBiasMetrics {
            avg_catalog_popularity: avg_catalog,
            avg_recommended_popularity: avg_recommended,
            popularity_bias_ratio: if avg_catalog > 0.0 {
                avg_recommended / avg_catalog
            } else {
                0.0
            },
        })
    }

    /// Seeded sample of at most `limit` learners, ascending
    fn sample_learners(&self, learners: &[LearnerId], limit: usize) -> Vec<LearnerId> {
        let mut sample: Vec<LearnerId> = if learners.len() > limit {
            let mut rng = StdRng::seed_from_u64(self.config.random_seed);
            learners.choose_multiple(&mut rng, limit).copied().collect()
        } else {
            learners.to_vec()
        };
        sample.sort_unstable();
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn set(ids: &[ItemId]) -> HashSet<ItemId> {
        ids.iter().copied().collect()
    }

    fn interaction(learner_id: LearnerId, item_id: ItemId, day: i64) -> Interaction {
        Interaction {
            learner_id,
            item_id,
            strength: 1.0,
            occurred_at: Utc.timestamp_opt(0, 0).unwrap() + Duration::days(day),
        }
    }

    #[test]
    fn test_precision_and_recall() {
        let recs = [1, 2, 3, 4, 5];
        let relevant = set(&[2, 5, 9]);
        assert!((Evaluator::precision_at_k(&recs, &relevant, 3) - 1.0 / 3.0).abs() < 1e-12);
        assert!((Evaluator::precision_at_k(&recs, &relevant, 5) - 2.0 / 5.0).abs() < 1e-12);
        // Fewer recommendations than k
        assert!((Evaluator::precision_at_k(&recs, &relevant, 10) - 2.0 / 5.0).abs() < 1e-12);
        assert!((Evaluator::recall_at_k(&recs, &relevant, 3) - 1.0 / 3.0).abs() < 1e-12);
        assert!((Evaluator::recall_at_k(&recs, &relevant, 5) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(Evaluator::precision_at_k(&[], &relevant, 3), 0.0);
        assert_eq!(Evaluator::recall_at_k(&recs, &HashSet::new(), 3), 0.0);
    }

    #[test]
    fn test_ndcg() {
        let relevant = set(&[1, 2]);
        assert!((Evaluator::ndcg_at_k(&[1, 2, 3], &relevant, 5) - 1.0).abs() < 1e-12);

        let dcg = 1.0 / 3f64.log2();
        let idcg = 1.0 + 1.0 / 3f64.log2();
        assert!((Evaluator::ndcg_at_k(&[3, 4, 1], &relevant, 5) - dcg / idcg).abs() < 1e-12);
        assert_eq!(Evaluator::ndcg_at_k(&[3, 4], &relevant, 5), 0.0);
    }

    #[test]
    fn test_temporal_split_holds_out_latest() {
        let evaluator = Evaluator::new(EvaluationConfig::default());
        let interactions: Vec<_> = (0..10).map(|day| interaction(day, day, day)).collect();
        let (train, test) = evaluator.temporal_split(&interactions);

        assert_eq!(train.len(), 8);
        assert_eq!(test.len(), 2);
        let last_train = train.iter().map(|i| i.occurred_at).max().unwrap();
        assert!(test.iter().all(|i| i.occurred_at > last_train));
    }

    #[test]
    fn test_sampling_is_seeded() {
        let evaluator = Evaluator::new(EvaluationConfig::default());
        let learners: Vec<LearnerId> = (1..=200).collect();
        let a = evaluator.sample_learners(&learners, 50);
        let b = evaluator.sample_learners(&learners, 50);
        assert_eq!(a.len(), 50);
        assert_eq!(a, b);
        assert_eq!(evaluator.sample_learners(&learners[..3], 50), vec![1, 2, 3]);
    }
}
