use super::snapshot::{ModelSnapshot, SNAPSHOT_FORMAT_VERSION};
use crate::config::ModelConfig;
use crate::error::{EngineError, Result};
use crate::models::{CatalogItem, Interaction, ItemProfile};
use crate::services::signals::{attractiveness_scores, InteractionMatrix, TfidfVectorizer};
use crate::services::similarity::SimilarityMatrix;
use crate::utils::matrix_fingerprint;
use chrono::Utc;
use ndarray::Array2;
use recommendation_cache::{CacheKey, RecommendationCache, TtlClass};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Turns raw interactions and catalog into a complete [`ModelSnapshot`].
///
/// Matrix construction runs on the blocking pool. Similarity matrices go
/// through the cache's single-flight path, keyed by a fingerprint of their
/// input, so identical data is never recomputed concurrently.
pub struct SnapshotBuilder {
    model: ModelConfig,
    min_interactions: usize,
    cache: Arc<RecommendationCache>,
}

impl SnapshotBuilder {
    pub fn new(model: ModelConfig, min_interactions: usize, cache: Arc<RecommendationCache>) -> Self {
        Self {
            model,
            min_interactions,
            cache,
        }
    }

    pub async fn build(
        &self,
        interactions: Vec<Interaction>,
        catalog: Vec<CatalogItem>,
        version: u64,
    ) -> Result<ModelSnapshot> {
        // Checked before any heavy work
        if interactions.len() < self.min_interactions || catalog.is_empty() {
            return Err(EngineError::InsufficientData {
                interactions: interactions.len(),
                required: self.min_interactions,
                catalog_size: catalog.len(),
            });
        }

        let max_features = self.model.max_features;
        let (matrix, features, items) = tokio::task::spawn_blocking(move || {
            let mut catalog = catalog;
            catalog.sort_by_key(|item| item.id);
            catalog.dedup_by_key(|item| item.id);

            let matrix = InteractionMatrix::from_interactions(&interactions);
            let features = TfidfVectorizer::new(max_features).fit_transform(&catalog);
            let items: Vec<ItemProfile> = catalog
                .iter()
                .zip(attractiveness_scores(&catalog))
                .map(|(item, attractiveness)| ItemProfile {
                    item_id: item.id,
                    title: item.title.clone(),
                    category: item.category.clone(),
                    department_id: item.department_id,
                    enrollment_count: item.enrollment_count,
                    attractiveness,
                })
                .collect();
            (matrix, features, items)
        })
        .await?;

        debug!(
            learners = matrix.n_learners(),
            items = items.len(),
            terms = features.vocabulary.len(),
            "Feature matrices built"
        );

        let learner_similarity = self
            .similarity("learner", matrix.learner_ids().to_vec(), matrix.values().clone())
            .await;
        let item_similarity = self
            .similarity("item", features.item_ids.clone(), features.matrix.clone())
            .await;

        info!(
            version,
            learners = matrix.n_learners(),
            items = items.len(),
            interactions = matrix.interaction_count(),
            "Snapshot built"
        );

        Ok(ModelSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            version,
            trained_at: Utc::now(),
            weights: self.model.weights(),
            interactions: matrix,
            item_features: features,
            learner_similarity,
            item_similarity,
            items,
        })
    }

    /// Cached, single-flight similarity. Malformed input degrades to an empty
    /// matrix so the dependent signal contributes nothing.
    async fn similarity(&self, kind: &'static str, ids: Vec<i64>, features: Array2<f64>) -> SimilarityMatrix {
        let key = CacheKey::similarity(kind, &matrix_fingerprint(&ids, &features));

        let result = self
            .cache
            .get_or_compute(&key, TtlClass::Similarity, || async move {
                tokio::task::spawn_blocking(move || {
                    SimilarityMatrix::compute(ids, features.view()).map_err(EngineError::from)
                })
                .await?
            })
            .await;

        match result {
            Ok(matrix) => Arc::try_unwrap(matrix).unwrap_or_else(|shared| (*shared).clone()),
            Err(e) => {
                warn!(kind, error = %e, "Similarity computation failed, signal degrades to empty");
                SimilarityMatrix::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recommendation_cache::CacheTtls;

    fn builder(min_interactions: usize) -> SnapshotBuilder {
        SnapshotBuilder::new(
            ModelConfig::default(),
            min_interactions,
            Arc::new(RecommendationCache::in_memory(CacheTtls::default())),
        )
    }

    fn item(id: i64, title: &str) -> CatalogItem {
        CatalogItem {
            id,
            title: title.to_string(),
            description: String::new(),
            category: "programming".to_string(),
            department_id: None,
            enrollment_count: id as u64,
            completion_rate: 0.5,
            module_count: 1,
            quiz_count: 1,
            assignment_count: 1,
        }
    }

    fn interaction(learner_id: i64, item_id: i64, strength: f64) -> Interaction {
        Interaction {
            learner_id,
            item_id,
            strength,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insufficient_data_checked_first() {
        let err = builder(10)
            .build(vec![interaction(1, 1, 1.0)], vec![item(1, "Rust")], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { interactions: 1, required: 10, .. }));

        let err = builder(0).build(vec![interaction(1, 1, 1.0)], vec![], 1).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { catalog_size: 0, .. }));
    }

    #[tokio::test]
    async fn test_builds_consistent_snapshot() {
        let catalog = vec![item(3, "Rust async"), item(1, "Rust basics"), item(2, "Python basics")];
        let interactions = vec![
            interaction(1, 1, 3.0),
            interaction(1, 2, 1.0),
            interaction(2, 1, 2.0),
            interaction(2, 3, 4.0),
        ];
        let snapshot = builder(4).build(interactions, catalog, 7).await.unwrap();

        assert!(snapshot.validate().is_ok());
        assert_eq!(snapshot.version, 7);
        assert_eq!(snapshot.items.iter().map(|i| i.item_id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(snapshot.learner_similarity.len(), 2);
        assert_eq!(snapshot.item_similarity.len(), 3);
        assert!(snapshot.item_similarity.is_symmetric(1e-12));
    }

    #[tokio::test]
    async fn test_negative_strength_degrades_learner_similarity() {
        let catalog = vec![item(1, "Rust"), item(2, "Go")];
        let interactions = vec![interaction(1, 1, -1.0), interaction(2, 2, 1.0)];
        let snapshot = builder(1).build(interactions, catalog, 1).await.unwrap();

        assert!(snapshot.learner_similarity.is_empty());
        assert_eq!(snapshot.item_similarity.len(), 2);
    }
}
