//! Recommendation engine facade exposed to the serving layer.

use crate::config::Config;
use crate::data_source::DataSource;
use crate::error::{EngineError, Result};
use crate::models::{ItemId, LearnerId, RecommendationEntry};
use crate::services::combiner::Combiner;
use crate::services::evaluation::{EvaluationReport, Evaluator, SnapshotRecommender};
use crate::services::lifecycle::{
    BootstrapOutcome, ModelLifecycle, ModelSnapshot, ModelStatus, SnapshotBuilder, TrainingOutcome,
};
use crate::services::signals::{CollaborativeSignal, ContentSignal, PopularitySignal};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use recommendation_cache::{op, CacheKey, CacheStats, RecommendationCache, TtlClass};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-learner results of a batch request. One learner failing never fails
/// the batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchRecommendations {
    pub results: BTreeMap<LearnerId, Vec<RecommendationEntry>>,
    pub failed: Vec<LearnerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub learners: usize,
    pub items: usize,
    pub interactions: usize,
    pub sparsity: f64,
    pub avg_items_per_learner: f64,
    pub snapshot_version: Option<u64>,
    pub pending_activity: u64,
    pub cache_backend: String,
    pub cache: CacheStats,
}

/// Activity logged since the last successful training pass
#[derive(Default)]
struct ActivityTracker {
    pending: AtomicU64,
    last_activity_at: RwLock<Option<DateTime<Utc>>>,
}

impl ActivityTracker {
    /// Forget the `seen` events counted before a training pass started.
    /// Events logged while it ran stay pending for the next pass.
    fn settle(&self, seen: u64) {
        let _ = self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                Some(pending.saturating_sub(seen))
            });
    }
}

pub struct RecommendationEngine {
    config: Config,
    source: Arc<dyn DataSource>,
    cache: Arc<RecommendationCache>,
    lifecycle: ModelLifecycle,
    collaborative: CollaborativeSignal,
    content: ContentSignal,
    popularity: PopularitySignal,
    combiner: Combiner,
    evaluator: Evaluator,
    activity: ActivityTracker,
}

impl RecommendationEngine {
    /// Validates `config` and wires every component. No training happens here;
    /// call [`RecommendationEngine::bootstrap`] or
    /// [`RecommendationEngine::retrain`].
    pub fn new(
        config: Config,
        source: Arc<dyn DataSource>,
        cache: Arc<RecommendationCache>,
    ) -> Result<Self> {
        config.validate()?;

        let builder = SnapshotBuilder::new(
            config.model.clone(),
            config.lifecycle.min_interactions,
            Arc::clone(&cache),
        );
        let lifecycle = ModelLifecycle::new(&config.lifecycle, Arc::clone(&source), builder);
        let combiner = Combiner::new(config.model.weights(), config.model.explanation_mode())?;

        Ok(Self {
            collaborative: CollaborativeSignal::new(
                config.model.similarity_threshold,
                config.model.neighbours,
            ),
            content: ContentSignal::new(),
            popularity: PopularitySignal::new(
                Arc::clone(&source),
                config.model.trending_window_days,
            ),
            evaluator: Evaluator::new(config.evaluation.clone()),
            combiner,
            lifecycle,
            source,
            cache,
            config,
            activity: ActivityTracker::default(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_source(&self) -> &Arc<dyn DataSource> {
        &self.source
    }

    pub fn lifecycle(&self) -> &ModelLifecycle {
        &self.lifecycle
    }

    /// Ranked recommendations for one learner.
    ///
    /// Served from cache unless `force_refresh`; a forced request recomputes
    /// and writes the fresh result through. Unknown learners get whatever the
    /// non-personal signals produce, possibly nothing.
    pub async fn get_recommendations(
        &self,
        learner_id: LearnerId,
        limit: usize,
        force_refresh: bool,
    ) -> Result<Vec<RecommendationEntry>> {
        if learner_id <= 0 {
            return Err(EngineError::InvalidLearner(learner_id));
        }
        let snapshot = self.lifecycle.current().ok_or(EngineError::ModelNotTrained)?;
        let limit = if limit == 0 {
            self.config.service.default_limit
        } else {
            limit
        };
        let key = CacheKey::recommendations(learner_id, limit, snapshot.version);

        if force_refresh {
            debug!(learner_id, "Forced refresh, bypassing cache read");
            let entries = self.recommend_from(&snapshot, learner_id, limit).await;
            self.cache.set(&key, &entries, TtlClass::Recommendation).await;
            return Ok(entries);
        }

        let entries = self
            .cache
            .get_or_compute(&key, TtlClass::Recommendation, || async {
                Ok::<_, EngineError>(self.recommend_from(&snapshot, learner_id, limit).await)
            })
            .await?;
        Ok(Arc::try_unwrap(entries).unwrap_or_else(|shared| (*shared).clone()))
    }

    /// Recommendations for many learners, computed concurrently
    pub async fn get_batch_recommendations(
        &self,
        learner_ids: &[LearnerId],
        limit: usize,
    ) -> BatchRecommendations {
        let outcomes = join_all(
            learner_ids
                .iter()
                .map(|&id| async move { (id, self.get_recommendations(id, limit, false).await) }),
        )
        .await;

        let mut batch = BatchRecommendations::default();
        for (learner_id, outcome) in outcomes {
            match outcome {
                Ok(entries) => {
                    batch.results.insert(learner_id, entries);
                }
                Err(e) => {
                    warn!(learner_id, error = %e, "Batch recommendation failed for learner");
                    batch.failed.push(learner_id);
                }
            }
        }
        batch
    }

    /// Run a training pass now. Cached recommendations of the previous
    /// snapshot are dropped once the new one is active.
    pub async fn retrain(&self) -> TrainingOutcome {
        let seen = self.pending_activity();
        let outcome = self.lifecycle.retrain().await;
        if outcome.is_trained() {
            self.activity.settle(seen);
            self.invalidate_recommendations().await;
        }
        outcome
    }

    /// Trigger a training pass without waiting for it
    pub fn spawn_retrain(self: &Arc<Self>) -> tokio::task::JoinHandle<TrainingOutcome> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.retrain().await })
    }

    pub async fn bootstrap(&self) -> BootstrapOutcome {
        let seen = self.pending_activity();
        let outcome = self.lifecycle.bootstrap().await;
        if matches!(outcome, BootstrapOutcome::Trained(ref t) if t.is_trained()) {
            self.activity.settle(seen);
            self.invalidate_recommendations().await;
        }
        outcome
    }

    pub fn get_model_status(&self) -> ModelStatus {
        self.lifecycle.status()
    }

    /// Drop every cached entry, similarity matrices included
    pub async fn clear_cache(&self) -> usize {
        let removed = self.cache.clear().await;
        info!(removed, "Cache cleared");
        removed
    }

    /// Offline evaluation on a temporal hold-out of the current data
    pub async fn get_evaluation_report(&self) -> Result<EvaluationReport> {
        let (interactions, catalog) = self.lifecycle.training_data().await?;
        Ok(self
            .evaluator
            .evaluate(
                interactions,
                catalog,
                self.lifecycle.builder(),
                self.lifecycle.current(),
                self,
            )
            .await)
    }

    /// Log learner activity for the incremental retrain trigger and drop the
    /// learner's cached recommendations
    pub async fn record_activity(
        &self,
        learner_id: LearnerId,
        activity_type: &str,
        item_id: Option<ItemId>,
    ) -> Result<()> {
        if learner_id <= 0 {
            return Err(EngineError::InvalidLearner(learner_id));
        }

        self.activity.pending.fetch_add(1, Ordering::SeqCst);
        *self.activity.last_activity_at.write() = Some(Utc::now());

        let prefix = CacheKey::subject_prefix(op::RECOMMENDATIONS, &learner_id.to_string());
        self.cache.invalidate_prefix(&prefix).await;

        debug!(learner_id, activity_type, ?item_id, "Activity recorded");
        Ok(())
    }

    pub fn pending_activity(&self) -> u64 {
        self.activity.pending.load(Ordering::SeqCst)
    }

    pub fn last_activity_at(&self) -> Option<DateTime<Utc>> {
        *self.activity.last_activity_at.read()
    }

    /// Training time of the active snapshot
    pub fn last_update_at(&self) -> Option<DateTime<Utc>> {
        self.lifecycle.current().map(|s| s.trained_at)
    }

    pub fn get_stats(&self) -> EngineStats {
        let snapshot = self.lifecycle.current();
        let (learners, items, interactions, sparsity) = match &snapshot {
            Some(s) => (
                s.interactions.n_learners(),
                s.items.len(),
                s.interactions.interaction_count(),
                s.interactions.sparsity(),
            ),
            None => (0, 0, 0, 1.0),
        };

        EngineStats {
            learners,
            items,
            interactions,
            sparsity,
            avg_items_per_learner: if learners > 0 {
                interactions as f64 / learners as f64
            } else {
                0.0
            },
            snapshot_version: snapshot.map(|s| s.version),
            pending_activity: self.pending_activity(),
            cache_backend: self.cache.backend_name().to_string(),
            cache: self.cache.stats(),
        }
    }

    async fn invalidate_recommendations(&self) {
        self.cache
            .invalidate_prefix(&CacheKey::operation_prefix(op::RECOMMENDATIONS))
            .await;
    }
}

#[async_trait]
impl SnapshotRecommender for RecommendationEngine {
    /// Signals plus combiner against an explicit snapshot, weighted the way
    /// the snapshot was trained. Signals fetch twice the requested size so
    /// the combiner has overlap to work with.
    async fn recommend_from(
        &self,
        snapshot: &ModelSnapshot,
        learner_id: LearnerId,
        n: usize,
    ) -> Vec<RecommendationEntry> {
        let pool = n.saturating_mul(2);
        let history = snapshot.history(learner_id);

        let collaborative = self.collaborative.recommend(
            &snapshot.interactions,
            &snapshot.learner_similarity,
            learner_id,
            pool,
        );
        let content = self
            .content
            .recommend(&snapshot.item_similarity, &snapshot.items, &history, pool);

        let department_id = match self.source.get_learner_profile(learner_id).await {
            Ok(profile) => profile.and_then(|p| p.department_id),
            Err(e) => {
                warn!(learner_id, error = %e, "Learner profile unavailable");
                None
            }
        };
        let popularity = self
            .popularity
            .recommend(learner_id, department_id, &history, pool)
            .await;

        self.combiner.combine_weighted(
            &snapshot.weights,
            &[collaborative, content, popularity],
            n,
        )
    }
}
