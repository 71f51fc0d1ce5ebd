use crate::models::{ItemId, ItemProfile, LearnerId};
use crate::services::combiner::SignalWeights;
use crate::services::signals::{InteractionMatrix, ItemFeatures};
use crate::services::similarity::SimilarityMatrix;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Bump when the persisted layout changes; older files load as corrupt
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Immutable, versioned bundle of trained model state.
///
/// Every field is required; a snapshot that deserializes and passes
/// [`ModelSnapshot::validate`] is complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub format_version: u32,
    pub version: u64,
    pub trained_at: DateTime<Utc>,
    pub weights: SignalWeights,
    pub interactions: InteractionMatrix,
    pub item_features: ItemFeatures,
    pub learner_similarity: SimilarityMatrix,
    pub item_similarity: SimilarityMatrix,
    /// Catalog metadata, ascending item id
    pub items: Vec<ItemProfile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSize {
    pub learners: usize,
    pub items: usize,
    pub interactions: usize,
    pub features: usize,
}

impl ModelSnapshot {
    pub fn validate(&self) -> Result<(), String> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(format!(
                "snapshot format {} (expected {})",
                self.format_version, SNAPSHOT_FORMAT_VERSION
            ));
        }
        self.weights.validate().map_err(|e| e.to_string())?;
        self.interactions.validate()?;
        self.item_features.validate()?;
        self.learner_similarity.validate()?;
        self.item_similarity.validate()?;

        if !self.learner_similarity.is_empty()
            && self.learner_similarity.ids() != self.interactions.learner_ids()
        {
            return Err("learner similarity ids differ from interaction rows".to_string());
        }
        if !self.item_similarity.is_empty()
            && self.item_similarity.ids() != self.item_features.item_ids.as_slice()
        {
            return Err("item similarity ids differ from feature rows".to_string());
        }
        if self.items.windows(2).any(|w| w[0].item_id >= w[1].item_id) {
            return Err("item profiles are not strictly ascending".to_string());
        }
        Ok(())
    }

    pub fn size(&self) -> SnapshotSize {
        SnapshotSize {
            learners: self.interactions.n_learners(),
            items: self.items.len(),
            interactions: self.interactions.interaction_count(),
            features: self.item_features.vocabulary.len(),
        }
    }

    pub fn history(&self, learner_id: LearnerId) -> HashSet<ItemId> {
        self.interactions.history(learner_id)
    }

    pub fn item_profile(&self, item_id: ItemId) -> Option<&ItemProfile> {
        self.items
            .binary_search_by_key(&item_id, |p| p.item_id)
            .ok()
            .map(|i| &self.items[i])
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.trained_at
    }
}
