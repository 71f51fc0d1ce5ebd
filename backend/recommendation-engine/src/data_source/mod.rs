//! Data source contract and the in-process implementation used by the
//! binary (JSON fixture) and by tests.

use crate::error::{EngineError, Result};
use crate::models::{
    ActivityEvent, CatalogItem, DepartmentId, Interaction, ItemId, LearnerId, LearnerProfile,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// Interaction, catalog and activity data consumed by the engine
#[async_trait]
pub trait DataSource: Send + Sync {
    /// All interactions, or only one learner's
    async fn get_interactions(&self, learner_id: Option<LearnerId>) -> Result<Vec<Interaction>>;

    async fn get_item_catalog(&self) -> Result<Vec<CatalogItem>>;

    async fn get_learner_profile(&self, learner_id: LearnerId) -> Result<Option<LearnerProfile>>;

    async fn get_department_popular(
        &self,
        department_id: DepartmentId,
        limit: usize,
    ) -> Result<Vec<ItemId>>;

    async fn get_trending(&self, window_days: u32, limit: usize) -> Result<Vec<ItemId>>;

    async fn get_recent_activity(&self, window_days: u32) -> Result<Vec<ActivityEvent>>;
}

/// On-disk fixture layout for [`InMemoryDataSource::from_json_file`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataFixture {
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    #[serde(default)]
    pub catalog: Vec<CatalogItem>,
    #[serde(default)]
    pub learners: Vec<LearnerProfile>,
    #[serde(default)]
    pub activity: Vec<ActivityEvent>,
}

/// Data source held entirely in memory.
///
/// Popularity queries count interactions per item; `set_available(false)`
/// makes every call fail with `DataUnavailable`.
pub struct InMemoryDataSource {
    data: RwLock<DataFixture>,
    available: AtomicBool,
}

impl Default for InMemoryDataSource {
    fn default() -> Self {
        Self::new(DataFixture::default())
    }
}

impl InMemoryDataSource {
    pub fn new(fixture: DataFixture) -> Self {
        Self {
            data: RwLock::new(fixture),
            available: AtomicBool::new(true),
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let fixture: DataFixture = serde_json::from_str(&raw)?;
        Ok(Self::new(fixture))
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn push_interaction(&self, interaction: Interaction) {
        self.data.write().interactions.push(interaction);
    }

    pub fn push_activity(&self, event: ActivityEvent) {
        self.data.write().activity.push(event);
    }

    pub fn upsert_learner(&self, profile: LearnerProfile) {
        let mut data = self.data.write();
        data.learners.retain(|p| p.learner_id != profile.learner_id);
        data.learners.push(profile);
    }

    pub fn replace_catalog(&self, catalog: Vec<CatalogItem>) {
        self.data.write().catalog = catalog;
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::DataUnavailable(
                "in-memory data source disabled".to_string(),
            ))
        }
    }

    /// Items ranked by interaction count, ties by ascending id
    fn rank_by_count(counts: HashMap<ItemId, usize>, limit: usize) -> Vec<ItemId> {
        let mut ranked: Vec<(ItemId, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.into_iter().take(limit).map(|(id, _)| id).collect()
    }
}

#[async_trait]
impl DataSource for InMemoryDataSource {
    async fn get_interactions(&self, learner_id: Option<LearnerId>) -> Result<Vec<Interaction>> {
        self.ensure_available()?;
        let data = self.data.read();
        Ok(data
            .interactions
            .iter()
            .filter(|i| learner_id.map_or(true, |id| i.learner_id == id))
            .cloned()
            .collect())
    }

    async fn get_item_catalog(&self) -> Result<Vec<CatalogItem>> {
        self.ensure_available()?;
        Ok(self.data.read().catalog.clone())
    }

    async fn get_learner_profile(&self, learner_id: LearnerId) -> Result<Option<LearnerProfile>> {
        self.ensure_available()?;
        Ok(self
            .data
            .read()
            .learners
            .iter()
            .find(|p| p.learner_id == learner_id)
            .cloned())
    }

    async fn get_department_popular(
        &self,
        department_id: DepartmentId,
        limit: usize,
    ) -> Result<Vec<ItemId>> {
        self.ensure_available()?;
        let data = self.data.read();
        let in_department: HashSet<ItemId> = data
            .catalog
            .iter()
            .filter(|item| item.department_id == Some(department_id))
            .map(|item| item.id)
            .collect();

        let mut counts: HashMap<ItemId, usize> =
            in_department.iter().map(|id| (*id, 0)).collect();
        for interaction in &data.interactions {
            if let Some(count) = counts.get_mut(&interaction.item_id) {
                *count += 1;
            }
        }
        Ok(Self::rank_by_count(counts, limit))
    }

    async fn get_trending(&self, window_days: u32, limit: usize) -> Result<Vec<ItemId>> {
        self.ensure_available()?;
        let since = Utc::now() - Duration::days(i64::from(window_days));
        let data = self.data.read();
        let mut counts: HashMap<ItemId, usize> = HashMap::new();
        for interaction in data.interactions.iter().filter(|i| i.occurred_at >= since) {
            *counts.entry(interaction.item_id).or_insert(0) += 1;
        }
        Ok(Self::rank_by_count(counts, limit))
    }

    async fn get_recent_activity(&self, window_days: u32) -> Result<Vec<ActivityEvent>> {
        self.ensure_available()?;
        let since = Utc::now() - Duration::days(i64::from(window_days));
        Ok(self
            .data
            .read()
            .activity
            .iter()
            .filter(|event| event.occurred_at >= since)
            .cloned()
            .collect())
    }
}
