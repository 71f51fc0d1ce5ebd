use crate::data_source::DataSource;
use crate::models::{DepartmentId, ItemId, LearnerId, ScoredItem, SignalList, SignalSource};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

/// Provenance score for items popular in the learner's department
const DEPARTMENT_SCORE: f64 = 0.8;
/// Provenance score for globally trending items
const TRENDING_SCORE: f64 = 0.6;

/// Popularity signal: department-popular and trending pools.
///
/// Never fails; data source errors only shrink the list.
pub struct PopularitySignal {
    source: Arc<dyn DataSource>,
    trending_window_days: u32,
}

impl PopularitySignal {
    pub fn new(source: Arc<dyn DataSource>, trending_window_days: u32) -> Self {
        Self {
            source,
            trending_window_days,
        }
    }

    pub async fn recommend(
        &self,
        learner_id: LearnerId,
        department_id: Option<DepartmentId>,
        exclude: &HashSet<ItemId>,
        k: usize,
    ) -> SignalList {
        let mut pooled: Vec<ScoredItem> = Vec::new();

        if let Some(department_id) = department_id {
            match self.source.get_department_popular(department_id, k.saturating_mul(2)).await {
                Ok(items) => Self::merge(&mut pooled, items, DEPARTMENT_SCORE, exclude),
                Err(e) => warn!(
                    learner_id,
                    department_id,
                    error = %e,
                    "Department popularity unavailable"
                ),
            }
        }

        match self.source.get_trending(self.trending_window_days, k).await {
            Ok(items) => Self::merge(&mut pooled, items, TRENDING_SCORE, exclude),
            Err(e) => warn!(learner_id, error = %e, "Trending items unavailable"),
        }

        pooled.truncate(k);
        SignalList::new(SignalSource::Popularity, pooled)
    }

    /// Append a pool, keeping the higher score for items already present
    fn merge(pooled: &mut Vec<ScoredItem>, items: Vec<ItemId>, score: f64, exclude: &HashSet<ItemId>) {
        for item_id in items {
            if exclude.contains(&item_id) {
                continue;
            }
            match pooled.iter_mut().find(|p| p.item_id == item_id) {
                Some(existing) => existing.score = existing.score.max(score),
                None => pooled.push(ScoredItem::new(item_id, score)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::{DataFixture, InMemoryDataSource};
    use crate::models::{CatalogItem, Interaction};
    use chrono::Utc;

    fn item(id: ItemId, department_id: DepartmentId) -> CatalogItem {
        CatalogItem {
            id,
            title: format!("Course {}", id),
            description: String::new(),
            category: String::new(),
            department_id: Some(department_id),
            enrollment_count: 0,
            completion_rate: 0.0,
            module_count: 0,
            quiz_count: 0,
            assignment_count: 0,
        }
    }

    fn source() -> Arc<InMemoryDataSource> {
        let interactions = [(1, 10), (2, 10), (3, 20), (4, 30)]
            .into_iter()
            .map(|(learner_id, item_id)| Interaction {
                learner_id,
                item_id,
                strength: 1.0,
                occurred_at: Utc::now(),
            })
            .collect();
        Arc::new(InMemoryDataSource::new(DataFixture {
            interactions,
            catalog: vec![item(10, 1), item(20, 1), item(30, 2)],
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_department_pool_outranks_trending_on_conflict() {
        let signal = PopularitySignal::new(source(), 30);
        let list = signal.recommend(1, Some(1), &HashSet::new(), 5).await;

        let scores: Vec<(ItemId, f64)> = list.items.iter().map(|i| (i.item_id, i.score)).collect();
        assert_eq!(scores, vec![(10, 0.8), (20, 0.8), (30, 0.6)]);
    }

    #[tokio::test]
    async fn test_excludes_seen_items_without_department() {
        let signal = PopularitySignal::new(source(), 30);
        let exclude: HashSet<ItemId> = [10].into_iter().collect();
        let list = signal.recommend(1, None, &exclude, 5).await;

        assert!(list.items.iter().all(|i| i.item_id != 10 && i.score == 0.6));
        assert_eq!(list.items.len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_source_yields_empty_list() {
        let source = source();
        source.set_available(false);
        let signal = PopularitySignal::new(source, 30);
        assert!(signal.recommend(1, Some(1), &HashSet::new(), 5).await.is_empty());
    }
}
