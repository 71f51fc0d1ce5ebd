use crate::models::{ItemId, ItemProfile, ScoredItem, SignalList, SignalSource};
use crate::services::similarity::SimilarityMatrix;
use crate::utils::sort_scored;
use std::collections::HashSet;

/// Content-based signal over TF-IDF item similarity.
///
/// Candidates are ranked by their mean similarity to the learner's history.
/// Learners without history get the catalog ranked by attractiveness instead,
/// marked as a fallback so the combiner does not claim a content match.
#[derive(Debug, Clone, Default)]
pub struct ContentSignal;

impl ContentSignal {
    pub fn new() -> Self {
        Self
    }

    pub fn recommend(
        &self,
        item_similarity: &SimilarityMatrix,
        items: &[ItemProfile],
        history: &HashSet<ItemId>,
        k: usize,
    ) -> SignalList {
        if history.is_empty() {
            return SignalList::fallback(SignalSource::Content, Self::most_attractive(items, k));
        }

        let known: Vec<usize> = history
            .iter()
            .filter_map(|item| item_similarity.index_of(*item))
            .collect();
        if known.is_empty() {
            return SignalList::empty(SignalSource::Content);
        }

        let values = item_similarity.values();
        let mut scored: Vec<ScoredItem> = item_similarity
            .ids()
            .iter()
            .enumerate()
            .filter(|(_, id)| !history.contains(*id))
            .filter_map(|(col, id)| {
                let mean = known.iter().map(|&row| values[[row, col]]).sum::<f64>()
                    / known.len() as f64;
                // No shared vocabulary is no evidence
                (mean > 0.0).then(|| ScoredItem::new(*id, mean))
            })
            .collect();

        sort_scored(&mut scored);
        scored.truncate(k);
        SignalList::new(SignalSource::Content, scored)
    }

    fn most_attractive(items: &[ItemProfile], k: usize) -> Vec<ScoredItem> {
        let mut scored: Vec<ScoredItem> = items
            .iter()
            .map(|item| ScoredItem::new(item.item_id, item.attractiveness))
            .collect();
        sort_scored(&mut scored);
        scored.truncate(k);
        scored
    }
}
