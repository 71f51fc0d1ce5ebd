use crate::error::{EngineError, Result};
use crate::models::{ItemId, RecommendationEntry, ScoredItem, SignalList, SignalSource};
use crate::utils::sort_scored;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Explanation used when no contributing signal has a specific justification
pub const GENERIC_EXPLANATION: &str = "Based on your learning history";

/// Pool for [`ExplanationMode::RandomizedFallback`]
const GENERIC_REASONS: [&str; 4] = [
    "Based on your learning history",
    "A good next step for your studies",
    "Builds on topics you have explored",
    "Popular with learners like you",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalWeights {
    pub collaborative: f64,
    pub content: f64,
    pub popularity: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            collaborative: 0.5,
            content: 0.3,
            popularity: 0.2,
        }
    }
}

impl SignalWeights {
    pub fn for_source(&self, source: SignalSource) -> f64 {
        match source {
            SignalSource::Collaborative => self.collaborative,
            SignalSource::Content => self.content,
            SignalSource::Popularity => self.popularity,
        }
    }

    /// Weights must be non-negative and sum to 1.0
    pub fn validate(&self) -> Result<()> {
        let weights = [self.collaborative, self.content, self.popularity];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "signal weights must be non-negative, got {:?}",
                self
            )));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(EngineError::InvalidConfig(format!(
                "signal weights must sum to 1.0, got {}",
                sum
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplanationMode {
    /// Same contributing signals, same text
    #[default]
    Deterministic,
    /// Unjustified items get a randomly picked generic reason.
    /// Not reproducible; keep off in tests.
    RandomizedFallback,
}

/// Merges signal lists into one ranked list with provenance.
#[derive(Debug, Clone)]
pub struct Combiner {
    weights: SignalWeights,
    mode: ExplanationMode,
}

struct Accumulated {
    score: f64,
    signals: BTreeSet<SignalSource>,
    justified: BTreeSet<SignalSource>,
}

impl Combiner {
    pub fn new(weights: SignalWeights, mode: ExplanationMode) -> Result<Self> {
        weights.validate()?;
        Ok(Self { weights, mode })
    }

    pub fn weights(&self) -> SignalWeights {
        self.weights
    }

    /// Sum each item's weighted scores across the signals recommending it,
    /// rank descending (ties by ascending id) and keep the top `n`.
    pub fn combine(&self, signals: &[SignalList], n: usize) -> Vec<RecommendationEntry> {
        self.combine_weighted(&self.weights, signals, n)
    }

    /// [`Combiner::combine`] with the weights a snapshot was trained with
    pub fn combine_weighted(
        &self,
        weights: &SignalWeights,
        signals: &[SignalList],
        n: usize,
    ) -> Vec<RecommendationEntry> {
        let mut merged: HashMap<ItemId, Accumulated> = HashMap::new();

        for list in signals {
            let weight = weights.for_source(list.source);
            for item in &list.items {
                let entry = merged.entry(item.item_id).or_insert_with(|| Accumulated {
                    score: 0.0,
                    signals: BTreeSet::new(),
                    justified: BTreeSet::new(),
                });
                entry.score += item.score * weight;
                entry.signals.insert(list.source);
                if list.justified {
                    entry.justified.insert(list.source);
                }
            }
        }

        let mut ranked: Vec<ScoredItem> = merged
            .iter()
            .map(|(id, acc)| ScoredItem::new(*id, acc.score))
            .collect();
        sort_scored(&mut ranked);
        ranked.truncate(n);

        ranked
            .into_iter()
            .filter_map(|item| {
                let acc = merged.remove(&item.item_id)?;
                Some(RecommendationEntry {
                    item_id: item.item_id,
                    score: acc.score,
                    explanation: self.explain(&acc.justified),
                    contributing_signals: acc.signals,
                })
            })
            .collect()
    }

    /// "Recommended because A and B", or a generic reason when nothing
    /// specific contributed
    pub fn explain(&self, justified: &BTreeSet<SignalSource>) -> String {
        if justified.is_empty() {
            return match self.mode {
                ExplanationMode::Deterministic => GENERIC_EXPLANATION.to_string(),
                ExplanationMode::RandomizedFallback => GENERIC_REASONS
                    .choose(&mut rand::thread_rng())
                    .unwrap_or(&GENERIC_EXPLANATION)
                    .to_string(),
            };
        }

        let reasons: Vec<&str> = justified.iter().map(|s| s.reason()).collect();
        format!("Recommended because {}", reasons.join(" and "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(source: SignalSource, items: &[(ItemId, f64)]) -> SignalList {
        SignalList::new(
            source,
            items.iter().map(|&(id, s)| ScoredItem::new(id, s)).collect(),
        )
    }

    fn combiner() -> Combiner {
        Combiner::new(SignalWeights::default(), ExplanationMode::Deterministic).unwrap()
    }

    #[test]
    fn test_scores_accumulate_across_signals() {
        let signals = vec![
            list(SignalSource::Collaborative, &[(1, 0.8), (2, 0.9)]),
            list(SignalSource::Content, &[(1, 0.6)]),
            list(SignalSource::Popularity, &[(1, 0.8), (3, 0.6)]),
        ];
        let entries = combiner().combine(&signals, 10);

        let first = &entries[0];
        assert_eq!(first.item_id, 1);
        let expected = 0.8 * 0.5 + 0.6 * 0.3 + 0.8 * 0.2;
        assert!((first.score - expected).abs() < 1e-12);
        assert_eq!(first.contributing_signals.len(), 3);
        assert_eq!(
            first.explanation,
            "Recommended because students with similar interests also took this course and \
             matches your learning preferences and popular among students in your department"
        );
    }

    #[test]
    fn test_ties_break_by_item_id_and_truncate() {
        let signals = vec![list(SignalSource::Collaborative, &[(9, 1.0), (4, 1.0), (7, 0.1)])];
        let entries = combiner().combine(&signals, 2);
        let ids: Vec<_> = entries.iter().map(|e| e.item_id).collect();
        assert_eq!(ids, vec![4, 9]);
    }

    #[test]
    fn test_unjustified_signal_gets_generic_explanation() {
        let signals = vec![
            SignalList::fallback(SignalSource::Content, vec![ScoredItem::new(1, 1.0)]),
            list(SignalSource::Popularity, &[(2, 0.6)]),
        ];
        let entries = combiner().combine(&signals, 5);
        let by_id: HashMap<_, _> = entries.iter().map(|e| (e.item_id, e)).collect();

        assert_eq!(by_id[&1].explanation, GENERIC_EXPLANATION);
        assert!(by_id[&1].contributing_signals.contains(&SignalSource::Content));
        assert_eq!(
            by_id[&2].explanation,
            "Recommended because popular among students in your department"
        );
    }

    #[test]
    fn test_explicit_weights_override_configured_ones() {
        let signals = vec![
            list(SignalSource::Collaborative, &[(1, 1.0)]),
            list(SignalSource::Popularity, &[(2, 1.0)]),
        ];
        let popularity_only = SignalWeights {
            collaborative: 0.0,
            content: 0.0,
            popularity: 1.0,
        };
        let entries = combiner().combine_weighted(&popularity_only, &signals, 2);

        assert_eq!(entries[0].item_id, 2);
        assert_eq!(entries[0].score, 1.0);
        assert_eq!(entries[1].score, 0.0);
    }

    #[test]
    fn test_randomized_mode_picks_a_generic_reason() {
        let combiner = Combiner::new(SignalWeights::default(), ExplanationMode::RandomizedFallback).unwrap();
        let text = combiner.explain(&BTreeSet::new());
        assert!(GENERIC_REASONS.contains(&text.as_str()));
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let weights = SignalWeights {
            collaborative: 0.5,
            content: 0.5,
            popularity: 0.5,
        };
        assert!(Combiner::new(weights, ExplanationMode::Deterministic).is_err());

        let negative = SignalWeights {
            collaborative: 1.2,
            content: -0.2,
            popularity: 0.0,
        };
        assert!(negative.validate().is_err());
    }
}
