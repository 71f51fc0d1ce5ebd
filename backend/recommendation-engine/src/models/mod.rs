use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type LearnerId = i64;
pub type ItemId = i64;
pub type DepartmentId = i64;

/// One learner/item affinity as delivered by the data source.
/// Duplicate (learner, item) pairs are expected to be collapsed upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub learner_id: LearnerId,
    pub item_id: ItemId,
    pub strength: f64,
    /// Enrollment date, used for the temporal evaluation split and trending
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: ItemId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub department_id: Option<DepartmentId>,
    // Attractiveness inputs
    #[serde(default)]
    pub enrollment_count: u64,
    #[serde(default)]
    pub completion_rate: f64,
    #[serde(default)]
    pub module_count: u32,
    #[serde(default)]
    pub quiz_count: u32,
    #[serde(default)]
    pub assignment_count: u32,
}

impl CatalogItem {
    /// Text corpus fed to the TF-IDF vectorizer
    pub fn corpus(&self) -> String {
        format!("{} {} {}", self.title, self.description, self.category)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerProfile {
    pub learner_id: LearnerId,
    #[serde(default)]
    pub department_id: Option<DepartmentId>,
    #[serde(default)]
    pub history_summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub learner_id: LearnerId,
    pub activity_type: String,
    #[serde(default)]
    pub item_id: Option<ItemId>,
    pub occurred_at: DateTime<Utc>,
}

/// Catalog metadata kept inside a snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemProfile {
    pub item_id: ItemId,
    pub title: String,
    pub category: String,
    pub department_id: Option<DepartmentId>,
    pub enrollment_count: u64,
    pub attractiveness: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Collaborative,
    Content,
    Popularity,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Collaborative => "collaborative",
            SignalSource::Content => "content",
            SignalSource::Popularity => "popularity",
        }
    }

    /// Human readable justification used in explanations
    pub fn reason(&self) -> &'static str {
        match self {
            SignalSource::Collaborative => "students with similar interests also took this course",
            SignalSource::Content => "matches your learning preferences",
            SignalSource::Popularity => "popular among students in your department",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item_id: ItemId,
    pub score: f64,
}

impl ScoredItem {
    pub fn new(item_id: ItemId, score: f64) -> Self {
        Self { item_id, score }
    }
}

/// Ranked output of one signal generator
#[derive(Debug, Clone, PartialEq)]
pub struct SignalList {
    pub source: SignalSource,
    pub items: Vec<ScoredItem>,
    /// False when the list is a generic fallback (cold-start attractiveness
    /// ranking) rather than a learner-specific match
    pub justified: bool,
}

impl SignalList {
    pub fn new(source: SignalSource, items: Vec<ScoredItem>) -> Self {
        Self {
            source,
            items,
            justified: true,
        }
    }

    pub fn fallback(source: SignalSource, items: Vec<ScoredItem>) -> Self {
        Self {
            source,
            items,
            justified: false,
        }
    }

    pub fn empty(source: SignalSource) -> Self {
        Self::new(source, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationEntry {
    pub item_id: ItemId,
    pub score: f64,
    pub contributing_signals: BTreeSet<SignalSource>,
    pub explanation: String,
}
