//! Recommendation services: similarity, signals, combination, model
//! lifecycle, evaluation and the engine facade tying them together.

pub mod combiner;
pub mod engine;
pub mod evaluation;
pub mod lifecycle;
pub mod signals;
pub mod similarity;

pub use combiner::{Combiner, ExplanationMode, SignalWeights};
pub use engine::{BatchRecommendations, EngineStats, RecommendationEngine};
pub use evaluation::{EvaluationReport, Evaluator, SnapshotRecommender};
pub use lifecycle::{
    BootstrapOutcome, ModelLifecycle, ModelSnapshot, ModelState, ModelStatus, TrainingOutcome,
};
pub use similarity::{cosine_similarity, SimilarityError, SimilarityMatrix};
