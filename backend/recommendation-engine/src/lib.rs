//! Hybrid course recommendation engine.
//!
//! Blends collaborative, content-based and popularity signals into ranked,
//! explained recommendations, served from a versioned cache and backed by a
//! model snapshot that is retrained in the background and swapped in
//! atomically.

pub mod config;
pub mod data_source;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use data_source::{DataFixture, DataSource, InMemoryDataSource};
pub use error::{EngineError, Result};
pub use jobs::{RetrainScheduler, SchedulerHandle};
pub use models::{LearnerId, ItemId, RecommendationEntry, SignalSource};
pub use services::{
    BatchRecommendations, EngineStats, EvaluationReport, ModelState, ModelStatus,
    RecommendationEngine, TrainingOutcome,
};
