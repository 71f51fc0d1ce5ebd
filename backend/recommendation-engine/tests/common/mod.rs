//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use chrono::{Duration, TimeZone, Utc};
use recommendation_cache::{CacheTtls, RecommendationCache};
use recommendation_engine::config::Config;
use recommendation_engine::data_source::{DataFixture, InMemoryDataSource};
use recommendation_engine::models::{CatalogItem, Interaction, LearnerProfile};
use recommendation_engine::services::RecommendationEngine;
use std::path::Path;
use std::sync::Arc;

pub const RUST_DEPT: i64 = 10;
pub const DATA_DEPT: i64 = 20;
pub const WEB_DEPT: i64 = 30;

fn course(id: i64, title: &str, description: &str, category: &str, department: i64, enrollment: u64) -> CatalogItem {
    CatalogItem {
        id,
        title: title.to_string(),
        description: description.to_string(),
        category: category.to_string(),
        department_id: Some(department),
        enrollment_count: enrollment,
        completion_rate: 0.5 + (id as f64) * 0.05,
        module_count: 4 + id as u32,
        quiz_count: 2,
        assignment_count: 1 + (id as u32 % 3),
    }
}

fn interaction(learner_id: i64, item_id: i64, strength: f64, day: i64) -> Interaction {
    Interaction {
        learner_id,
        item_id,
        strength,
        occurred_at: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap() + Duration::days(day),
    }
}

pub fn catalog() -> Vec<CatalogItem> {
    vec![
        course(1, "Rust Programming Fundamentals", "ownership borrowing and the rust type system", "programming", RUST_DEPT, 120),
        course(2, "Advanced Rust Async Programming", "async rust futures and the tokio runtime", "programming", RUST_DEPT, 80),
        course(3, "Python Data Analysis", "pandas dataframes and data cleaning with python", "data science", DATA_DEPT, 200),
        course(4, "Machine Learning with Python", "supervised learning models with python and data", "data science", DATA_DEPT, 150),
        course(5, "Web Development with JavaScript", "javascript browser programming and web frameworks", "web", WEB_DEPT, 90),
        course(6, "Responsive Web Design", "css layouts and web accessibility", "web", WEB_DEPT, 60),
        course(7, "Cloud Infrastructure Basics", "deploying web services to cloud infrastructure", "operations", WEB_DEPT, 40),
        course(8, "Statistics for Data Science", "probability statistics and data visualisation", "data science", DATA_DEPT, 110),
    ]
}

/// Six learners in three taste clusters. Learner 1 and learner 2 overlap on
/// courses 1 and 2; only learner 2 has taken course 3.
pub fn interactions() -> Vec<Interaction> {
    vec![
        interaction(1, 1, 5.0, 1),
        interaction(1, 2, 4.0, 2),
        interaction(2, 1, 4.0, 1),
        interaction(2, 2, 5.0, 3),
        interaction(2, 3, 4.0, 10),
        interaction(3, 3, 5.0, 2),
        interaction(3, 4, 4.0, 4),
        interaction(3, 8, 3.0, 12),
        interaction(4, 3, 4.0, 3),
        interaction(4, 4, 5.0, 5),
        interaction(4, 8, 4.0, 14),
        interaction(5, 5, 5.0, 4),
        interaction(5, 6, 3.0, 6),
        interaction(5, 7, 4.0, 15),
        interaction(6, 5, 4.0, 5),
        interaction(6, 6, 4.0, 7),
        interaction(6, 1, 2.0, 16),
        interaction(6, 7, 3.0, 17),
    ]
}

pub fn learners() -> Vec<LearnerProfile> {
    let profile = |learner_id, department| LearnerProfile {
        learner_id,
        department_id: Some(department),
        history_summary: None,
    };
    vec![
        profile(1, RUST_DEPT),
        profile(2, RUST_DEPT),
        profile(3, DATA_DEPT),
        profile(4, DATA_DEPT),
        profile(5, WEB_DEPT),
        profile(6, WEB_DEPT),
        // Has a profile but no interactions yet
        profile(99, RUST_DEPT),
    ]
}

pub fn fixture() -> DataFixture {
    DataFixture {
        interactions: interactions(),
        catalog: catalog(),
        learners: learners(),
        activity: Vec::new(),
    }
}

pub fn test_config(model_dir: &Path) -> Config {
    let mut config = Config::default();
    config.lifecycle.model_dir = model_dir.to_path_buf();
    config.scheduler.enabled = false;
    config
}

pub struct TestEngine {
    pub engine: Arc<RecommendationEngine>,
    pub source: Arc<InMemoryDataSource>,
    pub cache: Arc<RecommendationCache>,
}

pub fn engine_with(config: Config, fixture: DataFixture) -> TestEngine {
    let source = Arc::new(InMemoryDataSource::new(fixture));
    let cache = Arc::new(RecommendationCache::in_memory(CacheTtls::default()));
    let engine = RecommendationEngine::new(config, source.clone(), Arc::clone(&cache))
        .expect("valid test configuration");

    TestEngine {
        engine: Arc::new(engine),
        source,
        cache,
    }
}

pub fn engine(model_dir: &Path) -> TestEngine {
    engine_with(test_config(model_dir), fixture())
}
