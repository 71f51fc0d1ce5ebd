use crate::error::{EngineError, Result};
use crate::services::combiner::{ExplanationMode, SignalWeights};
use recommendation_cache::{ttl, CacheTtls};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Engine configuration, one env prefix per section:
/// `SERVICE_`, `MODEL_`, `CACHE_`, `LIFECYCLE_`, `SCHEDULER_`, `EVALUATION_`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub model: ModelConfig,
    pub cache: CacheConfig,
    pub lifecycle: LifecycleConfig,
    pub scheduler: SchedulerConfig,
    pub evaluation: EvaluationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub service_name: String,
    /// JSON fixture backing the in-memory data source
    pub data_file: Option<PathBuf>,
    pub default_limit: usize,
    /// Prometheus textfile the binary refreshes; unset disables export
    pub metrics_file: Option<PathBuf>,
    pub metrics_interval_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "recommendation-engine".to_string(),
            data_file: None,
            default_limit: 5,
            metrics_file: None,
            metrics_interval_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub collaborative_weight: f64,
    pub content_weight: f64,
    pub popularity_weight: f64,
    pub similarity_threshold: f64,
    /// Most similar learners considered by the collaborative signal
    pub neighbours: usize,
    pub max_features: usize,
    pub trending_window_days: u32,
    /// Opt-in non-deterministic generic explanations
    pub randomized_explanations: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            collaborative_weight: 0.5,
            content_weight: 0.3,
            popularity_weight: 0.2,
            similarity_threshold: 0.1,
            neighbours: 10,
            max_features: 1000,
            trending_window_days: 30,
            randomized_explanations: false,
        }
    }
}

impl ModelConfig {
    pub fn weights(&self) -> SignalWeights {
        SignalWeights {
            collaborative: self.collaborative_weight,
            content: self.content_weight,
            popularity: self.popularity_weight,
        }
    }

    pub fn explanation_mode(&self) -> ExplanationMode {
        if self.randomized_explanations {
            ExplanationMode::RandomizedFallback
        } else {
            ExplanationMode::Deterministic
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// No URL means the in-process backend
    pub redis_url: Option<String>,
    pub recommendation_ttl_secs: u64,
    pub similarity_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            recommendation_ttl_secs: ttl::RECOMMENDATION,
            similarity_ttl_secs: ttl::SIMILARITY,
        }
    }
}

impl CacheConfig {
    pub fn ttls(&self) -> CacheTtls {
        CacheTtls {
            recommendation: Duration::from_secs(self.recommendation_ttl_secs),
            similarity: Duration::from_secs(self.similarity_ttl_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub model_dir: PathBuf,
    pub min_interactions: usize,
    /// Snapshots older than this are retrained at startup
    pub retrain_threshold_days: i64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            min_interactions: 10,
            retrain_threshold_days: 7,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Daily full retrain, UTC
    pub daily_hour: u32,
    pub daily_minute: u32,
    pub idle_interval_secs: u64,
    pub activity_check_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_hour: 2,
            daily_minute: 0,
            idle_interval_secs: 30 * 60,
            activity_check_interval_secs: 5 * 60,
        }
    }
}

impl SchedulerConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_interval_secs)
    }

    pub fn activity_check_interval(&self) -> Duration {
        Duration::from_secs(self.activity_check_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub held_out_fraction: f64,
    pub min_test_users: usize,
    pub max_test_users: usize,
    pub diversity_sample: usize,
    pub random_seed: u64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            held_out_fraction: 0.2,
            min_test_users: 5,
            max_test_users: 50,
            diversity_sample: 20,
            random_seed: 42,
        }
    }
}

impl Config {
    /// Load `.env` if present, then every prefixed section from the environment
    pub fn from_env() -> std::result::Result<Self, envy::Error> {
        dotenvy::dotenv().ok();

        Ok(Config {
            service: envy::prefixed("SERVICE_").from_env()?,
            model: envy::prefixed("MODEL_").from_env()?,
            cache: envy::prefixed("CACHE_").from_env()?,
            lifecycle: envy::prefixed("LIFECYCLE_").from_env()?,
            scheduler: envy::prefixed("SCHEDULER_").from_env()?,
            evaluation: envy::prefixed("EVALUATION_").from_env()?,
        })
    }

    /// Fail fast on settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        self.model.weights().validate()?;

        if !(0.0..=1.0).contains(&self.model.similarity_threshold) {
            return Err(EngineError::InvalidConfig(format!(
                "similarity_threshold must be within [0, 1], got {}",
                self.model.similarity_threshold
            )));
        }
        if self.model.neighbours == 0 || self.model.max_features == 0 {
            return Err(EngineError::InvalidConfig(
                "neighbours and max_features must be positive".to_string(),
            ));
        }
        let fraction = self.evaluation.held_out_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "held_out_fraction must be within (0, 1), got {}",
                fraction
            )));
        }
        if self.scheduler.daily_hour > 23 || self.scheduler.daily_minute > 59 {
            return Err(EngineError::InvalidConfig(format!(
                "invalid daily retrain time {:02}:{:02}",
                self.scheduler.daily_hour, self.scheduler.daily_minute
            )));
        }
        if self.scheduler.activity_check_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "activity_check_interval_secs must be positive".to_string(),
            ));
        }
        if self.service.default_limit == 0 {
            return Err(EngineError::InvalidConfig(
                "default_limit must be positive".to_string(),
            ));
        }
        if self.service.metrics_file.is_some() && self.service.metrics_interval_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "metrics_interval_secs must be positive when metrics_file is set".to_string(),
            ));
        }
        Ok(())
    }
}
