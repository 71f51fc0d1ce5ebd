use crate::models::LearnerId;
use crate::services::similarity::SimilarityError;
use recommendation_cache::CacheError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Data source unavailable: {0}")]
    DataUnavailable(String),

    #[error(
        "Insufficient data to train: {interactions} interactions (need {required}), {catalog_size} catalog items"
    )]
    InsufficientData {
        interactions: usize,
        required: usize,
        catalog_size: usize,
    },

    #[error("Model not trained")]
    ModelNotTrained,

    #[error("Similarity computation failed: {0}")]
    SimilarityComputation(#[from] SimilarityError),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(#[from] CacheError),

    #[error("Invalid learner id: {0}")]
    InvalidLearner(LearnerId),

    #[error("Snapshot persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Errors the serving layer should map to a 503-equivalent
    pub fn is_service_unavailable(&self) -> bool {
        matches!(
            self,
            EngineError::ModelNotTrained | EngineError::DataUnavailable(_)
        )
    }

    /// Message safe to hand to end clients. Internal matrix, data and I/O
    /// details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            EngineError::ModelNotTrained | EngineError::DataUnavailable(_) => {
                "Recommendation model not ready, try again later".to_string()
            }
            EngineError::InvalidLearner(id) => format!("Unknown learner {}", id),
            EngineError::InsufficientData { .. } => "Not enough data to train a model".to_string(),
            _ => "Internal recommendation error".to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::Internal(format!("background task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_unavailable_classification() {
        assert!(EngineError::ModelNotTrained.is_service_unavailable());
        assert!(EngineError::DataUnavailable("db down".into()).is_service_unavailable());
        assert!(!EngineError::InvalidLearner(-1).is_service_unavailable());
    }

    #[test]
    fn test_public_message_hides_internals() {
        let err = EngineError::Internal("matrix shape (3, 4) vs (4, 4)".into());
        assert!(!err.public_message().contains("matrix"));

        let err = EngineError::DataUnavailable("postgres://user:secret@db".into());
        assert!(!err.public_message().contains("secret"));
    }

    #[test]
    fn test_insufficient_data_display() {
        let err = EngineError::InsufficientData {
            interactions: 3,
            required: 10,
            catalog_size: 0,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient data to train: 3 interactions (need 10), 0 catalog items"
        );
    }
}
