//! Cache key schema
//!
//! Key format: `{NAMESPACE}:v{VERSION}:{operation}:{subject}:{digest}`
//!
//! The digest is a SHA-256 over the request parameters sorted by name, so two
//! logically identical requests hash identically regardless of parameter order.
//! Operation and subject stay in clear text to allow prefix invalidation.

use sha2::{Digest, Sha256};

/// Cache schema version - increment when changing key formats or payload shapes
pub const CACHE_VERSION: u32 = 1;

/// Prefix shared by every key written by the engine
pub const NAMESPACE: &str = "courserec";

/// Operation names
pub mod op {
    pub const RECOMMENDATIONS: &str = "recommendations";
    pub const SIMILARITY: &str = "similarity";
}

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Build a key from an operation, a subject and an unordered parameter set.
    pub fn build(operation: &str, subject: &str, params: &[(&str, String)]) -> String {
        format!(
            "{}{}",
            Self::subject_prefix(operation, subject),
            Self::params_digest(params)
        )
    }

    /// Per-learner recommendation result
    /// Format: courserec:v1:recommendations:{learner_id}:{digest(limit, snapshot)}
    pub fn recommendations(learner_id: i64, limit: usize, snapshot_version: u64) -> String {
        Self::build(
            op::RECOMMENDATIONS,
            &learner_id.to_string(),
            &[
                ("limit", limit.to_string()),
                ("snapshot", snapshot_version.to_string()),
            ],
        )
    }

    /// Similarity matrix for a given feature space (`learner` / `item`)
    /// Format: courserec:v1:similarity:{kind}:{digest(fingerprint)}
    pub fn similarity(kind: &str, fingerprint: &str) -> String {
        Self::build(
            op::SIMILARITY,
            kind,
            &[("fingerprint", fingerprint.to_string())],
        )
    }

    /// Prefix matching every key the engine owns
    pub fn namespace_prefix() -> String {
        format!("{}:v{}:", NAMESPACE, CACHE_VERSION)
    }

    /// Prefix matching every key of one operation
    pub fn operation_prefix(operation: &str) -> String {
        format!("{}{}:", Self::namespace_prefix(), operation)
    }

    /// Prefix matching every key of one operation for one subject
    pub fn subject_prefix(operation: &str, subject: &str) -> String {
        format!("{}{}:", Self::operation_prefix(operation), subject)
    }

    /// Operation segment of a key, used for metric labels
    pub fn operation_of(key: &str) -> &str {
        key.split(':').nth(2).unwrap_or("unknown")
    }

    fn params_digest(params: &[(&str, String)]) -> String {
        let mut sorted: Vec<&(&str, String)> = params.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0).then_with(|| a.1.cmp(&b.1)));

        let canonical = sorted
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("&");

        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(&digest[..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_order_independent() {
        let a = CacheKey::build(
            "recommendations",
            "42",
            &[("limit", "5".into()), ("snapshot", "3".into())],
        );
        let b = CacheKey::build(
            "recommendations",
            "42",
            &[("snapshot", "3".into()), ("limit", "5".into())],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_changes_with_params() {
        let a = CacheKey::recommendations(42, 5, 1);
        let b = CacheKey::recommendations(42, 10, 1);
        let c = CacheKey::recommendations(42, 5, 2);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_layout() {
        let key = CacheKey::recommendations(42, 5, 1);
        assert!(key.starts_with("courserec:v1:recommendations:42:"));
        assert!(key.starts_with(&CacheKey::subject_prefix("recommendations", "42")));
        assert!(key.starts_with(&CacheKey::operation_prefix("recommendations")));
        assert!(key.starts_with(&CacheKey::namespace_prefix()));
        assert_eq!(CacheKey::operation_of(&key), "recommendations");
        // 16 digest bytes, hex encoded
        assert_eq!(key.rsplit(':').next().map(str::len), Some(32));
    }

    #[test]
    fn test_subject_prefix_does_not_match_longer_ids() {
        let key_4 = CacheKey::recommendations(4, 5, 1);
        let key_42 = CacheKey::recommendations(42, 5, 1);
        let prefix = CacheKey::subject_prefix(op::RECOMMENDATIONS, "4");
        assert!(key_4.starts_with(&prefix));
        assert!(!key_42.starts_with(&prefix));
    }

    #[test]
    fn test_similarity_key() {
        let key = CacheKey::similarity("item", "abc");
        assert!(key.starts_with("courserec:v1:similarity:item:"));
        assert_eq!(CacheKey::operation_of(&key), "similarity");
    }
}
