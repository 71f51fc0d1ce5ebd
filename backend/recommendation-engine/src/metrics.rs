//! Prometheus exposition for the engine process.
//!
//! There is no HTTP surface, so the registry is rendered in the text format
//! and written to a file for a node_exporter style textfile collector.

use crate::error::{EngineError, Result};
use prometheus::{Encoder, Registry, TextEncoder};
use recommendation_cache::CacheMetrics;
use std::path::Path;
use tracing::debug;

fn metrics_error(err: prometheus::Error) -> EngineError {
    EngineError::Internal(format!("metrics: {}", err))
}

/// Fresh registry with the cache counters registered
pub fn build_registry() -> Result<Registry> {
    let registry = Registry::new();
    CacheMetrics::register(&registry).map_err(metrics_error)?;
    Ok(registry)
}

pub fn render(registry: &Registry) -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(metrics_error)?;
    String::from_utf8(buffer).map_err(|e| EngineError::Internal(format!("metrics: {}", e)))
}

/// Render `registry` to `path`, via a temp file renamed into place
pub fn write_textfile(registry: &Registry, path: &Path) -> Result<()> {
    let body = render(registry)?;
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    debug!(path = %path.display(), "Metrics written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recommendation_cache::{CacheKey, CacheTtls, RecommendationCache, TtlClass};

    #[tokio::test]
    async fn test_cache_counters_reach_the_textfile() {
        let cache = RecommendationCache::in_memory(CacheTtls::default());
        let key = CacheKey::recommendations(7, 5, 1);
        cache.set(&key, &vec![1i64, 2], TtlClass::Recommendation).await;
        assert!(cache.get::<Vec<i64>>(&key).await.is_some());

        let registry = build_registry().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recommendation_engine.prom");
        write_textfile(&registry, &path).unwrap();

        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("courserec_cache_hits_total"), "{}", body);
        assert!(body.contains("courserec_cache_writes_total"));
        assert!(!path.with_extension("prom.tmp").exists());
    }

    #[test]
    fn test_registries_are_independent() {
        let first = build_registry().unwrap();
        let second = build_registry().unwrap();
        // Registering the same counters twice in one registry is rejected
        assert!(CacheMetrics::register(&first).is_err());
        assert!(render(&second).is_ok());
    }
}
