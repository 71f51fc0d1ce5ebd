//! Integration tests for the Redis cache backend
//!
//! These tests require a running Redis instance.
//! Run with: cargo test --test redis_integration_test -- --ignored

use recommendation_cache::{op, CacheKey, CacheTtls, RecommendationCache, RedisBackend, TtlClass};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const REDIS_URL: &str = "redis://127.0.0.1:6379";

async fn redis_cache() -> RecommendationCache {
    let backend = RedisBackend::connect(REDIS_URL)
        .await
        .expect("Failed to connect to Redis");
    let cache = RecommendationCache::new(Arc::new(backend), CacheTtls::default());
    cache.clear().await;
    cache
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_roundtrip_and_invalidate() {
    let cache = redis_cache().await;
    let key = CacheKey::recommendations(42, 5, 1);

    assert!(cache.set(&key, &vec![7i64, 3, 9], TtlClass::Recommendation).await);
    assert_eq!(cache.get::<Vec<i64>>(&key).await, Some(vec![7, 3, 9]));

    assert!(cache.invalidate_key(&key).await);
    assert_eq!(cache.get::<Vec<i64>>(&key).await, None);
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_prefix_invalidation_is_scoped() {
    let cache = redis_cache().await;
    let learner_42 = CacheKey::recommendations(42, 5, 1);
    let learner_43 = CacheKey::recommendations(43, 5, 1);
    let similarity = CacheKey::similarity("item", "abc");

    for key in [&learner_42, &learner_43, &similarity] {
        cache.set(key, &1u32, TtlClass::Recommendation).await;
    }

    let removed = cache
        .invalidate_prefix(&CacheKey::subject_prefix(op::RECOMMENDATIONS, "42"))
        .await;
    assert_eq!(removed, 1);
    assert_eq!(cache.get::<u32>(&learner_43).await, Some(1));

    let removed = cache
        .invalidate_prefix(&CacheKey::operation_prefix(op::RECOMMENDATIONS))
        .await;
    assert_eq!(removed, 1);
    assert_eq!(cache.get::<u32>(&similarity).await, Some(1));
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_single_flight_over_redis() {
    let cache = Arc::new(redis_cache().await);
    let runs = Arc::new(AtomicUsize::new(0));
    let key = CacheKey::similarity("learner", "single-flight");

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        let runs = Arc::clone(&runs);
        let key = key.clone();
        tasks.push(tokio::spawn(async move {
            cache
                .get_or_compute(&key, TtlClass::Similarity, || async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    Ok::<_, recommendation_cache::CacheError>(vec![1.0f64, 0.5])
                })
                .await
                .expect("compute succeeds")
        }));
    }

    for task in tasks {
        assert_eq!(*task.await.unwrap(), vec![1.0, 0.5]);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
