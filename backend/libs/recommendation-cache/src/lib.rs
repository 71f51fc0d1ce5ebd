//! Recommendation cache layer
//!
//! Memoizes per-learner recommendation results and the expensive similarity
//! matrices behind one small API:
//! - Versioned, order-independent key schema ([`CacheKey`])
//! - Two TTL classes: recommendations (1h) and similarity matrices (24h)
//! - Prefix invalidation via SCAN (no blocking KEYS)
//! - Single-flight [`RecommendationCache::get_or_compute`]: concurrent callers
//!   for the same missing key share one computation
//! - Best-effort semantics: a backend error is logged, counted and treated as
//!   a miss, never returned to the caller
//!
//! # Example
//!
//! ```no_run
//! use recommendation_cache::{CacheKey, InMemoryBackend, RecommendationCache, TtlClass};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cache = RecommendationCache::new(Arc::new(InMemoryBackend::new()), Default::default());
//! let key = CacheKey::recommendations(42, 5, 1);
//! cache.set(&key, &vec![1, 2, 3], TtlClass::Recommendation).await;
//! let hit: Option<Vec<i64>> = cache.get(&key).await;
//! assert_eq!(hit, Some(vec![1, 2, 3]));
//! # }
//! ```

mod error;
mod keys;
mod memory;
mod metrics;
mod redis_backend;

pub use error::{CacheError, CacheResult};
pub use keys::{op, CacheKey, CACHE_VERSION, NAMESPACE};
pub use memory::InMemoryBackend;
pub use metrics::{CacheMetrics, CacheStats};
pub use redis_backend::RedisBackend;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Default TTL values (seconds)
pub mod ttl {
    pub const RECOMMENDATION: u64 = 3600; // 1 hour
    pub const SIMILARITY: u64 = 86400; // 24 hours
}

/// Which TTL a write uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    Recommendation,
    Similarity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheTtls {
    pub recommendation: Duration,
    pub similarity: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            recommendation: Duration::from_secs(ttl::RECOMMENDATION),
            similarity: Duration::from_secs(ttl::SIMILARITY),
        }
    }
}

impl CacheTtls {
    pub fn for_class(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::Recommendation => self.recommendation,
            TtlClass::Similarity => self.similarity,
        }
    }
}

/// Raw key/value store behind the cache
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> CacheResult<()>;

    /// Delete one key, returning whether it existed
    async fn del(&self, key: &str) -> CacheResult<bool>;

    /// Delete every key starting with `prefix`
    async fn scan_del(&self, prefix: &str) -> CacheResult<usize>;

    fn name(&self) -> &'static str;
}

type InFlight = Arc<OnceCell<Arc<dyn Any + Send + Sync>>>;

pub struct RecommendationCache {
    backend: Arc<dyn CacheBackend>,
    ttls: CacheTtls,
    in_flight: DashMap<String, InFlight>,
    metrics: CacheMetrics,
}

impl RecommendationCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttls: CacheTtls) -> Self {
        Self {
            backend,
            ttls,
            in_flight: DashMap::new(),
            metrics: CacheMetrics::new(),
        }
    }

    /// Cache backed by the in-process store
    pub fn in_memory(ttls: CacheTtls) -> Self {
        Self::new(Arc::new(InMemoryBackend::new()), ttls)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn ttls(&self) -> CacheTtls {
        self.ttls
    }

    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    /// Read and decode a value. Misses, backend failures and undecodable
    /// payloads all come back as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.backend.get(key).await {
            Ok(Some(payload)) => match serde_json::from_str::<T>(&payload) {
                Ok(value) => {
                    debug!(key = %key, "Cache hit");
                    self.metrics.record_hit(key);
                    Some(value)
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Cache deserialization failed");
                    self.metrics.record_error(key, "deserialize");
                    // Delete corrupted cache entry
                    let _ = self.backend.del(key).await;
                    None
                }
            },
            Ok(None) => {
                debug!(key = %key, "Cache miss");
                self.metrics.record_miss(key);
                None
            }
            Err(e) => {
                warn!(
                    key = %key,
                    backend = self.backend.name(),
                    error = %e,
                    "Cache unavailable, proceeding uncached"
                );
                self.metrics.record_error(key, e.kind());
                None
            }
        }
    }

    /// Encode and write a value. Returns whether the write landed.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, class: TtlClass) -> bool {
        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache serialization failed");
                self.metrics.record_error(key, "serialize");
                return false;
            }
        };

        match self
            .backend
            .set(key, payload, self.ttls.for_class(class))
            .await
        {
            Ok(()) => {
                debug!(key = %key, class = ?class, "Cache set");
                self.metrics.record_write(key);
                true
            }
            Err(e) => {
                warn!(
                    key = %key,
                    backend = self.backend.name(),
                    error = %e,
                    "Cache write failed, result not cached"
                );
                self.metrics.record_error(key, e.kind());
                false
            }
        }
    }

    /// Delete a single key
    pub async fn invalidate_key(&self, key: &str) -> bool {
        match self.backend.del(key).await {
            Ok(existed) => {
                if existed {
                    self.metrics.record_invalidation(key, 1);
                }
                existed
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache invalidation failed");
                self.metrics.record_error(key, e.kind());
                false
            }
        }
    }

    /// Delete every key under `prefix`, returning how many were removed
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        match self.backend.scan_del(prefix).await {
            Ok(count) => {
                debug!(prefix = %prefix, deleted = count, "Cache prefix invalidated");
                self.metrics.record_invalidation(prefix, count);
                count
            }
            Err(e) => {
                warn!(prefix = %prefix, error = %e, "Cache prefix invalidation failed");
                self.metrics.record_error(prefix, e.kind());
                0
            }
        }
    }

    /// Delete every key the engine owns
    pub async fn clear(&self) -> usize {
        self.invalidate_prefix(&CacheKey::namespace_prefix()).await
    }

    /// Read-through with single-flight.
    ///
    /// On a miss, exactly one caller per key runs `compute`; callers arriving
    /// while it runs await the same result instead of recomputing. The result
    /// is written through with the TTL of `class`. A failed computation is not
    /// shared: the next waiter retries with its own `compute`.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        class: TtlClass,
        compute: F,
    ) -> Result<Arc<T>, E>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            return Ok(Arc::new(hit));
        }

        let cell: InFlight = self
            .in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let computed_here = AtomicBool::new(false);
        let flag = &computed_here;
        let outcome = cell
            .get_or_try_init(move || async move {
                // A previous flight may have finished between our miss and
                // claiming the cell
                if let Some(hit) = self.get::<T>(key).await {
                    return Ok(Arc::new(hit) as Arc<dyn Any + Send + Sync>);
                }
                flag.store(true, Ordering::Relaxed);
                let value = compute().await?;
                self.set(key, &value, class).await;
                Ok::<Arc<dyn Any + Send + Sync>, E>(Arc::new(value))
            })
            .await
            .map(Arc::clone);

        self.in_flight
            .remove_if(key, |_, current| Arc::ptr_eq(current, &cell));

        let erased = outcome?;
        if !computed_here.load(Ordering::Relaxed) {
            debug!(key = %key, "Reused in-flight computation");
            self.metrics.record_coalesced(key);
        }

        erased.downcast::<T>().map_err(|_| {
            E::from(CacheError::InvalidData(format!(
                "in-flight value for {} has a different type",
                key
            )))
        })
    }
}
