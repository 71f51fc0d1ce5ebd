//! Cache metrics for observability

use crate::keys::CacheKey;
use prometheus::{CounterVec, Opts, Registry};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

static METRICS: OnceLock<CacheMetricsInner> = OnceLock::new();

struct CacheMetricsInner {
    hits: CounterVec,
    misses: CounterVec,
    writes: CounterVec,
    invalidations: CounterVec,
    coalesced: CounterVec,
    errors: CounterVec,
}

fn counter(name: &str, help: &str, labels: &[&str]) -> CounterVec {
    CounterVec::new(Opts::new(name, help), labels).expect("valid metric definition")
}

impl CacheMetricsInner {
    fn new() -> Self {
        Self {
            hits: counter("courserec_cache_hits_total", "Total cache hits", &["operation"]),
            misses: counter(
                "courserec_cache_misses_total",
                "Total cache misses",
                &["operation"],
            ),
            writes: counter(
                "courserec_cache_writes_total",
                "Total cache writes",
                &["operation"],
            ),
            invalidations: counter(
                "courserec_cache_invalidations_total",
                "Total keys invalidated",
                &["operation"],
            ),
            coalesced: counter(
                "courserec_cache_coalesced_total",
                "Callers that reused an in-flight computation",
                &["operation"],
            ),
            errors: counter(
                "courserec_cache_errors_total",
                "Total cache errors",
                &["operation", "error_type"],
            ),
        }
    }

    fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.hits.clone()))?;
        registry.register(Box::new(self.misses.clone()))?;
        registry.register(Box::new(self.writes.clone()))?;
        registry.register(Box::new(self.invalidations.clone()))?;
        registry.register(Box::new(self.coalesced.clone()))?;
        registry.register(Box::new(self.errors.clone()))?;
        Ok(())
    }
}

fn get_metrics() -> &'static CacheMetricsInner {
    METRICS.get_or_init(CacheMetricsInner::new)
}

/// Point-in-time counters for one cache instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub invalidations: u64,
    pub coalesced: u64,
    pub errors: u64,
}

/// Cache metrics wrapper
///
/// Every record goes to the process-wide prometheus counters and to the
/// per-instance counters returned by [`CacheMetrics::snapshot`].
#[derive(Clone, Default)]
pub struct CacheMetrics {
    local: Arc<LocalCounters>,
}

#[derive(Default)]
struct LocalCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
    coalesced: AtomicU64,
    errors: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register metrics with a Prometheus registry
    pub fn register(registry: &Registry) -> Result<(), prometheus::Error> {
        get_metrics().register(registry)
    }

    pub fn record_hit(&self, key: &str) {
        self.local.hits.fetch_add(1, Ordering::Relaxed);
        get_metrics()
            .hits
            .with_label_values(&[CacheKey::operation_of(key)])
            .inc();
    }

    pub fn record_miss(&self, key: &str) {
        self.local.misses.fetch_add(1, Ordering::Relaxed);
        get_metrics()
            .misses
            .with_label_values(&[CacheKey::operation_of(key)])
            .inc();
    }

    pub fn record_write(&self, key: &str) {
        self.local.writes.fetch_add(1, Ordering::Relaxed);
        get_metrics()
            .writes
            .with_label_values(&[CacheKey::operation_of(key)])
            .inc();
    }

    pub fn record_invalidation(&self, prefix: &str, count: usize) {
        self.local
            .invalidations
            .fetch_add(count as u64, Ordering::Relaxed);
        get_metrics()
            .invalidations
            .with_label_values(&[CacheKey::operation_of(prefix)])
            .inc_by(count as f64);
    }

    pub fn record_coalesced(&self, key: &str) {
        self.local.coalesced.fetch_add(1, Ordering::Relaxed);
        get_metrics()
            .coalesced
            .with_label_values(&[CacheKey::operation_of(key)])
            .inc();
    }

    pub fn record_error(&self, key: &str, error_type: &str) {
        self.local.errors.fetch_add(1, Ordering::Relaxed);
        get_metrics()
            .errors
            .with_label_values(&[CacheKey::operation_of(key), error_type])
            .inc();
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.local.hits.load(Ordering::Relaxed),
            misses: self.local.misses.load(Ordering::Relaxed),
            writes: self.local.writes.load(Ordering::Relaxed),
            invalidations: self.local.invalidations.load(Ordering::Relaxed),
            coalesced: self.local.coalesced.load(Ordering::Relaxed),
            errors: self.local.errors.load(Ordering::Relaxed),
        }
    }
}
