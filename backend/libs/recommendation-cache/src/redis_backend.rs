//! Redis cache backend

use crate::{CacheBackend, CacheError, CacheResult};
use async_trait::async_trait;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info};

/// Keys fetched per SCAN round trip
const SCAN_BATCH: usize = 200;
/// Upper bound of the random TTL reduction, in percent
const TTL_SPREAD_PERCENT: u64 = 10;

/// Redis-backed store. `ConnectionManager` multiplexes and reconnects on its
/// own, so every call works on a cheap clone of it.
#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
}

impl RedisBackend {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// Open a managed connection to `redis_url`
    pub async fn connect(redis_url: &str) -> CacheResult<Self> {
        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        info!("Redis cache backend connected");
        Ok(Self::new(manager))
    }

    /// Shorten a TTL by up to `TTL_SPREAD_PERCENT` so entries written
    /// together do not all expire in the same second. Never exceeds the
    /// configured TTL.
    fn spread_ttl(ttl: Duration) -> u64 {
        let secs = ttl.as_secs().max(1);
        let max_cut = secs * TTL_SPREAD_PERCENT / 100;
        secs - rand::thread_rng().gen_range(0..=max_cut)
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, payload: String, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, payload, Self::spread_ttl(ttl))
            .await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.manager.clone();
        let removed: usize = conn.del(key).await?;
        Ok(removed > 0)
    }

    /// Incremental SCAN over `prefix*`, unlinking each batch as it arrives.
    /// KEYS would block the server on large keyspaces.
    async fn scan_del(&self, prefix: &str) -> CacheResult<usize> {
        let pattern = format!("{}*", prefix);
        let mut conn = self.manager.clone();
        let mut removed = 0usize;
        let mut cursor = 0u64;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !batch.is_empty() {
                let unlinked: usize = redis::cmd("UNLINK")
                    .arg(&batch)
                    .query_async(&mut conn)
                    .await?;
                removed += unlinked;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern = %pattern, removed, "Redis prefix unlinked");
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_spread_stays_within_bounds() {
        for _ in 0..100 {
            let secs = RedisBackend::spread_ttl(Duration::from_secs(3600));
            assert!((3240..=3600).contains(&secs), "{}", secs);

            let secs = RedisBackend::spread_ttl(Duration::from_secs(86400));
            assert!((77760..=86400).contains(&secs), "{}", secs);
        }
        assert_eq!(RedisBackend::spread_ttl(Duration::from_secs(5)), 5);
        // Sub-second TTLs still expire
        assert_eq!(RedisBackend::spread_ttl(Duration::from_millis(10)), 1);
    }
}
