//! Redis-backed cache store shared by every service instance.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use deadpool_redis::{Config as RedisConfig, Connection, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use tracing::{debug, info};

use super::keys::{CacheKey, Namespace};
use super::store::{CacheError, CacheStore};

const SCAN_BATCH: usize = 200;

pub struct RedisCacheStore {
    pool: Pool,
}

impl RedisCacheStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build a pool for `redis://{host}:{port}`. Connections are opened lazily,
    /// so an unreachable server surfaces on first use rather than here.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, CacheError> {
        let url = format!("redis://{host}:{port}");
        let mut config = RedisConfig::from_url(url.as_str());
        let mut pool_config = PoolConfig::default();
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);
        config.pool = Some(pool_config);

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(CacheError::unavailable)?;
        info!(url = %url, "Redis cache pool created");
        Ok(Self::new(pool))
    }

    async fn connection(&self) -> Result<Connection, CacheError> {
        self.pool.get().await.map_err(CacheError::unavailable)
    }

    /// Round-trip `PING`; used by health reporting.
    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(CacheError::unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, CacheError> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn
            .get(key.flat())
            .await
            .map_err(CacheError::unavailable)?;
        Ok(value.map(Bytes::from))
    }

    async fn put(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        // SET EX rejects zero; one second is the smallest expiry Redis accepts.
        let ttl_secs = ttl.as_secs().max(1);
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(key.flat(), value.to_vec(), ttl_secs)
            .await
            .map_err(CacheError::unavailable)?;
        debug!(key = %key, ttl_secs, "cache set (redis)");
        Ok(())
    }

    async fn evict(&self, key: &CacheKey) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key.flat())
            .await
            .map_err(CacheError::unavailable)
    }

    async fn evict_namespace(&self, namespace: Namespace) -> Result<(), CacheError> {
        let pattern = CacheKey::namespace_pattern(namespace);
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(CacheError::unavailable)?;

            if !keys.is_empty() {
                removed += keys.len();
                conn.del::<_, ()>(keys)
                    .await
                    .map_err(CacheError::unavailable)?;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(namespace = namespace.as_str(), removed, "namespace evicted (redis)");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
