//! Cache store abstraction and the in-process implementation.

use std::sync::{LockResult, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

use super::config::CacheConfig;
use super::keys::{CacheKey, Namespace};

const METRIC_CAPACITY_EVICT: &str = "usercache_cache_capacity_evict_total";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("cached value could not be decoded: {0}")]
    Codec(String),
}

impl CacheError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Key-value store with per-entry TTL, shared by every request.
///
/// Implementations must be safe under concurrent last-writer-wins use; no
/// operation takes a lock that outlives the call.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns `Ok(None)` on a miss or an expired entry. Store outages are
    /// reported as errors, never as misses.
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, CacheError>;

    /// Overwrites any existing entry.
    async fn put(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<(), CacheError>;

    /// Removing an absent key succeeds.
    async fn evict(&self, key: &CacheKey) -> Result<(), CacheError>;

    async fn evict_namespace(&self, namespace: Namespace) -> Result<(), CacheError>;

    /// Short backend label for status output and logs.
    fn backend(&self) -> &'static str;
}

#[derive(Clone)]
struct StoredEntry {
    value: Bytes,
    inserted_at: Instant,
    ttl: Duration,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

/// In-process store: one bounded LRU per namespace.
///
/// Expiry is lazy; an expired entry is dropped by the `get` that finds it.
pub struct MemoryCacheStore {
    users: RwLock<LruCache<String, StoredEntry>>,
    all_users: RwLock<LruCache<String, StoredEntry>>,
}

impl MemoryCacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            users: RwLock::new(LruCache::new(config.memory_capacity_non_zero())),
            all_users: RwLock::new(LruCache::new(config.memory_capacity_non_zero())),
        }
    }

    fn slot(&self, namespace: Namespace) -> &RwLock<LruCache<String, StoredEntry>> {
        match namespace {
            Namespace::Users => &self.users,
            Namespace::AllUsers => &self.all_users,
        }
    }

    /// Number of live (possibly expired but not yet collected) entries.
    pub fn len(&self, namespace: Namespace) -> usize {
        recover(self.slot(namespace).read(), namespace, "len").len()
    }

    pub fn is_empty(&self, namespace: Namespace) -> bool {
        self.len(namespace) == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, CacheError> {
        let mut entries = recover(self.slot(key.namespace).write(), key.namespace, "get");
        let expired = match entries.get(&key.key) {
            Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(&key.key);
        }
        Ok(None)
    }

    async fn put(&self, key: &CacheKey, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        let entry = StoredEntry {
            value,
            inserted_at: Instant::now(),
            ttl,
        };
        let displaced = recover(self.slot(key.namespace).write(), key.namespace, "put")
            .push(key.key.clone(), entry);
        if displaced.is_some_and(|(displaced_key, _)| displaced_key != key.key) {
            counter!(METRIC_CAPACITY_EVICT, "namespace" => key.namespace.as_str()).increment(1);
        }
        Ok(())
    }

    async fn evict(&self, key: &CacheKey) -> Result<(), CacheError> {
        recover(self.slot(key.namespace).write(), key.namespace, "evict").pop(&key.key);
        Ok(())
    }

    async fn evict_namespace(&self, namespace: Namespace) -> Result<(), CacheError> {
        recover(self.slot(namespace).write(), namespace, "evict_namespace").clear();
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

fn recover<G>(result: LockResult<G>, namespace: Namespace, op: &'static str) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            namespace = namespace.as_str(),
            lock_kind = "rwlock",
            result = "poisoned_recovered",
            "Recovered from poisoned cache lock"
        );
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;
    use crate::domain::users::Username;

    fn user_key(name: &str) -> CacheKey {
        CacheKey::user(&Username::parse(name).expect("valid username"))
    }

    #[tokio::test]
    async fn put_then_get_roundtrip() {
        let store = MemoryCacheStore::new(&CacheConfig::default());
        let key = user_key("alice");

        assert!(store.get(&key).await.expect("get").is_none());

        store
            .put(&key, Bytes::from_static(b"{}"), Duration::from_secs(60))
            .await
            .expect("put");

        let cached = store.get(&key).await.expect("get").expect("cached value");
        assert_eq!(cached, Bytes::from_static(b"{}"));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_read_as_misses_and_are_dropped() {
        let store = MemoryCacheStore::new(&CacheConfig::default());
        let key = user_key("alice");

        store
            .put(&key, Bytes::from_static(b"1"), Duration::from_secs(5))
            .await
            .expect("put");

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.get(&key).await.expect("get").is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.get(&key).await.expect("get").is_none());
        assert!(store.is_empty(Namespace::Users));
    }

    #[tokio::test]
    async fn evict_of_absent_key_succeeds() {
        let store = MemoryCacheStore::new(&CacheConfig::default());
        store.evict(&user_key("ghost")).await.expect("evict");
        store.evict(&user_key("ghost")).await.expect("evict twice");
    }

    #[tokio::test]
    async fn evict_namespace_leaves_other_namespace_alone() {
        let store = MemoryCacheStore::new(&CacheConfig::default());
        let ttl = Duration::from_secs(60);
        store
            .put(&user_key("alice"), Bytes::from_static(b"a"), ttl)
            .await
            .expect("put user");
        store
            .put(&CacheKey::all_users(), Bytes::from_static(b"[]"), ttl)
            .await
            .expect("put collection");

        store
            .evict_namespace(Namespace::AllUsers)
            .await
            .expect("evict namespace");

        assert!(store.get(&CacheKey::all_users()).await.expect("get").is_none());
        assert!(store.get(&user_key("alice")).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn lru_capacity_evicts_least_recent() {
        let config = CacheConfig {
            memory_capacity: 2,
            ..Default::default()
        };
        let store = MemoryCacheStore::new(&config);
        let ttl = Duration::from_secs(60);

        store.put(&user_key("a"), Bytes::from_static(b"a"), ttl).await.expect("put");
        store.put(&user_key("b"), Bytes::from_static(b"b"), ttl).await.expect("put");
        // Touch `a` so `b` becomes least recent.
        assert!(store.get(&user_key("a")).await.expect("get").is_some());
        store.put(&user_key("c"), Bytes::from_static(b"c"), ttl).await.expect("put");

        assert!(store.get(&user_key("a")).await.expect("get").is_some());
        assert!(store.get(&user_key("b")).await.expect("get").is_none()); // Evicted
        assert!(store.get(&user_key("c")).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn store_recovers_from_poisoned_lock() {
        let store = MemoryCacheStore::new(&CacheConfig::default());

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = store.users.write().expect("users lock should be acquired");
            panic!("poison users lock");
        }));

        store
            .put(&user_key("alice"), Bytes::from_static(b"a"), Duration::from_secs(60))
            .await
            .expect("put after poison");
        assert!(store.get(&user_key("alice")).await.expect("get").is_some());
    }
}
