//! Cache-aside coordination between the cache store and the user repository.
//!
//! Reads consult the cache, fall back to the repository on a miss and fill
//! the cache afterwards. Writes never populate the cache; they only evict.
//! Cache failures degrade to repository reads. Repository failures are never
//! papered over with cached data beyond its TTL.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use crate::application::repos::{RepoError, UsersRepo, bounded};
use crate::domain::users::{UserRecord, Username};

use super::config::CacheConfig;
use super::flight::FlightGroup;
use super::keys::{CacheKey, Namespace};
use super::store::{CacheError, CacheStore};

const METRIC_HIT: &str = "usercache_cache_hit_total";
const METRIC_MISS: &str = "usercache_cache_miss_total";
const METRIC_FILL: &str = "usercache_cache_fill_total";
const METRIC_DEGRADED: &str = "usercache_cache_degraded_total";
const METRIC_EVICT: &str = "usercache_cache_evict_total";
const METRIC_STORE_READ: &str = "usercache_store_read_total";

/// Outcome of an explicit invalidation. Eviction is not transactional: a
/// failure in one namespace does not undo the others.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub evicted: Vec<Namespace>,
    pub failed: Vec<(Namespace, String)>,
}

impl EvictionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, namespace: Namespace, result: Result<(), CacheError>) {
        match result {
            Ok(()) => {
                counter!(METRIC_EVICT, "namespace" => namespace.as_str()).increment(1);
                if !self.evicted.contains(&namespace) {
                    self.evicted.push(namespace);
                }
            }
            Err(err) => {
                warn!(
                    namespace = namespace.as_str(),
                    error = %err,
                    "Cache eviction failed"
                );
                self.failed.push((namespace, err.to_string()));
            }
        }
    }
}

/// Lookup-or-populate and invalidation over the `users` and `all-users`
/// namespaces.
pub struct CacheAside {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    users: Arc<dyn UsersRepo>,
    repo_timeout: Duration,
    flights: FlightGroup,
}

impl CacheAside {
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
        users: Arc<dyn UsersRepo>,
        repo_timeout: Duration,
    ) -> Self {
        Self {
            config,
            store,
            users,
            repo_timeout,
            flights: FlightGroup::new(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Resolve one user. `Ok(None)` means the repository has no such user.
    #[instrument(skip_all, fields(key = %username))]
    pub async fn get_by_key(&self, username: &Username) -> Result<Option<UserRecord>, RepoError> {
        let key = CacheKey::user(username);
        // A cached `null` is a tombstone for a known-absent user.
        if let Some(cached) = self.lookup::<Option<UserRecord>>(&key).await {
            return Ok(cached);
        }

        let _flight = if self.config.single_flight {
            let guard = self.flights.enter(&key).await;
            if let Some(cached) = self.lookup::<Option<UserRecord>>(&key).await {
                return Ok(cached);
            }
            Some(guard)
        } else {
            None
        };

        let found = self
            .read_repo(Namespace::Users, self.users.find_by_username(username))
            .await?;

        match &found {
            Some(user) => self.fill(&key, user, self.config.entity_ttl()).await,
            None if self.config.negative_results_enabled => {
                self.fill(&key, &None::<UserRecord>, self.config.negative_ttl())
                    .await
            }
            None => debug!("user absent in repository; nothing cached"),
        }

        Ok(found)
    }

    /// Resolve the full collection, in the order it was last computed.
    #[instrument(skip_all)]
    pub async fn get_all(&self) -> Result<Vec<UserRecord>, RepoError> {
        let key = CacheKey::all_users();
        if let Some(cached) = self.lookup::<Vec<UserRecord>>(&key).await {
            return Ok(cached);
        }

        let _flight = if self.config.single_flight {
            let guard = self.flights.enter(&key).await;
            if let Some(cached) = self.lookup::<Vec<UserRecord>>(&key).await {
                return Ok(cached);
            }
            Some(guard)
        } else {
            None
        };

        let users = self
            .read_repo(Namespace::AllUsers, self.users.list_all())
            .await?;

        if !users.is_empty() || self.config.cache_empty_collections {
            self.fill(&key, &users, self.config.collection_ttl()).await;
        } else {
            debug!("repository is empty; collection not cached");
        }

        Ok(users)
    }

    /// Drop the cached entry for one user. Absent keys are not an error.
    #[instrument(skip_all, fields(key = %username))]
    pub async fn evict_entity(&self, username: &Username) -> EvictionReport {
        let key = CacheKey::user(username);
        let mut report = EvictionReport::default();
        report.record(Namespace::Users, self.bounded(self.store.evict(&key)).await);
        report
    }

    /// Clear both namespaces. Both are always attempted.
    #[instrument(skip_all)]
    pub async fn evict_all(&self) -> EvictionReport {
        let mut report = EvictionReport::default();
        for namespace in Namespace::ALL {
            let result = self.bounded(self.store.evict_namespace(namespace)).await;
            report.record(namespace, result);
        }
        info!(
            evicted = report.evicted.len(),
            failed = report.failed.len(),
            "Cache namespaces cleared"
        );
        report
    }

    /// Invalidate everything a deleted user may appear in: its own entry and
    /// the collection view that embeds it.
    #[instrument(skip_all, fields(key = %username))]
    pub async fn entity_deleted(&self, username: &Username) -> EvictionReport {
        let mut report = self.evict_entity(username).await;
        let result = self
            .bounded(self.store.evict_namespace(Namespace::AllUsers))
            .await;
        report.record(Namespace::AllUsers, result);
        report
    }

    /// Cache read that never fails: outages, timeouts and undecodable
    /// entries all read as a miss.
    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let namespace = key.namespace.as_str();
        let bytes = match self.bounded(self.store.get(key)).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                counter!(METRIC_MISS, "namespace" => namespace).increment(1);
                debug!(key = %key, "cache miss");
                return None;
            }
            Err(err) => {
                counter!(METRIC_DEGRADED, "namespace" => namespace, "op" => "get").increment(1);
                warn!(key = %key, error = %err, "Cache read failed; falling back to repository");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                counter!(METRIC_HIT, "namespace" => namespace).increment(1);
                debug!(key = %key, "cache hit");
                Some(value)
            }
            Err(err) => {
                let err = CacheError::Codec(err.to_string());
                counter!(METRIC_DEGRADED, "namespace" => namespace, "op" => "decode").increment(1);
                warn!(key = %key, error = %err, "Discarding undecodable cache entry");
                if let Err(evict_err) = self.bounded(self.store.evict(key)).await {
                    warn!(key = %key, error = %evict_err, "Failed to drop undecodable entry");
                }
                None
            }
        }
    }

    /// Best-effort write after a miss; failure only costs a future miss.
    async fn fill<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T, ttl: Duration) {
        let namespace = key.namespace.as_str();
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                warn!(key = %key, error = %err, "Failed to encode cache entry");
                return;
            }
        };

        match self.bounded(self.store.put(key, bytes, ttl)).await {
            Ok(()) => {
                counter!(METRIC_FILL, "namespace" => namespace).increment(1);
                debug!(key = %key, ttl_secs = ttl.as_secs(), "cache filled");
            }
            Err(err) => {
                counter!(METRIC_DEGRADED, "namespace" => namespace, "op" => "put").increment(1);
                warn!(key = %key, error = %err, "Cache fill failed; serving uncached result");
            }
        }
    }

    async fn read_repo<T>(
        &self,
        namespace: Namespace,
        read: impl Future<Output = Result<T, RepoError>>,
    ) -> Result<T, RepoError> {
        counter!(METRIC_STORE_READ, "namespace" => namespace.as_str()).increment(1);
        bounded(self.repo_timeout, read).await
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        let limit = self.config.io_timeout();
        tokio::time::timeout(limit, op)
            .await
            .map_err(|_| CacheError::Timeout(limit))?
    }
}
