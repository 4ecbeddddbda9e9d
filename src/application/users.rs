use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::application::auth::{AuthorizationGate, CallerIdentity};
use crate::application::error::AppError;
use crate::application::repos::{UsersWriteRepo, bounded};
use crate::cache::{CacheAside, EvictionReport};
use crate::domain::users::{UserRecord, Username};

/// The operations exposed over HTTP, layered over the cache-aside coordinator.
#[derive(Clone)]
pub struct UserService {
    cache: Arc<CacheAside>,
    writer: Arc<dyn UsersWriteRepo>,
    gate: Arc<dyn AuthorizationGate>,
    repo_timeout: Duration,
}

impl UserService {
    pub fn new(
        cache: Arc<CacheAside>,
        writer: Arc<dyn UsersWriteRepo>,
        gate: Arc<dyn AuthorizationGate>,
        repo_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            writer,
            gate,
            repo_timeout,
        }
    }

    pub async fn list_users(&self) -> Result<Vec<UserRecord>, AppError> {
        let users = self.cache.get_all().await?;
        info!(count = users.len(), "Listed users");
        Ok(users)
    }

    pub async fn get_user(
        &self,
        caller: Option<&CallerIdentity>,
        username: &str,
    ) -> Result<UserRecord, AppError> {
        let username = self.authorize(caller, username).await?;
        self.cache
            .get_by_key(&username)
            .await?
            .ok_or(AppError::NotFound)
    }

    /// Delete from the backing store, then invalidate before reporting success.
    pub async fn delete_user(
        &self,
        caller: Option<&CallerIdentity>,
        username: &str,
    ) -> Result<(), AppError> {
        let username = self.authorize(caller, username).await?;

        let deleted = bounded(self.repo_timeout, self.writer.delete_by_username(&username)).await?;

        // Evict even when nothing matched: a stale entry may still be cached.
        let report = self.cache.entity_deleted(&username).await;
        if !report.is_complete() {
            error!(
                username = %username,
                failed = ?report.failed,
                "Cache invalidation after delete failed; stale entries expire with their TTL"
            );
        }

        if deleted {
            info!(username = %username, "User deleted");
            Ok(())
        } else {
            Err(AppError::NotFound)
        }
    }

    pub async fn evict_user_cache(&self, username: &str) -> Result<EvictionReport, AppError> {
        let username = Username::parse(username)?;
        let report = self.cache.evict_entity(&username).await;
        info!(username = %username, complete = report.is_complete(), "User cache evicted");
        Ok(report)
    }

    pub async fn evict_all_cache(&self) -> EvictionReport {
        let report = self.cache.evict_all().await;
        if !report.is_complete() {
            warn!(failed = ?report.failed, "Bulk cache invalidation was partial");
        }
        report
    }

    /// Human-readable description of the cache configuration. Never exposes
    /// cached data.
    pub fn cache_status(&self) -> String {
        let config = self.cache.config();
        format!(
            "Cache-Aside pattern is active (backend: {backend}; users TTL {entity}s, \
             all-users TTL {collection}s, negative caching {negative}). \
             Use /users/cache/evict/{{username}} or /users/cache/evict-all to manage cache",
            backend = self.cache.backend(),
            entity = config.entity_ttl_seconds,
            collection = config.collection_ttl_seconds,
            negative = if config.negative_results_enabled {
                "on"
            } else {
                "off"
            },
        )
    }

    /// Identity check, username validation and the gate, in that order.
    /// Runs before any cache access so a resident entry cannot bypass it.
    async fn authorize(
        &self,
        caller: Option<&CallerIdentity>,
        username: &str,
    ) -> Result<Username, AppError> {
        let caller = caller.ok_or(AppError::Unauthenticated)?;
        let username = Username::parse(username)?;
        if !self.gate.is_authorized(caller, &username).await {
            warn!(
                caller = %caller.username,
                target = %username,
                "Access denied"
            );
            return Err(AppError::Unauthorized(username.to_string()));
        }
        Ok(username)
    }
}
