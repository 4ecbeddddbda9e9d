//! Repository traits describing persistence adapters.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::users::{UserRecord, Username};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Bound a repository call; an elapsed limit becomes [`RepoError::Timeout`].
pub async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, RepoError>>,
) -> Result<T, RepoError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| RepoError::Timeout)?
}

/// Read side of the system of record for users.
#[async_trait]
pub trait UsersRepo: Send + Sync {
    async fn find_by_username(&self, username: &Username)
    -> Result<Option<UserRecord>, RepoError>;

    /// Every user, ordered by id.
    async fn list_all(&self) -> Result<Vec<UserRecord>, RepoError>;

    async fn health_check(&self) -> Result<(), RepoError>;
}

#[async_trait]
pub trait UsersWriteRepo: Send + Sync {
    /// Returns `false` when no row matched.
    async fn delete_by_username(&self, username: &Username) -> Result<bool, RepoError>;
}
