//! Cache key definitions.
//!
//! Two namespaces exist: `users` holds one entry per username and
//! `all-users` holds the collection view under a single fixed key.

use std::fmt;

use crate::domain::users::Username;

/// Fixed key of the collection entry inside [`Namespace::AllUsers`].
pub const ALL_USERS_KEY: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Single users keyed by username.
    Users,
    /// The full user collection.
    AllUsers,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Users, Namespace::AllUsers];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Users => "users",
            Namespace::AllUsers => "all-users",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub namespace: Namespace,
    pub key: String,
}

impl CacheKey {
    pub fn user(username: &Username) -> Self {
        Self {
            namespace: Namespace::Users,
            key: username.as_str().to_string(),
        }
    }

    pub fn all_users() -> Self {
        Self {
            namespace: Namespace::AllUsers,
            key: ALL_USERS_KEY.to_string(),
        }
    }

    /// Flat key used by shared stores, e.g. `users::alice`.
    pub fn flat(&self) -> String {
        format!("{}::{}", self.namespace, self.key)
    }

    /// Glob matching every flat key of `namespace`.
    pub fn namespace_pattern(namespace: Namespace) -> String {
        format!("{namespace}::*")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.namespace, self.key)
    }
}
