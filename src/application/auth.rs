//! Caller identity and the authorization check applied before cache access.

use async_trait::async_trait;

use crate::domain::users::Username;

/// Authenticated principal attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub username: String,
    pub role: Option<String>,
}

impl CallerIdentity {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            role: None,
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }
}

/// Decides whether a caller may act on a given user record.
///
/// Evaluated on every call, whether or not the record is cache resident.
#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    async fn is_authorized(&self, caller: &CallerIdentity, target: &Username) -> bool;
}

/// Permits a caller to act only on their own record. Usernames compare
/// case-insensitively.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfAccessGate;

#[async_trait]
impl AuthorizationGate for SelfAccessGate {
    async fn is_authorized(&self, caller: &CallerIdentity, target: &Username) -> bool {
        target.matches(&caller.username)
    }
}
