//! User records and the username they are keyed by.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

const MAX_USERNAME_LEN: usize = 64;

/// A user as stored in the system of record.
///
/// The cache layer treats the profile attributes as opaque; only `username`
/// participates in keying and authorization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub firstname: String,
    pub lastname: String,
    pub role: String,
}

/// A validated username, used verbatim as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(String);

impl Username {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::validation("username must not be empty"));
        }
        if trimmed.chars().count() > MAX_USERNAME_LEN {
            return Err(DomainError::validation(format!(
                "username must be at most {MAX_USERNAME_LEN} characters"
            )));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(DomainError::validation(
                "username must not contain whitespace or `/`",
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison used at the authorization boundary.
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other.trim())
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_surrounding_whitespace() {
        let username = Username::parse("  alice ").expect("valid username");
        assert_eq!(username.as_str(), "alice");
    }

    #[test]
    fn parse_rejects_empty_and_inner_whitespace() {
        assert!(Username::parse("   ").is_err());
        assert!(Username::parse("al ice").is_err());
        assert!(Username::parse("al/ice").is_err());
    }

    #[test]
    fn parse_rejects_overlong_names() {
        let long = "a".repeat(MAX_USERNAME_LEN + 1);
        assert!(Username::parse(&long).is_err());
        assert!(Username::parse(&"a".repeat(MAX_USERNAME_LEN)).is_ok());
    }

    #[test]
    fn matches_ignores_ascii_case() {
        let username = Username::parse("Alice").expect("valid username");
        assert!(username.matches("alice"));
        assert!(username.matches("ALICE"));
        assert!(!username.matches("bob"));
    }

    #[test]
    fn record_serializes_with_original_field_names() {
        let record = UserRecord {
            id: 7,
            username: "johnd".to_string(),
            firstname: "John".to_string(),
            lastname: "Doe".to_string(),
            role: "USER".to_string(),
        };
        let json = serde_json::to_value(&record).expect("serializable");
        assert_eq!(json["firstname"], "John");
        assert_eq!(json["lastname"], "Doe");
    }
}
