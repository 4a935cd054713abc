//! User identity records.
//!
//! Users are registered by the upstream auth system and imported here so that
//! movements can reference them. No credentials are stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainResult, Entity, UserId, ValidationErrors};

const MAX_USERNAME_LEN: usize = 64;
const MAX_EMAIL_LEN: usize = 254;

/// An identity allowed to record movements.
///
/// # Invariants
/// - `username` and `email` are unique across the store (enforced by persistence).
/// - `username` is non-blank; `email` has a local part and a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Identity being imported from upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
}

impl NewUser {
    /// Collect every failing field.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let username = self.username.trim();
        if username.is_empty() {
            errors.push("username", "username cannot be empty");
        } else if username.chars().count() > MAX_USERNAME_LEN {
            errors.push(
                "username",
                format!("username must be at most {MAX_USERNAME_LEN} characters"),
            );
        } else if username.chars().any(char::is_whitespace) {
            errors.push("username", "username cannot contain whitespace");
        }

        let email = self.email.trim();
        if email.len() > MAX_EMAIL_LEN {
            errors.push("email", format!("email must be at most {MAX_EMAIL_LEN} characters"));
        } else if !looks_like_email(email) {
            errors.push("email", "email must be a valid address");
        }

        errors.into_result(())
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

impl User {
    /// Build a user from a validated import; emails are normalized to lowercase.
    pub fn import(id: UserId, input: NewUser, now: DateTime<Utc>) -> DomainResult<Self> {
        input.validate()?;

        Ok(Self {
            id,
            username: input.username.trim().to_string(),
            email: input.email.trim().to_lowercase(),
            created_at: now,
        })
    }
}

impl Entity for User {
    type Id = UserId;

    fn id(&self) -> Self::Id {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::DomainError;

    fn new_user(username: &str, email: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: email.to_string(),
        }
    }

    #[test]
    fn import_normalizes_fields() {
        let user = User::import(UserId::new(), new_user("  clerk ", " Clerk@Example.COM "), Utc::now()).unwrap();
        assert_eq!(user.username, "clerk");
        assert_eq!(user.email, "clerk@example.com");
    }

    #[test]
    fn validation_reports_every_field() {
        let err = User::import(UserId::new(), new_user(" ", "nope"), Utc::now()).unwrap_err();
        match err {
            DomainError::Validation(errors) => {
                assert!(errors.contains("username"));
                assert!(errors.contains("email"));
                assert_eq!(errors.len(), 2);
            }
            other => panic!("Expected Validation error, got {other:?}"),
        }
    }

    #[test]
    fn email_shape_checks() {
        assert!(looks_like_email("a@b.io"));
        assert!(!looks_like_email("@b.io"));
        assert!(!looks_like_email("a@"));
        assert!(!looks_like_email("a@@b.io"));
        assert!(!looks_like_email("a b@c.io"));
    }

    #[test]
    fn user_serializes_without_credentials() {
        let user = User::import(UserId::new(), new_user("clerk", "clerk@example.com"), Utc::now()).unwrap();
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["username"], "clerk");
    }
}
