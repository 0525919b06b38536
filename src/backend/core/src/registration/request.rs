//! Registration request payload and input validation.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PortalError, Result};

pub const USERNAME_MIN_LEN: usize = 4;
pub const USERNAME_MAX_LEN: usize = 10;
pub const EMAIL_MAX_LEN: usize = 50;
pub const PASSWORD_MIN_LEN: usize = 6;
pub const PASSWORD_MAX_LEN: usize = 32;

const KEY_PREFIX: &str = "user_";

/// Account registration submitted through the public API.
#[derive(Clone, Serialize, Deserialize)]
pub struct RegistrationRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl RegistrationRequest {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    /// Check every field, reporting the first invalid one.
    pub fn validate(&self) -> Result<()> {
        validate_username(&self.username)?;
        validate_email(&self.email)?;
        validate_password(&self.password)?;
        Ok(())
    }

    /// Deduplication key for this request.
    pub fn idempotency_key(&self) -> String {
        registration_key(&self.username)
    }
}

/// Deduplication key for a username: `"user_" + lowercase(username)`.
pub fn registration_key(username: &str) -> String {
    format!("{}{}", KEY_PREFIX, username.to_lowercase())
}

fn validate_username(username: &str) -> Result<()> {
    let len = username.chars().count();
    if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
        return Err(PortalError::invalid_field(
            "username",
            format!(
                "must be between {} and {} characters",
                USERNAME_MIN_LEN, USERNAME_MAX_LEN
            ),
        ));
    }
    if !username.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(PortalError::invalid_field(
            "username",
            "may only contain letters and digits",
        ));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(PortalError::invalid_field("email", "is required"));
    }
    if email.chars().count() > EMAIL_MAX_LEN {
        return Err(PortalError::invalid_field(
            "email",
            format!("must be at most {} characters", EMAIL_MAX_LEN),
        ));
    }
    if email.chars().any(char::is_whitespace) {
        return Err(PortalError::invalid_field("email", "must not contain whitespace"));
    }

    let mut parts = email.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => (local, domain),
        _ => {
            return Err(PortalError::invalid_field(
                "email",
                "must contain exactly one '@'",
            ))
        }
    };

    let domain_ok = domain.contains('.') && domain.split('.').all(|label| !label.is_empty());
    if local.is_empty() || !domain_ok {
        return Err(PortalError::invalid_field("email", "is not a valid address"));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<()> {
    let len = password.chars().count();
    if !(PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&len) {
        return Err(PortalError::invalid_field(
            "password",
            format!(
                "must be between {} and {} characters",
                PASSWORD_MIN_LEN, PASSWORD_MAX_LEN
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn request(username: &str, email: &str, password: &str) -> RegistrationRequest {
        RegistrationRequest::new(username, email, password)
    }

    #[test]
    fn test_valid_request() {
        assert!(request("alice", "alice@example.com", "hunter22").validate().is_ok());
        assert!(request("Bob1", "b@mail.co.uk", "123456").validate().is_ok());
    }

    #[test]
    fn test_username_rules() {
        assert!(request("abc", "a@b.io", "secret1").validate().is_err());
        assert!(request("abcdefghijk", "a@b.io", "secret1").validate().is_err());
        assert!(request("bad_name", "a@b.io", "secret1").validate().is_err());
        assert!(request("abcdefghij", "a@b.io", "secret1").validate().is_ok());
    }

    #[test]
    fn test_email_rules() {
        for email in ["", "no-at.example.com", "a@@b.com", "a@b@c.com", "@b.com", "a@localhost", "a@b.", "a @b.com"] {
            let err = request("alice", email, "secret1").validate().unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidInput, "email {:?}", email);
        }

        let long = format!("{}@example.com", "a".repeat(40));
        assert!(request("alice", &long, "secret1").validate().is_err());
    }

    #[test]
    fn test_password_rules() {
        assert!(request("alice", "a@b.io", "12345").validate().is_err());
        assert!(request("alice", "a@b.io", &"x".repeat(33)).validate().is_err());
        assert!(request("alice", "a@b.io", &"x".repeat(32)).validate().is_ok());
    }

    #[test]
    fn test_registration_key_is_case_insensitive() {
        assert_eq!(registration_key("Alice"), "user_alice");
        assert_eq!(
            request("ALICE", "a@b.io", "secret1").idempotency_key(),
            request("alice", "c@d.io", "other12").idempotency_key()
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", request("alice", "a@b.io", "topsecret"));
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("topsecret"));
    }
}
