//! Account persistence.

use argon2::password_hash::{PasswordHash, PasswordVerifier};
use argon2::Argon2;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{PortalError, Result};
use crate::jobs::JobId;

/// A stored account.
///
/// Only the Argon2 hash of the password and the SHA-256 digest of the
/// current verification token are kept.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub verification_digest: Option<String>,
    pub verified: bool,
    /// Job that created the account
    pub created_by: JobId,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn verify_password(&self, password: &str) -> bool {
        PasswordHash::new(&self.password_hash)
            .map(|hash| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &hash)
                    .is_ok()
            })
            .unwrap_or(false)
    }

    pub fn matches_verification_token(&self, token: &str) -> bool {
        self.verification_digest.as_deref() == Some(token_digest(token).as_str())
    }
}

/// Fields needed to create an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_by: JobId,
}

/// Hex-encoded SHA-256 digest of a verification token.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Account storage backend.
///
/// Usernames and emails are unique ignoring ASCII case.
#[async_trait]
pub trait AccountStore: Send + Sync + 'static {
    async fn find_by_username(&self, username: &str) -> Result<Option<Account>>;

    async fn email_exists(&self, email: &str) -> Result<bool>;

    /// Insert a new account, failing with `UsernameTaken` or `EmailTaken`.
    async fn insert(&self, account: NewAccount) -> Result<Account>;

    /// Replace the stored verification digest.
    async fn set_verification_digest(&self, account_id: Uuid, digest: String) -> Result<()>;
}

#[derive(Default)]
struct Accounts {
    by_username: HashMap<String, Account>,
    /// lowercase email -> lowercase username
    emails: HashMap<String, String>,
}

/// Process-local account store.
#[derive(Default)]
pub struct InMemoryAccountStore {
    inner: RwLock<Accounts>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_username.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the account verified if the token matches.
    pub fn verify(&self, username: &str, token: &str) -> bool {
        let mut inner = self.inner.write();
        match inner.by_username.get_mut(&username.to_lowercase()) {
            Some(account) if account.matches_verification_token(token) => {
                account.verified = true;
                account.verification_digest = None;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<Account>> {
        Ok(self.inner.read().by_username.get(&username.to_lowercase()).cloned())
    }

    async fn email_exists(&self, email: &str) -> Result<bool> {
        Ok(self.inner.read().emails.contains_key(&email.to_lowercase()))
    }

    async fn insert(&self, account: NewAccount) -> Result<Account> {
        let username_key = account.username.to_lowercase();
        let email_key = account.email.to_lowercase();

        let mut inner = self.inner.write();
        if inner.by_username.contains_key(&username_key) {
            return Err(PortalError::username_taken(&account.username));
        }
        if inner.emails.contains_key(&email_key) {
            return Err(PortalError::email_taken());
        }

        let stored = Account {
            id: Uuid::new_v4(),
            username: account.username,
            email: account.email,
            password_hash: account.password_hash,
            verification_digest: None,
            verified: false,
            created_by: account.created_by,
            created_at: Utc::now(),
        };
        inner.emails.insert(email_key, username_key.clone());
        inner.by_username.insert(username_key, stored.clone());
        Ok(stored)
    }

    async fn set_verification_digest(&self, account_id: Uuid, digest: String) -> Result<()> {
        let mut inner = self.inner.write();
        let account = inner
            .by_username
            .values_mut()
            .find(|a| a.id == account_id)
            .ok_or_else(|| PortalError::storage(format!("account {} not found", account_id)))?;
        account.verification_digest = Some(digest);
        Ok(())
    }
}
