//! Registration job handler.

use argon2::password_hash::{rand_core::OsRng, PasswordHasher, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::mailer::{Mailer, VerificationMail};
use super::request::RegistrationRequest;
use super::store::{token_digest, Account, AccountStore, NewAccount};
use crate::error::{PortalError, Result};
use crate::jobs::{JobContext, JobError, JobHandler, JobQueue};
use crate::telemetry::RegistrationMetrics;

/// Queue type used by the server.
pub type RegistrationQueue = JobQueue<RegistrationRequest, RegistrationOutcome>;

/// Result of a completed registration job.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationOutcome {
    pub account_id: Uuid,
    pub username: String,
    pub verification_sent: bool,
}

/// Creates the account and sends its verification mail.
///
/// Taken usernames or emails fail the job permanently. Unavailable storage
/// and mail delivery failures are retryable; a retry reuses the account its
/// earlier attempt inserted and issues a fresh verification token.
pub struct RegistrationHandler {
    accounts: Arc<dyn AccountStore>,
    mailer: Arc<dyn Mailer>,
    verification_base_url: String,
    argon2: Argon2<'static>,
}

impl RegistrationHandler {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        mailer: Arc<dyn Mailer>,
        verification_base_url: impl Into<String>,
    ) -> Self {
        Self {
            accounts,
            mailer,
            verification_base_url: verification_base_url.into(),
            argon2: Argon2::default(),
        }
    }

    /// Override the Argon2 cost parameters.
    pub fn with_argon2_params(mut self, params: Params) -> Self {
        self.argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        self
    }

    fn verification_link(&self, token: &str) -> String {
        let separator = if self.verification_base_url.contains('?') { '&' } else { '?' };
        format!("{}{}token={}", self.verification_base_url, separator, token)
    }

    async fn hash_password(&self, password: &str) -> Result<String> {
        let argon2 = self.argon2.clone();
        let password = password.to_string();

        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| PortalError::password_hash(e.to_string()))
        })
        .await
        .map_err(|e| PortalError::password_hash(e.to_string()))?
    }

    async fn ensure_account(&self, ctx: &JobContext, request: &RegistrationRequest) -> Result<Account> {
        if let Some(existing) = self.accounts.find_by_username(&request.username).await? {
            if existing.created_by == ctx.job_id() {
                ctx.log_info("Reusing account created by an earlier attempt");
                return Ok(existing);
            }
            return Err(PortalError::username_taken(&request.username));
        }
        if self.accounts.email_exists(&request.email).await? {
            return Err(PortalError::email_taken());
        }

        let password_hash = self.hash_password(&request.password).await?;
        let account = self
            .accounts
            .insert(NewAccount {
                username: request.username.clone(),
                email: request.email.clone(),
                password_hash,
                created_by: ctx.job_id(),
            })
            .await?;

        RegistrationMetrics::account_created();
        tracing::info!(
            job_id = %ctx.job_id(),
            account_id = %account.id,
            username = %account.username,
            "Account created"
        );
        Ok(account)
    }
}

#[async_trait]
impl JobHandler<RegistrationRequest, RegistrationOutcome> for RegistrationHandler {
    fn name(&self) -> &'static str {
        "registration"
    }

    async fn handle(
        &self,
        ctx: &JobContext,
        request: &RegistrationRequest,
    ) -> std::result::Result<RegistrationOutcome, JobError> {
        let account = self.ensure_account(ctx, request).await?;

        let token = Uuid::new_v4().simple().to_string();
        self.accounts
            .set_verification_digest(account.id, token_digest(&token))
            .await?;

        let mail = VerificationMail {
            to: account.email.clone(),
            username: account.username.clone(),
            link: self.verification_link(&token),
        };
        let sent = self.mailer.send_verification(&mail).await;
        RegistrationMetrics::verification_mail(sent.is_ok());
        if sent.is_err() && ctx.is_last_attempt() {
            ctx.log_warn("Verification mail failed on the final attempt");
        }
        sent?;

        Ok(RegistrationOutcome {
            account_id: account.id,
            username: account.username,
            verification_sent: true,
        })
    }
}
