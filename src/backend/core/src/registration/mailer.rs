//! Verification mail delivery.

use async_trait::async_trait;

use crate::error::Result;

/// A verification mail ready to send.
#[derive(Debug, Clone)]
pub struct VerificationMail {
    pub to: String,
    pub username: String,
    pub link: String,
}

impl VerificationMail {
    /// The link with its token value masked, safe for logs.
    pub fn redacted_link(&self) -> String {
        match self.link.split_once("token=") {
            Some((base, rest)) => {
                let tail = rest.find('&').map_or("", |at| &rest[at..]);
                format!("{}token=***{}", base, tail)
            }
            None => self.link.clone(),
        }
    }
}

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send_verification(&self, mail: &VerificationMail) -> Result<()>;
}

/// Mailer that writes verification mails to the log.
#[derive(Debug, Clone)]
pub struct LogMailer {
    sender: String,
}

impl LogMailer {
    pub fn new(sender: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send_verification(&self, mail: &VerificationMail) -> Result<()> {
        tracing::info!(
            from = %self.sender,
            to = %mail.to,
            username = %mail.username,
            link = %mail.redacted_link(),
            "Verification mail sent"
        );
        tracing::debug!(to = %mail.to, link = %mail.link, "Verification link");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_ok, block_on};

    #[test]
    fn test_log_mailer_accepts_mail() {
        let mailer = LogMailer::new("no-reply@portal.test");
        let mail = VerificationMail {
            to: "alice@example.com".into(),
            username: "alice".into(),
            link: "http://portal.test/verify?token=abc".into(),
        };
        assert_ok!(block_on(mailer.send_verification(&mail)));
    }

    #[test]
    fn test_redacted_link_hides_token() {
        let mut mail = VerificationMail {
            to: "alice@example.com".into(),
            username: "alice".into(),
            link: "http://portal.test/verify?token=abc123".into(),
        };
        assert_eq!(mail.redacted_link(), "http://portal.test/verify?token=***");

        mail.link = "http://portal.test/verify?lang=en&token=abc123&src=mail".into();
        assert_eq!(
            mail.redacted_link(),
            "http://portal.test/verify?lang=en&token=***&src=mail"
        );
        assert!(!mail.redacted_link().contains("abc123"));
    }
}
