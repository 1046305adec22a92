//! Outgoing email.
//!
//! The delivery pipeline only sees the [`Mailer`] trait. [`SmtpMailer`] talks
//! to a real relay via `lettre`; [`LogMailer`] just traces what would have been
//! sent; [`RecordingMailer`] keeps messages in memory and can be told to fail.

mod recording;
mod smtp;

pub use recording::RecordingMailer;
pub use smtp::{SmtpConfig, SmtpMailer};

use async_trait::async_trait;
use thiserror::Error;

use workhub_reports::EmailAddress;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailError {
    #[error("missing required config: {0}")]
    MissingConfig(String),

    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    #[error("failed to build message: {0}")]
    Build(String),

    /// The relay may accept the message later (timeouts, 4xx replies).
    #[error("transient SMTP failure: {0}")]
    Transient(String),

    /// The relay rejected the message outright (5xx replies).
    #[error("permanent SMTP failure: {0}")]
    Permanent(String),
}

impl MailError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, MailError::Transient(_))
    }
}

/// A file attached to an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: EmailAddress,
    pub to_name: Option<String>,
    pub subject: String,
    pub text_body: String,
    pub attachments: Vec<Attachment>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

/// Mailer that only logs. Used when no SMTP relay is configured.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            attachments = email.attachments.len(),
            "email send skipped (no SMTP relay configured)"
        );
        Ok(())
    }
}
