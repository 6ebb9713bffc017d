//! Mail provider trait definition.
//!
//! [`MailProvider`] is everything the engine asks of a mailbox backend:
//! the side-effecting actions rules can take, a paged listing of old
//! messages for cleanup, and a small sample of a sender's mail for
//! categorization. Gmail/IMAP clients implement it outside this crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Email, EmailId};

/// Result type alias for mail provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Errors that can occur during mail provider operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Authentication failed or credentials expired.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Network or connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        /// Seconds to wait before retrying, if known.
        retry_after_secs: Option<u64>,
    },

    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid request or parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The remote end answered with an HTTP status.
    #[error("provider returned status {status}: {message}")]
    Status { status: u16, message: String },
}

impl ProviderError {
    /// Transient errors may succeed on retry; 4xx-class errors never will.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Connection(_) | ProviderError::RateLimited { .. } => true,
            ProviderError::Status { status, .. } => *status >= 500 || *status == 429,
            ProviderError::Authentication(_)
            | ProviderError::NotFound(_)
            | ProviderError::InvalidRequest(_) => false,
        }
    }

    /// Server-suggested delay before retrying, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

/// One page of messages, oldest first.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub messages: Vec<Email>,
    /// Token for the following page; `None` at end of data.
    pub next_page_token: Option<String>,
}

/// Body posted to a rule's webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub email_id: String,
    pub thread_id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub from: String,
    pub subject: Option<String>,
    pub snippet: String,
}

/// Outgoing message for [`MailProvider::send_email`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingEmail {
    pub to: String,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub subject: String,
    pub content: String,
}

/// Capability interface over a user's mailbox.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Removes the message from the inbox.
    async fn archive(&self, id: &EmailId) -> Result<()>;

    async fn mark_read(&self, id: &EmailId) -> Result<()>;

    async fn mark_spam(&self, id: &EmailId) -> Result<()>;

    /// Applies a label by name, creating it if necessary.
    async fn label(&self, id: &EmailId, name: &str) -> Result<()>;

    async fn forward(&self, id: &EmailId, to: &str) -> Result<()>;

    async fn reply(&self, id: &EmailId, content: &str) -> Result<()>;

    async fn send_email(&self, email: &OutgoingEmail) -> Result<()>;

    /// Saves a draft reply to the message without sending it.
    async fn draft_email(&self, id: &EmailId, content: &str) -> Result<()>;

    async fn call_webhook(&self, url: &str, payload: &WebhookPayload) -> Result<()>;

    /// Lists inbox messages dated before `cutoff`, oldest first.
    async fn list_messages_before(
        &self,
        cutoff: DateTime<Utc>,
        page_token: Option<String>,
        limit: u32,
    ) -> Result<MessagePage>;

    /// A handful of recent messages from `address`, newest first.
    async fn recent_from_sender(&self, address: &str, limit: u32) -> Result<Vec<Email>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(ProviderError::Connection("reset".to_string()).is_transient());
        assert!(ProviderError::RateLimited {
            retry_after_secs: Some(2)
        }
        .is_transient());
        assert!(ProviderError::Status {
            status: 502,
            message: "bad gateway".to_string()
        }
        .is_transient());
    }

    #[test]
    fn permanent_errors() {
        assert!(!ProviderError::Status {
            status: 404,
            message: "gone".to_string()
        }
        .is_transient());
        assert!(!ProviderError::InvalidRequest("bad address".to_string()).is_transient());
        assert!(!ProviderError::Authentication("expired".to_string()).is_transient());
    }

    #[test]
    fn retry_after_only_for_rate_limits() {
        assert_eq!(
            ProviderError::RateLimited {
                retry_after_secs: Some(7)
            }
            .retry_after_secs(),
            Some(7)
        );
        assert_eq!(
            ProviderError::Connection("x".to_string()).retry_after_secs(),
            None
        );
    }
}
