//! Email domain types.
//!
//! The subset of a message the engine needs to evaluate rules and
//! cleanup skip filters. Fetching and rendering live elsewhere.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EmailId, ThreadId};

/// An inbound email message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Email {
    /// Provider message id.
    pub id: EmailId,
    pub thread_id: ThreadId,
    pub from: Address,
    pub to: Vec<Address>,
    #[serde(default)]
    pub cc: Vec<Address>,
    pub subject: Option<String>,
    /// Decoded text body; `None` when only the snippet was fetched.
    pub body_text: Option<String>,
    /// Provider preview text.
    #[serde(default)]
    pub snippet: String,
    /// Sent time, used for cleanup age cut-offs.
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
    /// Starred or flagged.
    #[serde(default)]
    pub is_starred: bool,
    /// Whether this message is a reply inside an existing thread.
    #[serde(default)]
    pub is_thread_reply: bool,
    /// Whether the user has replied somewhere in this thread.
    #[serde(default)]
    pub has_user_reply: bool,
    /// Label names as the provider reports them.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Email {
    /// Lower-cased sender address, the identity used for sender lookups.
    pub fn sender(&self) -> String {
        self.from.email.trim().to_lowercase()
    }

    /// Body text, falling back to the snippet when no body was fetched.
    pub fn body(&self) -> &str {
        self.body_text.as_deref().unwrap_or(&self.snippet)
    }

    /// Renders the message as plain text for AI prompts.
    pub fn to_prompt_text(&self) -> String {
        let to = self
            .to
            .iter()
            .map(Address::display)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "From: {}\nTo: {}\nSubject: {}\n\n{}",
            self.from.display(),
            to,
            self.subject.as_deref().unwrap_or(""),
            self.body()
        )
    }

    /// Whether any attachment is a real file rather than an inline image.
    pub fn has_file_attachment(&self) -> bool {
        self.attachments.iter().any(|a| !a.is_inline)
    }
}

/// A mailbox, optionally with the display name from the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub email: String,
    pub name: Option<String>,
}

impl Address {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    pub fn with_name(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: Some(name.into()),
        }
    }

    /// "Name <email>" when a name is present, otherwise just the email.
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// Attachment metadata; content is never fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    /// Inline parts such as embedded images.
    #[serde(default)]
    pub is_inline: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Email {
        Email {
            id: EmailId::from("m1"),
            thread_id: ThreadId::from("t1"),
            from: Address::with_name("News@Example.com ", "Example News"),
            to: vec![Address::new("me@example.com")],
            cc: vec![],
            subject: Some("Weekly digest".to_string()),
            body_text: None,
            snippet: "This week in review".to_string(),
            date: Utc::now(),
            is_read: false,
            is_starred: false,
            is_thread_reply: false,
            has_user_reply: false,
            labels: vec![],
            attachments: vec![],
        }
    }

    #[test]
    fn sender_is_normalized() {
        assert_eq!(sample().sender(), "news@example.com");
    }

    #[test]
    fn body_falls_back_to_snippet() {
        let email = sample();
        assert_eq!(email.body(), "This week in review");
    }

    #[test]
    fn prompt_text_contains_headers() {
        let text = sample().to_prompt_text();
        assert!(text.contains("From: Example News <News@Example.com >"));
        assert!(text.contains("Subject: Weekly digest"));
    }

    #[test]
    fn inline_attachments_do_not_count() {
        let mut email = sample();
        email.attachments.push(Attachment {
            filename: "logo.png".to_string(),
            content_type: "image/png".to_string(),
            is_inline: true,
        });
        assert!(!email.has_file_attachment());

        email.attachments.push(Attachment {
            filename: "report.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            is_inline: false,
        });
        assert!(email.has_file_attachment());
    }
}
