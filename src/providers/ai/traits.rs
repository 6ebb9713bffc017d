//! Completion-provider seam beneath the classifier.
//!
//! Only single-shot completions are needed: every prompt the engine sends
//! expects a short verdict back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("unexpected completion payload: {0}")]
    InvalidResponse(String),

    #[error("rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("API key rejected: {0}")]
    Authentication(String),

    #[error("completion timed out")]
    Timeout,

    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl LlmError {
    /// Whether retrying the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_timeout() || e.is_connect(),
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::RateLimited { .. } | LlmError::Timeout | LlmError::Unavailable(_) => true,
            LlmError::InvalidResponse(_) | LlmError::Authentication(_) => false,
        }
    }
}

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// One completion call. The system prompt, when set, is sent ahead of
/// `messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    /// Verdicts should be deterministic, so this defaults to zero.
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            system_prompt: None,
            messages,
            temperature: 0.0,
            max_tokens: None,
        }
    }

    pub fn with_system_prompt(self, prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(prompt.into()),
            ..self
        }
    }

    pub fn with_temperature(self, temperature: f32) -> Self {
        Self {
            temperature,
            ..self
        }
    }

    pub fn with_max_tokens(self, max_tokens: Option<usize>) -> Self {
        Self { max_tokens, ..self }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    /// Token usage, when the provider reports it.
    pub total_tokens: Option<usize>,
}

/// A chat-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short backend name for logs, e.g. `openai`.
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_request_builder() {
        let request = CompletionRequest::new(vec![Message::user("Test")])
            .with_system_prompt("Be terse")
            .with_temperature(0.2)
            .with_max_tokens(Some(64));

        assert_eq!(request.system_prompt.as_deref(), Some("Be terse"));
        assert_eq!(request.temperature, 0.2);
        assert_eq!(request.max_tokens, Some(64));
        assert_eq!(request.messages[0].role, Role::User);
    }

    #[test]
    fn transient_classification() {
        assert!(LlmError::RateLimited {
            retry_after_secs: Some(3)
        }
        .is_transient());
        assert!(LlmError::Api {
            status: 503,
            message: "overloaded".to_string()
        }
        .is_transient());
        assert!(!LlmError::Api {
            status: 400,
            message: "bad".to_string()
        }
        .is_transient());
        assert!(!LlmError::Authentication("nope".to_string()).is_transient());
    }
}
