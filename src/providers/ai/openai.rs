//! Chat-completions client.
//!
//! Works with OpenAI, Ollama's `/v1` endpoint, vLLM, LM Studio and other
//! servers that speak the chat-completions protocol.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::traits::{
    CompletionRequest, CompletionResponse, LlmError, LlmProvider, LlmResult, Message, Role,
};

/// Hosted OpenAI endpoint, used when no base URL is configured.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

impl<'a> From<&'a Message> for ChatMessage<'a> {
    fn from(msg: &'a Message) -> Self {
        Self {
            role: match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &msg.content,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    code: Option<String>,
}

/// Provider for OpenAI-compatible chat-completion APIs.
pub struct OpenAiCompatibleProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatibleProvider {
    /// Creates a provider for OpenAI's hosted API.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::custom(OPENAI_BASE_URL, Some(api_key.into()), model)
    }

    /// Creates a provider for a custom endpoint.
    pub fn custom(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        }
    }

    /// Rebuilds the HTTP client with a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> LlmResult<Self> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn error_from_response(response: reqwest::Response) -> LlmError {
        let status = response.status().as_u16();
        if status == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|header| header.to_str().ok()?.parse().ok());
            return LlmError::RateLimited { retry_after_secs };
        }

        match response.json::<ApiErrorBody>().await {
            Ok(body)
                if status == 401 || body.error.code.as_deref() == Some("invalid_api_key") =>
            {
                LlmError::Authentication(body.error.message)
            }
            Ok(body) => LlmError::Api {
                status,
                message: body.error.message,
            },
            Err(_) => LlmError::Api {
                status,
                message: "response carried no error body".to_string(),
            },
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse> {
        let system = request.system_prompt.as_deref().map(|content| ChatMessage {
            role: "system",
            content,
        });
        let body = ChatRequest {
            model: &self.model,
            messages: system
                .into_iter()
                .chain(request.messages.iter().map(ChatMessage::from))
                .collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut builder = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Http(e)
            }
        })?;
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("undecodable completion: {}", e)))?;
        tracing::trace!(model = %self.model, choices = parsed.choices.len(), "completion received");

        let text = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("completion had no choices".to_string()))?
            .message
            .content
            .unwrap_or_default();

        Ok(CompletionResponse {
            text,
            total_tokens: parsed.usage.map(|u| u.total_tokens),
        })
    }
}
