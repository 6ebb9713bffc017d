//! The classification capability the engine consumes.
//!
//! Everything AI-shaped in the engine (condition checks, sender categories,
//! generated reply text) goes through the single [`AiClassifier::classify`]
//! call: free text in, instructions alongside, a textual verdict out.

use async_trait::async_trait;

use super::traits::{CompletionRequest, LlmProvider, LlmResult, Message};

/// `classify(text, instructions) -> verdict`.
#[async_trait]
pub trait AiClassifier: Send + Sync {
    async fn classify(&self, text: &str, instructions: &str) -> LlmResult<String>;
}

/// Adapts any [`LlmProvider`] into an [`AiClassifier`].
///
/// The instructions become the system prompt and the text the single user
/// message; the trimmed completion text is the verdict.
pub struct LlmClassifier<P> {
    provider: P,
    temperature: f32,
    max_tokens: Option<usize>,
}

impl<P: LlmProvider> LlmClassifier<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            temperature: 0.0,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<usize>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl<P: LlmProvider> AiClassifier for LlmClassifier<P> {
    async fn classify(&self, text: &str, instructions: &str) -> LlmResult<String> {
        let request = CompletionRequest::new(vec![Message::user(text)])
            .with_system_prompt(instructions)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        let response = self.provider.complete(&request).await?;
        tracing::debug!(
            provider = self.provider.name(),
            model = self.provider.model(),
            tokens = ?response.total_tokens,
            "classification completed"
        );
        Ok(response.text.trim().to_string())
    }
}

/// Reads a yes/no verdict. Returns `None` when the answer is neither.
pub fn parse_yes_no(verdict: &str) -> Option<bool> {
    let first = verdict
        .split_whitespace()
        .next()?
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    match first.as_str() {
        "yes" | "true" | "match" => Some(true),
        "no" | "false" => Some(false),
        _ => None,
    }
}

/// Strips a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_code_fence(verdict: &str) -> &str {
    let trimmed = verdict.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().trim_end_matches("```").trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ai::traits::{CompletionResponse, Role};
    use std::sync::Mutex;

    struct EchoProvider {
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        fn model(&self) -> &str {
            "echo-1"
        }

        async fn complete(&self, request: &CompletionRequest) -> LlmResult<CompletionResponse> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(CompletionResponse {
                text: "  Yes.  \n".to_string(),
                total_tokens: Some(3),
            })
        }
    }

    #[tokio::test]
    async fn llm_classifier_uses_instructions_as_system_prompt() {
        let classifier = LlmClassifier::new(EchoProvider {
            seen: Mutex::new(Vec::new()),
        });

        let verdict = classifier
            .classify("email body", "Is this a newsletter?")
            .await
            .unwrap();
        assert_eq!(verdict, "Yes.");

        let seen = classifier.provider.seen.lock().unwrap();
        assert_eq!(
            seen[0].system_prompt.as_deref(),
            Some("Is this a newsletter?")
        );
        assert_eq!(seen[0].messages[0].role, Role::User);
        assert_eq!(seen[0].messages[0].content, "email body");
    }

    #[test]
    fn yes_no_parsing() {
        assert_eq!(parse_yes_no("Yes"), Some(true));
        assert_eq!(parse_yes_no("no, it is personal"), Some(false));
        assert_eq!(parse_yes_no("**TRUE**"), Some(true));
        assert_eq!(parse_yes_no("maybe"), None);
        assert_eq!(parse_yes_no(""), None);
    }

    #[test]
    fn code_fence_is_stripped() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
    }
}
