//! AI/LLM provider implementations.
//!
//! The engine only ever talks to [`AiClassifier`]; [`LlmClassifier`] adapts
//! any [`LlmProvider`] to it.
//!
//! # Example
//!
//! ```rust,no_run
//! use mailsort::providers::ai::{AiClassifier, LlmClassifier, OpenAiCompatibleProvider};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provider = OpenAiCompatibleProvider::openai("sk-...", "gpt-4o-mini");
//! let classifier = LlmClassifier::new(provider);
//!
//! let verdict = classifier
//!     .classify("Subject: 50% off everything", "Answer yes or no: is this marketing?")
//!     .await?;
//! println!("{}", verdict);
//! # Ok(())
//! # }
//! ```

mod classifier;
mod openai;
mod traits;

pub use classifier::{parse_yes_no, strip_code_fence, AiClassifier, LlmClassifier};
pub use openai::{OpenAiCompatibleProvider, OPENAI_BASE_URL};
pub use traits::{
    CompletionRequest, CompletionResponse, LlmError, LlmProvider, LlmResult, Message, Role,
};
