//! One-shot batch categorization.
//!
//! [`FastCategorizer`] asks the classifier about many senders in a single
//! call. It is all-or-nothing: a failed or unreadable answer fails the whole
//! batch. Results are only stored by an explicit [`FastCategorizer::apply`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use thiserror::Error;

use crate::domain::{resolve_category, CategorizationState, Category};
use crate::providers::ai::{strip_code_fence, AiClassifier, LlmError};

use super::category_service::{CategoryError, CategoryStorage};

/// Errors from a batch categorization.
#[derive(Debug, Error)]
pub enum CategorizeError {
    #[error("classifier failed: {0}")]
    Ai(#[from] LlmError),

    #[error("invalid classifier response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Storage(#[from] CategoryError),
}

/// Result type for batch categorization.
pub type Result<T> = std::result::Result<T, CategorizeError>;

/// Address to category name; `None` when no known category matched.
pub type Categorization = BTreeMap<String, Option<String>>;

pub struct FastCategorizer {
    classifier: Arc<dyn AiClassifier>,
    storage: Arc<dyn CategoryStorage>,
}

impl FastCategorizer {
    pub fn new(classifier: Arc<dyn AiClassifier>, storage: Arc<dyn CategoryStorage>) -> Self {
        Self {
            classifier,
            storage,
        }
    }

    /// Classifies every address in one call.
    ///
    /// Every input address appears in the result. Names are resolved
    /// against the known categories ignoring case.
    pub async fn classify<S: AsRef<str>>(&self, addresses: &[S]) -> Result<Categorization> {
        let addresses: Vec<&str> = addresses
            .iter()
            .map(|a| a.as_ref().trim())
            .filter(|a| !a.is_empty())
            .collect();
        if addresses.is_empty() {
            return Ok(Categorization::new());
        }

        let categories = self.storage.list_categories().await?;
        let verdict = self
            .classifier
            .classify(&addresses.join("\n"), &batch_prompt(&categories))
            .await?;
        let answers = parse_answers(&verdict)?;

        let result: Categorization = addresses
            .iter()
            .map(|address| {
                let category = answers
                    .get(&address.to_lowercase())
                    .and_then(|name| resolve_category(&categories, name))
                    .map(|c| c.name.clone());
                (address.to_string(), category)
            })
            .collect();

        tracing::info!(
            senders = result.len(),
            matched = result.values().filter(|c| c.is_some()).count(),
            "fast categorization completed"
        );
        Ok(result)
    }

    /// Stores the resolved assignments. Unmatched senders are left as they
    /// were. Returns the number of senders assigned.
    pub async fn apply(&self, results: &Categorization) -> Result<usize> {
        let categories = self.storage.list_categories().await?;
        let mut assigned = 0;
        for (address, name) in results {
            let Some(category) = name
                .as_deref()
                .and_then(|name| resolve_category(&categories, name))
            else {
                continue;
            };
            self.storage
                .assign_category(
                    &address.to_lowercase(),
                    Some(&category.id),
                    CategorizationState::Categorized,
                )
                .await?;
            assigned += 1;
        }
        Ok(assigned)
    }
}

fn batch_prompt(categories: &[Category]) -> String {
    let names = categories
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Each line of the input is a sender email address. Assign each sender one of these \
         categories: {}. Respond with a JSON object mapping every address to a category \
         name, or null when unsure. Respond with JSON only.",
        names
    )
}

/// Reads the JSON object answer, keyed by lower-cased address.
/// Non-string values count as no answer.
fn parse_answers(verdict: &str) -> Result<HashMap<String, String>> {
    let value: serde_json::Value = serde_json::from_str(strip_code_fence(verdict))
        .map_err(|e| CategorizeError::InvalidResponse(e.to_string()))?;
    let object = value
        .as_object()
        .ok_or_else(|| CategorizeError::InvalidResponse("expected a JSON object".to_string()))?;
    Ok(object
        .iter()
        .filter_map(|(address, name)| {
            name.as_str()
                .map(|name| (address.trim().to_lowercase(), name.to_string()))
        })
        .collect())
}
