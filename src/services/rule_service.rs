//! Rule management.
//!
//! CRUD over user rules. Every write runs [`Rule::validate`] first, so a
//! malformed rule is rejected before it reaches storage.

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::domain::{Rule, RuleDraft, RuleId, RuleViolation};

/// Errors that can occur during rule operations.
#[derive(Debug, Error)]
pub enum RuleError {
    /// A field is malformed.
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Condition/action lists break the rule invariants.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rule not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<RuleViolation> for RuleError {
    fn from(violation: RuleViolation) -> Self {
        match violation {
            RuleViolation::Field { field, message } => RuleError::Validation { field, message },
            RuleViolation::Conflict(message) => RuleError::Conflict(message),
        }
    }
}

/// Result type for rule operations.
pub type Result<T> = std::result::Result<T, RuleError>;

/// Storage trait for rule persistence.
#[async_trait]
pub trait RuleStorage: Send + Sync {
    /// All rules in evaluation order.
    async fn list_rules(&self) -> Result<Vec<Rule>>;

    async fn get_rule(&self, id: &RuleId) -> Result<Option<Rule>>;

    /// Inserts or replaces a rule. New rules are appended to the order.
    async fn save_rule(&self, rule: &Rule) -> Result<()>;

    async fn delete_rule(&self, id: &RuleId) -> Result<()>;

    /// Makes `ids` the evaluation order.
    async fn reorder_rules(&self, ids: &[RuleId]) -> Result<()>;
}

/// Service for managing rules.
pub struct RuleService<S: RuleStorage> {
    storage: S,
}

impl<S: RuleStorage> RuleService<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Validates and stores a new rule.
    pub async fn create(&self, draft: RuleDraft) -> Result<Rule> {
        let rule = draft.into_rule(RuleId::generate());
        rule.validate()?;
        self.storage.save_rule(&rule).await?;
        tracing::info!(rule_id = %rule.id, name = %rule.name, "rule created");
        Ok(rule)
    }

    /// Replaces an existing rule's definition, keeping its id and creation time.
    pub async fn update(&self, id: &RuleId, draft: RuleDraft) -> Result<Rule> {
        let existing = self.get(id).await?;
        let mut rule = draft.into_rule(id.clone());
        rule.created_at = existing.created_at;
        rule.validate()?;
        self.storage.save_rule(&rule).await?;
        Ok(rule)
    }

    /// Replaces only the free-text instructions.
    pub async fn update_instructions(&self, id: &RuleId, instructions: &str) -> Result<Rule> {
        let mut rule = self.get(id).await?;
        let trimmed = instructions.trim();
        rule.instructions = (!trimmed.is_empty()).then(|| trimmed.to_string());
        rule.updated_at = Utc::now();
        self.storage.save_rule(&rule).await?;
        Ok(rule)
    }

    pub async fn get(&self, id: &RuleId) -> Result<Rule> {
        self.storage
            .get_rule(id)
            .await?
            .ok_or_else(|| RuleError::NotFound(id.to_string()))
    }

    /// All rules in evaluation order.
    pub async fn list(&self) -> Result<Vec<Rule>> {
        self.storage.list_rules().await
    }

    pub async fn delete(&self, id: &RuleId) -> Result<()> {
        self.get(id).await?;
        self.storage.delete_rule(id).await
    }

    /// Sets the evaluation order. `ids` must name every rule exactly once.
    pub async fn reorder(&self, ids: &[RuleId]) -> Result<Vec<Rule>> {
        let rules = self.storage.list_rules().await?;
        let mut current: Vec<&str> = rules.iter().map(|r| r.id.as_str()).collect();
        current.sort_unstable();

        let mut requested: Vec<&str> = ids.iter().map(RuleId::as_str).collect();
        requested.sort_unstable();
        if current != requested {
            return Err(RuleError::Conflict(
                "reorder must list every rule exactly once".to_string(),
            ));
        }

        self.storage.reorder_rules(ids).await?;
        tracing::debug!(count = ids.len(), "rules reordered");
        self.storage.list_rules().await
    }
}
