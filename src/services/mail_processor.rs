//! Per-message pipeline: evaluate rules, then act.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::domain::{CategorizationState, Email, RuleId};

use super::action_executor::{ActionExecutor, ExecutionReport, ExecutorError};
use super::categorization_queue::SenderCategorizationQueue;
use super::category_service::{CategoryError, CategoryStorage};
use super::rule_engine::{EvaluationContext, RuleEngine};
use super::rule_service::{RuleError, RuleStorage};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Rules(#[from] RuleError),

    #[error(transparent)]
    Categories(#[from] CategoryError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// What happened to an incoming message.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ProcessOutcome {
    NoMatch,
    /// The matching rule is not automated; its actions wait for the user.
    AwaitingApproval { rule_id: RuleId, rule_name: String },
    Executed(ExecutionReport),
}

pub struct MailProcessor {
    rules: Arc<dyn RuleStorage>,
    categories: Arc<dyn CategoryStorage>,
    engine: RuleEngine,
    executor: ActionExecutor,
    queue: Option<Arc<SenderCategorizationQueue>>,
}

impl MailProcessor {
    pub fn new(
        rules: Arc<dyn RuleStorage>,
        categories: Arc<dyn CategoryStorage>,
        engine: RuleEngine,
        executor: ActionExecutor,
    ) -> Self {
        Self {
            rules,
            categories,
            engine,
            executor,
            queue: None,
        }
    }

    /// Queue senders without a category as their mail arrives.
    pub fn with_auto_categorize(mut self, queue: Arc<SenderCategorizationQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub async fn process(&self, email: &Email) -> Result<ProcessOutcome> {
        let rules = self.rules.list_rules().await?;
        let sender = email.sender();
        let category = self.categories.sender_category(&sender).await?;

        if category.is_none() {
            self.note_sender(&sender).await?;
        }

        let context = EvaluationContext {
            sender_category: category.map(|c| c.name),
        };
        let Some(rule) = self.engine.evaluate(email, &rules, &context).await.matched() else {
            tracing::debug!(email_id = %email.id, "no rule matched");
            return Ok(ProcessOutcome::NoMatch);
        };

        if !rule.automate {
            tracing::info!(email_id = %email.id, rule_id = %rule.id, "match awaiting approval");
            return Ok(ProcessOutcome::AwaitingApproval {
                rule_id: rule.id.clone(),
                rule_name: rule.name.clone(),
            });
        }

        let report = self.executor.execute(email, rule).await?;
        tracing::info!(
            email_id = %email.id,
            rule_id = %rule.id,
            executed = report.executed(),
            failed = report.failures().count(),
            "rule applied"
        );
        Ok(ProcessOutcome::Executed(report))
    }

    /// Runs a rule the user approved for `email`.
    pub async fn approve(&self, email: &Email, rule_id: &RuleId) -> Result<ExecutionReport> {
        let rule = self
            .rules
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| RuleError::NotFound(rule_id.to_string()))?;
        Ok(self.executor.execute(email, &rule).await?)
    }

    /// Records a sender the first time it is seen and queues it for
    /// categorization when auto-categorize is on.
    async fn note_sender(&self, sender: &str) -> Result<()> {
        let state = match self.categories.get_sender(sender).await? {
            Some(known) => known.state,
            None => {
                self.categories
                    .set_sender_state(sender, CategorizationState::Uncategorized)
                    .await?;
                CategorizationState::Uncategorized
            }
        };
        if let (Some(queue), CategorizationState::Uncategorized) = (&self.queue, state) {
            queue.push([sender]).await?;
        }
        Ok(())
    }
}
