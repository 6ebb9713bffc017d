//! Rule evaluation.
//!
//! [`RuleEngine::evaluate`] walks the rules in the order given and returns
//! the first one whose conditions hold. Evaluation never touches the mailbox;
//! the only outbound call is the classifier for AI conditions.

use std::sync::Arc;

use crate::config::AiFailurePolicy;
use crate::domain::{CategoryFilterType, Condition, Email, LogicalOperator, Rule, StaticCondition};
use crate::providers::ai::{parse_yes_no, AiClassifier};

const AI_CONDITION_PROMPT: &str = "You decide whether an email satisfies a user's condition. \
Read the email and the condition, then answer with exactly one word: YES or NO.";

/// Per-email facts the engine needs but does not look up itself.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    /// Name of the category currently assigned to the sender.
    pub sender_category: Option<String>,
}

impl EvaluationContext {
    pub fn with_category(name: impl Into<String>) -> Self {
        Self {
            sender_category: Some(name.into()),
        }
    }
}

/// Outcome of evaluating an email against a rule list.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation<'a> {
    Match(&'a Rule),
    NoMatch,
}

impl<'a> Evaluation<'a> {
    pub fn matched(&self) -> Option<&'a Rule> {
        match self {
            Evaluation::Match(rule) => Some(rule),
            Evaluation::NoMatch => None,
        }
    }
}

/// Stateless rule evaluator. Safe to share across tasks.
#[derive(Clone)]
pub struct RuleEngine {
    classifier: Arc<dyn AiClassifier>,
    policy: AiFailurePolicy,
}

impl RuleEngine {
    pub fn new(classifier: Arc<dyn AiClassifier>) -> Self {
        Self {
            classifier,
            policy: AiFailurePolicy::default(),
        }
    }

    pub fn with_failure_policy(mut self, policy: AiFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns the first rule, in list order, that matches `email`.
    pub async fn evaluate<'a>(
        &self,
        email: &Email,
        rules: &'a [Rule],
        context: &EvaluationContext,
    ) -> Evaluation<'a> {
        for rule in rules {
            if email.is_thread_reply && !rule.run_on_threads {
                tracing::debug!(rule_id = %rule.id, "rule skipped for thread reply");
                continue;
            }
            if self.rule_matches(email, rule, context).await {
                tracing::debug!(email_id = %email.id, rule_id = %rule.id, "rule matched");
                return Evaluation::Match(rule);
            }
        }
        Evaluation::NoMatch
    }

    /// Combines one rule's conditions with its operator.
    ///
    /// Static and category conditions are decided first; the AI is only
    /// consulted when their results leave the outcome open.
    pub async fn rule_matches(
        &self,
        email: &Email,
        rule: &Rule,
        context: &EvaluationContext,
    ) -> bool {
        let mut local = Vec::with_capacity(rule.conditions.len());
        let mut ai = Vec::new();
        for condition in &rule.conditions {
            match condition {
                Condition::Static(patterns) => local.push(static_matches(patterns, email)),
                Condition::Category {
                    filter_type,
                    categories,
                } => local.push(category_matches(
                    *filter_type,
                    categories,
                    context.sender_category.as_deref(),
                )),
                Condition::Ai { instructions } => ai.push(instructions.as_deref()),
            }
        }

        match rule.operator {
            LogicalOperator::And if local.iter().any(|r| !r) => return false,
            LogicalOperator::Or if local.iter().any(|r| *r) => return true,
            _ => {}
        }

        let mut results = local;
        for instructions in ai {
            let result = self
                .ai_matches(email, rule, instructions.or(rule.instructions.as_deref()))
                .await;
            results.push(result);
        }
        rule.operator.combine(results)
    }

    async fn ai_matches(&self, email: &Email, rule: &Rule, instructions: Option<&str>) -> bool {
        let Some(condition) = instructions.filter(|i| !i.trim().is_empty()) else {
            tracing::warn!(rule_id = %rule.id, "AI condition has no instructions");
            return false;
        };

        let prompt = format!("{}\n\nCondition: {}", AI_CONDITION_PROMPT, condition.trim());
        match self.classifier.classify(&email.to_prompt_text(), &prompt).await {
            Ok(verdict) => match parse_yes_no(&verdict) {
                Some(result) => result,
                None => {
                    tracing::warn!(
                        rule_id = %rule.id,
                        email_id = %email.id,
                        verdict = %verdict,
                        "unreadable AI verdict"
                    );
                    self.on_failure()
                }
            },
            Err(e) => {
                tracing::warn!(
                    rule_id = %rule.id,
                    email_id = %email.id,
                    error = %e,
                    policy = ?self.policy,
                    "AI condition failed"
                );
                self.on_failure()
            }
        }
    }

    fn on_failure(&self) -> bool {
        matches!(self.policy, AiFailurePolicy::FailOpen)
    }
}

/// Every configured pattern must match its field. No patterns means no match.
pub fn static_matches(condition: &StaticCondition, email: &Email) -> bool {
    if !condition.has_patterns() {
        return false;
    }

    let to = email
        .to
        .iter()
        .map(|a| a.display())
        .collect::<Vec<_>>()
        .join(", ");
    let fields = [
        (&condition.from, email.from.display()),
        (&condition.to, to),
        (&condition.subject, email.subject.clone().unwrap_or_default()),
        (&condition.body, email.body().to_string()),
    ];

    fields.iter().all(|(pattern, value)| match pattern.as_deref() {
        Some(pattern) if !pattern.trim().is_empty() => pattern_matches(pattern, value),
        _ => true,
    })
}

/// Case-insensitive match of `value` against a pattern.
///
/// `|` separates alternatives; `*` inside an alternative matches any run of
/// characters. An alternative without `*` is a substring test.
pub fn pattern_matches(pattern: &str, value: &str) -> bool {
    let value = value.to_lowercase();
    pattern
        .split('|')
        .map(|alt| alt.trim().to_lowercase())
        .filter(|alt| !alt.is_empty())
        .any(|alt| glob_contains(&alt, &value))
}

fn glob_contains(pattern: &str, value: &str) -> bool {
    if !pattern.contains('*') {
        return value.contains(pattern);
    }
    let mut pos = 0;
    for part in pattern.split('*').filter(|p| !p.is_empty()) {
        match value[pos..].find(part) {
            Some(idx) => pos += idx + part.len(),
            None => return false,
        }
    }
    true
}

/// INCLUDE holds iff the sender's category is listed; EXCLUDE iff it is not.
/// A sender without a category is in no list.
pub fn category_matches(
    filter_type: CategoryFilterType,
    categories: &[String],
    sender_category: Option<&str>,
) -> bool {
    let listed = sender_category.is_some_and(|name| {
        let name = name.trim().to_lowercase();
        categories.iter().any(|c| c.trim().to_lowercase() == name)
    });
    match filter_type {
        CategoryFilterType::Include => listed,
        CategoryFilterType::Exclude => !listed,
    }
}
