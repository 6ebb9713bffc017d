//! Rule domain types.
//!
//! A rule pairs a set of conditions (combined with AND/OR) with the actions
//! to run when an email satisfies them. Structural invariants are checked by
//! [`Rule::validate`] before a rule is ever persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use super::RuleId;

/// A user-defined automation rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier for this rule.
    pub id: RuleId,
    /// Human readable name.
    pub name: String,
    /// Free-text instructions used as context for AI-generated fields.
    pub instructions: Option<String>,
    /// Optional grouping reference.
    pub group_id: Option<String>,
    /// Conditions, at most one per [`ConditionType`].
    pub conditions: Vec<Condition>,
    /// Actions executed when the rule matches.
    pub actions: Vec<Action>,
    /// How condition results are combined.
    #[serde(default)]
    pub operator: LogicalOperator,
    /// Whether matches run without user approval.
    #[serde(default)]
    pub automate: bool,
    /// Whether the rule applies to replies inside existing threads.
    #[serde(default)]
    pub run_on_threads: bool,
    /// When this rule was created.
    pub created_at: DateTime<Utc>,
    /// When this rule was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Input for creating or replacing a rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleDraft {
    pub name: String,
    pub instructions: Option<String>,
    pub group_id: Option<String>,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub operator: LogicalOperator,
    #[serde(default)]
    pub automate: bool,
    #[serde(default)]
    pub run_on_threads: bool,
}

impl RuleDraft {
    /// Materializes the draft as a rule with the given id.
    pub fn into_rule(self, id: RuleId) -> Rule {
        let now = Utc::now();
        Rule {
            id,
            name: self.name.trim().to_string(),
            instructions: self.instructions,
            group_id: self.group_id,
            conditions: self.conditions,
            actions: self.actions,
            operator: self.operator,
            automate: self.automate,
            run_on_threads: self.run_on_threads,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A structural problem that prevents a rule from being saved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleViolation {
    /// A specific field is malformed.
    #[error("{field}: {message}")]
    Field { field: String, message: String },
    /// The condition/action lists conflict with the rule invariants.
    #[error("{0}")]
    Conflict(String),
}

impl RuleViolation {
    fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Field {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Rule {
    /// Checks the save-time invariants.
    ///
    /// The name must be non-blank, there must be at least one condition and
    /// one action, no two conditions may share a type, and every action must
    /// carry the fields its type requires.
    pub fn validate(&self) -> Result<(), RuleViolation> {
        if self.name.trim().is_empty() {
            return Err(RuleViolation::field("name", "rule name is required"));
        }
        if self.conditions.is_empty() {
            return Err(RuleViolation::Conflict(
                "a rule needs at least one condition".to_string(),
            ));
        }
        if self.actions.is_empty() {
            return Err(RuleViolation::Conflict(
                "a rule needs at least one action".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for condition in &self.conditions {
            if !seen.insert(condition.condition_type()) {
                return Err(RuleViolation::Conflict(format!(
                    "two conditions share the {:?} type",
                    condition.condition_type()
                )));
            }
        }

        for (index, action) in self.actions.iter().enumerate() {
            action.validate().map_err(|violation| match violation {
                RuleViolation::Field { field, message } => {
                    RuleViolation::field(format!("actions[{}].{}", index, field), message)
                }
                other => other,
            })?;
        }

        Ok(())
    }

    /// Returns the condition of the given type, if present.
    pub fn condition(&self, condition_type: ConditionType) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type() == condition_type)
    }
}

/// How a rule combines its condition results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    /// Every condition must hold.
    #[default]
    And,
    /// At least one condition must hold.
    Or,
}

impl LogicalOperator {
    /// Folds condition results with this operator.
    pub fn combine(self, results: impl IntoIterator<Item = bool>) -> bool {
        let mut results = results.into_iter();
        match self {
            LogicalOperator::And => results.all(|r| r),
            LogicalOperator::Or => results.any(|r| r),
        }
    }
}

/// Discriminant of a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionType {
    Ai,
    Static,
    Category,
}

/// A single rule condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Condition {
    /// Decided by the AI classifier.
    Ai { instructions: Option<String> },
    /// Pattern tests against message fields.
    Static(StaticCondition),
    /// Membership test on the sender's assigned category.
    Category {
        filter_type: CategoryFilterType,
        categories: Vec<String>,
    },
}

impl Condition {
    pub fn condition_type(&self) -> ConditionType {
        match self {
            Condition::Ai { .. } => ConditionType::Ai,
            Condition::Static(_) => ConditionType::Static,
            Condition::Category { .. } => ConditionType::Category,
        }
    }
}

/// Patterns tested against message fields. Unset fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticCondition {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
}

impl StaticCondition {
    /// Whether at least one non-blank pattern is configured.
    pub fn has_patterns(&self) -> bool {
        [&self.from, &self.to, &self.subject, &self.body]
            .iter()
            .any(|p| p.as_deref().is_some_and(|p| !p.trim().is_empty()))
    }
}

/// Whether a category condition selects or rejects the listed categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CategoryFilterType {
    Include,
    Exclude,
}

/// Kinds of action a rule can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Archive,
    DraftEmail,
    Forward,
    Label,
    MarkSpam,
    Reply,
    SendEmail,
    CallWebhook,
    MarkRead,
}

impl ActionType {
    /// Stable string used in persisted execution records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Archive => "ARCHIVE",
            ActionType::DraftEmail => "DRAFT_EMAIL",
            ActionType::Forward => "FORWARD",
            ActionType::Label => "LABEL",
            ActionType::MarkSpam => "MARK_SPAM",
            ActionType::Reply => "REPLY",
            ActionType::SendEmail => "SEND_EMAIL",
            ActionType::CallWebhook => "CALL_WEBHOOK",
            ActionType::MarkRead => "MARK_READ",
        }
    }

    /// Actions that leave the mailbox and get bounded retry on transient errors.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ActionType::CallWebhook
                | ActionType::SendEmail
                | ActionType::Forward
                | ActionType::Reply
        )
    }
}

/// An action field: either a literal value or a request to generate one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ActionField {
    Literal(String),
    Generate,
}

impl ActionField {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    /// The literal value when it is non-blank.
    pub fn non_blank(&self) -> Option<&str> {
        match self {
            ActionField::Literal(v) if !v.trim().is_empty() => Some(v.trim()),
            _ => None,
        }
    }
}

/// An action attached to a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<ActionField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<ActionField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ActionField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ActionField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<ActionField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcc: Option<ActionField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<ActionField>,
}

impl Action {
    /// An action of the given type with no fields set.
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            label: None,
            subject: None,
            content: None,
            to: None,
            cc: None,
            bcc: None,
            url: None,
        }
    }

    pub fn archive() -> Self {
        Self::new(ActionType::Archive)
    }

    pub fn mark_read() -> Self {
        Self::new(ActionType::MarkRead)
    }

    pub fn label(label: ActionField) -> Self {
        Self {
            label: Some(label),
            ..Self::new(ActionType::Label)
        }
    }

    pub fn forward(to: impl Into<String>) -> Self {
        Self {
            to: Some(ActionField::literal(to)),
            ..Self::new(ActionType::Forward)
        }
    }

    pub fn webhook(url: impl Into<String>) -> Self {
        Self {
            url: Some(ActionField::literal(url)),
            ..Self::new(ActionType::CallWebhook)
        }
    }

    pub fn with_content(mut self, content: ActionField) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_subject(mut self, subject: ActionField) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn with_to(mut self, to: ActionField) -> Self {
        self.to = Some(to);
        self
    }

    fn validate(&self) -> Result<(), RuleViolation> {
        match self.action_type {
            ActionType::Label => {
                let ok = matches!(self.label, Some(ActionField::Generate))
                    || self.label.as_ref().and_then(ActionField::non_blank).is_some();
                if !ok {
                    return Err(RuleViolation::field("label", "a label name is required"));
                }
            }
            ActionType::Forward => {
                if self.to.as_ref().and_then(ActionField::non_blank).is_none() {
                    return Err(RuleViolation::field(
                        "to",
                        "an address to forward to is required",
                    ));
                }
            }
            ActionType::CallWebhook => {
                let raw = self
                    .url
                    .as_ref()
                    .and_then(ActionField::non_blank)
                    .ok_or_else(|| RuleViolation::field("url", "a webhook URL is required"))?;
                let parsed = url::Url::parse(raw)
                    .map_err(|e| RuleViolation::field("url", format!("invalid URL: {}", e)))?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(RuleViolation::field(
                        "url",
                        "webhook URL must use http or https",
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }
}
