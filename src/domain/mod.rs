//! Domain layer types.
//!
//! Rules, categories, senders and cleanup jobs, plus the subset of an email
//! message the engine inspects.

mod category;
mod cleanup;
mod email;
mod rule;
mod types;

pub use category::{
    default_categories, resolve_category, CategorizationJob, CategorizationState, Category,
    JobStatus, Sender, SenderPage,
};
pub use cleanup::{
    CleanupAction, CleanupConfig, CleanupCounts, CleanupJob, CleanupPhase, SkipFilters,
    SkipReason,
};
pub use email::{Address, Attachment, Email};
pub use rule::{
    Action, ActionField, ActionType, CategoryFilterType, Condition, ConditionType,
    LogicalOperator, Rule, RuleDraft, RuleViolation, StaticCondition,
};
pub use types::{CategoryId, CleanupJobId, EmailId, RuleId, ThreadId};
