//! Business services layer.
//!
//! Services orchestrate the domain types over the provider capabilities and
//! the storage traits they declare.
//!
//! ```text
//! Callers (CLI, API)
//!          |
//!          v
//!    Services Layer  <-- You are here
//!          |
//!          v
//! Infrastructure (Providers, Storage)
//! ```
//!
//! # Services Overview
//!
//! - [`RuleEngine`]: picks the first rule matching an email
//! - [`ActionExecutor`]: performs a rule's actions, idempotently and with retry
//! - [`SenderCategorizationQueue`]: background AI categorization of senders
//! - [`FastCategorizer`]: single-call batch categorization
//! - [`SenderPager`]: offset paging over uncategorized senders
//! - [`CleanupOrchestrator`]: two-phase bulk archive / mark-read jobs
//! - [`MailProcessor`]: the per-message pipeline tying rules to actions
//! - [`RuleService`], [`CategoryService`]: CRUD with validation

mod action_executor;
mod categorization_queue;
mod category_service;
mod cleanup_service;
mod fast_categorizer;
mod mail_processor;
mod rule_engine;
mod rule_service;
mod sender_pager;

pub use action_executor::{
    ActionExecutor, ActionOutcome, ActionOwner, ActionStatus, ExecutionKey, ExecutionLedger,
    ExecutionReport, ExecutorError, InMemoryLedger,
};
pub use categorization_queue::{CategorizationEvent, QueueProgress, SenderCategorizationQueue};
pub use category_service::{CategoryError, CategoryService, CategoryStorage};
pub use cleanup_service::{CleanupError, CleanupOrchestrator, CleanupStorage, CleanupSummary};
pub use fast_categorizer::{CategorizeError, Categorization, FastCategorizer};
pub use mail_processor::{MailProcessor, ProcessError, ProcessOutcome};
pub use rule_engine::{
    category_matches, pattern_matches, static_matches, Evaluation, EvaluationContext, RuleEngine,
};
pub use rule_service::{RuleError, RuleService, RuleStorage};
pub use sender_pager::SenderPager;
