//! Bulk cleanup job domain types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::{ActionType, CleanupJobId, Email};

/// The single action a cleanup job applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CleanupAction {
    #[default]
    Archive,
    MarkRead,
}

impl CleanupAction {
    pub fn action_type(&self) -> ActionType {
        match self {
            CleanupAction::Archive => ActionType::Archive,
            CleanupAction::MarkRead => ActionType::MarkRead,
        }
    }
}

/// Per-message predicates that exclude a message from cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipFilters {
    /// Threads the user has replied to.
    #[serde(default)]
    pub reply: bool,
    #[serde(default)]
    pub starred: bool,
    /// Invitations and other calendar traffic.
    #[serde(default)]
    pub calendar: bool,
    /// Receipts, invoices and order confirmations.
    #[serde(default)]
    pub receipt: bool,
    /// Messages carrying a file attachment.
    #[serde(default)]
    pub attachment: bool,
}

/// Why a message was left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Reply,
    Starred,
    Calendar,
    Receipt,
    Attachment,
    /// The AI judged the message worth keeping under the job instructions.
    Instructions,
}

const RECEIPT_KEYWORDS: &[&str] = &[
    "receipt",
    "invoice",
    "order confirmation",
    "your order",
    "payment received",
    "payment confirmation",
];

const INVITATION_PREFIXES: &[&str] = &[
    "invitation:",
    "updated invitation:",
    "canceled event:",
    "cancelled event:",
];

impl SkipFilters {
    /// Returns the first enabled filter the message matches.
    pub fn skip_reason(&self, email: &Email) -> Option<SkipReason> {
        if self.reply && email.has_user_reply {
            return Some(SkipReason::Reply);
        }
        if self.starred && email.is_starred {
            return Some(SkipReason::Starred);
        }
        if self.calendar && is_calendar(email) {
            return Some(SkipReason::Calendar);
        }
        if self.receipt && is_receipt(email) {
            return Some(SkipReason::Receipt);
        }
        if self.attachment && email.has_file_attachment() {
            return Some(SkipReason::Attachment);
        }
        None
    }
}

fn is_calendar(email: &Email) -> bool {
    let has_invite = email.attachments.iter().any(|a| {
        a.content_type.eq_ignore_ascii_case("text/calendar")
            || a.filename.to_lowercase().ends_with(".ics")
    });
    let subject = email.subject.as_deref().unwrap_or("").trim().to_lowercase();
    has_invite || INVITATION_PREFIXES.iter().any(|p| subject.starts_with(p))
}

fn is_receipt(email: &Email) -> bool {
    let subject = email.subject.as_deref().unwrap_or("").to_lowercase();
    let snippet = email.snippet.to_lowercase();
    RECEIPT_KEYWORDS
        .iter()
        .any(|k| subject.contains(k) || snippet.contains(k))
}

/// Parameters for a new cleanup job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    /// Only messages older than this many days are eligible.
    pub days_old: u32,
    pub action: CleanupAction,
    #[serde(default)]
    pub skips: SkipFilters,
    /// Messages the preview may attempt the action on; failures count,
    /// skips do not.
    pub max_emails: u32,
    /// Optional guidance for the AI about what to keep.
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Lifecycle of a cleanup job. Transitions only move forward one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPhase {
    Previewing,
    AwaitingContinuation,
    Continuing,
    Done,
}

impl CleanupPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupPhase::Previewing => "previewing",
            CleanupPhase::AwaitingContinuation => "awaiting_continuation",
            CleanupPhase::Continuing => "continuing",
            CleanupPhase::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "previewing" => Some(Self::Previewing),
            "awaiting_continuation" => Some(Self::AwaitingContinuation),
            "continuing" => Some(Self::Continuing),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    /// The phase that follows this one, if any.
    pub fn next(&self) -> Option<Self> {
        match self {
            CleanupPhase::Previewing => Some(CleanupPhase::AwaitingContinuation),
            CleanupPhase::AwaitingContinuation => Some(CleanupPhase::Continuing),
            CleanupPhase::Continuing => Some(CleanupPhase::Done),
            CleanupPhase::Done => None,
        }
    }
}

/// Running totals for a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupCounts {
    /// Messages the action was applied to.
    pub acted: u32,
    /// Messages left alone by a skip filter.
    pub skipped: u32,
    /// Messages whose action failed.
    pub failed: u32,
}

/// A persisted cleanup job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupJob {
    pub id: CleanupJobId,
    pub config: CleanupConfig,
    /// Messages dated before this instant are eligible. Fixed at creation so
    /// the continuation sees the same population as the preview.
    pub cutoff: DateTime<Utc>,
    /// Page token where processing resumes; `None` means the first page.
    pub cursor: Option<String>,
    pub phase: CleanupPhase,
    pub counts: CleanupCounts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CleanupJob {
    /// Creates a job in the `Previewing` phase.
    ///
    /// Returns `None` when `days_old` reaches past the earliest representable
    /// date.
    pub fn new(config: CleanupConfig) -> Option<Self> {
        let now = Utc::now();
        let cutoff = now.checked_sub_signed(Duration::days(i64::from(config.days_old)))?;
        Some(Self {
            id: CleanupJobId::generate(),
            cutoff,
            config,
            cursor: None,
            phase: CleanupPhase::Previewing,
            counts: CleanupCounts::default(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Moves to the next phase. Returns false when already terminal.
    pub fn advance(&mut self) -> bool {
        match self.phase.next() {
            Some(next) => {
                self.phase = next;
                self.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }
}
