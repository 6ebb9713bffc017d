//! Sender categorization domain types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CategoryId;

/// A user-visible sender category such as "Newsletter".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    /// Display name; matched case-insensitively.
    pub name: String,
    /// Hint passed to the AI classifier.
    pub description: Option<String>,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: CategoryId::generate(),
            name: name.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Case-insensitive name comparison.
    pub fn matches_name(&self, name: &str) -> bool {
        self.name.trim().to_lowercase() == name.trim().to_lowercase()
    }
}

/// Finds the category whose name matches `name`, ignoring case.
pub fn resolve_category<'a>(categories: &'a [Category], name: &str) -> Option<&'a Category> {
    categories.iter().find(|c| c.matches_name(name))
}

/// Categories seeded for a new user.
pub fn default_categories() -> Vec<Category> {
    [
        ("Newsletter", "Newsletters, digests and blogs the user subscribed to"),
        ("Marketing", "Promotions, sales and product announcements"),
        ("Receipts", "Purchase receipts, invoices and order confirmations"),
        ("Calendar", "Meeting invitations and calendar updates"),
        ("Notifications", "Automated alerts from apps and services"),
        ("Cold Email", "Unsolicited outreach from people the user does not know"),
        ("Social", "Social networks and community platforms"),
    ]
    .into_iter()
    .map(|(name, description)| Category::new(name).with_description(description))
    .collect()
}

/// Where a sender is in the categorization lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategorizationState {
    Uncategorized,
    Queued,
    Running,
    Categorized,
    Failed,
}

impl CategorizationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategorizationState::Uncategorized => "uncategorized",
            CategorizationState::Queued => "queued",
            CategorizationState::Running => "running",
            CategorizationState::Categorized => "categorized",
            CategorizationState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "queued" => Self::Queued,
            "running" => Self::Running,
            "categorized" => Self::Categorized,
            "failed" => Self::Failed,
            _ => Self::Uncategorized,
        }
    }
}

/// A sender, identified by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub address: String,
    pub category_id: Option<CategoryId>,
    pub state: CategorizationState,
}

/// Status of a categorization job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
}

/// A queued or running categorization of one sender.
///
/// The record only exists while the job is live; it is deleted when the job
/// completes or the queue is stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorizationJob {
    pub address: String,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
}

/// One page of sender addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderPage {
    pub senders: Vec<String>,
    /// Offset of the next page; `None` means end of data.
    pub next_offset: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_case_insensitive() {
        let categories = vec![Category::new("Marketing"), Category::new("Newsletter")];
        assert_eq!(
            resolve_category(&categories, " marketing ").map(|c| c.name.as_str()),
            Some("Marketing")
        );
        assert!(resolve_category(&categories, "Spam").is_none());
    }

    #[test]
    fn default_categories_have_unique_names() {
        let categories = default_categories();
        for (i, a) in categories.iter().enumerate() {
            for b in &categories[i + 1..] {
                assert!(!a.matches_name(&b.name));
            }
        }
    }

    #[test]
    fn state_parse_round_trips_known_values() {
        for state in [
            CategorizationState::Uncategorized,
            CategorizationState::Queued,
            CategorizationState::Running,
            CategorizationState::Categorized,
            CategorizationState::Failed,
        ] {
            assert_eq!(CategorizationState::parse(state.as_str()), state);
        }
        assert_eq!(
            CategorizationState::parse("bogus"),
            CategorizationState::Uncategorized
        );
    }
}
