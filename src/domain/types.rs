//! Core identifier types for domain entities.
//!
//! These newtype wrappers keep email, rule, category and job identifiers
//! from being mixed up where they all travel as strings.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Returns the underlying string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// Provider-assigned identifier of a single message.
    EmailId
);

string_id!(
    /// Provider-assigned identifier of a conversation.
    ThreadId
);

string_id!(
    /// Identifier of a user-defined rule.
    RuleId
);

string_id!(
    /// Identifier of a sender category.
    CategoryId
);

string_id!(
    /// Identifier of a bulk cleanup job.
    CleanupJobId
);

impl RuleId {
    /// Generates a fresh random rule id.
    pub fn generate() -> Self {
        Self(format!("rule-{}", uuid::Uuid::new_v4()))
    }
}

impl CategoryId {
    /// Generates a fresh random category id.
    pub fn generate() -> Self {
        Self(format!("cat-{}", uuid::Uuid::new_v4()))
    }
}

impl CleanupJobId {
    /// Generates a fresh random cleanup job id.
    pub fn generate() -> Self {
        Self(format!("clean-{}", uuid::Uuid::new_v4()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_id_display() {
        let id = EmailId::from("msg-1");
        assert_eq!(id.to_string(), "msg-1");
        assert_eq!(id.as_str(), "msg-1");
    }

    #[test]
    fn generated_ids_are_prefixed_and_unique() {
        let a = RuleId::generate();
        let b = RuleId::generate();
        assert!(a.as_str().starts_with("rule-"));
        assert_ne!(a, b);
        assert!(CleanupJobId::generate().as_str().starts_with("clean-"));
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = CategoryId::from("cat-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"cat-1\"");
        let back: CategoryId = serde_json::from_str("\"cat-1\"").unwrap();
        assert_eq!(back, id);
    }
}
