//! Capability interfaces and provider implementations.
//!
//! - [`email`] - the mailbox operations rules and cleanup perform
//! - [`ai`] - the classification capability and LLM adapters behind it

pub mod ai;
pub mod email;
