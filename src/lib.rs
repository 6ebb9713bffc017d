//! mailsort - rule-driven email triage.
//!
//! Evaluates user rules (static patterns, sender categories and AI
//! conditions) against incoming mail, executes the matched rule's actions
//! exactly once, categorizes senders in the background and runs bulk
//! archive or mark-read cleanups in a preview-then-continue flow.

pub mod config;
pub mod domain;
pub mod providers;
pub mod services;
pub mod storage;
