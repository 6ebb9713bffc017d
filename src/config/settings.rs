//! Engine settings and configuration types.
//!
//! Settings are persisted to `<config dir>/mailsort/settings.json` and
//! loaded at startup. A missing file yields the defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or saving settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Could not determine a config directory")]
    NoConfigDir,
}

/// Top-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub ai: AiSettings,
    pub rules: RuleSettings,
    pub executor: ExecutorSettings,
    pub categorization: CategorizationSettings,
    pub cleanup: CleanupSettings,
}

impl Settings {
    /// `<config dir>/mailsort/settings.json`.
    pub fn default_path() -> Result<PathBuf, SettingsError> {
        directories::ProjectDirs::from("", "", "mailsort")
            .map(|dirs| dirs.config_dir().join("settings.json"))
            .ok_or(SettingsError::NoConfigDir)
    }

    /// Reads settings from `path`, falling back to defaults if it is absent.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "settings file missing, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Writes settings as pretty JSON, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// AI provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    pub provider: ProviderSettings,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            request_timeout_secs: 30,
        }
    }
}

impl AiSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Configuration for the OpenAI-compatible endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Keychain identifier for the API key.
    pub api_key_keychain_id: String,
    /// Custom API endpoint (for self-hosted or compatible APIs).
    pub base_url: Option<String>,
    /// Model identifier.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum tokens in response.
    pub max_tokens: Option<usize>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_key_keychain_id: "openai_api_key".to_string(),
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: Some(1024),
        }
    }
}

/// What an AI condition evaluates to when the classifier call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiFailurePolicy {
    /// Treat the condition as false.
    #[default]
    FailClosed,
    /// Treat the condition as true.
    FailOpen,
}

/// Rule evaluation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSettings {
    pub ai_failure_policy: AiFailurePolicy,
}

/// Retry behavior for outbound actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Total attempts for retryable actions, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry.
    pub base_backoff_ms: u64,
    /// Upper bound on any single delay.
    pub max_backoff_ms: u64,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

impl ExecutorSettings {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.base_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

/// Sender categorization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CategorizationSettings {
    /// Size of the AI worker pool.
    pub workers: usize,
    /// Queue new senders for categorization as their mail arrives.
    pub auto_categorize_senders: bool,
    /// Senders per page when listing uncategorized senders.
    pub page_size: u32,
    /// Recent messages sampled as sender context.
    pub context_messages: u32,
}

impl Default for CategorizationSettings {
    fn default() -> Self {
        Self {
            workers: 3,
            auto_categorize_senders: false,
            page_size: 100,
            context_messages: 3,
        }
    }
}

/// Bulk cleanup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupSettings {
    /// Messages acted on by the preview batch.
    pub preview_count: u32,
    pub default_days_old: u32,
    /// Cap on the continuation phase; `None` processes everything.
    pub continuation_limit: Option<u32>,
    /// Messages fetched per provider page.
    pub page_size: u32,
    /// Label applied to messages the cleanup archives.
    pub archived_label: String,
    /// Label applied to messages the cleanup marks read.
    pub read_label: String,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            preview_count: 50,
            default_days_old: 7,
            continuation_limit: None,
            page_size: 100,
            archived_label: "Cleanup/Archived".to_string(),
            read_label: "Cleanup/Read".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let settings = Settings::default();
        assert_eq!(settings.rules.ai_failure_policy, AiFailurePolicy::FailClosed);
        assert_eq!(settings.executor.max_attempts, 3);
        assert_eq!(settings.categorization.workers, 3);
        assert_eq!(settings.cleanup.preview_count, 50);
        assert_eq!(settings.cleanup.default_days_old, 7);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let executor = ExecutorSettings {
            max_attempts: 5,
            base_backoff_ms: 100,
            max_backoff_ms: 350,
        };
        assert_eq!(executor.backoff(1), Duration::from_millis(100));
        assert_eq!(executor.backoff(2), Duration::from_millis(200));
        assert_eq!(executor.backoff(3), Duration::from_millis(350));
    }

    #[test]
    fn partial_file_fills_defaults() {
        let json = r#"{ "rules": { "ai_failure_policy": "fail_open" } }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.rules.ai_failure_policy, AiFailurePolicy::FailOpen);
        assert_eq!(settings.executor.base_backoff_ms, 500);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.categorization.auto_categorize_senders = true;
        settings.cleanup.continuation_limit = Some(1000);
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert!(loaded.categorization.auto_categorize_senders);
        assert_eq!(loaded.cleanup.continuation_limit, Some(1000));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Settings::load(dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded.cleanup.page_size, 100);
    }
}
