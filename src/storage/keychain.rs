//! Keychain access for the AI API key.
//!
//! Wraps the keyring crate; calls run on the blocking pool because some
//! platform backends block on IPC.

use thiserror::Error;

/// Environment variable consulted when the keychain has no API key.
pub const API_KEY_ENV: &str = "MAILSORT_API_KEY";

/// Keychain lookup failures.
#[derive(Debug, Error)]
pub enum KeychainError {
    #[error("keyring backend: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("no API key stored under {0:?} and MAILSORT_API_KEY is unset")]
    NotFound(String),

    #[error("keyring task aborted: {0}")]
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, KeychainError>;

/// Credentials stored under one keychain service name.
#[derive(Debug, Clone)]
pub struct KeychainAccess {
    service_name: String,
}

impl KeychainAccess {
    pub const DEFAULT_SERVICE: &'static str = "io.mailsort";

    pub fn new() -> Self {
        Self::with_service(Self::DEFAULT_SERVICE)
    }

    pub fn with_service(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Stores a credential, overwriting any existing value.
    pub async fn store(&self, key: &str, value: &str) -> Result<()> {
        let value = value.to_string();
        self.on_entry(key, move |entry| Ok(entry.set_password(&value)?))
            .await
    }

    /// Returns `None` when no credential exists for `key`.
    pub async fn retrieve(&self, key: &str) -> Result<Option<String>> {
        self.on_entry(key, |entry| match entry.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn on_entry<T, F>(&self, key: &str, f: F) -> Result<T>
    where
        F: FnOnce(keyring::Entry) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (service, key) = (self.service_name.clone(), key.to_string());
        tokio::task::spawn_blocking(move || f(keyring::Entry::new(&service, &key)?))
            .await
            .map_err(|e| KeychainError::Aborted(e.to_string()))?
    }

    /// The API key stored under `keychain_id`, or [`API_KEY_ENV`].
    pub async fn api_key(&self, keychain_id: &str) -> Result<String> {
        let stored = match self.retrieve(keychain_id).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "keychain unavailable, trying environment");
                None
            }
        };
        choose_api_key(stored, std::env::var(API_KEY_ENV).ok())
            .ok_or_else(|| KeychainError::NotFound(keychain_id.to_string()))
    }
}

impl Default for KeychainAccess {
    fn default() -> Self {
        Self::new()
    }
}

/// Keychain value first, then the environment. Blank values do not count.
fn choose_api_key(stored: Option<String>, env: Option<String>) -> Option<String> {
    stored
        .into_iter()
        .chain(env)
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
}
