//! Connection and autosave configuration.

use std::time::Duration;

use reqwest::Url;
use thiserror::Error;

/// Public Firestore REST host.
pub const DEFAULT_STORE_HOST: &str = "https://firestore.googleapis.com";
/// Public Identity Toolkit REST endpoint.
pub const DEFAULT_AUTH_ENDPOINT: &str = "https://identitytoolkit.googleapis.com/v1/";
/// Background autosave period.
pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(30);

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("url `{0}` cannot carry path segments")]
    CannotBeABase(String),
    #[error("invalid project id `{0}`")]
    InvalidProjectId(String),
}

fn parse_base(url: &str) -> Result<Url, ConfigError> {
    let parsed = Url::parse(url).map_err(|e| ConfigError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.cannot_be_a_base() {
        return Err(ConfigError::CannotBeABase(url.to_string()));
    }
    Ok(parsed)
}

/// Document store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root of the documents tree; document paths are appended as segments.
    pub base_url: Url,
    /// Per-request timeout covering connect, send and body read.
    pub request_timeout: Duration,
}

impl StoreConfig {
    /// Default database of a hosted project.
    pub fn for_project(project_id: &str) -> Result<Self, ConfigError> {
        let valid = !project_id.is_empty()
            && project_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            return Err(ConfigError::InvalidProjectId(project_id.to_string()));
        }
        Self::with_base_url(&format!(
            "{DEFAULT_STORE_HOST}/v1/projects/{project_id}/databases/(default)/documents"
        ))
    }

    /// Explicit documents root (emulator, tests).
    pub fn with_base_url(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base(base_url)?,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Authentication service configuration.
#[derive(Clone)]
pub struct AuthConfig {
    pub endpoint: Url,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl AuthConfig {
    pub fn new(api_key: impl Into<String>) -> Result<Self, ConfigError> {
        Self::with_endpoint(DEFAULT_AUTH_ENDPOINT, api_key)
    }

    pub fn with_endpoint(endpoint: &str, api_key: impl Into<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoint: parse_base(endpoint)?,
            api_key: api_key.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Autosave coordinator configuration.
#[derive(Debug, Clone)]
pub struct AutosaveConfig {
    /// Period of the background save timer. Zero disables the timer.
    pub interval: Duration,
    /// Capacity of the event channel handed out by `take_event_rx`.
    pub event_capacity: usize,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_AUTOSAVE_INTERVAL,
            event_capacity: 64,
        }
    }
}

impl AutosaveConfig {
    /// No periodic saves; only explicit requests write.
    pub fn manual() -> Self {
        Self {
            interval: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }
}
