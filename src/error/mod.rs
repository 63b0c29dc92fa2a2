//! Error types for cbl-auth.

use thiserror::Error;

/// Primary error type for provider control calls and configuration.
///
/// Failures reported by the identity provider during the authorization flow
/// never surface here; they are classified by [`crate::auth::ErrorCode`] and
/// handled (or reported to the listener) by the background worker.
#[derive(Error, Debug)]
pub enum CblError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid authorization data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl CblError {
    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Whether the call was rejected because of the current authorization
    /// state rather than bad input.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, CblError>;
