use serde::{Deserialize, Serialize};
use strum::Display;

use super::error::{AuthorizationErrorReason, ErrorCode};
use super::token::AuthState;
use crate::error::{CblError, Result};

/// Storage key of the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Externally visible authorization lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationState {
    #[default]
    Unauthorized,
    Authorizing,
    Authorized,
}

/// Receives notifications and owns persistent authorization data.
///
/// Called from the worker task and from control calls, never while the
/// provider's lock is held. Implementations must return quickly.
pub trait AuthorizationListener: Send + Sync {
    fn on_authorization_state_changed(&self, state: AuthorizationState);

    fn on_authorization_error(&self, reason: AuthorizationErrorReason);

    /// A JSON event, see [`AuthorizationEvent`].
    fn on_event(&self, payload: &str);

    /// Stored data for `key`, or an empty string.
    fn get_authorization_data(&self, key: &str) -> String;

    /// Store `data` for `key`; an empty string clears it.
    fn set_authorization_data(&self, key: &str, data: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAuthorizationResult {
    Accepted,
    Failed,
}

/// Arbitrates which authorization service is active on the device.
pub trait AuthorizationManager: Send + Sync {
    fn start_authorization(&self, service: &str) -> StartAuthorizationResult;

    /// Log out `service`; returns `false` when the logout could not be done.
    fn logout(&self, service: &str) -> bool;

    fn auth_state_changed(&self, _service: &str, _state: AuthState, _error: Option<ErrorCode>) {}
}

/// Events delivered through [`AuthorizationListener::on_event`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum AuthorizationEvent {
    /// Code and URL to show to the user.
    CblCode { code: String, url: String },
    UserProfile { name: String, email: String },
}

impl AuthorizationEvent {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Serialize, Deserialize)]
struct RefreshTokenRecord {
    #[serde(rename = "refreshToken")]
    refresh_token: String,
}

/// Serialize a refresh token for storage; an empty token clears the record.
pub fn encode_refresh_token(refresh_token: &str) -> Result<String> {
    if refresh_token.is_empty() {
        return Ok(String::new());
    }
    Ok(serde_json::to_string(&RefreshTokenRecord {
        refresh_token: refresh_token.to_string(),
    })?)
}

/// Read a refresh token from stored data.
///
/// Empty data, or an empty token, yields `None`.
pub fn decode_refresh_token(data: &str) -> Result<Option<String>> {
    if data.trim().is_empty() {
        return Ok(None);
    }
    let record: RefreshTokenRecord = serde_json::from_str(data)?;
    Ok(Some(record.refresh_token).filter(|token| !token.is_empty()))
}

/// Parse the data passed to `start`: empty, `{}`, or `{"refreshToken": "..."}`.
pub(crate) fn parse_start_data(data: &str) -> Result<Option<String>> {
    if data.trim().is_empty() {
        return Ok(None);
    }
    let payload: serde_json::Value = serde_json::from_str(data)?;
    match payload.get(REFRESH_TOKEN_KEY) {
        None => Ok(None),
        Some(serde_json::Value::String(token)) => Ok(Some(token.clone()).filter(|t| !t.is_empty())),
        Some(_) => Err(CblError::InvalidData(format!("{REFRESH_TOKEN_KEY} must be a string"))),
    }
}
