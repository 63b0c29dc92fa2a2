//! Identity-provider wire format for the code-based-linking flow.

use serde_json::Value;

use super::error::ErrorCode;
use super::token::CodePair;
use super::transport::HttpResponse;
use crate::config::CblConfig;

const GRANT_DEVICE_CODE: &str = "device_code";
const GRANT_REFRESH_TOKEN: &str = "refresh_token";
const TOKEN_TYPE_BEARER: &str = "bearer";

/// A successful code-pair response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodePairGrant {
    pub user_code: String,
    pub device_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    pub interval: Option<u64>,
}

/// A successful token or refresh response.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

impl std::fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub name: String,
    pub email: String,
}

fn pair(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

pub fn code_pair_headers(accept_language: &str) -> Vec<(String, String)> {
    vec![pair("Accept-Language", accept_language)]
}

pub fn code_pair_form(config: &CblConfig) -> Vec<(String, String)> {
    vec![
        pair("response_type", GRANT_DEVICE_CODE),
        pair("client_id", config.client_id.as_str()),
        pair("scope", config.scope()),
        pair("scope_data", config.scope_data()),
    ]
}

pub fn token_form(code_pair: &CodePair) -> Vec<(String, String)> {
    vec![
        pair("grant_type", GRANT_DEVICE_CODE),
        pair("device_code", code_pair.device_code.as_str()),
        pair("user_code", code_pair.user_code.as_str()),
    ]
}

pub fn refresh_form(refresh_token: &str, client_id: &str) -> Vec<(String, String)> {
    vec![
        pair("grant_type", GRANT_REFRESH_TOKEN),
        pair("refresh_token", refresh_token),
        pair("client_id", client_id),
    ]
}

pub fn user_profile_headers(access_token: &str) -> Vec<(String, String)> {
    vec![pair("Authorization", format!("bearer {access_token}"))]
}

/// Classify the status and body shared by every identity-provider response.
///
/// Returns the parsed body on success. An unparseable body keeps the status
/// mapping, except that a 200 becomes [`ErrorCode::UnknownError`].
fn classify(response: &HttpResponse) -> Result<Value, ErrorCode> {
    let status = ErrorCode::from_status(response.status);
    let document: Value = match serde_json::from_str(&response.body) {
        Ok(document) => document,
        Err(err) => {
            tracing::debug!(status = response.status, error = %err, "Unparseable identity provider response");
            return Err(match status {
                ErrorCode::Success => ErrorCode::UnknownError,
                other => other,
            });
        }
    };
    if status == ErrorCode::Success {
        return Ok(document);
    }
    match document.get("error").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => Err(ErrorCode::from_error_name(name)),
        _ => Err(status),
    }
}

fn string_field(document: &Value, key: &str) -> Option<String> {
    document
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn seconds_field(document: &Value, key: &str) -> Option<u64> {
    document.get(key).and_then(Value::as_u64).filter(|secs| *secs > 0)
}

pub fn parse_code_pair_response(response: &HttpResponse) -> Result<CodePairGrant, ErrorCode> {
    let document = classify(response)?;
    let grant = (|| {
        Some(CodePairGrant {
            user_code: string_field(&document, "user_code")?,
            device_code: string_field(&document, "device_code")?,
            verification_uri: string_field(&document, "verification_uri")?,
            expires_in: seconds_field(&document, "expires_in")?,
            interval: seconds_field(&document, "interval"),
        })
    })();
    grant.ok_or_else(|| {
        tracing::warn!("Code pair response is missing required fields");
        ErrorCode::UnknownError
    })
}

pub fn parse_token_response(response: &HttpResponse) -> Result<TokenGrant, ErrorCode> {
    let document = classify(response)?;
    let bearer = document.get("token_type").and_then(Value::as_str) == Some(TOKEN_TYPE_BEARER);
    let grant = (|| {
        Some(TokenGrant {
            access_token: string_field(&document, "access_token")?,
            refresh_token: string_field(&document, "refresh_token")?,
            expires_in: seconds_field(&document, "expires_in")?,
        })
    })();
    match grant {
        Some(grant) if bearer => Ok(grant),
        _ => {
            tracing::warn!(bearer, "Token response is missing required fields");
            Err(ErrorCode::UnknownError)
        }
    }
}

/// Parse a user-profile response; both fields are required.
pub fn parse_user_profile(response: &HttpResponse) -> Option<UserProfile> {
    if response.status != 200 {
        tracing::debug!(status = response.status, "User profile request failed");
        return None;
    }
    let document: Value = serde_json::from_str(&response.body).ok()?;
    Some(UserProfile {
        name: string_field(&document, "name")?,
        email: string_field(&document, "email")?,
    })
}
