use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Outcome of one identity-provider request, normalized from the HTTP status
/// and the `error` field of the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Success,
    UnknownError,
    AuthorizationFailed,
    UnauthorizedClient,
    ServerError,
    InvalidRequest,
    InvalidValue,
    /// `invalid_grant`: the refresh token or device grant is no longer valid.
    AuthorizationExpired,
    UnsupportedGrantType,
    InvalidCodePair,
    AuthorizationPending,
    SlowDown,
    InternalError,
    /// The client id was rejected on the first refresh after a grant.
    InvalidCblClientId,
}

/// How the flow reacts to an [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorBand {
    Success,
    /// Retry after a backoff or poll interval.
    Transient,
    /// Issue a fresh code pair.
    RestartCodePair,
    /// The grant is gone; fatal unless a fresh authorization may fall back.
    GrantExpired,
    /// Stop the flow and report the error.
    Fatal,
}

impl ErrorCode {
    /// Map an identity-provider `error` name.
    pub fn from_error_name(name: &str) -> Self {
        match name {
            "" => Self::Success,
            "authorization_pending" => Self::AuthorizationPending,
            "invalid_client" => Self::InvalidValue,
            "invalid_code_pair" => Self::InvalidCodePair,
            "invalid_grant" => Self::AuthorizationExpired,
            "invalid_request" => Self::InvalidRequest,
            "InvalidValue" => Self::InvalidValue,
            "servererror" => Self::ServerError,
            "slow_down" => Self::SlowDown,
            "unauthorized_client" => Self::UnauthorizedClient,
            "unsupported_grant_type" => Self::UnsupportedGrantType,
            other => {
                tracing::debug!(error = other, "Unrecognized identity provider error");
                Self::UnknownError
            }
        }
    }

    /// Map an HTTP status before the body is inspected.
    pub fn from_status(status: u16) -> Self {
        match status {
            200 => Self::Success,
            400 => Self::InvalidRequest,
            500 => Self::ServerError,
            _ => Self::UnknownError,
        }
    }

    /// Classify this code for the token and refresh states.
    pub fn band(self) -> ErrorBand {
        match self {
            Self::Success => ErrorBand::Success,
            Self::UnknownError
            | Self::AuthorizationFailed
            | Self::ServerError
            | Self::AuthorizationPending
            | Self::SlowDown => ErrorBand::Transient,
            Self::InvalidCodePair => ErrorBand::RestartCodePair,
            Self::AuthorizationExpired => ErrorBand::GrantExpired,
            Self::UnauthorizedClient
            | Self::InvalidRequest
            | Self::InvalidValue
            | Self::UnsupportedGrantType
            | Self::InternalError
            | Self::InvalidCblClientId => ErrorBand::Fatal,
        }
    }

    /// Whether a code-pair request should be retried.
    ///
    /// Code-pair requests only give up on client/request errors; grant and
    /// code-pair errors cannot apply to them and are retried like transients.
    pub fn is_retryable_for_code_pair(self) -> bool {
        !matches!(self.band(), ErrorBand::Success | ErrorBand::Fatal)
    }
}

/// Reason passed to [`crate::auth::AuthorizationListener::on_authorization_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationErrorReason {
    /// The code pair could not be obtained before the request deadline.
    Timeout,
    UnknownError,
    /// The user did not enter the code before it expired.
    CodePairExpired,
    AuthorizationExpired,
    StartAuthorizationFailed,
    LogoutFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_names_map_to_codes() {
        assert_eq!(ErrorCode::from_error_name(""), ErrorCode::Success);
        assert_eq!(
            ErrorCode::from_error_name("authorization_pending"),
            ErrorCode::AuthorizationPending
        );
        assert_eq!(ErrorCode::from_error_name("invalid_client"), ErrorCode::InvalidValue);
        assert_eq!(
            ErrorCode::from_error_name("invalid_grant"),
            ErrorCode::AuthorizationExpired
        );
        assert_eq!(ErrorCode::from_error_name("servererror"), ErrorCode::ServerError);
        assert_eq!(ErrorCode::from_error_name("whatever"), ErrorCode::UnknownError);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ErrorCode::from_status(200), ErrorCode::Success);
        assert_eq!(ErrorCode::from_status(400), ErrorCode::InvalidRequest);
        assert_eq!(ErrorCode::from_status(500), ErrorCode::ServerError);
        assert_eq!(ErrorCode::from_status(204), ErrorCode::UnknownError);
        assert_eq!(ErrorCode::from_status(0), ErrorCode::UnknownError);
    }

    #[test]
    fn bands() {
        assert_eq!(ErrorCode::SlowDown.band(), ErrorBand::Transient);
        assert_eq!(ErrorCode::InvalidCodePair.band(), ErrorBand::RestartCodePair);
        assert_eq!(ErrorCode::AuthorizationExpired.band(), ErrorBand::GrantExpired);
        assert_eq!(ErrorCode::UnsupportedGrantType.band(), ErrorBand::Fatal);
        assert!(ErrorCode::AuthorizationExpired.is_retryable_for_code_pair());
        assert!(!ErrorCode::InvalidRequest.is_retryable_for_code_pair());
    }

    #[test]
    fn reasons_render_as_wire_strings() {
        assert_eq!(AuthorizationErrorReason::CodePairExpired.to_string(), "CODE_PAIR_EXPIRED");
        assert_eq!(
            "START_AUTHORIZATION_FAILED".parse::<AuthorizationErrorReason>().unwrap(),
            AuthorizationErrorReason::StartAuthorizationFailed
        );
    }
}
