use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::time::Instant;

use super::device_code::{CodePairGrant, TokenGrant};
use super::error::ErrorCode;

/// Internal token lifecycle, reported to the authorization manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthState {
    #[default]
    Uninitialized,
    Refreshed,
    Expired,
    UnrecoverableError,
}

/// An issued code pair waiting for the user to enter `user_code`.
#[derive(Debug, Clone)]
pub struct CodePair {
    pub user_code: String,
    pub device_code: String,
    pub verification_uri: String,
    pub expires_at: Instant,
    /// Interval advertised by the server. Logged only; polling always starts
    /// at the minimum interval.
    pub interval: Option<Duration>,
}

impl CodePair {
    pub(crate) fn from_grant(grant: CodePairGrant, issued_at: Instant) -> Self {
        Self {
            user_code: grant.user_code,
            device_code: grant.device_code,
            verification_uri: grant.verification_uri,
            expires_at: issued_at + Duration::from_secs(grant.expires_in),
            interval: grant.interval.map(Duration::from_secs),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Access token and refresh schedule held by the worker.
///
/// The refresh token itself lives in listener storage; only the marker that a
/// fresh one was just issued is kept here.
#[derive(Debug, Clone, Default)]
pub struct TokenState {
    pub access_token: String,
    pub expires_at: Option<Instant>,
    pub time_to_refresh: Option<Instant>,
    pub retry_count: u32,
    pub auth_state: AuthState,
    pub last_error: Option<ErrorCode>,
    /// Set when the token endpoint issued a refresh token that has not been
    /// used for a refresh yet.
    pub new_refresh_token: bool,
    pub last_granted_at: Option<DateTime<Utc>>,
}

impl TokenState {
    /// Whether the access token may be handed out.
    pub fn is_valid(&self, now: Instant) -> bool {
        !self.access_token.is_empty()
            && self.auth_state == AuthState::Refreshed
            && self.expires_at.is_some_and(|expires_at| expires_at > now)
    }

    /// Store a granted token requested at `requested_at`.
    ///
    /// The next refresh is scheduled `head_start` before expiry, but never
    /// before the request instant.
    pub fn accept(&mut self, grant: &TokenGrant, requested_at: Instant, head_start: Duration) {
        let expires_at = requested_at + Duration::from_secs(grant.expires_in);
        let time_to_refresh = expires_at
            .checked_sub(head_start)
            .map_or(requested_at, |at| at.max(requested_at));

        self.access_token = grant.access_token.clone();
        self.expires_at = Some(expires_at);
        self.time_to_refresh = Some(time_to_refresh);
        self.last_granted_at = Some(Utc::now());
    }

    /// When the refresh loop should wake next, and whether that wake is the
    /// token's own expiry.
    ///
    /// Expiry only counts while the token is believed valid and comes before
    /// the scheduled refresh (for example after backoff pushed the refresh out).
    pub fn next_wake(&self, now: Instant) -> (Instant, bool) {
        let refresh_at = self.time_to_refresh.unwrap_or(now);
        match self.expires_at {
            Some(expires_at) if self.auth_state == AuthState::Refreshed && expires_at < refresh_at => {
                (expires_at, true)
            }
            _ => (refresh_at, false),
        }
    }

    /// Remaining lifetime while the token is believed valid.
    pub fn remaining(&self, now: Instant) -> Option<Instant> {
        match self.auth_state {
            AuthState::Refreshed => self.expires_at.filter(|at| *at > now),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.access_token.clear();
        self.expires_at = None;
        self.time_to_refresh = None;
        self.new_refresh_token = false;
    }
}
