//! Background worker driving the code-based-linking state machine.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use strum::Display;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::device_code::{
    code_pair_form, code_pair_headers, parse_code_pair_response, parse_token_response,
    parse_user_profile, refresh_form, token_form, user_profile_headers, TokenGrant,
};
use super::error::{AuthorizationErrorReason, ErrorBand, ErrorCode};
use super::listener::{
    decode_refresh_token, encode_refresh_token, AuthorizationEvent, AuthorizationListener,
    AuthorizationManager, AuthorizationState, REFRESH_TOKEN_KEY,
};
use super::token::{AuthState, CodePair, TokenState};
use super::transport::HttpTransport;
use crate::config::{accept_language, CblConfig};
use crate::util::backoff::{retry_delay, slow_down, MIN_POLL_INTERVAL};
use crate::util::timeout::clamp_to_deadline;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum FlowState {
    Starting,
    RequestingCodePair,
    RequestingToken,
    RefreshingToken,
    Stopping,
}

/// Mutable state shared by the worker and control calls.
#[derive(Debug)]
pub(crate) struct Shared {
    pub stopping: bool,
    pub auth_failure_reported: bool,
    pub network_reconnected: bool,
    /// Fresh authorization without a usable refresh token; permits one
    /// fallback from an expired grant to a new code pair.
    pub explicit_request: bool,
    pub authorization_state: AuthorizationState,
    pub locale: String,
    pub token: TokenState,
    pub worker_active: bool,
}

/// Everything the worker and the control surface share.
pub(crate) struct Inner {
    pub service: String,
    pub config: CblConfig,
    pub transport: Arc<dyn HttpTransport>,
    pub listener: Arc<dyn AuthorizationListener>,
    pub manager: Arc<dyn AuthorizationManager>,
    shared: Mutex<Shared>,
    wake: Notify,
}

impl Inner {
    pub fn new(
        service: String,
        config: CblConfig,
        transport: Arc<dyn HttpTransport>,
        listener: Arc<dyn AuthorizationListener>,
        manager: Arc<dyn AuthorizationManager>,
    ) -> Self {
        let shared = Shared {
            stopping: false,
            auth_failure_reported: false,
            network_reconnected: false,
            explicit_request: false,
            authorization_state: AuthorizationState::Unauthorized,
            locale: config.locale.clone(),
            token: TokenState::default(),
            worker_active: false,
        };
        Self {
            service,
            config,
            transport,
            listener,
            manager,
            shared: Mutex::new(shared),
            wake: Notify::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self, predicate: impl Fn(&Shared) -> bool) -> bool {
        let shared = self.lock();
        predicate(&shared)
    }

    /// Wake every waiter so it re-checks its predicate.
    pub fn wake(&self) {
        self.wake.notify_waiters();
    }

    pub fn request_stop(&self) {
        self.lock().stopping = true;
        self.wake();
    }

    fn is_stopping(&self) -> bool {
        self.check(|shared| shared.stopping)
    }

    /// Sleep until `deadline` unless `interrupted` becomes true first.
    ///
    /// Returns whether the predicate held when the wait ended.
    async fn wait_until(&self, deadline: Instant, interrupted: impl Fn(&Shared) -> bool) -> bool {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.check(&interrupted) {
                return true;
            }
            if Instant::now() >= deadline {
                tokio::task::yield_now().await;
                return false;
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return self.check(&interrupted),
            }
        }
    }

    /// Change the token state.
    ///
    /// The first `Refreshed` while authorizing publishes `Authorized`. The
    /// manager is told about every change when `notify_manager` is set.
    pub fn set_auth_state(&self, new_state: AuthState, notify_manager: bool) {
        let (authorized, error) = {
            let mut shared = self.lock();
            if shared.token.auth_state == new_state {
                return;
            }
            shared.token.auth_state = new_state;
            let authorized = new_state == AuthState::Refreshed
                && shared.authorization_state == AuthorizationState::Authorizing;
            if authorized {
                shared.authorization_state = AuthorizationState::Authorized;
            }
            (authorized, shared.token.last_error)
        };
        tracing::debug!(service = %self.service, state = %new_state, ?error, "Token state changed");

        if authorized {
            self.listener
                .on_authorization_state_changed(AuthorizationState::Authorized);
        }
        if notify_manager {
            self.manager.auth_state_changed(&self.service, new_state, error);
        }
    }

    fn record_error(&self, code: ErrorCode) {
        self.lock().token.last_error = Some(code);
    }

    pub fn store_refresh_token(&self, refresh_token: &str) {
        match encode_refresh_token(refresh_token) {
            Ok(data) => self.listener.set_authorization_data(REFRESH_TOKEN_KEY, &data),
            Err(err) => tracing::error!(error = %err, "Failed to encode refresh token"),
        }
    }

    pub fn clear_refresh_token(&self) {
        self.listener.set_authorization_data(REFRESH_TOKEN_KEY, "");
    }

    fn emit(&self, event: &AuthorizationEvent) {
        match event.to_json() {
            Ok(payload) => self.listener.on_event(&payload),
            Err(err) => tracing::error!(error = %err, "Failed to encode authorization event"),
        }
    }
}

/// The single worker task of a provider.
pub(crate) struct Worker {
    inner: Arc<Inner>,
    code_pair: Option<CodePair>,
    stop_reason: Option<AuthorizationErrorReason>,
}

impl Worker {
    pub fn new(inner: Arc<Inner>) -> Self {
        Self {
            inner,
            code_pair: None,
            stop_reason: None,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!(service = %self.inner.service, "Authorization flow started");
        let mut state = FlowState::Starting;
        while !self.inner.is_stopping() {
            let next = match state {
                FlowState::Starting => self.starting(),
                FlowState::RequestingCodePair => self.requesting_code_pair().await,
                FlowState::RequestingToken => self.requesting_token().await,
                FlowState::RefreshingToken => self.refreshing_token().await,
                FlowState::Stopping => self.stopping(),
            };
            if next != state {
                tracing::debug!(service = %self.inner.service, from = %state, to = %next, "Flow transition");
            }
            state = next;
        }
        self.inner.lock().worker_active = false;
        tracing::debug!(service = %self.inner.service, "Authorization flow exited");
    }

    fn stop_with(&mut self, reason: AuthorizationErrorReason) -> FlowState {
        self.stop_reason = Some(reason);
        FlowState::Stopping
    }

    fn fail_unrecoverable(&mut self, reason: AuthorizationErrorReason) -> FlowState {
        self.inner.set_auth_state(AuthState::UnrecoverableError, true);
        self.stop_with(reason)
    }

    /// Consume the explicit-request flag, returning its previous value.
    fn take_explicit_request(&self) -> bool {
        std::mem::take(&mut self.inner.lock().explicit_request)
    }

    fn starting(&mut self) -> FlowState {
        self.inner
            .listener
            .on_authorization_state_changed(AuthorizationState::Authorizing);
        if self.inner.lock().explicit_request {
            FlowState::RequestingCodePair
        } else {
            FlowState::RefreshingToken
        }
    }

    async fn requesting_code_pair(&mut self) -> FlowState {
        self.code_pair = None;
        self.inner.lock().token.retry_count = 0;
        let deadline = Instant::now() + self.inner.config.code_pair_request_timeout;

        loop {
            if self.inner.is_stopping() {
                return FlowState::Stopping;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(service = %self.inner.service, "Timed out requesting a code pair");
                return self.stop_with(AuthorizationErrorReason::Timeout);
            }

            let locale = self.inner.lock().locale.clone();
            let headers = code_pair_headers(accept_language(&locale));
            let form = code_pair_form(&self.inner.config);
            let timeout = clamp_to_deadline(self.inner.config.request_timeout, Some(deadline), now);
            let response = self
                .inner
                .transport
                .post(&self.inner.config.code_pair_url, &headers, &form, timeout)
                .await;

            match parse_code_pair_response(&response) {
                Ok(grant) => {
                    self.inner.record_error(ErrorCode::Success);
                    let code_pair = CodePair::from_grant(grant, now);
                    tracing::info!(
                        service = %self.inner.service,
                        user_code = %code_pair.user_code,
                        url = %code_pair.verification_uri,
                        "Code pair received"
                    );
                    self.inner.emit(&AuthorizationEvent::CblCode {
                        code: code_pair.user_code.clone(),
                        url: code_pair.verification_uri.clone(),
                    });
                    self.code_pair = Some(code_pair);
                    return FlowState::RequestingToken;
                }
                Err(code) => {
                    self.inner.record_error(code);
                    if !code.is_retryable_for_code_pair() {
                        tracing::error!(service = %self.inner.service, error = %code, "Code pair request rejected");
                        return self.fail_unrecoverable(AuthorizationErrorReason::UnknownError);
                    }
                    tracing::debug!(service = %self.inner.service, error = %code, "Code pair request failed");
                }
            }

            let delay = {
                let mut shared = self.inner.lock();
                let delay = retry_delay(shared.token.retry_count);
                shared.token.retry_count = shared.token.retry_count.saturating_add(1);
                delay
            };
            if self
                .inner
                .wait_until(Instant::now() + delay, |shared| shared.stopping)
                .await
            {
                return FlowState::Stopping;
            }
        }
    }

    async fn requesting_token(&mut self) -> FlowState {
        let Some(code_pair) = self.code_pair.clone() else {
            tracing::error!(service = %self.inner.service, "No code pair to poll with");
            return self.stop_with(AuthorizationErrorReason::UnknownError);
        };
        tracing::debug!(
            service = %self.inner.service,
            server_interval = ?code_pair.interval,
            "Polling for token"
        );
        let mut interval = MIN_POLL_INTERVAL;
        let form = token_form(&code_pair);

        loop {
            if self.inner.is_stopping() {
                return FlowState::Stopping;
            }
            let requested_at = Instant::now();
            if code_pair.is_expired(requested_at) {
                tracing::warn!(service = %self.inner.service, "Code pair expired before authorization");
                return self.stop_with(AuthorizationErrorReason::CodePairExpired);
            }

            let response = self
                .inner
                .transport
                .post(
                    &self.inner.config.token_url,
                    &[],
                    &form,
                    self.inner.config.request_timeout,
                )
                .await;

            match parse_token_response(&response) {
                Ok(grant) => {
                    self.inner.record_error(ErrorCode::Success);
                    self.accept_grant(&grant, requested_at);
                    self.inner.set_auth_state(AuthState::Refreshed, true);
                    if self.inner.config.enable_user_profile {
                        self.request_user_profile().await;
                    }
                    {
                        let mut shared = self.inner.lock();
                        shared.token.new_refresh_token = true;
                        shared.explicit_request = false;
                    }
                    self.code_pair = None;
                    return FlowState::RefreshingToken;
                }
                Err(code) => {
                    self.inner.record_error(code);
                    tracing::debug!(service = %self.inner.service, error = %code, "Token poll failed");
                    match code.band() {
                        ErrorBand::Success | ErrorBand::Transient => {
                            if code == ErrorCode::SlowDown {
                                interval = slow_down(interval);
                            }
                        }
                        ErrorBand::RestartCodePair => return FlowState::RequestingCodePair,
                        ErrorBand::GrantExpired => {
                            if self.take_explicit_request() {
                                return FlowState::RequestingCodePair;
                            }
                            return self
                                .fail_unrecoverable(AuthorizationErrorReason::AuthorizationExpired);
                        }
                        ErrorBand::Fatal => {
                            tracing::error!(service = %self.inner.service, error = %code, "Token request rejected");
                            return self.fail_unrecoverable(AuthorizationErrorReason::UnknownError);
                        }
                    }
                }
            }

            if self
                .inner
                .wait_until(Instant::now() + interval, |shared| shared.stopping)
                .await
            {
                return FlowState::Stopping;
            }
        }
    }

    async fn refreshing_token(&mut self) -> FlowState {
        self.inner.lock().token.retry_count = 0;

        loop {
            let (wake_at, at_expiry) = self.inner.lock().token.next_wake(Instant::now());
            self.inner
                .wait_until(wake_at, |shared| {
                    shared.stopping || shared.auth_failure_reported || shared.network_reconnected
                })
                .await;

            let now = Instant::now();
            let attempt = {
                let mut shared = self.inner.lock();
                if shared.stopping {
                    return FlowState::Stopping;
                }
                let forced = shared.auth_failure_reported || shared.network_reconnected;
                if at_expiry && !forced {
                    shared.token.access_token.clear();
                    shared.token.time_to_refresh = Some(now);
                    None
                } else {
                    shared.auth_failure_reported = false;
                    shared.network_reconnected = false;
                    let timeout = clamp_to_deadline(
                        self.inner.config.request_timeout,
                        shared.token.remaining(now),
                        now,
                    );
                    Some((std::mem::take(&mut shared.token.new_refresh_token), timeout))
                }
            };
            let Some((new_refresh_token, timeout)) = attempt else {
                tracing::info!(service = %self.inner.service, "Access token expired before it was refreshed");
                self.inner.set_auth_state(AuthState::Expired, true);
                continue;
            };

            let stored = self.inner.listener.get_authorization_data(REFRESH_TOKEN_KEY);
            let refresh_token = match decode_refresh_token(&stored) {
                Ok(Some(token)) => token,
                Ok(None) => {
                    tracing::error!(service = %self.inner.service, "No refresh token available");
                    return self.stop_with(AuthorizationErrorReason::UnknownError);
                }
                Err(err) => {
                    tracing::error!(service = %self.inner.service, error = %err, "Stored refresh token is invalid");
                    return self.stop_with(AuthorizationErrorReason::UnknownError);
                }
            };

            let form = refresh_form(&refresh_token, &self.inner.config.client_id);
            let response = self
                .inner
                .transport
                .post(&self.inner.config.token_url, &[], &form, timeout)
                .await;

            match parse_token_response(&response) {
                Ok(grant) => {
                    self.inner.record_error(ErrorCode::Success);
                    self.accept_grant(&grant, now);
                    self.inner.lock().token.retry_count = 0;
                    self.inner.set_auth_state(AuthState::Refreshed, true);
                }
                Err(code) => {
                    let code = if code == ErrorCode::InvalidRequest && new_refresh_token {
                        ErrorCode::InvalidCblClientId
                    } else {
                        code
                    };
                    self.inner.record_error(code);
                    match code.band() {
                        ErrorBand::Success | ErrorBand::Transient => {
                            let mut shared = self.inner.lock();
                            let delay = retry_delay(shared.token.retry_count);
                            shared.token.retry_count = shared.token.retry_count.saturating_add(1);
                            shared.token.time_to_refresh = Some(Instant::now() + delay);
                            tracing::debug!(
                                service = %self.inner.service,
                                error = %code,
                                retry = shared.token.retry_count,
                                delay_ms = delay.as_millis() as u64,
                                "Token refresh failed"
                            );
                        }
                        ErrorBand::RestartCodePair => {
                            self.inner.clear_refresh_token();
                            return FlowState::RequestingCodePair;
                        }
                        ErrorBand::GrantExpired => {
                            self.inner.clear_refresh_token();
                            if self.take_explicit_request() {
                                return FlowState::RequestingCodePair;
                            }
                            tracing::warn!(service = %self.inner.service, "Refresh token is no longer valid");
                            return self
                                .fail_unrecoverable(AuthorizationErrorReason::AuthorizationExpired);
                        }
                        ErrorBand::Fatal => {
                            tracing::error!(service = %self.inner.service, error = %code, "Token refresh rejected");
                            self.inner.clear_refresh_token();
                            return self.fail_unrecoverable(AuthorizationErrorReason::UnknownError);
                        }
                    }
                }
            }
        }
    }

    fn stopping(&mut self) -> FlowState {
        if let Some(reason) = self.stop_reason.take() {
            tracing::warn!(service = %self.inner.service, %reason, "Authorization flow stopped");
            self.inner.listener.on_authorization_error(reason);
            let changed = {
                let mut shared = self.inner.lock();
                let changed = shared.authorization_state != AuthorizationState::Unauthorized;
                shared.authorization_state = AuthorizationState::Unauthorized;
                shared.stopping = true;
                shared.worker_active = false;
                changed
            };
            if changed {
                self.inner
                    .listener
                    .on_authorization_state_changed(AuthorizationState::Unauthorized);
            }
        }
        self.inner.lock().stopping = true;
        FlowState::Stopping
    }

    fn accept_grant(&self, grant: &TokenGrant, requested_at: Instant) {
        self.inner.lock().token.accept(
            grant,
            requested_at,
            self.inner.config.access_token_refresh_head_start,
        );
        self.inner.store_refresh_token(&grant.refresh_token);
    }

    /// Best effort: failures are logged and otherwise ignored.
    async fn request_user_profile(&self) {
        let access_token = self.inner.lock().token.access_token.clone();
        let headers = user_profile_headers(&access_token);
        let response = self
            .inner
            .transport
            .get(
                &self.inner.config.user_profile_url,
                &headers,
                self.inner.config.request_timeout,
            )
            .await;
        match parse_user_profile(&response) {
            Some(profile) => self.inner.emit(&AuthorizationEvent::UserProfile {
                name: profile.name,
                email: profile.email,
            }),
            None => tracing::warn!(service = %self.inner.service, "User profile unavailable"),
        }
    }
}

