use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::error::AuthorizationErrorReason;
use super::flow::{Inner, Worker};
use super::listener::{
    parse_start_data, AuthorizationListener, AuthorizationManager, AuthorizationState,
    StartAuthorizationResult,
};
use super::token::AuthState;
use super::transport::{HttpTransport, ReqwestTransport};
use crate::config::CblConfig;
use crate::error::{CblError, Result};

/// Service name used when none is given.
pub const DEFAULT_SERVICE: &str = "alexa:cbl";

/// Code-based-linking authorization provider.
///
/// Owns one background worker that obtains a code pair, polls for a token
/// and then keeps the token refreshed. Every method takes `&self` and may be
/// called concurrently from any task.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use cbl_auth::auth::{
///     AuthorizationErrorReason, AuthorizationListener, AuthorizationManager,
///     AuthorizationState, CblAuthorizationProvider, StartAuthorizationResult,
/// };
/// use cbl_auth::config::CblConfig;
///
/// struct Console;
///
/// impl AuthorizationListener for Console {
///     fn on_authorization_state_changed(&self, state: AuthorizationState) {
///         println!("state: {state}");
///     }
///     fn on_authorization_error(&self, reason: AuthorizationErrorReason) {
///         println!("error: {reason}");
///     }
///     fn on_event(&self, payload: &str) {
///         println!("event: {payload}");
///     }
///     fn get_authorization_data(&self, _key: &str) -> String {
///         String::new()
///     }
///     fn set_authorization_data(&self, _key: &str, _data: &str) {}
/// }
///
/// struct AlwaysAccept;
///
/// impl AuthorizationManager for AlwaysAccept {
///     fn start_authorization(&self, _service: &str) -> StartAuthorizationResult {
///         StartAuthorizationResult::Accepted
///     }
///     fn logout(&self, _service: &str) -> bool {
///         true
///     }
/// }
///
/// # async fn run() -> cbl_auth::error::Result<()> {
/// let config = CblConfig::from_env()?;
/// let provider = CblAuthorizationProvider::new(config, Arc::new(Console), Arc::new(AlwaysAccept))?;
/// provider.start("").await?;
/// # Ok(())
/// # }
/// ```
pub struct CblAuthorizationProvider {
    inner: Arc<Inner>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl CblAuthorizationProvider {
    /// Create a provider for [`DEFAULT_SERVICE`] using [`ReqwestTransport`].
    pub fn new(
        config: CblConfig,
        listener: Arc<dyn AuthorizationListener>,
        manager: Arc<dyn AuthorizationManager>,
    ) -> Result<Self> {
        Self::with_transport(
            DEFAULT_SERVICE,
            config,
            Arc::new(ReqwestTransport::new()),
            listener,
            manager,
        )
    }

    pub fn with_transport(
        service: impl Into<String>,
        config: CblConfig,
        transport: Arc<dyn HttpTransport>,
        listener: Arc<dyn AuthorizationListener>,
        manager: Arc<dyn AuthorizationManager>,
    ) -> Result<Self> {
        config.validate()?;
        let inner = Inner::new(service.into(), config, transport, listener, manager);
        Ok(Self {
            inner: Arc::new(inner),
            worker: tokio::sync::Mutex::new(None),
        })
    }

    pub fn service(&self) -> &str {
        &self.inner.service
    }

    pub fn authorization_state(&self) -> AuthorizationState {
        self.inner.lock().authorization_state
    }

    /// Start authorizing.
    ///
    /// `data` is empty, `{}`, or `{"refreshToken": "..."}`. Without a refresh
    /// token a new code pair is requested. A denial by the authorization
    /// manager is reported to the listener; the call itself still succeeds.
    pub async fn start(&self, data: &str) -> Result<()> {
        let refresh_token = {
            let mut shared = self.inner.lock();
            if matches!(
                shared.authorization_state,
                AuthorizationState::Authorizing | AuthorizationState::Authorized
            ) {
                return Err(CblError::invalid_state(format!(
                    "authorization already {}",
                    shared.authorization_state
                )));
            }
            let refresh_token = parse_start_data(data)?;
            shared.explicit_request = refresh_token.is_none();
            shared.authorization_state = AuthorizationState::Authorizing;
            refresh_token
        };
        if let Some(refresh_token) = refresh_token {
            self.inner.store_refresh_token(&refresh_token);
        }

        if self.inner.manager.start_authorization(&self.inner.service)
            == StartAuthorizationResult::Failed
        {
            tracing::warn!(service = %self.inner.service, "Authorization manager denied start");
            self.inner.lock().authorization_state = AuthorizationState::Unauthorized;
            self.inner
                .listener
                .on_authorization_error(AuthorizationErrorReason::StartAuthorizationFailed);
            return Ok(());
        }

        let mut worker = self.worker.lock().await;
        if self.inner.lock().worker_active {
            tracing::debug!(service = %self.inner.service, "Authorization flow already running");
            return Ok(());
        }
        if let Some(previous) = worker.take() {
            if let Err(err) = previous.await {
                tracing::error!(service = %self.inner.service, error = %err, "Previous authorization flow panicked");
            }
        }
        {
            let mut shared = self.inner.lock();
            if shared.authorization_state != AuthorizationState::Authorizing {
                tracing::debug!(
                    service = %self.inner.service,
                    state = %shared.authorization_state,
                    "Start superseded before the flow was spawned"
                );
                return Ok(());
            }
            shared.stopping = false;
            shared.auth_failure_reported = false;
            shared.network_reconnected = false;
            shared.worker_active = true;
        }
        *worker = Some(tokio::spawn(Worker::new(Arc::clone(&self.inner)).run()));
        Ok(())
    }

    /// Stop an authorization in progress, or the refresh loop.
    ///
    /// Returns once the worker has exited. Cancelling while authorizing
    /// returns to `Unauthorized`.
    pub async fn cancel(&self) -> Result<()> {
        if self.authorization_state() == AuthorizationState::Unauthorized {
            return Err(CblError::invalid_state("nothing to cancel while unauthorized"));
        }
        self.stop_worker().await;

        let reset = {
            let mut shared = self.inner.lock();
            let reset = shared.authorization_state == AuthorizationState::Authorizing;
            if reset {
                shared.authorization_state = AuthorizationState::Unauthorized;
            }
            reset
        };
        if reset {
            self.inner
                .listener
                .on_authorization_state_changed(AuthorizationState::Unauthorized);
        }
        Ok(())
    }

    /// Stop the worker and ask the authorization manager to log out.
    ///
    /// The manager call runs on the blocking pool; the manager is expected to
    /// call [`Self::deregister`], which moves the state to `Unauthorized`.
    pub async fn logout(&self) -> Result<()> {
        if self.authorization_state() == AuthorizationState::Authorizing {
            return Err(CblError::invalid_state("logout is not allowed while authorizing"));
        }
        self.stop_worker().await;

        let manager = Arc::clone(&self.inner.manager);
        let listener = Arc::clone(&self.inner.listener);
        let service = self.inner.service.clone();
        tokio::task::spawn_blocking(move || {
            if !manager.logout(&service) {
                tracing::error!(%service, "Logout failed");
                listener.on_authorization_error(AuthorizationErrorReason::LogoutFailed);
            }
        });
        Ok(())
    }

    /// Forced teardown: stop the worker, drop both tokens and become
    /// `Unauthorized` without involving the authorization manager.
    pub async fn deregister(&self) {
        self.stop_worker().await;
        {
            let mut shared = self.inner.lock();
            shared.token.clear();
            shared.explicit_request = false;
        }
        self.inner.clear_refresh_token();
        self.inner.set_auth_state(AuthState::Uninitialized, false);

        self.inner.lock().authorization_state = AuthorizationState::Unauthorized;
        self.inner
            .listener
            .on_authorization_state_changed(AuthorizationState::Unauthorized);
    }

    /// A request authenticated with `token` was rejected downstream.
    ///
    /// An empty `token` matches the current one. Wakes the refresh loop.
    pub fn report_auth_failure(&self, token: &str) {
        let matched = {
            let mut shared = self.inner.lock();
            let matched = token.is_empty() || token == shared.token.access_token;
            if matched {
                shared.auth_failure_reported = true;
            }
            matched
        };
        if matched {
            tracing::debug!(service = %self.inner.service, "Auth failure reported");
            self.inner.wake();
        }
    }

    /// The current access token, empty while no valid token is held.
    pub fn access_token(&self) -> Result<String> {
        let shared = self.inner.lock();
        if shared.authorization_state == AuthorizationState::Unauthorized {
            return Err(CblError::invalid_state("no access token while unauthorized"));
        }
        if shared.token.is_valid(Instant::now()) {
            Ok(shared.token.access_token.clone())
        } else {
            Ok(String::new())
        }
    }

    /// Locale used for the `Accept-Language` of later code-pair requests.
    pub fn locale_changed(&self, locale: impl Into<String>) {
        let locale = locale.into();
        tracing::debug!(service = %self.inner.service, %locale, "Locale changed");
        self.inner.lock().locale = locale;
    }

    /// Connectivity came back: retry a backed-off refresh now.
    pub fn network_reconnected(&self) {
        {
            let mut shared = self.inner.lock();
            shared.network_reconnected = true;
            shared.token.retry_count = 0;
        }
        self.inner.wake();
    }

    /// Inbound events are not used by this provider.
    pub fn send_event(&self, payload: &str) -> Result<()> {
        tracing::debug!(service = %self.inner.service, len = payload.len(), "Ignoring inbound event");
        Ok(())
    }

    /// Stop the worker without changing the authorization state.
    pub async fn shutdown(&self) {
        self.stop_worker().await;
    }

    async fn stop_worker(&self) {
        let mut worker = self.worker.lock().await;
        self.inner.request_stop();
        if let Some(handle) = worker.take() {
            if let Err(err) = handle.await {
                tracing::error!(service = %self.inner.service, error = %err, "Authorization flow panicked");
            }
        }
        self.inner.lock().worker_active = false;
    }
}

impl Drop for CblAuthorizationProvider {
    fn drop(&mut self) {
        self.inner.request_stop();
    }
}
