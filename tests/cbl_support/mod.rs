#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cbl_auth::auth::{
    AuthState, AuthorizationErrorReason, AuthorizationListener, AuthorizationManager,
    AuthorizationState, CblAuthorizationProvider, ErrorCode, HttpResponse, HttpTransport,
    StartAuthorizationResult, REFRESH_TOKEN_KEY,
};
use cbl_auth::config::CblConfig;
use serde_json::json;
use tokio::time::Instant;

pub const CODE_PAIR_URL: &str = "https://idp.test/auth/O2/create/codepair";
pub const TOKEN_URL: &str = "https://idp.test/auth/O2/token";
pub const PROFILE_URL: &str = "https://idp.test/user/profile";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    CodePair,
    TokenPoll,
    Refresh,
    Profile,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub kind: Kind,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub form: Vec<(String, String)>,
    pub timeout: Duration,
    pub at: Instant,
}

impl Request {
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

type Responder = Box<dyn FnMut(&Request) -> HttpResponse + Send>;

/// Transport answering from per-request-kind scripts.
///
/// A scripted sequence repeats its last response once exhausted. Kinds
/// without a script answer with an undefined (status 0) response.
#[derive(Default)]
pub struct ScriptedTransport {
    responders: Mutex<HashMap<Kind, Responder>>,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, kind: Kind, responses: Vec<HttpResponse>) -> Self {
        let mut remaining = responses.into_iter().collect::<std::collections::VecDeque<_>>();
        let mut last = HttpResponse::undefined();
        self.respond_with(kind, move |_| {
            if let Some(next) = remaining.pop_front() {
                last = next;
            }
            last.clone()
        })
    }

    pub fn respond_with(
        self,
        kind: Kind,
        responder: impl FnMut(&Request) -> HttpResponse + Send + 'static,
    ) -> Self {
        self.responders
            .lock()
            .expect("responders lock")
            .insert(kind, Box::new(responder));
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn requests_of(&self, kind: Kind) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|request| request.kind == kind)
            .collect()
    }

    pub fn count(&self, kind: Kind) -> usize {
        self.requests_of(kind).len()
    }

    fn answer(&self, request: Request) -> HttpResponse {
        let response = match self
            .responders
            .lock()
            .expect("responders lock")
            .get_mut(&request.kind)
        {
            Some(responder) => responder(&request),
            None => HttpResponse::undefined(),
        };
        self.requests.lock().expect("requests lock").push(request);
        response
    }
}

fn classify(url: &str, form: &[(String, String)]) -> Kind {
    if url == CODE_PAIR_URL {
        return Kind::CodePair;
    }
    let grant = form
        .iter()
        .find(|(k, _)| k == "grant_type")
        .map(|(_, v)| v.as_str());
    match grant {
        Some("refresh_token") => Kind::Refresh,
        _ => Kind::TokenPoll,
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn get(&self, url: &str, headers: &[(String, String)], timeout: Duration) -> HttpResponse {
        self.answer(Request {
            kind: Kind::Profile,
            url: url.to_string(),
            headers: headers.to_vec(),
            form: Vec::new(),
            timeout,
            at: Instant::now(),
        })
    }

    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        form: &[(String, String)],
        timeout: Duration,
    ) -> HttpResponse {
        self.answer(Request {
            kind: classify(url, form),
            url: url.to_string(),
            headers: headers.to_vec(),
            form: form.to_vec(),
            timeout,
            at: Instant::now(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerCall {
    State(AuthorizationState),
    Error(AuthorizationErrorReason),
    Event(String),
}

/// Listener recording every callback, with in-memory authorization data.
#[derive(Default)]
pub struct RecordingListener {
    calls: Mutex<Vec<ListenerCall>>,
    data: Mutex<HashMap<String, String>>,
    writes: Mutex<Vec<(String, String)>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_refresh_token(&self, refresh_token: &str) {
        self.data.lock().expect("data lock").insert(
            REFRESH_TOKEN_KEY.to_string(),
            json!({ "refreshToken": refresh_token }).to_string(),
        );
    }

    pub fn calls(&self) -> Vec<ListenerCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn states(&self) -> Vec<AuthorizationState> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ListenerCall::State(state) => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<AuthorizationErrorReason> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ListenerCall::Error(reason) => Some(reason),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<serde_json::Value> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ListenerCall::Event(payload) => serde_json::from_str(&payload).ok(),
                _ => None,
            })
            .collect()
    }

    pub fn stored(&self, key: &str) -> Option<String> {
        self.data.lock().expect("data lock").get(key).cloned()
    }

    /// The refresh token currently in storage, if any.
    pub fn stored_refresh_token(&self) -> Option<String> {
        let raw = self.stored(REFRESH_TOKEN_KEY)?;
        if raw.is_empty() {
            return None;
        }
        let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
        value["refreshToken"].as_str().map(str::to_string)
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().expect("writes lock").clone()
    }

    fn record(&self, call: ListenerCall) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

impl AuthorizationListener for RecordingListener {
    fn on_authorization_state_changed(&self, state: AuthorizationState) {
        self.record(ListenerCall::State(state));
    }

    fn on_authorization_error(&self, reason: AuthorizationErrorReason) {
        self.record(ListenerCall::Error(reason));
    }

    fn on_event(&self, payload: &str) {
        self.record(ListenerCall::Event(payload.to_string()));
    }

    fn get_authorization_data(&self, key: &str) -> String {
        self.stored(key).unwrap_or_default()
    }

    fn set_authorization_data(&self, key: &str, data: &str) {
        self.writes
            .lock()
            .expect("writes lock")
            .push((key.to_string(), data.to_string()));
        self.data
            .lock()
            .expect("data lock")
            .insert(key.to_string(), data.to_string());
    }
}

pub struct RecordingManager {
    start_result: StartAuthorizationResult,
    logout_result: bool,
    auth_states: Mutex<Vec<(AuthState, Option<ErrorCode>)>>,
    logouts: Mutex<Vec<String>>,
}

impl RecordingManager {
    pub fn accepting() -> Self {
        Self::new(StartAuthorizationResult::Accepted, true)
    }

    pub fn new(start_result: StartAuthorizationResult, logout_result: bool) -> Self {
        Self {
            start_result,
            logout_result,
            auth_states: Mutex::new(Vec::new()),
            logouts: Mutex::new(Vec::new()),
        }
    }

    pub fn auth_states(&self) -> Vec<AuthState> {
        self.auth_states
            .lock()
            .expect("states lock")
            .iter()
            .map(|(state, _)| *state)
            .collect()
    }

    pub fn last_error(&self) -> Option<ErrorCode> {
        self.auth_states
            .lock()
            .expect("states lock")
            .last()
            .and_then(|(_, error)| *error)
    }

    pub fn logouts(&self) -> Vec<String> {
        self.logouts.lock().expect("logouts lock").clone()
    }
}

impl AuthorizationManager for RecordingManager {
    fn start_authorization(&self, _service: &str) -> StartAuthorizationResult {
        self.start_result
    }

    fn logout(&self, service: &str) -> bool {
        self.logouts
            .lock()
            .expect("logouts lock")
            .push(service.to_string());
        self.logout_result
    }

    fn auth_state_changed(&self, _service: &str, state: AuthState, error: Option<ErrorCode>) {
        self.auth_states
            .lock()
            .expect("states lock")
            .push((state, error));
    }
}

pub fn config() -> CblConfig {
    CblConfig::builder()
        .client_id("amzn1.application-oa2-client.test")
        .product_id("test_device")
        .device_serial_number("serial-1")
        .code_pair_url(CODE_PAIR_URL)
        .token_url(TOKEN_URL)
        .user_profile_url(PROFILE_URL)
        .access_token_refresh_head_start(Duration::from_secs(600))
        .build()
}

pub struct Harness {
    pub provider: CblAuthorizationProvider,
    pub transport: Arc<ScriptedTransport>,
    pub listener: Arc<RecordingListener>,
    pub manager: Arc<RecordingManager>,
}

pub fn harness(transport: ScriptedTransport) -> Harness {
    harness_with(config(), transport, RecordingManager::accepting())
}

pub fn harness_with(
    config: CblConfig,
    transport: ScriptedTransport,
    manager: RecordingManager,
) -> Harness {
    let transport = Arc::new(transport);
    let listener = Arc::new(RecordingListener::new());
    let manager = Arc::new(manager);
    let provider = CblAuthorizationProvider::with_transport(
        "alexa:cbl",
        config,
        transport.clone(),
        listener.clone(),
        manager.clone(),
    )
    .expect("valid config");
    Harness {
        provider,
        transport,
        listener,
        manager,
    }
}

pub fn code_pair_ok(expires_in: u64) -> HttpResponse {
    HttpResponse::new(
        200,
        json!({
            "user_code": "CBL123",
            "device_code": "device-code-1",
            "verification_uri": "https://amazon.com/us/code",
            "expires_in": expires_in,
            "interval": 5
        })
        .to_string(),
    )
}

pub fn token_ok(access_token: &str, refresh_token: &str, expires_in: u64) -> HttpResponse {
    HttpResponse::new(
        200,
        json!({
            "access_token": access_token,
            "refresh_token": refresh_token,
            "token_type": "bearer",
            "expires_in": expires_in
        })
        .to_string(),
    )
}

pub fn error(status: u16, name: &str) -> HttpResponse {
    HttpResponse::new(status, json!({ "error": name }).to_string())
}

/// Poll `condition` on the (usually paused) clock until it holds.
pub async fn eventually(within: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + within;
    while !condition() {
        assert!(
            Instant::now() < deadline,
            "condition not met within {within:?}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

