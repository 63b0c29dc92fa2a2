use std::time::Duration;

use async_trait::async_trait;

/// Status reported when no HTTP response was received.
pub const STATUS_UNDEFINED: u16 = 0;

/// Raw HTTP response as seen by the authorization flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// A response for a request that never completed.
    pub fn undefined() -> Self {
        Self::new(STATUS_UNDEFINED, "")
    }
}

/// HTTP client used for identity-provider requests.
///
/// Implementations must not fail: transport errors are reported as
/// [`HttpResponse::undefined`], which the flow treats as transient.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, headers: &[(String, String)], timeout: Duration) -> HttpResponse;

    /// POST `form` as `application/x-www-form-urlencoded`.
    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        form: &[(String, String)],
        timeout: Duration,
    ) -> HttpResponse;
}

/// [`HttpTransport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn send(&self, request: reqwest::RequestBuilder, url: &str) -> HttpResponse {
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(url, error = %err, "HTTP request failed");
                return HttpResponse::undefined();
            }
        };
        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => HttpResponse::new(status, body),
            Err(err) => {
                tracing::warn!(url, status, error = %err, "Failed to read HTTP response body");
                HttpResponse::new(status, "")
            }
        }
    }
}

fn apply_headers(
    mut request: reqwest::RequestBuilder,
    headers: &[(String, String)],
) -> reqwest::RequestBuilder {
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    request
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, headers: &[(String, String)], timeout: Duration) -> HttpResponse {
        let request = apply_headers(self.client.get(url), headers).timeout(timeout);
        self.send(request, url).await
    }

    async fn post(
        &self,
        url: &str,
        headers: &[(String, String)],
        form: &[(String, String)],
        timeout: Duration,
    ) -> HttpResponse {
        let request = apply_headers(self.client.post(url), headers)
            .form(form)
            .timeout(timeout);
        self.send(request, url).await
    }
}
