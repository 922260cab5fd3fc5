//! # HTTP transport
//!
//! The seam between codecs and the network. Codecs produce JSON; the
//! [`Transport`] moves bytes and honors the caller's cancellation token. A
//! token that has already fired short-circuits before any I/O.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use switchboard_core::LlmError;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// HTTP verb.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST.
    Post,
}

/// Outbound request.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// Verb.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Header pairs.
    pub headers: Vec<(String, String)>,
    /// Body bytes (JSON or binary).
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// A GET without body.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// A POST carrying `body` as JSON.
    pub fn post_json(url: impl Into<String>, body: &Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: vec![("content-type".into(), "application/json".into())],
            body: Some(body.to_string().into_bytes()),
        }
    }

    /// Add a header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Value of a header, case-insensitive.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Inbound response.
#[derive(Clone, Debug, Default)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as UTF-8, lossy.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body parsed as JSON.
    pub fn json(&self) -> Result<Value, LlmError> {
        serde_json::from_slice(&self.body).map_err(|e| LlmError::Decode(format!("invalid JSON body: {e}")))
    }
}

/// Moves one request over the wire.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `request`, aborting promptly with [`LlmError::Cancelled`] when `cancel` fires.
    async fn send(&self, request: HttpRequest, cancel: &CancellationToken) -> Result<HttpResponse, LlmError>;
}

/// `reqwest`-backed transport.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestTransport {
    /// Transport with a connect timeout and no overall timeout.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    /// Reuse an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, LlmError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| LlmError::Network(e.to_string()))?;
        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip_all, fields(method = ?request.method, url = %request.url))]
    async fn send(&self, request: HttpRequest, cancel: &CancellationToken) -> Result<HttpResponse, LlmError> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(LlmError::Cancelled),
            result = self.execute(request) => result,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn posts_json_and_reads_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/echo"))
            .and(header("x-test", "1"))
            .and(body_json(json!({"a": 1})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new();
        let req = HttpRequest::post_json(format!("{}/echo", server.uri()), &json!({"a": 1})).header("x-test", "1");
        let resp = transport.send(req, &CancellationToken::new()).await.unwrap();
        assert_eq!(resp.status, 201);
        assert!(resp.is_success());
        assert_eq!(resp.json().unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn error_status_is_returned_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let resp = ReqwestTransport::new()
            .send(HttpRequest::get(server.uri()), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.status, 503);
        assert_eq!(resp.text(), "busy");
    }

    #[tokio::test]
    async fn pre_cancelled_token_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        token.cancel();
        let result = ReqwestTransport::new().send(HttpRequest::get(server.uri()), &token).await;
        assert_matches!(result, Err(LlmError::Cancelled));
    }

    #[tokio::test]
    async fn cancel_aborts_in_flight_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let trigger = token.clone();
        let _ = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = ReqwestTransport::new().send(HttpRequest::get(server.uri()), &token).await;
        assert_matches!(result, Err(LlmError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn connection_failure_is_network_error() {
        let result = ReqwestTransport::new()
            .send(HttpRequest::get("http://127.0.0.1:1/"), &CancellationToken::new())
            .await;
        assert_matches!(result, Err(LlmError::Network(_)));
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req = HttpRequest::post_json("http://x", &json!({}));
        assert_eq!(req.header_value("Content-Type"), Some("application/json"));
        assert!(req.header_value("authorization").is_none());
    }
}
