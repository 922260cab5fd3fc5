//! # HTTP-backed client
//!
//! [`HttpClient`] glues a [`Codec`] to a [`Transport`]: it builds the
//! per-request tool-name mapping, encodes, attaches credentials, sends and
//! decodes. One struct serves every backend; what differs is the codec, the
//! base URL and the [`Auth`] scheme the registry picks.

use std::sync::Arc;

use async_trait::async_trait;
use switchboard_core::{
    ApiKey, InvocationResolver, LlmClient, LlmError, ModelSummary, ProviderKind, Request, Response,
    validate_tool_names,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::codec::{Codec, WireRequest};
use crate::error_parsing::backend_error;
use crate::tool_names::ToolNameMapping;
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, Transport};

/// How credentials travel.
#[derive(Clone, Debug)]
pub enum Auth {
    /// No credentials (local servers).
    None,
    /// `Authorization: Bearer <key>`.
    Bearer(ApiKey),
    /// The raw key in a named header (`x-api-key`, `api-key`, `x-goog-api-key`).
    Header {
        /// Header name.
        name: &'static str,
        /// Key.
        key: ApiKey,
    },
}

impl Auth {
    /// Key in a named header.
    pub fn header(name: &'static str, key: ApiKey) -> Self {
        Self::Header { name, key }
    }

    fn apply(&self, request: HttpRequest) -> HttpRequest {
        match self {
            Self::None => request,
            Self::Bearer(key) => request.header("authorization", format!("Bearer {}", key.expose())),
            Self::Header { name, key } => request.header(*name, key.expose()),
        }
    }
}

/// Client speaking one backend's wire protocol over HTTP.
pub struct HttpClient {
    kind: ProviderKind,
    model: String,
    base_url: String,
    auth: Auth,
    headers: Vec<(String, String)>,
    codec: Arc<dyn Codec>,
    transport: Arc<dyn Transport>,
    resolver: Option<Arc<dyn InvocationResolver>>,
}

impl HttpClient {
    /// Client for `kind` sending to `base_url` with `codec`.
    pub fn new(
        kind: ProviderKind,
        model: impl Into<String>,
        base_url: impl Into<String>,
        codec: Arc<dyn Codec>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            kind,
            model: model.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: Auth::None,
            headers: Vec::new(),
            codec,
            transport,
            resolver: None,
        }
    }

    /// Use `auth` for every request.
    #[must_use]
    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    /// Send `name: value` with every request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Expose `resolver` for invocation-alias retries.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn InvocationResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn http_request(&self, wire: &WireRequest) -> HttpRequest {
        let url = wire.url(&self.base_url);
        let mut request = match (wire.method, &wire.body) {
            (HttpMethod::Post, Some(body)) => HttpRequest::post_json(url, body),
            (HttpMethod::Post, None) => HttpRequest {
                method: HttpMethod::Post,
                ..HttpRequest::get(url)
            },
            (HttpMethod::Get, _) => HttpRequest::get(url),
        };
        request = request.header("accept", "application/json");
        for (name, value) in &self.headers {
            request = request.header(name.clone(), value.clone());
        }
        self.auth.apply(request)
    }

    async fn round_trip(&self, wire: &WireRequest, cancel: &CancellationToken) -> Result<HttpResponse, LlmError> {
        let response = self.transport.send(self.http_request(wire), cancel).await?;
        if !response.is_success() {
            return Err(backend_error(response.status, &response.text()));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for HttpClient {
    fn provider_kind(&self) -> ProviderKind {
        self.kind
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(provider = %self.kind, model = tracing::field::Empty))]
    async fn send(&self, request: &Request) -> Result<Response, LlmError> {
        if request.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        let model = if request.model.is_empty() {
            self.model.as_str()
        } else {
            request.model.as_str()
        };
        let _ = tracing::Span::current().record("model", model);

        validate_tool_names(request.tool_list())?;
        let names = ToolNameMapping::new(request.tool_list(), self.codec.name_policy());
        let wire = self.codec.encode(request, model, &names)?;
        debug!(path = %wire.path, tools = names.len(), "sending request");

        let response = self.round_trip(&wire, &request.cancel_token()).await?;
        self.codec.decode(&response.json()?, &names)
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>, LlmError> {
        let wire = self.codec.models_request();
        let response = self.round_trip(&wire, &CancellationToken::new()).await?;
        self.codec.decode_models(&response.json()?)
    }

    fn invocation_resolver(&self) -> Option<Arc<dyn InvocationResolver>> {
        self.resolver.clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
