//! # Client contract
//!
//! [`LlmClient`] is the uniform handle every backend is exposed through.
//! [`ProviderConfig`] binds credentials, endpoint and model to a
//! [`ProviderKind`]; the registry turns one into the other.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::content::Message;
use crate::errors::LlmError;
use crate::messages::{Request, Response};
use crate::security::ApiKey;

// ─────────────────────────────────────────────────────────────────────────────
// ProviderKind
// ─────────────────────────────────────────────────────────────────────────────

/// Supported backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Anthropic Messages API.
    Anthropic,
    /// OpenAI Chat Completions.
    #[serde(rename = "openai")]
    OpenAi,
    /// Azure OpenAI deployments.
    #[serde(rename = "azure_openai")]
    AzureOpenAi,
    /// OpenRouter.
    #[serde(rename = "openrouter")]
    OpenRouter,
    /// DeepSeek.
    #[serde(rename = "deepseek")]
    DeepSeek,
    /// Mistral La Plateforme.
    Mistral,
    /// Groq.
    Groq,
    /// xAI.
    Xai,
    /// Local Ollama server (OpenAI-compatible endpoint).
    Ollama,
    /// Local LM Studio server.
    #[serde(rename = "lmstudio")]
    LmStudio,
    /// Any other OpenAI-compatible endpoint.
    #[serde(rename = "openai_compatible")]
    OpenAiCompatible,
    /// Google Gemini `generateContent`.
    Gemini,
    /// AWS Bedrock Converse.
    Bedrock,
}

impl ProviderKind {
    /// Every kind, in registration order.
    pub const ALL: [Self; 13] = [
        Self::Anthropic,
        Self::OpenAi,
        Self::AzureOpenAi,
        Self::OpenRouter,
        Self::DeepSeek,
        Self::Mistral,
        Self::Groq,
        Self::Xai,
        Self::Ollama,
        Self::LmStudio,
        Self::OpenAiCompatible,
        Self::Gemini,
        Self::Bedrock,
    ];

    /// Stable identifier used in settings and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::AzureOpenAi => "azure_openai",
            Self::OpenRouter => "openrouter",
            Self::DeepSeek => "deepseek",
            Self::Mistral => "mistral",
            Self::Groq => "groq",
            Self::Xai => "xai",
            Self::Ollama => "ollama",
            Self::LmStudio => "lmstudio",
            Self::OpenAiCompatible => "openai_compatible",
            Self::Gemini => "gemini",
            Self::Bedrock => "bedrock",
        }
    }

    /// Environment variable conventionally holding this backend's key.
    pub fn api_key_env_var(self) -> Option<&'static str> {
        match self {
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::OpenAi => Some("OPENAI_API_KEY"),
            Self::AzureOpenAi => Some("AZURE_OPENAI_API_KEY"),
            Self::OpenRouter => Some("OPENROUTER_API_KEY"),
            Self::DeepSeek => Some("DEEPSEEK_API_KEY"),
            Self::Mistral => Some("MISTRAL_API_KEY"),
            Self::Groq => Some("GROQ_API_KEY"),
            Self::Xai => Some("XAI_API_KEY"),
            Self::Gemini => Some("GEMINI_API_KEY"),
            Self::Bedrock => Some("AWS_BEARER_TOKEN_BEDROCK"),
            Self::Ollama | Self::LmStudio | Self::OpenAiCompatible => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == needle)
            .ok_or_else(|| LlmError::configuration("provider", format!("unknown provider `{s}`")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ProviderConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Everything needed to construct a client for one backend.
#[derive(Clone, Debug)]
pub struct ProviderConfig {
    /// Which backend.
    pub kind: ProviderKind,
    /// Model identifier; the registry fills a per-backend default when unset.
    pub model: Option<String>,
    /// API key or bearer token.
    pub api_key: Option<ApiKey>,
    /// Endpoint override.
    pub base_url: Option<String>,
    /// Cloud region (Bedrock).
    pub region: Option<String>,
    /// API version (Azure).
    pub api_version: Option<String>,
    /// Extra headers sent on every request.
    pub extra_headers: BTreeMap<String, String>,
}

impl ProviderConfig {
    /// Empty config for `kind`.
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            model: None,
            api_key: None,
            base_url: None,
            region: None,
            api_version: None,
            extra_headers: BTreeMap::new(),
        }
    }

    /// Set the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(ApiKey::new(key));
        self
    }

    /// Set the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Set the API version.
    #[must_use]
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = Some(version.into());
        self
    }

    /// Add a header sent on every request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.extra_headers.insert(name.into(), value.into());
        self
    }

    /// The key, if present and not blank.
    pub fn usable_api_key(&self) -> Option<&ApiKey> {
        self.api_key.as_ref().filter(|k| !k.is_blank())
    }

    /// Non-empty base URL, trailing slash removed.
    pub fn usable_base_url(&self) -> Option<String> {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(|u| u.trim_end_matches('/').to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client trait
// ─────────────────────────────────────────────────────────────────────────────

/// Outcome of [`LlmClient::test_connection`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Whether a minimal request round-tripped.
    pub success: bool,
    /// Failure text when it did not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionStatus {
    /// A successful probe.
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// A failed probe.
    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

/// One entry of a backend's model listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    /// Identifier to put in [`Request::model`].
    pub id: String,
    /// Human-readable name, when the backend provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Maps a model identifier to a concrete invocation identifier.
#[async_trait]
pub trait InvocationResolver: Send + Sync {
    /// Resolve `model`, returning it unchanged when already concrete.
    async fn resolve(&self, model: &str, cancel: &CancellationToken) -> Result<String, LlmError>;

    /// Account and region the resolutions hold for. Aliases learned under
    /// one scope are never reused under another.
    fn scope(&self) -> Option<String> {
        None
    }
}

/// Uniform handle over one configured backend.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Backend this client talks to.
    fn provider_kind(&self) -> ProviderKind;

    /// Configured model, used when a request leaves `model` empty.
    fn model(&self) -> &str;

    /// Send one request and decode the reply.
    async fn send(&self, request: &Request) -> Result<Response, LlmError>;

    /// List models the backend offers.
    async fn list_models(&self) -> Result<Vec<ModelSummary>, LlmError>;

    /// Probe the backend with a minimal request.
    async fn test_connection(&self) -> ConnectionStatus {
        let probe = Request::new(self.model(), 16).with_message(Message::user("ping"));
        match self.send(&probe).await {
            Ok(_) => ConnectionStatus::ok(),
            Err(err) => ConnectionStatus::failed(err),
        }
    }

    /// Resolver for backends whose model ids need an invocation alias.
    fn invocation_resolver(&self) -> Option<Arc<dyn InvocationResolver>> {
        None
    }

    /// Marker set by the resilience wrapper.
    fn is_resilient(&self) -> bool {
        false
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
