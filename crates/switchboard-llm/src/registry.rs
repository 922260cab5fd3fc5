//! # Provider registry
//!
//! One [`Registration`] per [`ProviderKind`] replaces a central switch:
//! each carries the backend's defaults, its credential requirements and a
//! constructor. [`ProviderRegistry::create_client`] validates the config,
//! fills defaults, builds the client and wraps it in [`ResilientClient`]
//! exactly once.
//!
//! The registry owns the [`SharedState`] every client it creates reports to,
//! so learned limits and resolved aliases carry across clients.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use switchboard_core::{ApiKey, LlmClient, LlmError, ProviderConfig, ProviderKind};
use switchboard_settings::Settings;
use switchboard_telemetry::CallSink;
use tracing::{debug, info};

use crate::anthropic::{self, AnthropicCodec};
use crate::bedrock::{self, BedrockCodec, InferenceProfileSource};
use crate::codec::Codec;
use crate::gemini::GeminiCodec;
use crate::http_client::{Auth, HttpClient};
use crate::openai::{AZURE_API_VERSION, OpenAiCodec, TokenField};
use crate::resilient::{ResilienceConfig, ResilientClient, SharedState};
use crate::resolver::ResourceResolver;
use crate::transport::{ReqwestTransport, Transport};

/// Builds a client from a fully resolved config.
///
/// The config handed in always carries a model, and a base URL whenever the
/// registration declares a default or requires one.
pub type Constructor =
    Arc<dyn Fn(&ProviderConfig, &ClientContext) -> Result<Arc<dyn LlmClient>, LlmError> + Send + Sync>;

/// What a constructor may use besides its config.
#[derive(Clone)]
pub struct ClientContext {
    /// Transport shared by every client of the registry.
    pub transport: Arc<dyn Transport>,
    /// Registry-wide state.
    pub state: Arc<SharedState>,
}

/// Defaults, requirements and constructor for one backend.
#[derive(Clone)]
pub struct Registration {
    /// Backend this registration serves.
    pub kind: ProviderKind,
    /// Model used when the config names none.
    pub default_model: Option<&'static str>,
    /// Endpoint used when the config names none.
    pub default_base_url: Option<&'static str>,
    /// Whether a non-blank `api_key` is mandatory.
    pub requires_api_key: bool,
    /// Whether the config must carry its own `base_url`.
    pub requires_base_url: bool,
    constructor: Constructor,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("kind", &self.kind)
            .field("default_model", &self.default_model)
            .field("default_base_url", &self.default_base_url)
            .field("requires_api_key", &self.requires_api_key)
            .field("requires_base_url", &self.requires_base_url)
            .finish_non_exhaustive()
    }
}

impl Registration {
    /// Registration for `kind` built by `constructor`, with no defaults and
    /// no requirements.
    pub fn new<F>(kind: ProviderKind, constructor: F) -> Self
    where
        F: Fn(&ProviderConfig, &ClientContext) -> Result<Arc<dyn LlmClient>, LlmError> + Send + Sync + 'static,
    {
        Self {
            kind,
            default_model: None,
            default_base_url: None,
            requires_api_key: false,
            requires_base_url: false,
            constructor: Arc::new(constructor),
        }
    }

    /// Model used when the config names none.
    #[must_use]
    pub fn default_model(mut self, model: &'static str) -> Self {
        self.default_model = Some(model);
        self
    }

    /// Endpoint used when the config names none.
    #[must_use]
    pub fn default_base_url(mut self, url: &'static str) -> Self {
        self.default_base_url = Some(url);
        self
    }

    /// Reject configs without a usable API key.
    #[must_use]
    pub fn requires_api_key(mut self) -> Self {
        self.requires_api_key = true;
        self
    }

    /// Reject configs without their own base URL.
    #[must_use]
    pub fn requires_base_url(mut self) -> Self {
        self.requires_base_url = true;
        self
    }

    /// Check requirements and fill defaults.
    fn resolve(&self, config: &ProviderConfig) -> Result<ProviderConfig, LlmError> {
        let mut resolved = config.clone();

        if self.requires_api_key && config.usable_api_key().is_none() {
            return Err(LlmError::missing("api_key"));
        }
        resolved.api_key = config.usable_api_key().cloned();

        resolved.base_url = match config.usable_base_url() {
            Some(url) => Some(url),
            None if self.requires_base_url => return Err(LlmError::missing("base_url")),
            None => self.default_base_url.map(str::to_string),
        };

        let model = config
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .or(self.default_model)
            .ok_or_else(|| LlmError::missing("model"))?;
        resolved.model = Some(model.to_string());

        Ok(resolved)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Constructors keyed by backend, plus the state their clients share.
pub struct ProviderRegistry {
    registrations: HashMap<ProviderKind, Registration>,
    context: ClientContext,
}

impl ProviderRegistry {
    /// Empty registry sending over `transport` and reporting to `state`.
    pub fn new(transport: Arc<dyn Transport>, state: Arc<SharedState>) -> Self {
        Self {
            registrations: HashMap::new(),
            context: ClientContext { transport, state },
        }
    }

    /// Registry with every built-in backend, the reqwest transport and
    /// default resilience tuning.
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(ReqwestTransport::new()), Arc::new(SharedState::default())).register_defaults()
    }

    /// Registry with every built-in backend, tuned from `settings` and
    /// reporting calls to `sink`.
    pub fn from_settings(settings: &Settings, sink: Arc<dyn CallSink>) -> Self {
        let state = SharedState::new(sink, ResilienceConfig::from(&settings.resilience));
        Self::new(Arc::new(ReqwestTransport::new()), Arc::new(state)).register_defaults()
    }

    /// Add every built-in backend.
    #[must_use]
    pub fn register_defaults(mut self) -> Self {
        for registration in default_registrations() {
            self.register(registration);
        }
        self
    }

    /// Add or replace the registration for its backend.
    pub fn register(&mut self, registration: Registration) {
        debug!(provider = %registration.kind, "registering backend");
        let _ = self.registrations.insert(registration.kind, registration);
    }

    /// Registration for `kind`.
    pub fn registration(&self, kind: ProviderKind) -> Option<&Registration> {
        self.registrations.get(&kind)
    }

    /// State shared by every client this registry creates.
    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.context.state)
    }

    /// Build a resilient client for `config`.
    pub fn create_client(&self, config: &ProviderConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
        let registration = self.registrations.get(&config.kind).ok_or_else(|| {
            LlmError::configuration("provider", format!("no backend registered for `{}`", config.kind))
        })?;
        let resolved = registration.resolve(config)?;
        let client = (registration.constructor)(&resolved, &self.context)?;
        info!(provider = %config.kind, model = client.model(), "client created");
        Ok(ResilientClient::wrap(client, self.state()))
    }

    /// Build a client for the default backend in `settings`.
    pub fn create_default_client(&self, settings: &Settings) -> Result<Arc<dyn LlmClient>, LlmError> {
        self.create_client(&settings.default_provider_config())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in backends
// ─────────────────────────────────────────────────────────────────────────────

fn default_registrations() -> Vec<Registration> {
    vec![
        Registration::new(ProviderKind::Anthropic, build_anthropic)
            .default_model("claude-sonnet-4-5")
            .default_base_url("https://api.anthropic.com")
            .requires_api_key(),
        Registration::new(ProviderKind::OpenAi, |c, cx| {
            openai_compatible(c, cx, OpenAiCodec::new().with_token_field(TokenField::MaxCompletionTokens))
        })
        .default_model("gpt-4o")
        .default_base_url("https://api.openai.com/v1")
        .requires_api_key(),
        Registration::new(ProviderKind::AzureOpenAi, build_azure)
            .requires_api_key()
            .requires_base_url(),
        Registration::new(ProviderKind::OpenRouter, |c, cx| openai_compatible(c, cx, OpenAiCodec::new()))
            .default_model("anthropic/claude-sonnet-4.5")
            .default_base_url("https://openrouter.ai/api/v1")
            .requires_api_key(),
        Registration::new(ProviderKind::DeepSeek, |c, cx| openai_compatible(c, cx, OpenAiCodec::new()))
            .default_model("deepseek-chat")
            .default_base_url("https://api.deepseek.com/v1")
            .requires_api_key(),
        Registration::new(ProviderKind::Mistral, |c, cx| {
            openai_compatible(c, cx, OpenAiCodec::new().with_placeholder_rewrite(true))
        })
        .default_model("mistral-large-latest")
        .default_base_url("https://api.mistral.ai/v1")
        .requires_api_key(),
        Registration::new(ProviderKind::Groq, |c, cx| openai_compatible(c, cx, OpenAiCodec::new()))
            .default_model("llama-3.3-70b-versatile")
            .default_base_url("https://api.groq.com/openai/v1")
            .requires_api_key(),
        Registration::new(ProviderKind::Xai, |c, cx| openai_compatible(c, cx, OpenAiCodec::new()))
            .default_model("grok-4")
            .default_base_url("https://api.x.ai/v1")
            .requires_api_key(),
        Registration::new(ProviderKind::Ollama, |c, cx| openai_compatible(c, cx, OpenAiCodec::new()))
            .default_model("llama3.1")
            .default_base_url("http://localhost:11434/v1"),
        Registration::new(ProviderKind::LmStudio, |c, cx| openai_compatible(c, cx, OpenAiCodec::new()))
            .default_base_url("http://localhost:1234/v1"),
        Registration::new(ProviderKind::OpenAiCompatible, |c, cx| {
            openai_compatible(c, cx, OpenAiCodec::new())
        })
        .requires_base_url(),
        Registration::new(ProviderKind::Gemini, build_gemini)
            .default_model("gemini-2.5-flash")
            .default_base_url("https://generativelanguage.googleapis.com/v1beta")
            .requires_api_key(),
        Registration::new(ProviderKind::Bedrock, build_bedrock)
            .default_model("anthropic.claude-sonnet-4-5-20250929-v1:0")
            .requires_api_key(),
    ]
}

fn model_of(config: &ProviderConfig) -> Result<&str, LlmError> {
    config.model.as_deref().ok_or_else(|| LlmError::missing("model"))
}

fn base_url_of(config: &ProviderConfig) -> Result<&str, LlmError> {
    config.base_url.as_deref().ok_or_else(|| LlmError::missing("base_url"))
}

fn api_key_of(config: &ProviderConfig) -> Result<ApiKey, LlmError> {
    config.api_key.clone().ok_or_else(|| LlmError::missing("api_key"))
}

/// HTTP client for `config` with its extra headers applied.
fn http_client(
    config: &ProviderConfig,
    cx: &ClientContext,
    base_url: &str,
    codec: Arc<dyn Codec>,
    auth: Auth,
) -> Result<HttpClient, LlmError> {
    let mut client = HttpClient::new(config.kind, model_of(config)?, base_url, codec, Arc::clone(&cx.transport))
        .with_auth(auth);
    for (name, value) in &config.extra_headers {
        client = client.with_header(name.clone(), value.clone());
    }
    Ok(client)
}

fn build_anthropic(config: &ProviderConfig, cx: &ClientContext) -> Result<Arc<dyn LlmClient>, LlmError> {
    let auth = Auth::header("x-api-key", api_key_of(config)?);
    let client = http_client(config, cx, base_url_of(config)?, Arc::new(AnthropicCodec::default()), auth)?
        .with_header("anthropic-version", anthropic::API_VERSION);
    Ok(Arc::new(client))
}

fn build_azure(config: &ProviderConfig, cx: &ClientContext) -> Result<Arc<dyn LlmClient>, LlmError> {
    let version = config.api_version.as_deref().unwrap_or(AZURE_API_VERSION);
    let codec = OpenAiCodec::new()
        .with_token_field(TokenField::MaxCompletionTokens)
        .azure(version);
    let auth = Auth::header("api-key", api_key_of(config)?);
    Ok(Arc::new(http_client(config, cx, base_url_of(config)?, Arc::new(codec), auth)?))
}

fn openai_compatible(
    config: &ProviderConfig,
    cx: &ClientContext,
    codec: OpenAiCodec,
) -> Result<Arc<dyn LlmClient>, LlmError> {
    let auth = config.api_key.clone().map_or(Auth::None, Auth::Bearer);
    Ok(Arc::new(http_client(config, cx, base_url_of(config)?, Arc::new(codec), auth)?))
}

fn build_gemini(config: &ProviderConfig, cx: &ClientContext) -> Result<Arc<dyn LlmClient>, LlmError> {
    let auth = Auth::header("x-goog-api-key", api_key_of(config)?);
    Ok(Arc::new(http_client(config, cx, base_url_of(config)?, Arc::new(GeminiCodec::default()), auth)?))
}

/// Converse client with an inference-profile resolver.
///
/// A configured base URL stands in for both the runtime and the control
/// plane, which is how local proxies and test servers are reached.
fn build_bedrock(config: &ProviderConfig, cx: &ClientContext) -> Result<Arc<dyn LlmClient>, LlmError> {
    let region = config
        .region
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(bedrock::DEFAULT_REGION);
    let (runtime, control) = match config.base_url.clone() {
        Some(url) => (url.clone(), url),
        None => (bedrock::runtime_url(region), bedrock::control_url(region)),
    };
    let key = api_key_of(config)?;

    let source = InferenceProfileSource::new(Arc::clone(&cx.transport), control.clone(), region, key.clone());
    let resolver = ResourceResolver::new(Arc::new(source), cx.state.resolver_caches(), Some(region.to_string()));
    let codec = BedrockCodec::new(control).with_placeholder_rewrite(true);
    let client = http_client(config, cx, &runtime, Arc::new(codec), Auth::Bearer(key))?
        .with_resolver(Arc::new(resolver));
    Ok(Arc::new(client))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use switchboard_core::{Message, Request};

    use crate::mock::{MockClient, MockResponse};

    fn registry() -> ProviderRegistry {
        ProviderRegistry::with_defaults()
    }

    fn missing_field(err: LlmError) -> String {
        match err {
            LlmError::Configuration { field, .. } => field,
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn every_kind_has_a_registration() {
        let registry = registry();
        for kind in ProviderKind::ALL {
            assert!(registry.registration(kind).is_some(), "{kind} missing");
        }
    }

    #[test]
    fn missing_api_key_names_the_field() {
        let err = registry()
            .create_client(&ProviderConfig::new(ProviderKind::Anthropic))
            .err()
            .unwrap();
        assert_eq!(missing_field(err), "api_key");
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let err = registry()
            .create_client(&ProviderConfig::new(ProviderKind::Gemini).with_api_key("   "))
            .err()
            .unwrap();
        assert_eq!(missing_field(err), "api_key");
    }

    #[test]
    fn azure_needs_base_url_then_model() {
        let registry = registry();
        let config = ProviderConfig::new(ProviderKind::AzureOpenAi).with_api_key("k");
        assert_eq!(missing_field(registry.create_client(&config).err().unwrap()), "base_url");

        let config = config.with_base_url("https://res.openai.azure.com");
        assert_eq!(missing_field(registry.create_client(&config).err().unwrap()), "model");

        let client = registry.create_client(&config.with_model("my-deployment")).unwrap();
        assert_eq!(client.model(), "my-deployment");
    }

    #[test]
    fn local_backends_need_no_key() {
        let client = registry()
            .create_client(&ProviderConfig::new(ProviderKind::Ollama))
            .unwrap();
        assert_eq!(client.provider_kind(), ProviderKind::Ollama);
        assert_eq!(client.model(), "llama3.1");
    }

    #[test]
    fn lmstudio_without_model_is_rejected() {
        let err = registry()
            .create_client(&ProviderConfig::new(ProviderKind::LmStudio))
            .err()
            .unwrap();
        assert_eq!(missing_field(err), "model");
    }

    #[test]
    fn fills_default_model_and_wraps_once() {
        let client = registry()
            .create_client(&ProviderConfig::new(ProviderKind::OpenAi).with_api_key("sk"))
            .unwrap();
        assert_eq!(client.model(), "gpt-4o");
        assert!(client.is_resilient());
    }

    #[test]
    fn explicit_model_wins() {
        let client = registry()
            .create_client(
                &ProviderConfig::new(ProviderKind::Bedrock)
                    .with_api_key("k")
                    .with_model("meta.llama3-70b-instruct-v1:0"),
            )
            .unwrap();
        assert_eq!(client.model(), "meta.llama3-70b-instruct-v1:0");
        assert!(client.invocation_resolver().is_some());
    }

    #[test]
    fn unregistered_kind_is_a_configuration_error() {
        let registry = ProviderRegistry::new(Arc::new(ReqwestTransport::new()), Arc::new(SharedState::default()));
        let err = registry
            .create_client(&ProviderConfig::new(ProviderKind::Groq))
            .err()
            .unwrap();
        assert_matches!(err, LlmError::Configuration { ref field, .. } if field == "provider");
    }

    #[tokio::test]
    async fn custom_registration_shares_state() {
        let mut registry = registry();
        registry.register(
            Registration::new(ProviderKind::Groq, |config, _cx| {
                let model = config.model.clone().unwrap_or_default();
                Ok(Arc::new(MockClient::new(
                    ProviderKind::Groq,
                    model,
                    vec![MockResponse::text("a"), MockResponse::text("b")],
                )) as Arc<dyn LlmClient>)
            })
            .default_model("scripted"),
        );
        let first = registry.create_client(&ProviderConfig::new(ProviderKind::Groq)).unwrap();
        let _ = first
            .send(&Request::new("", 5).with_message(Message::user("hi")))
            .await
            .unwrap();
        assert_eq!(registry.state().next_seq(), 2);
    }

    #[test]
    fn settings_seed_resilience_config() {
        let mut settings = Settings::default();
        settings.resilience.capacity_backoff_ms = 40;
        let registry = ProviderRegistry::from_settings(&settings, Arc::new(switchboard_telemetry::MemoryCallSink::new()));
        assert_eq!(registry.state().config().capacity_backoff.as_millis(), 40);
    }

    #[test]
    fn default_client_comes_from_settings() {
        let mut settings = Settings {
            default_provider: ProviderKind::DeepSeek,
            default_model: Some("deepseek-reasoner".into()),
            ..Settings::default()
        };
        settings.provider_mut(ProviderKind::DeepSeek).api_key = Some(ApiKey::new("k"));
        let client = registry().create_default_client(&settings).unwrap();
        assert_eq!(client.model(), "deepseek-reasoner");
    }
}
