//! # switchboard-llm
//!
//! Provider codecs and the resilience layer behind the `LlmClient` contract.
//!
//! - **Codecs**: Anthropic Messages, `OpenAI` Chat Completions (and its
//!   compatible backends), Gemini `generateContent`, Bedrock Converse
//! - **Tool names**: collision-safe canonical ↔ wire mapping per request
//! - **Schema sanitizer**: idempotent cleanup for strict schema dialects
//! - **Resilience**: learned output ceilings, invocation aliases and a single
//!   capacity retry, with every attempt reported to a `CallSink`
//! - **Resolver**: scores inference-profile candidates for a requested model
//! - **Registry**: `create_client(config) -> Arc<dyn LlmClient>`

#![deny(unsafe_code)]

pub mod anthropic;
pub mod bedrock;
pub mod codec;
pub mod error_parsing;
pub mod gemini;
pub mod http_client;
pub mod limits;
pub mod mock;
pub mod openai;
pub mod registry;
pub mod resilient;
pub mod resolver;
pub mod schema;
pub mod tool_names;
pub mod transport;

pub use codec::{Codec, WireRequest};
pub use http_client::{Auth, HttpClient};
pub use limits::ObservedLimits;
pub use registry::{ClientContext, ProviderRegistry, Registration};
pub use resilient::{ResilienceConfig, ResilientClient, SharedState};
pub use resolver::{
    CandidateKind, CandidatePage, CandidateSource, ResolutionError, ResolverCaches, ResourceCandidate,
    ResourceResolver,
};
pub use schema::SchemaSanitizer;
pub use tool_names::{NamePolicy, ToolNameMapping};
pub use transport::{HttpMethod, HttpRequest, HttpResponse, ReqwestTransport, Transport};
