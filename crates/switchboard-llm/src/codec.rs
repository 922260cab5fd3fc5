//! # Codec contract
//!
//! A codec translates the canonical model to one backend's wire format and
//! back. Both directions are pure: no I/O, no shared state, parameterised
//! only by the request's [`ToolNameMapping`].

use serde_json::Value;
use switchboard_core::{LlmError, Message, ModelSummary, Request, Response, Role, TokenUsage};

use crate::tool_names::{NamePolicy, ToolNameMapping};
use crate::transport::HttpMethod;

/// Encoded request: where to send it and what to send.
#[derive(Clone, Debug, PartialEq)]
pub struct WireRequest {
    /// Verb.
    pub method: HttpMethod,
    /// Path relative to the client's base URL, or an absolute URL.
    pub path: String,
    /// JSON body.
    pub body: Option<Value>,
}

impl WireRequest {
    /// POST `body` to `path`.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    /// GET `path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
        }
    }

    /// Resolve `path` against `base_url`.
    pub fn url(&self, base_url: &str) -> String {
        if self.path.starts_with("http://") || self.path.starts_with("https://") {
            self.path.clone()
        } else {
            format!("{}{}", base_url.trim_end_matches('/'), self.path)
        }
    }
}

/// Canonical ↔ wire translation for one backend family.
pub trait Codec: Send + Sync {
    /// Tool-name constraints of this backend.
    fn name_policy(&self) -> NamePolicy;

    /// Encode `request` for `model`.
    fn encode(&self, request: &Request, model: &str, names: &ToolNameMapping) -> Result<WireRequest, LlmError>;

    /// Decode a successful response body.
    fn decode(&self, body: &Value, names: &ToolNameMapping) -> Result<Response, LlmError>;

    /// Request that lists available models.
    fn models_request(&self) -> WireRequest;

    /// Decode the model listing.
    fn decode_models(&self, body: &Value) -> Result<Vec<ModelSummary>, LlmError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Placeholder continuations
// ─────────────────────────────────────────────────────────────────────────────

const PLACEHOLDER_MAX_CHARS: usize = 40;

const PLACEHOLDER_PHRASES: &[&str] = &[
    "continue",
    "continuing",
    "ok",
    "okay",
    "understood",
    "got it",
    "proceeding",
    "proceed",
    "sure",
    "done",
    "...",
    "…",
];

/// Whether `text` is a short, generic continuation acknowledgement.
pub fn is_placeholder_continuation(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().count() > PLACEHOLDER_MAX_CHARS {
        return false;
    }
    let normalized = trimmed
        .trim_end_matches(['.', '!'])
        .trim()
        .to_lowercase();
    let normalized = if normalized.is_empty() { trimmed.to_string() } else { normalized };
    PLACEHOLDER_PHRASES.iter().any(|p| {
        normalized == *p
            || normalized
                .strip_prefix(p)
                .is_some_and(|rest| rest.trim_start().starts_with(|c: char| c == ',' || c == ';'))
    })
}

/// Messages with a trailing placeholder assistant turn re-roled as `user`.
///
/// Only text-only turns matching [`is_placeholder_continuation`] qualify;
/// anything else is returned untouched.
pub fn rewrite_trailing_placeholder(messages: &[Message]) -> Vec<Message> {
    let mut out = messages.to_vec();
    if let Some(last) = out.last_mut() {
        if last.role == Role::Assistant && last.text_only().is_some_and(|t| is_placeholder_continuation(&t)) {
            tracing::debug!("re-roling trailing placeholder assistant turn as user");
            last.role = Role::User;
        }
    }
    out
}

/// Canonical messages as the codec should see them.
pub fn prepare_messages(request: &Request, rewrite_placeholder: bool) -> Vec<Message> {
    if rewrite_placeholder {
        rewrite_trailing_placeholder(&request.messages)
    } else {
        request.messages.clone()
    }
}

/// Fold consecutive encoded turns of the same role into one. Omitting an
/// empty message can leave two user or two assistant turns adjacent, and
/// role-alternating APIs reject that.
pub(crate) fn merge_adjacent_turns(messages: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::new();
    for message in messages {
        if let Some(last) = merged.last_mut() {
            if last["role"] == message["role"] {
                if let (Some(into), Some(from)) = (
                    last.get_mut("content").and_then(Value::as_array_mut),
                    message.get("content").and_then(Value::as_array),
                ) {
                    into.extend(from.iter().cloned());
                    continue;
                }
            }
        }
        merged.push(message);
    }
    merged
}

/// Look up a string field, treating JSON null as absent.
pub(crate) fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Read a non-negative counter, absent when missing or not a number.
pub(crate) fn count_field(value: &Value, key: &str) -> Option<u64> {
    value.get(key).and_then(Value::as_u64)
}

/// Usage when both counters were reported; explicit zeros count as reported.
pub(crate) fn usage_from(input: Option<u64>, output: Option<u64>) -> Option<TokenUsage> {
    Some(TokenUsage {
        input_tokens: input?,
        output_tokens: output?,
    })
}
