//! # Chat Completions codec
//!
//! Serves every OpenAI-compatible backend. Per-backend differences are
//! options on [`OpenAiCodec`]: the name of the output-token field, the URL
//! layout (standard or Azure deployment paths) and the placeholder rewrite.
//!
//! Lossy mappings:
//! - `ToolResult.is_error` has no wire field and is dropped.
//! - Assistant text blocks are joined into the single `content` string,
//!   which precedes `tool_calls` on decode.
//! - `reasoning_content` is dropped on decode.

use serde_json::{Value, json};
use switchboard_core::{ContentBlock, LlmError, Message, ModelSummary, Request, Response, Role, StopReason};
use tracing::{debug, warn};

use crate::codec::{Codec, WireRequest, count_field, prepare_messages, str_field, usage_from};
use crate::tool_names::{NamePolicy, ToolNameMapping};

/// Default `api-version` query value for Azure deployments.
pub const AZURE_API_VERSION: &str = "2024-10-21";

/// Field carrying the output-token budget.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TokenField {
    /// `max_tokens`.
    #[default]
    MaxTokens,
    /// `max_completion_tokens`.
    MaxCompletionTokens,
}

impl TokenField {
    fn key(self) -> &'static str {
        match self {
            Self::MaxTokens => "max_tokens",
            Self::MaxCompletionTokens => "max_completion_tokens",
        }
    }
}

/// URL layout.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PathStyle {
    /// `/chat/completions` under the base URL.
    #[default]
    Standard,
    /// `/openai/deployments/{model}/chat/completions?api-version=…`.
    Azure {
        /// `api-version` query value.
        api_version: String,
    },
}

/// Chat Completions codec.
#[derive(Clone, Debug, Default)]
pub struct OpenAiCodec {
    token_field: TokenField,
    path_style: PathStyle,
    rewrite_placeholder: bool,
}

impl OpenAiCodec {
    /// Standard codec using `max_tokens`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `field` for the output-token budget.
    #[must_use]
    pub fn with_token_field(mut self, field: TokenField) -> Self {
        self.token_field = field;
        self
    }

    /// Use Azure deployment URLs.
    #[must_use]
    pub fn azure(mut self, api_version: impl Into<String>) -> Self {
        self.path_style = PathStyle::Azure {
            api_version: api_version.into(),
        };
        self
    }

    /// Re-role a trailing placeholder assistant turn as `user`.
    #[must_use]
    pub fn with_placeholder_rewrite(mut self, on: bool) -> Self {
        self.rewrite_placeholder = on;
        self
    }

    fn completions_path(&self, model: &str) -> String {
        match &self.path_style {
            PathStyle::Standard => "/chat/completions".into(),
            PathStyle::Azure { api_version } => {
                format!("/openai/deployments/{model}/chat/completions?api-version={api_version}")
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

fn user_part(block: &ContentBlock) -> Option<Value> {
    match block {
        ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
        ContentBlock::Image { data, mime_type, .. } => Some(json!({
            "type": "image_url",
            "image_url": {"url": format!("data:{mime_type};base64,{data}")},
        })),
        _ => None,
    }
}

/// A single text part collapses to a plain string, which every
/// compatible server accepts.
fn user_message(parts: Vec<Value>) -> Value {
    if let [only] = parts.as_slice() {
        if only["type"] == "text" {
            return json!({"role": "user", "content": only["text"]});
        }
    }
    json!({"role": "user", "content": parts})
}

fn encode_user(blocks: &[ContentBlock], out: &mut Vec<Value>) {
    let mut pending = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::ToolResult {
                tool_call_id, content, ..
            } => {
                if !pending.is_empty() {
                    out.push(user_message(std::mem::take(&mut pending)));
                }
                out.push(json!({"role": "tool", "tool_call_id": tool_call_id, "content": content}));
            }
            ContentBlock::ToolCall { .. } => debug!("dropping tool call in user turn"),
            other => pending.extend(user_part(other)),
        }
    }
    if !pending.is_empty() {
        out.push(user_message(pending));
    }
}

fn arguments_string(arguments: &Value) -> String {
    match arguments {
        Value::String(raw) => raw.clone(),
        Value::Null => "{}".into(),
        other => other.to_string(),
    }
}

fn encode_assistant(blocks: &[ContentBlock], names: &ToolNameMapping) -> Value {
    let mut text = String::new();
    let mut calls = Vec::new();
    for block in blocks {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::ToolCall { id, name, arguments } => calls.push(json!({
                "id": id,
                "type": "function",
                "function": {"name": names.wire_name(name), "arguments": arguments_string(arguments)},
            })),
            ContentBlock::ToolResult { .. } | ContentBlock::Image { .. } => {
                debug!("dropping non-assistant block in assistant turn");
            }
        }
    }
    let mut message = json!({"role": "assistant"});
    message["content"] = if text.is_empty() && !calls.is_empty() {
        Value::Null
    } else {
        Value::String(text)
    };
    if !calls.is_empty() {
        message["tool_calls"] = Value::Array(calls);
    }
    message
}

fn encode_tools(request: &Request, names: &ToolNameMapping) -> Vec<Value> {
    request
        .tool_list()
        .iter()
        .map(|tool| {
            let parameters = if tool.parameters.is_object() {
                tool.parameters.clone()
            } else {
                json!({"type": "object", "properties": {}})
            };
            json!({
                "type": "function",
                "function": {
                    "name": names.wire_name(&tool.name),
                    "description": tool.description,
                    "parameters": parameters,
                },
            })
        })
        .collect()
}

fn encode_messages(request: &Request, messages: &[Message], names: &ToolNameMapping) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
        out.push(json!({"role": "system", "content": system}));
    }
    for message in messages {
        let blocks = message.blocks();
        match message.role {
            Role::User => encode_user(&blocks, &mut out),
            Role::Assistant => out.push(encode_assistant(&blocks, names)),
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Map `finish_reason`; anything unrecognised ends the turn.
pub fn stop_reason(raw: Option<&str>) -> StopReason {
    match raw {
        Some("length") => StopReason::MaxTokens,
        Some("tool_calls" | "function_call") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

fn message_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|p| str_field(p, "type") == Some("text"))
            .filter_map(|p| str_field(p, "text"))
            .collect(),
        _ => String::new(),
    }
}

fn decode_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(s) if s.trim().is_empty() => json!({}),
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|e| {
            warn!(error = %e, "tool call arguments are not valid JSON; keeping raw text");
            Value::String(s.clone())
        }),
        Value::Null => json!({}),
        other => other.clone(),
    }
}

fn decode_tool_call(call: &Value, names: &ToolNameMapping) -> ContentBlock {
    let id = str_field(call, "id")
        .filter(|id| !id.is_empty())
        .map_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()), String::from);
    let function = &call["function"];
    ContentBlock::tool_call(
        id,
        names.canonical_name(str_field(function, "name").unwrap_or_default()),
        decode_arguments(&function["arguments"]),
    )
}

impl Codec for OpenAiCodec {
    fn name_policy(&self) -> NamePolicy {
        NamePolicy::OPENAI
    }

    fn encode(&self, request: &Request, model: &str, names: &ToolNameMapping) -> Result<WireRequest, LlmError> {
        let messages = prepare_messages(request, self.rewrite_placeholder);
        let mut body = json!({
            "model": model,
            "messages": encode_messages(request, &messages, names),
        });
        body[self.token_field.key()] = json!(request.max_tokens);
        let tools = encode_tools(request, names);
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
        }
        Ok(WireRequest::post(self.completions_path(model), body))
    }

    fn decode(&self, body: &Value, names: &ToolNameMapping) -> Result<Response, LlmError> {
        let choice = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .ok_or_else(|| LlmError::Decode("response has no choices".into()))?;
        let message = &choice["message"];

        let mut content = Vec::new();
        let text = message_text(message.get("content"));
        if !text.is_empty() {
            content.push(ContentBlock::text(text));
        }
        if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
            content.extend(calls.iter().map(|c| decode_tool_call(c, names)));
        }

        let usage = body.get("usage").and_then(|u| {
            usage_from(count_field(u, "prompt_tokens"), count_field(u, "completion_tokens"))
        });
        Ok(Response::new(content, stop_reason(str_field(choice, "finish_reason")), usage))
    }

    fn models_request(&self) -> WireRequest {
        match &self.path_style {
            PathStyle::Standard => WireRequest::get("/models"),
            PathStyle::Azure { api_version } => WireRequest::get(format!("/openai/models?api-version={api_version}")),
        }
    }

    fn decode_models(&self, body: &Value) -> Result<Vec<ModelSummary>, LlmError> {
        let data = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| LlmError::Decode("model listing has no `data` array".into()))?;
        Ok(data
            .iter()
            .filter_map(|m| {
                Some(ModelSummary {
                    id: str_field(m, "id")?.to_string(),
                    display_name: str_field(m, "name").map(String::from),
                })
            })
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
