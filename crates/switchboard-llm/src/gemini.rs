//! # Gemini `generateContent` codec
//!
//! - role `assistant` is sent as `model`
//! - `ToolCall` ↔ `functionCall{id, name, args}`
//! - `ToolResult` → `functionResponse{id, name, response}`, with the name
//!   recovered from the originating call in the history
//! - `Image` → `inlineData`
//!
//! Parameter schemas are sanitised and stripped of keywords the API
//! rejects. Parts flagged `thought: true` are dropped on decode, and calls
//! without an id get a synthetic `call_<uuid>`.

use serde_json::{Value, json};
use switchboard_core::{ContentBlock, LlmError, Message, ModelSummary, Request, Response, Role, StopReason};
use tracing::debug;

use crate::codec::{Codec, WireRequest, count_field, prepare_messages, str_field, usage_from};
use crate::schema::{GEMINI_UNSUPPORTED_KEYS, SchemaSanitizer};
use crate::tool_names::{NamePolicy, ToolNameMapping, name_for_call};

/// `generateContent` codec.
#[derive(Clone, Copy, Debug)]
pub struct GeminiCodec {
    sanitizer: SchemaSanitizer,
    rewrite_placeholder: bool,
}

impl Default for GeminiCodec {
    fn default() -> Self {
        Self {
            sanitizer: SchemaSanitizer::with_stripped_keys(GEMINI_UNSUPPORTED_KEYS),
            rewrite_placeholder: false,
        }
    }
}

impl GeminiCodec {
    /// Codec with the trailing-placeholder rewrite switched on or off.
    #[must_use]
    pub fn with_placeholder_rewrite(mut self, on: bool) -> Self {
        self.rewrite_placeholder = on;
        self
    }
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

fn encode_part(block: &ContentBlock, history: &[Message], names: &ToolNameMapping) -> Option<Value> {
    match block {
        ContentBlock::Text { text } if text.is_empty() => None,
        ContentBlock::Text { text } => Some(json!({"text": text})),
        ContentBlock::ToolCall { id, name, arguments } => Some(json!({
            "functionCall": {"id": id, "name": names.wire_name(name), "args": arguments},
        })),
        ContentBlock::ToolResult {
            tool_call_id,
            content,
            is_error,
        } => {
            let canonical = name_for_call(history, tool_call_id);
            let name = if canonical.is_empty() {
                canonical
            } else {
                names.wire_name(&canonical)
            };
            let response = if *is_error {
                json!({"error": content})
            } else {
                json!({"content": content})
            };
            Some(json!({
                "functionResponse": {"id": tool_call_id, "name": name, "response": response},
            }))
        }
        ContentBlock::Image { data, mime_type, .. } => Some(json!({
            "inlineData": {"mimeType": mime_type, "data": data},
        })),
    }
}

fn encode_contents(messages: &[Message], names: &ToolNameMapping) -> Vec<Value> {
    messages
        .iter()
        .filter_map(|message| {
            let parts: Vec<Value> = message
                .blocks()
                .iter()
                .filter_map(|b| encode_part(b, messages, names))
                .collect();
            if parts.is_empty() {
                debug!(role = message.role.as_str(), "omitting message with no encodable parts");
                return None;
            }
            Some(json!({"role": wire_role(message.role), "parts": parts}))
        })
        .collect()
}

impl GeminiCodec {
    fn encode_tools(&self, request: &Request, names: &ToolNameMapping) -> Option<Value> {
        let declarations: Vec<Value> = request
            .tool_list()
            .iter()
            .map(|tool| {
                let mut decl = json!({
                    "name": names.wire_name(&tool.name),
                    "description": tool.description,
                });
                if tool.parameters.is_object() {
                    decl["parameters"] = self.sanitizer.sanitize(&tool.parameters);
                }
                decl
            })
            .collect();
        (!declarations.is_empty()).then(|| json!([{"functionDeclarations": declarations}]))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Map `finishReason`. `STOP` after a function call means the model wants
/// the tool run.
pub fn stop_reason(raw: Option<&str>, has_tool_calls: bool) -> StopReason {
    match raw {
        Some("MAX_TOKENS") => StopReason::MaxTokens,
        Some("STOP") if has_tool_calls => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

fn decode_part(part: &Value, names: &ToolNameMapping) -> Option<ContentBlock> {
    if part.get("thought").and_then(Value::as_bool) == Some(true) {
        return None;
    }
    if let Some(call) = part.get("functionCall") {
        let id = str_field(call, "id")
            .filter(|id| !id.is_empty())
            .map_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()), String::from);
        return Some(ContentBlock::tool_call(
            id,
            names.canonical_name(str_field(call, "name").unwrap_or_default()),
            call.get("args").cloned().unwrap_or_else(|| json!({})),
        ));
    }
    str_field(part, "text").map(ContentBlock::text)
}

impl Codec for GeminiCodec {
    fn name_policy(&self) -> NamePolicy {
        NamePolicy::GEMINI
    }

    fn encode(&self, request: &Request, model: &str, names: &ToolNameMapping) -> Result<WireRequest, LlmError> {
        let messages = prepare_messages(request, self.rewrite_placeholder);
        let mut body = json!({
            "contents": encode_contents(&messages, names),
            "generationConfig": {"maxOutputTokens": request.max_tokens},
        });
        if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if let Some(tools) = self.encode_tools(request, names) {
            body["tools"] = tools;
        }
        Ok(WireRequest::post(format!("/models/{model}:generateContent"), body))
    }

    fn decode(&self, body: &Value, names: &ToolNameMapping) -> Result<Response, LlmError> {
        let Some(candidate) = body.get("candidates").and_then(Value::as_array).and_then(|c| c.first()) else {
            let reason = body["promptFeedback"]["blockReason"].as_str().unwrap_or("no candidates returned");
            return Err(LlmError::Decode(format!("response has no candidates: {reason}")));
        };

        let content: Vec<ContentBlock> = candidate["content"]["parts"]
            .as_array()
            .map(|parts| parts.iter().filter_map(|p| decode_part(p, names)).collect())
            .unwrap_or_default();
        let has_calls = content.iter().any(|b| matches!(b, ContentBlock::ToolCall { .. }));
        let stop = stop_reason(str_field(candidate, "finishReason"), has_calls);

        let usage = body.get("usageMetadata").and_then(|u| {
            usage_from(count_field(u, "promptTokenCount"), count_field(u, "candidatesTokenCount"))
        });
        Ok(Response::new(content, stop, usage))
    }

    fn models_request(&self) -> WireRequest {
        WireRequest::get("/models?pageSize=1000")
    }

    fn decode_models(&self, body: &Value) -> Result<Vec<ModelSummary>, LlmError> {
        let models = body
            .get("models")
            .and_then(Value::as_array)
            .ok_or_else(|| LlmError::Decode("model listing has no `models` array".into()))?;
        Ok(models
            .iter()
            .filter_map(|m| {
                let name = str_field(m, "name")?;
                Some(ModelSummary {
                    id: name.strip_prefix("models/").unwrap_or(name).to_string(),
                    display_name: str_field(m, "displayName").map(String::from),
                })
            })
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
