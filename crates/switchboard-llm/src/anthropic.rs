//! # Anthropic Messages codec
//!
//! Canonical blocks map nearly 1:1 onto Messages API content blocks:
//! - `ToolCall` ↔ `tool_use`
//! - `ToolResult` → `tool_result` (with `is_error`)
//! - `Image` → base64 `image` source
//!
//! Empty text blocks are omitted on encode because the API rejects them. A
//! turn left empty is dropped and its neighbours of the same role merged.
//! `thinking` and `redacted_thinking` blocks are dropped on decode.

use serde_json::{Map, Value, json};
use switchboard_core::{ContentBlock, LlmError, Message, ModelSummary, Request, Response, StopReason};
use tracing::debug;

use crate::codec::{
    Codec, WireRequest, count_field, merge_adjacent_turns, prepare_messages, str_field, usage_from,
};
use crate::tool_names::{NamePolicy, ToolNameMapping};

/// Value sent in the `anthropic-version` header.
pub const API_VERSION: &str = "2023-06-01";

/// Messages API codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnthropicCodec {
    rewrite_placeholder: bool,
}

impl AnthropicCodec {
    /// Codec with the trailing-placeholder rewrite switched on or off.
    pub fn with_placeholder_rewrite(rewrite_placeholder: bool) -> Self {
        Self { rewrite_placeholder }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

fn encode_block(block: &ContentBlock, names: &ToolNameMapping) -> Option<Value> {
    match block {
        ContentBlock::Text { text } if text.is_empty() => None,
        ContentBlock::Text { text } => Some(json!({"type": "text", "text": text})),
        ContentBlock::ToolCall { id, name, arguments } => Some(json!({
            "type": "tool_use",
            "id": id,
            "name": names.wire_name(name),
            "input": input_object(arguments),
        })),
        ContentBlock::ToolResult {
            tool_call_id,
            content,
            is_error,
        } => Some(json!({
            "type": "tool_result",
            "tool_use_id": tool_call_id,
            "content": content,
            "is_error": is_error,
        })),
        ContentBlock::Image { data, mime_type, .. } => Some(json!({
            "type": "image",
            "source": {"type": "base64", "media_type": mime_type, "data": data},
        })),
    }
}

/// `tool_use.input` must be an object.
fn input_object(arguments: &Value) -> Value {
    match arguments {
        Value::Object(_) => arguments.clone(),
        Value::Null => json!({}),
        other => json!({"value": other}),
    }
}

fn encode_message(message: &Message, names: &ToolNameMapping) -> Option<Value> {
    let content: Vec<Value> = message
        .blocks()
        .iter()
        .filter_map(|b| encode_block(b, names))
        .collect();
    if content.is_empty() {
        debug!(role = message.role.as_str(), "omitting message with no encodable content");
        return None;
    }
    Some(json!({"role": message.role.as_str(), "content": content}))
}

fn encode_tools(request: &Request, names: &ToolNameMapping) -> Vec<Value> {
    request
        .tool_list()
        .iter()
        .map(|tool| {
            let schema = if tool.parameters.is_object() {
                tool.parameters.clone()
            } else {
                json!({"type": "object", "properties": {}})
            };
            json!({
                "name": names.wire_name(&tool.name),
                "description": tool.description,
                "input_schema": schema,
            })
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

fn decode_block(block: &Value, names: &ToolNameMapping) -> Option<ContentBlock> {
    match str_field(block, "type")? {
        "text" => Some(ContentBlock::text(str_field(block, "text").unwrap_or_default())),
        "tool_use" => Some(ContentBlock::tool_call(
            str_field(block, "id").unwrap_or_default(),
            names.canonical_name(str_field(block, "name").unwrap_or_default()),
            block.get("input").cloned().unwrap_or_else(|| Value::Object(Map::new())),
        )),
        "thinking" | "redacted_thinking" => None,
        other => {
            debug!(block_type = other, "dropping unsupported response block");
            None
        }
    }
}

/// Map the wire `stop_reason`; anything unrecognised ends the turn.
pub fn stop_reason(raw: Option<&str>) -> StopReason {
    match raw {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

impl Codec for AnthropicCodec {
    fn name_policy(&self) -> NamePolicy {
        NamePolicy::ANTHROPIC
    }

    fn encode(&self, request: &Request, model: &str, names: &ToolNameMapping) -> Result<WireRequest, LlmError> {
        let messages = merge_adjacent_turns(
            prepare_messages(request, self.rewrite_placeholder)
                .iter()
                .filter_map(|m| encode_message(m, names)),
        );

        let mut body = json!({
            "model": model,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });
        if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
            body["system"] = json!(system);
        }
        let tools = encode_tools(request, names);
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
        }
        Ok(WireRequest::post("/v1/messages", body))
    }

    fn decode(&self, body: &Value, names: &ToolNameMapping) -> Result<Response, LlmError> {
        let blocks = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| LlmError::Decode("response has no `content` array".into()))?;
        let content = blocks.iter().filter_map(|b| decode_block(b, names)).collect();

        let usage = body
            .get("usage")
            .and_then(|u| usage_from(count_field(u, "input_tokens"), count_field(u, "output_tokens")));

        Ok(Response::new(content, stop_reason(str_field(body, "stop_reason")), usage))
    }

    fn models_request(&self) -> WireRequest {
        WireRequest::get("/v1/models?limit=1000")
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
                    display_name: str_field(m, "display_name").map(String::from),
                })
            })
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::{Role, TokenUsage, ToolDefinition};

    fn mapping(names: &[&str]) -> ToolNameMapping {
        ToolNameMapping::from_names(names.iter().copied(), NamePolicy::ANTHROPIC)
    }

    #[test]
    fn encodes_system_tools_and_blocks() {
        let tools = vec![ToolDefinition::new("read.file", "Read a file", json!({"type": "object"}))];
        let names = ToolNameMapping::new(&tools, NamePolicy::ANTHROPIC);
        let request = Request::new("claude", 1024)
            .with_system("be brief")
            .with_tools(tools)
            .with_messages(vec![
                Message::user("hi"),
                Message::with_blocks(
                    Role::Assistant,
                    vec![
                        ContentBlock::text("reading"),
                        ContentBlock::tool_call("toolu_1", "read.file", json!({"path": "a"})),
                    ],
                ),
                Message::with_blocks(Role::User, vec![ContentBlock::tool_result("toolu_1", "boom", true)]),
            ]);

        let wire = AnthropicCodec::default().encode(&request, "claude-x", &names).unwrap();
        assert_eq!(wire.path, "/v1/messages");
        let body = wire.body.unwrap();
        assert_eq!(body["model"], "claude-x");
        assert_eq!(body["max_tokens"], 1024);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["tools"][0]["name"], "read_file");
        assert_eq!(body["tools"][0]["input_schema"], json!({"type": "object"}));
        assert_eq!(body["messages"][1]["content"][1]["name"], "read_file");
        assert_eq!(body["messages"][2]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(body["messages"][2]["content"][0]["is_error"], true);
    }

    #[test]
    fn encodes_image_source() {
        let request = Request::new("m", 10).with_message(Message::with_blocks(
            Role::User,
            vec![ContentBlock::Image {
                data: "aGk=".into(),
                mime_type: "image/png".into(),
                original_size_bytes: Some(2),
            }],
        ));
        let body = AnthropicCodec::default()
            .encode(&request, "m", &mapping(&[]))
            .unwrap()
            .body
            .unwrap();
        assert_eq!(
            body["messages"][0]["content"][0],
            json!({"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "aGk="}})
        );
    }

    #[test]
    fn empty_text_is_omitted() {
        let request = Request::new("m", 10).with_messages(vec![Message::user("hi"), Message::assistant("")]);
        let body = AnthropicCodec::default()
            .encode(&request, "m", &mapping(&[]))
            .unwrap()
            .body
            .unwrap();
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert!(body.get("tools").is_none());
        assert!(body.get("system").is_none());
    }

    #[test]
    fn dropped_turn_merges_its_neighbours() {
        let request = Request::new("m", 10).with_messages(vec![
            Message::user("hi"),
            Message::assistant(""),
            Message::user("still there?"),
        ]);
        let body = AnthropicCodec::default()
            .encode(&request, "m", &mapping(&[]))
            .unwrap()
            .body
            .unwrap();
        assert_eq!(
            body["messages"],
            json!([{"role": "user", "content": [
                {"type": "text", "text": "hi"},
                {"type": "text", "text": "still there?"}
            ]}])
        );
    }

    #[test]
    fn decodes_blocks_and_drops_thinking() {
        let names = mapping(&["read.file"]);
        let body = json!({
            "content": [
                {"type": "thinking", "thinking": "hmm", "signature": "s"},
                {"type": "text", "text": "ok"},
                {"type": "tool_use", "id": "toolu_9", "name": "read_file", "input": {"path": "x"}},
                {"type": "redacted_thinking", "data": "..."}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 0}
        });
        let resp = AnthropicCodec::default().decode(&body, &names).unwrap();
        assert_eq!(
            resp.content,
            vec![
                ContentBlock::text("ok"),
                ContentBlock::tool_call("toolu_9", "read.file", json!({"path": "x"})),
            ]
        );
        assert_eq!(resp.stop_reason, StopReason::ToolUse);
        assert_eq!(
            resp.usage,
            Some(TokenUsage {
                input_tokens: 12,
                output_tokens: 0
            })
        );
    }

    #[test]
    fn assistant_blocks_survive_a_round_trip() {
        let names = mapping(&["grep"]);
        let blocks = vec![
            ContentBlock::text("looking"),
            ContentBlock::tool_call("toolu_1", "grep", json!({"q": "x"})),
        ];
        let request = Request::new("m", 10).with_message(Message::with_blocks(Role::Assistant, blocks.clone()));
        let body = AnthropicCodec::default().encode(&request, "m", &names).unwrap().body.unwrap();
        let reply = json!({"content": body["messages"][0]["content"], "stop_reason": "tool_use"});
        assert_eq!(AnthropicCodec::default().decode(&reply, &names).unwrap().content, blocks);
    }

    #[test]
    fn stop_reasons_are_closed() {
        assert_eq!(stop_reason(Some("end_turn")), StopReason::EndTurn);
        assert_eq!(stop_reason(Some("max_tokens")), StopReason::MaxTokens);
        assert_eq!(stop_reason(Some("stop_sequence")), StopReason::StopSequence);
        assert_eq!(stop_reason(Some("refusal")), StopReason::EndTurn);
        assert_eq!(stop_reason(Some("pause_turn")), StopReason::EndTurn);
        assert_eq!(stop_reason(None), StopReason::EndTurn);
    }

    #[test]
    fn missing_usage_is_absent_and_empty_content_gets_placeholder() {
        let resp = AnthropicCodec::default()
            .decode(&json!({"content": [], "stop_reason": null}), &mapping(&[]))
            .unwrap();
        assert!(resp.usage.is_none());
        assert_eq!(resp.content, vec![ContentBlock::text("")]);
    }

    #[test]
    fn missing_content_is_a_decode_error() {
        let err = AnthropicCodec::default().decode(&json!({}), &mapping(&[])).unwrap_err();
        assert!(matches!(err, LlmError::Decode(_)));
    }

    #[test]
    fn decodes_model_listing() {
        let models = AnthropicCodec::default()
            .decode_models(&json!({"data": [{"id": "claude-a", "display_name": "Claude A"}, {"type": "model"}]}))
            .unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].display_name.as_deref(), Some("Claude A"));
    }
}
