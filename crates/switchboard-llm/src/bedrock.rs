//! # Bedrock Converse codec and inference-profile listing
//!
//! Converse content blocks are typed objects keyed by kind:
//! - `ToolCall` ↔ `toolUse{toolUseId, name, input}`
//! - `ToolResult` → `toolResult{toolUseId, content, status}`
//! - `Image` → `image{format, source.bytes}`
//!
//! `reasoningContent` blocks are dropped on decode. Schemas are sanitised
//! and trailing placeholder assistant turns are re-roled as `user`, since
//! Converse rejects conversations that end on an assistant turn. Turns left
//! empty after dropping empty text are omitted and same-role neighbours merged.
//!
//! Model listing and inference-profile discovery go to the control-plane
//! host (`bedrock.{region}`), not the runtime host the client sends to.

use std::sync::Arc;

use async_trait::async_trait;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::{Value, json};
use switchboard_core::{
    ApiKey, ContentBlock, LlmError, Message, ModelSummary, Request, Response, Role, StopReason,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::codec::{
    Codec, WireRequest, count_field, merge_adjacent_turns, prepare_messages, str_field, usage_from,
};
use crate::error_parsing::backend_error;
use crate::resolver::{CandidateKind, CandidatePage, CandidateSource, ResourceCandidate};
use crate::schema::SchemaSanitizer;
use crate::tool_names::{NamePolicy, ToolNameMapping, short_hash};
use crate::transport::{HttpRequest, Transport};

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Characters escaped in the model path segment (`:` and `/` included).
const MODEL_ID: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Runtime endpoint for `region`.
pub fn runtime_url(region: &str) -> String {
    format!("https://bedrock-runtime.{region}.amazonaws.com")
}

/// Control-plane endpoint for `region`.
pub fn control_url(region: &str) -> String {
    format!("https://bedrock.{region}.amazonaws.com")
}

/// Converse codec.
#[derive(Clone, Debug)]
pub struct BedrockCodec {
    control_url: String,
    sanitizer: SchemaSanitizer,
    rewrite_placeholder: bool,
}

impl BedrockCodec {
    /// Codec whose listing requests go to `control_url`.
    pub fn new(control_url: impl Into<String>) -> Self {
        Self {
            control_url: control_url.into().trim_end_matches('/').to_string(),
            sanitizer: SchemaSanitizer::default(),
            rewrite_placeholder: true,
        }
    }

    /// Switch the trailing-placeholder rewrite on or off.
    #[must_use]
    pub fn with_placeholder_rewrite(mut self, on: bool) -> Self {
        self.rewrite_placeholder = on;
        self
    }

    /// Codec for the control plane of `region`.
    pub fn for_region(region: &str) -> Self {
        Self::new(control_url(region))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Encoding
// ─────────────────────────────────────────────────────────────────────────────

fn image_format(mime_type: &str) -> &str {
    match mime_type {
        "image/jpg" | "image/jpeg" => "jpeg",
        other => other.strip_prefix("image/").unwrap_or(other),
    }
}

fn encode_block(block: &ContentBlock, names: &ToolNameMapping) -> Option<Value> {
    match block {
        ContentBlock::Text { text } if text.is_empty() => None,
        ContentBlock::Text { text } => Some(json!({"text": text})),
        ContentBlock::ToolCall { id, name, arguments } => Some(json!({
            "toolUse": {"toolUseId": id, "name": names.wire_name(name), "input": arguments},
        })),
        ContentBlock::ToolResult {
            tool_call_id,
            content,
            is_error,
        } => Some(json!({
            "toolResult": {
                "toolUseId": tool_call_id,
                "content": [{"text": content}],
                "status": if *is_error { "error" } else { "success" },
            },
        })),
        ContentBlock::Image { data, mime_type, .. } => Some(json!({
            "image": {"format": image_format(mime_type), "source": {"bytes": data}},
        })),
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

impl BedrockCodec {
    fn encode_tools(&self, request: &Request, names: &ToolNameMapping) -> Option<Value> {
        let tools: Vec<Value> = request
            .tool_list()
            .iter()
            .map(|tool| {
                let schema = if tool.parameters.is_object() {
                    self.sanitizer.sanitize(&tool.parameters)
                } else {
                    json!({"type": "object", "properties": {}})
                };
                json!({"toolSpec": {
                    "name": names.wire_name(&tool.name),
                    "description": tool.description,
                    "inputSchema": {"json": schema},
                }})
            })
            .collect();
        (!tools.is_empty()).then(|| json!({"tools": tools}))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────────────────────────

/// Map `stopReason`; anything unrecognised ends the turn.
pub fn stop_reason(raw: Option<&str>) -> StopReason {
    match raw {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

fn decode_block(block: &Value, names: &ToolNameMapping) -> Option<ContentBlock> {
    if let Some(text) = str_field(block, "text") {
        return Some(ContentBlock::text(text));
    }
    if let Some(call) = block.get("toolUse") {
        return Some(ContentBlock::tool_call(
            str_field(call, "toolUseId").unwrap_or_default(),
            names.canonical_name(str_field(call, "name").unwrap_or_default()),
            call.get("input").cloned().unwrap_or_else(|| json!({})),
        ));
    }
    if block.get("reasoningContent").is_none() {
        debug!("dropping unsupported response block");
    }
    None
}

impl Codec for BedrockCodec {
    fn name_policy(&self) -> NamePolicy {
        NamePolicy::BEDROCK
    }

    fn encode(&self, request: &Request, model: &str, names: &ToolNameMapping) -> Result<WireRequest, LlmError> {
        let messages = merge_adjacent_turns(
            prepare_messages(request, self.rewrite_placeholder)
                .iter()
                .filter_map(|m| encode_message(m, names)),
        );
        let mut body = json!({
            "messages": messages,
            "inferenceConfig": {"maxTokens": request.max_tokens},
        });
        if let Some(system) = request.system.as_deref().filter(|s| !s.is_empty()) {
            body["system"] = json!([{"text": system}]);
        }
        if let Some(tool_config) = self.encode_tools(request, names) {
            body["toolConfig"] = tool_config;
        }
        let model = utf8_percent_encode(model, MODEL_ID);
        Ok(WireRequest::post(format!("/model/{model}/converse"), body))
    }

    fn decode(&self, body: &Value, names: &ToolNameMapping) -> Result<Response, LlmError> {
        let blocks = body["output"]["message"]["content"]
            .as_array()
            .ok_or_else(|| LlmError::Decode("response has no `output.message.content`".into()))?;
        let content = blocks.iter().filter_map(|b| decode_block(b, names)).collect();
        let usage = body
            .get("usage")
            .and_then(|u| usage_from(count_field(u, "inputTokens"), count_field(u, "outputTokens")));
        Ok(Response::new(content, stop_reason(str_field(body, "stopReason")), usage))
    }

    fn models_request(&self) -> WireRequest {
        WireRequest::get(format!("{}/foundation-models", self.control_url))
    }

    fn decode_models(&self, body: &Value) -> Result<Vec<ModelSummary>, LlmError> {
        let summaries = body
            .get("modelSummaries")
            .and_then(Value::as_array)
            .ok_or_else(|| LlmError::Decode("model listing has no `modelSummaries` array".into()))?;
        Ok(summaries
            .iter()
            .filter_map(|m| {
                Some(ModelSummary {
                    id: str_field(m, "modelId")?.to_string(),
                    display_name: str_field(m, "modelName").map(String::from),
                })
            })
            .collect())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inference profiles
// ─────────────────────────────────────────────────────────────────────────────

/// Lists the account's inference profiles as resolver candidates.
pub struct InferenceProfileSource {
    transport: Arc<dyn Transport>,
    control_url: String,
    region: String,
    api_key: ApiKey,
}

impl InferenceProfileSource {
    /// Source listing profiles at `control_url` with bearer `api_key`.
    pub fn new(transport: Arc<dyn Transport>, control_url: impl Into<String>, region: impl Into<String>, api_key: ApiKey) -> Self {
        Self {
            transport,
            control_url: control_url.into().trim_end_matches('/').to_string(),
            region: region.into(),
            api_key,
        }
    }
}

fn profile_candidate(profile: &Value) -> Option<ResourceCandidate> {
    let kind = match str_field(profile, "type") {
        Some("SYSTEM_DEFINED") => Some(CandidateKind::SystemDefined),
        Some("APPLICATION") => Some(CandidateKind::UserDefined),
        _ => None,
    };
    let profile_id = str_field(profile, "inferenceProfileId");
    let arn = str_field(profile, "inferenceProfileArn");
    let id = match kind {
        Some(CandidateKind::SystemDefined) => profile_id.or(arn),
        _ => arn.or(profile_id),
    }?;
    let model_refs = profile["models"]
        .as_array()
        .map(|models| {
            models
                .iter()
                .filter_map(|m| str_field(m, "modelArn").map(String::from))
                .collect()
        })
        .unwrap_or_default();
    Some(ResourceCandidate {
        id: id.to_string(),
        kind,
        model_refs,
    })
}

/// Decode one `ListInferenceProfiles` page.
pub fn decode_profile_page(body: &Value) -> CandidatePage {
    CandidatePage {
        candidates: body["inferenceProfileSummaries"]
            .as_array()
            .map(|items| items.iter().filter_map(profile_candidate).collect())
            .unwrap_or_default(),
        next_token: str_field(body, "nextToken").map(String::from),
    }
}

#[async_trait]
impl CandidateSource for InferenceProfileSource {
    fn scope(&self) -> String {
        format!("{}:{}", self.region, short_hash(self.api_key.expose()))
    }

    async fn fetch_page(&self, next_token: Option<&str>, cancel: &CancellationToken) -> Result<CandidatePage, LlmError> {
        let mut url = format!("{}/inference-profiles?maxResults=100", self.control_url);
        if let Some(token) = next_token {
            url.push_str("&nextToken=");
            url.extend(utf8_percent_encode(token, NON_ALPHANUMERIC));
        }
        let request = HttpRequest::get(url)
            .header("authorization", format!("Bearer {}", self.api_key.expose()))
            .header("accept", "application/json");
        let response = self.transport.send(request, cancel).await?;
        if !response.is_success() {
            return Err(backend_error(response.status, &response.text()));
        }
        Ok(decode_profile_page(&response.json()?))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
