//! End-to-end tests: registry-built clients against a local HTTP server.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use switchboard_core::{
    CancellationToken, ContentBlock, InvocationResolver, LlmClient, LlmError, Message, ProviderConfig,
    ProviderKind, Request, StopReason, ToolDefinition,
};
use switchboard_llm::{ProviderRegistry, ReqwestTransport, ResilienceConfig, SharedState};
use switchboard_telemetry::{CallEvent, MemoryCallSink};
use wiremock::matchers::{body_partial_json, header, method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn registry(sink: Arc<MemoryCallSink>) -> ProviderRegistry {
    let state = SharedState::new(sink, ResilienceConfig::default());
    ProviderRegistry::new(Arc::new(ReqwestTransport::new()), Arc::new(state)).register_defaults()
}

fn anthropic_client(registry: &ProviderRegistry, server: &MockServer) -> Arc<dyn LlmClient> {
    registry
        .create_client(
            &ProviderConfig::new(ProviderKind::Anthropic)
                .with_api_key("ak-test")
                .with_base_url(server.uri())
                .with_model("claude-opus-4-1"),
        )
        .unwrap()
}

fn anthropic_text(text: &str) -> Value {
    json!({
        "content": [{"type": "text", "text": text}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 10, "output_tokens": 2}
    })
}

fn ask(max_tokens: u32) -> Request {
    Request::new("", max_tokens).with_message(Message::user("write a long essay"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Limit learning
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn learned_ceiling_retries_once_then_pre_clamps() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({"max_tokens": 100_000})))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "type": "error",
            "error": {
                "type": "invalid_request_error",
                "message": "max_tokens: requested a maximum tokens value lower than 64000 is required"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "ak-test"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(json!({"max_tokens": 63_999})))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_text("done")))
        .expect(2)
        .mount(&server)
        .await;

    let sink = Arc::new(MemoryCallSink::new());
    let registry = registry(sink.clone());
    let client = anthropic_client(&registry, &server);

    let first = client.send(&ask(100_000)).await.unwrap();
    assert_eq!(first.text(), "done");
    assert_eq!(registry.state().limits().get("claude-opus-4-1"), Some(64_000));

    // Pre-clamped: only the 63999 mock can answer.
    let second = client.send(&ask(70_000)).await.unwrap();
    assert_eq!(second.text(), "done");

    let retries: Vec<_> = sink.records().into_iter().filter(|r| r.event == CallEvent::Retry).collect();
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].failure.as_ref().unwrap().category.as_deref(), Some("limit"));
}

#[tokio::test]
async fn limit_state_is_shared_across_clients_of_one_registry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"max_tokens": 8000})))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {"type": "invalid_request_error", "message": "max_tokens exceeds the model limit of 4096"}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"max_tokens": 4095})))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_text("ok")))
        .expect(2)
        .mount(&server)
        .await;

    let registry = registry(Arc::new(MemoryCallSink::new()));
    let _ = anthropic_client(&registry, &server).send(&ask(8000)).await.unwrap();
    let _ = anthropic_client(&registry, &server).send(&ask(8000)).await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Cancellation and failures
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pre_cancelled_call_never_hits_the_network() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(anthropic_text("never")))
        .expect(0)
        .mount(&server)
        .await;

    let sink = Arc::new(MemoryCallSink::new());
    let registry = registry(sink.clone());
    let token = CancellationToken::new();
    token.cancel();
    let err = anthropic_client(&registry, &server)
        .send(&ask(100).with_cancel(token))
        .await
        .unwrap_err();
    assert_eq!(err, LlmError::Cancelled);
    assert_eq!(sink.records().last().unwrap().event, CallEvent::Cancelled);
}

#[tokio::test]
async fn auth_failure_surfaces_once_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"type": "authentication_error", "message": "invalid x-api-key"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let registry = registry(Arc::new(MemoryCallSink::new()));
    let err = anthropic_client(&registry, &server).send(&ask(100)).await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert!(err.message().contains("invalid x-api-key"));
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI-compatible backends
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn openai_tool_call_comes_back_with_canonical_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "read_file", "arguments": "{\"path\":\"a.txt\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 0}
        })))
        .mount(&server)
        .await;

    let registry = registry(Arc::new(MemoryCallSink::new()));
    let client = registry
        .create_client(
            &ProviderConfig::new(ProviderKind::OpenAiCompatible)
                .with_api_key("sk-test")
                .with_base_url(server.uri())
                .with_model("local-model"),
        )
        .unwrap();
    let request = Request::new("", 256)
        .with_message(Message::user("read a.txt"))
        .with_tools(vec![ToolDefinition::new(
            "read_file",
            "Read a file",
            json!({"type": "object", "properties": {"path": {"type": "string"}}}),
        )]);
    let response = client.send(&request).await.unwrap();

    assert_eq!(response.stop_reason, StopReason::ToolUse);
    assert_eq!(response.usage.unwrap().output_tokens, 0);
    match &response.content[0] {
        ContentBlock::ToolCall { id, name, arguments } => {
            assert_eq!(id, "call_1");
            assert_eq!(name, "read_file");
            assert_eq!(arguments["path"], "a.txt");
        }
        other => panic!("expected tool call, got {other:?}"),
    }
}

#[tokio::test]
async fn capacity_error_is_retried_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached", "type": "requests"}
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sink = Arc::new(MemoryCallSink::new());
    let config = ResilienceConfig {
        capacity_backoff: Duration::from_millis(5),
        jitter: Duration::ZERO,
        ..ResilienceConfig::default()
    };
    let state = SharedState::new(sink.clone(), config);
    let registry = ProviderRegistry::new(Arc::new(ReqwestTransport::new()), Arc::new(state)).register_defaults();
    let client = registry
        .create_client(&ProviderConfig::new(ProviderKind::Ollama).with_base_url(server.uri()))
        .unwrap();

    let response = client.send(&ask(64)).await.unwrap();
    assert_eq!(response.text(), "hello");
    assert_eq!(response.stop_reason, StopReason::EndTurn);
    assert!(response.usage.is_none());
    let retry = sink
        .records()
        .into_iter()
        .find(|r| r.event == CallEvent::Retry)
        .unwrap();
    assert_eq!(retry.failure.unwrap().category.as_deref(), Some("capacity"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Gemini
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn gemini_function_call_without_id_gets_one() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .and(header("x-goog-api-key", "g-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking...", "thought": true},
                    {"functionCall": {"name": "search", "args": {"q": "rust"}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 3}
        })))
        .mount(&server)
        .await;

    let registry = registry(Arc::new(MemoryCallSink::new()));
    let client = registry
        .create_client(
            &ProviderConfig::new(ProviderKind::Gemini)
                .with_api_key("g-key")
                .with_base_url(server.uri()),
        )
        .unwrap();
    let request = Request::new("", 128)
        .with_message(Message::user("search for rust"))
        .with_tools(vec![ToolDefinition::new("search", "Search", json!({"type": "object"}))]);
    let response = client.send(&request).await.unwrap();

    assert_eq!(response.stop_reason, StopReason::ToolUse);
    assert_eq!(response.content.len(), 1);
    match &response.content[0] {
        ContentBlock::ToolCall { id, name, .. } => {
            assert!(id.starts_with("call_"));
            assert_eq!(name, "search");
        }
        other => panic!("expected tool call, got {other:?}"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bedrock invocation aliases
// ─────────────────────────────────────────────────────────────────────────────

const BARE_MODEL: &str = "anthropic.claude-sonnet-4-5-20250929-v1:0";

fn profiles() -> Value {
    json!({
        "inferenceProfileSummaries": [
            {
                "inferenceProfileId": "eu.anthropic.claude-sonnet-4-5-20250929-v1:0",
                "inferenceProfileArn": "arn:aws:bedrock:eu-west-1:1:inference-profile/eu.anthropic.claude-sonnet-4-5-20250929-v1:0",
                "type": "SYSTEM_DEFINED",
                "models": [{"modelArn": "arn:aws:bedrock:eu-west-1::foundation-model/anthropic.claude-sonnet-4-5-20250929-v1:0"}]
            },
            {
                "inferenceProfileId": "us.anthropic.claude-sonnet-4-5-20250929-v1:0",
                "inferenceProfileArn": "arn:aws:bedrock:us-west-2:1:inference-profile/us.anthropic.claude-sonnet-4-5-20250929-v1:0",
                "type": "SYSTEM_DEFINED",
                "models": [{"modelArn": "arn:aws:bedrock:us-west-2::foundation-model/anthropic.claude-sonnet-4-5-20250929-v1:0"}]
            },
            {
                "inferenceProfileId": "us.meta.llama3-3-70b-instruct-v1:0",
                "type": "SYSTEM_DEFINED",
                "models": [{"modelArn": "arn:aws:bedrock:us-west-2::foundation-model/meta.llama3-3-70b-instruct-v1:0"}]
            }
        ]
    })
}

#[tokio::test]
async fn bedrock_resolves_and_caches_invocation_alias() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/model/anthropic\..*/converse$"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "message": "Invocation of model ID anthropic.claude-sonnet-4-5-20250929-v1:0 with on-demand throughput isn't supported. Retry your request with the ID or ARN of an inference profile that contains this model."
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/inference-profiles"))
        .and(query_param("maxResults", "100"))
        .and(header("authorization", "Bearer br-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(profiles()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/model/us\.anthropic\..*/converse$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "output": {"message": {"role": "assistant", "content": [
                {"reasoningContent": {"reasoningText": {"text": "hmm"}}},
                {"text": "hi"}
            ]}},
            "stopReason": "end_turn",
            "usage": {"inputTokens": 3, "outputTokens": 1}
        })))
        .expect(2)
        .mount(&server)
        .await;

    let sink = Arc::new(MemoryCallSink::new());
    let registry = registry(sink.clone());
    let client = registry
        .create_client(
            &ProviderConfig::new(ProviderKind::Bedrock)
                .with_api_key("br-key")
                .with_region("us-west-2")
                .with_base_url(server.uri())
                .with_model(BARE_MODEL),
        )
        .unwrap();

    let first = client.send(&ask(100)).await.unwrap();
    assert_eq!(first.content, vec![ContentBlock::text("hi")]);
    let scope = client.invocation_resolver().and_then(|r| r.scope());
    assert!(scope.as_deref().is_some_and(|s| s.starts_with("us-west-2:")));
    assert_eq!(
        registry.state().alias(ProviderKind::Bedrock, scope.as_deref(), BARE_MODEL).as_deref(),
        Some("us.anthropic.claude-sonnet-4-5-20250929-v1:0")
    );

    // Cached: goes straight to the alias, no second listing.
    let second = client.send(&ask(100)).await.unwrap();
    assert_eq!(second.text(), "hi");

    let alias_retry = sink
        .records()
        .into_iter()
        .find(|r| r.event == CallEvent::Retry)
        .unwrap();
    assert_eq!(alias_retry.failure.unwrap().category.as_deref(), Some("alias"));
}

#[tokio::test]
async fn bedrock_without_matching_profile_reports_guidance() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "message": "Invocation of model ID mistral.large with on-demand throughput isn't supported."
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/inference-profiles"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"inferenceProfileSummaries": []})))
        .mount(&server)
        .await;

    let registry = registry(Arc::new(MemoryCallSink::new()));
    let client = registry
        .create_client(
            &ProviderConfig::new(ProviderKind::Bedrock)
                .with_api_key("br-key")
                .with_base_url(server.uri())
                .with_model("mistral.large"),
        )
        .unwrap();
    let err = client.send(&ask(100)).await.unwrap_err();
    assert_eq!(err.status(), Some(400));
    assert!(err.message().contains("select an inference alias manually"));
}
