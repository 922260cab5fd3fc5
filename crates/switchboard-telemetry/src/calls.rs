//! Call records and the sinks that receive them.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use switchboard_core::{ContentBlock, LlmError, Request, Response, Role};
use tracing::{info, warn};

/// Lifecycle point a record describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallEvent {
    /// An attempt is about to be sent.
    Attempt,
    /// The call completed.
    Success,
    /// An attempt failed and another will follow.
    Retry,
    /// The call failed for good.
    Error,
    /// The caller aborted the call.
    Cancelled,
}

impl CallEvent {
    /// Stored name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attempt => "attempt",
            Self::Success => "success",
            Self::Retry => "retry",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Request summary without content.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestShape {
    /// Messages in the conversation.
    pub messages: usize,
    /// User turns.
    pub user_messages: usize,
    /// Assistant turns.
    pub assistant_messages: usize,
    /// Tools offered.
    pub tools: usize,
    /// Image blocks across all messages.
    pub images: usize,
    /// System prompt length in characters.
    pub system_chars: usize,
    /// Total message characters.
    pub message_chars: usize,
    /// Output token budget of this attempt.
    pub max_tokens: u32,
}

impl RequestShape {
    /// Summarise a request.
    pub fn of(request: &Request) -> Self {
        let mut shape = Self {
            messages: request.messages.len(),
            tools: request.tool_list().len(),
            system_chars: request.system.as_deref().map_or(0, |s| s.chars().count()),
            max_tokens: request.max_tokens,
            ..Self::default()
        };
        for message in &request.messages {
            match message.role {
                Role::User => shape.user_messages += 1,
                Role::Assistant => shape.assistant_messages += 1,
            }
            shape.message_chars += message.char_count();
            shape.images += message
                .blocks()
                .iter()
                .filter(|b| matches!(b, ContentBlock::Image { .. }))
                .count();
        }
        shape
    }
}

/// Response summary without content.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseShape {
    /// Output blocks.
    pub blocks: usize,
    /// Tool calls among them.
    pub tool_calls: usize,
    /// Text characters.
    pub text_chars: usize,
    /// Canonical stop reason.
    pub stop_reason: String,
    /// Prompt tokens, when reported.
    pub input_tokens: Option<u64>,
    /// Completion tokens, when reported.
    pub output_tokens: Option<u64>,
}

impl ResponseShape {
    /// Summarise a response.
    pub fn of(response: &Response) -> Self {
        Self {
            blocks: response.content.len(),
            tool_calls: response.tool_calls().count(),
            text_chars: response.text().chars().count(),
            stop_reason: response.stop_reason.as_str().to_string(),
            input_tokens: response.usage.map(|u| u.input_tokens),
            output_tokens: response.usage.map(|u| u.output_tokens),
        }
    }
}

const MAX_FAILURE_CHARS: usize = 500;

/// Structured failure reason.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Error kind (`backend`, `cancelled`, ...).
    pub kind: String,
    /// HTTP status, when there was one.
    pub status: Option<u16>,
    /// Retry category that matched (`limit`, `alias`, `capacity`).
    pub category: Option<String>,
    /// Error text, truncated.
    pub message: String,
}

impl FailureInfo {
    /// Describe an error, tagging it with the retry category that applies.
    pub fn of(err: &LlmError, category: Option<&str>) -> Self {
        Self {
            kind: err.error_kind().to_string(),
            status: err.status(),
            category: category.map(str::to_string),
            message: err.to_string().chars().take(MAX_FAILURE_CHARS).collect(),
        }
    }
}

/// One telemetry record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Registry-wide call sequence number.
    pub seq: u64,
    /// Zero-based attempt index within the call.
    pub attempt: u32,
    /// Backend identifier.
    pub provider: String,
    /// Model of this attempt.
    pub model: String,
    /// Tool-free, small auxiliary request.
    pub side_call: bool,
    /// Lifecycle point.
    pub event: CallEvent,
    /// Request summary.
    pub request: RequestShape,
    /// Response summary on success.
    pub response: Option<ResponseShape>,
    /// Failure details on retry, error or cancellation.
    pub failure: Option<FailureInfo>,
    /// Elapsed time since the call started.
    pub duration_ms: u64,
    /// RFC 3339 timestamp.
    pub timestamp: String,
}

/// Current time as an RFC 3339 record timestamp.
pub fn timestamp_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Receives call records. Implementations must not block for long.
pub trait CallSink: Send + Sync {
    /// Record one event.
    fn record(&self, record: &CallRecord);
}

/// Emits records as structured `tracing` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingCallSink;

impl CallSink for TracingCallSink {
    fn record(&self, r: &CallRecord) {
        let request = serde_json::to_string(&r.request).unwrap_or_default();
        match r.event {
            CallEvent::Attempt | CallEvent::Success => {
                let response = r
                    .response
                    .as_ref()
                    .and_then(|s| serde_json::to_string(s).ok());
                info!(
                    target: "switchboard::calls",
                    seq = r.seq,
                    attempt = r.attempt,
                    provider = %r.provider,
                    model = %r.model,
                    side_call = r.side_call,
                    event = r.event.as_str(),
                    duration_ms = r.duration_ms,
                    request = %request,
                    response = response.as_deref(),
                    "llm call"
                );
            }
            CallEvent::Retry | CallEvent::Error | CallEvent::Cancelled => {
                let failure = r
                    .failure
                    .as_ref()
                    .and_then(|f| serde_json::to_string(f).ok());
                warn!(
                    target: "switchboard::calls",
                    seq = r.seq,
                    attempt = r.attempt,
                    provider = %r.provider,
                    model = %r.model,
                    side_call = r.side_call,
                    event = r.event.as_str(),
                    duration_ms = r.duration_ms,
                    request = %request,
                    failure = failure.as_deref(),
                    "llm call"
                );
            }
        }
    }
}

/// Keeps records in memory. Useful in tests and for short-lived hosts.
#[derive(Debug, Default)]
pub struct MemoryCallSink {
    records: Mutex<Vec<CallRecord>>,
}

impl MemoryCallSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().clone()
    }

    /// Records belonging to one call.
    pub fn for_seq(&self, seq: u64) -> Vec<CallRecord> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.seq == seq)
            .cloned()
            .collect()
    }
}

impl CallSink for MemoryCallSink {
    fn record(&self, record: &CallRecord) {
        self.records.lock().push(record.clone());
    }
}
