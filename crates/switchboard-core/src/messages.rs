//! Request and response envelopes.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::content::{ContentBlock, Message};
use crate::tools::ToolDefinition;

/// Why the model stopped generating.
///
/// Closed set: every codec maps unknown or missing backend values to
/// [`StopReason::EndTurn`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of turn.
    #[default]
    EndTurn,
    /// The model wants tool results.
    ToolUse,
    /// Output was cut at the token ceiling.
    MaxTokens,
    /// A stop sequence matched.
    StopSequence,
}

impl StopReason {
    /// Wire-level name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
        }
    }
}

/// Token counters reported by the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
}

/// A single completion request.
#[derive(Clone, Debug, Default)]
pub struct Request {
    /// Model identifier. Empty means the client's configured model.
    pub model: String,
    /// Maximum output tokens.
    pub max_tokens: u32,
    /// System prompt.
    pub system: Option<String>,
    /// Ordered conversation.
    pub messages: Vec<Message>,
    /// Tools offered to the model.
    pub tools: Option<Vec<ToolDefinition>>,
    /// Caller-supplied abort signal.
    pub cancel: Option<CancellationToken>,
}

impl Request {
    /// A request for `model` with the given output budget.
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            ..Self::default()
        }
    }

    /// Set the system prompt.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Append a message.
    #[must_use]
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Replace the message list.
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Offer tools.
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Tools as a slice; empty when none were offered.
    pub fn tool_list(&self) -> &[ToolDefinition] {
        self.tools.as_deref().unwrap_or_default()
    }

    /// Whether the caller already aborted.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    /// The caller's token, or a fresh one that never fires.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone().unwrap_or_default()
    }
}

/// A decoded completion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// Ordered output blocks. Never empty.
    pub content: Vec<ContentBlock>,
    /// Why generation stopped.
    pub stop_reason: StopReason,
    /// Token usage, absent when the backend did not report it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl Response {
    /// Build a response, substituting an empty text block for empty content.
    pub fn new(mut content: Vec<ContentBlock>, stop_reason: StopReason, usage: Option<TokenUsage>) -> Self {
        if content.is_empty() {
            content.push(ContentBlock::text(""));
        }
        Self {
            content,
            stop_reason,
            usage,
        }
    }

    /// All text blocks joined together.
    pub fn text(&self) -> String {
        self.content.iter().filter_map(ContentBlock::as_text).collect()
    }

    /// Tool-call blocks in emission order.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ContentBlock> {
        self.content
            .iter()
            .filter(|b| matches!(b, ContentBlock::ToolCall { .. }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
