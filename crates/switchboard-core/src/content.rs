//! Content blocks and conversation messages.
//!
//! A [`Message`] carries either a plain string or an ordered list of
//! [`ContentBlock`]s. Block order is significant: codecs must emit blocks in
//! the order they appear here and decode them back in wire order.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who authored a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The calling application or end user.
    User,
    /// The model.
    Assistant,
}

impl Role {
    /// Wire-level name (`user` / `assistant`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single unit of message content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    /// Plain text.
    #[serde(rename = "text")]
    Text {
        /// The text.
        text: String,
    },
    /// A tool invocation emitted by the model.
    #[serde(rename = "toolCall")]
    ToolCall {
        /// Call identifier, echoed back by the matching result.
        id: String,
        /// Canonical tool name.
        name: String,
        /// Tool arguments (a JSON object in practice).
        arguments: Value,
    },
    /// The outcome of a tool invocation, sent back by the caller.
    #[serde(rename = "toolResult", rename_all = "camelCase")]
    ToolResult {
        /// Identifier of the originating [`ContentBlock::ToolCall`].
        tool_call_id: String,
        /// Result payload as text.
        content: String,
        /// Whether the tool failed.
        #[serde(default)]
        is_error: bool,
    },
    /// Base64-encoded image.
    #[serde(rename = "image", rename_all = "camelCase")]
    Image {
        /// Base64 payload (no data-URL prefix).
        data: String,
        /// MIME type, e.g. `image/png`.
        mime_type: String,
        /// Size of the image before encoding, when known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_size_bytes: Option<u64>,
    },
}

impl ContentBlock {
    /// Shorthand for a [`ContentBlock::Text`].
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Shorthand for a [`ContentBlock::ToolCall`].
    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Shorthand for a [`ContentBlock::ToolResult`].
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error,
        }
    }

    /// The text of a [`ContentBlock::Text`], if this is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Message body: a bare string or an ordered block list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text shorthand.
    Text(String),
    /// Ordered content blocks.
    Blocks(Vec<ContentBlock>),
}

/// One conversational turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author of the turn.
    pub role: Role,
    /// Turn body.
    pub content: MessageContent,
}

impl Message {
    /// A plain-text user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// A plain-text assistant turn.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// A turn built from explicit blocks.
    pub fn with_blocks(role: Role, blocks: Vec<ContentBlock>) -> Self {
        Self {
            role,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// The content as blocks; a bare string becomes a single text block.
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match &self.content {
            MessageContent::Text(text) => vec![ContentBlock::text(text.clone())],
            MessageContent::Blocks(blocks) => blocks.clone(),
        }
    }

    /// Concatenated text when the message holds nothing but text.
    ///
    /// Returns `None` as soon as any non-text block is present.
    pub fn text_only(&self) -> Option<String> {
        match &self.content {
            MessageContent::Text(text) => Some(text.clone()),
            MessageContent::Blocks(blocks) => {
                let mut out = String::new();
                for block in blocks {
                    out.push_str(block.as_text()?);
                }
                Some(out)
            }
        }
    }

    /// Total characters of text and tool payloads, used for request shapes.
    pub fn char_count(&self) -> usize {
        match &self.content {
            MessageContent::Text(text) => text.chars().count(),
            MessageContent::Blocks(blocks) => blocks.iter().map(block_chars).sum(),
        }
    }
}

fn block_chars(block: &ContentBlock) -> usize {
    match block {
        ContentBlock::Text { text } => text.chars().count(),
        ContentBlock::ToolCall { arguments, .. } => arguments.to_string().chars().count(),
        ContentBlock::ToolResult { content, .. } => content.chars().count(),
        ContentBlock::Image { .. } => 0,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
