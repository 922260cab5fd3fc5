//! # switchboard-core
//!
//! Vendor-neutral vocabulary shared by every Switchboard crate:
//!
//! - **Content blocks**: `ContentBlock` covering text, tool calls, tool results and images
//! - **Messages**: `Message`, `Request`, `Response`, the closed `StopReason` set
//! - **Tools**: `ToolDefinition` with per-request uniqueness validation
//! - **Errors**: `LlmError` taxonomy via `thiserror`
//! - **Client contract**: the `LlmClient` trait, `ProviderKind`, `ProviderConfig`

#![deny(unsafe_code)]

pub mod client;
pub mod content;
pub mod errors;
pub mod messages;
pub mod security;
pub mod tools;

pub use client::{
    ConnectionStatus, InvocationResolver, LlmClient, ModelSummary, ProviderConfig, ProviderKind,
};
pub use content::{ContentBlock, Message, MessageContent, Role};
pub use errors::{LlmError, Result};
pub use messages::{Request, Response, StopReason, TokenUsage};
pub use security::ApiKey;
pub use tools::{ToolDefinition, validate_tool_names};

/// Re-exported so callers can build cancellable requests without a direct dependency.
pub use tokio_util::sync::CancellationToken;
