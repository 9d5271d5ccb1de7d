//! LLM Client Layer - model collaborator for the agent runtime
//!
//! This module provides:
//! - Conversation types with tool_use / tool_result blocks
//! - LlmClient trait for API abstraction
//! - AnthropicClient implementation
//! - MockLlmClient for scripted runs

pub mod anthropic;
pub mod client;
pub mod types;

pub use anthropic::{AnthropicClient, AnthropicConfig, DEFAULT_API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use client::{LlmClient, LlmError, MockLlmClient};
pub use types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, Role, StopReason, ToolCall, ToolDefinition,
    ToolResult, Usage,
};
