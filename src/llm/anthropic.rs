//! Anthropic messages API client
//!
//! Requests carry the whole conversation, tool definitions included; the
//! response's content blocks are folded into one text plus the tool calls.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

use super::client::{LlmClient, LlmError};
use super::types::{CompletionRequest, CompletionResponse, StopReason, ToolCall, Usage};

/// Messages endpoint of the public API
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Environment variable read for the API key unless configured otherwise
pub const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Seconds to back off when a 429 carries no usable retry-after header
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub api_key_env: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(300),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
        }
    }
}

/// Response body of the messages endpoint
#[derive(Debug, Deserialize)]
struct WireResponse {
    content: Vec<WireBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// Error body of a rejected request
#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    message: String,
}

fn stop_reason(raw: Option<&str>) -> StopReason {
    match raw {
        Some("tool_use") => StopReason::ToolUse,
        Some("max_tokens") => StopReason::MaxTokens,
        Some("stop_sequence") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

pub struct AnthropicClient {
    client: Client,
    api_key: String,
    config: AnthropicConfig,
    usage: Arc<Mutex<Usage>>,
}

impl AnthropicClient {
    /// Client keyed from the configured environment variable
    pub fn new(config: AnthropicConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| LlmError::MissingApiKey {
            env_var: config.api_key_env.clone(),
        })?;

        Self::with_api_key(api_key, config)
    }

    pub fn with_api_key(api_key: impl Into<String>, config: AnthropicConfig) -> Result<Self, LlmError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            config,
            usage: Arc::new(Mutex::new(Usage::default())),
        })
    }

    fn build_request(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.config.model),
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": request.messages,
        });

        if !request.system.is_empty() {
            body["system"] = json!(request.system);
        }
        if !request.tools.is_empty() {
            body["tools"] = request.tools.iter().map(|t| t.to_anthropic_schema()).collect();
        }

        body
    }

    fn parse_response(&self, body: Value) -> Result<CompletionResponse, LlmError> {
        let wire: WireResponse =
            serde_json::from_value(body).map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let wire_usage = wire.usage.unwrap_or_default();
        let usage = Usage::new(wire_usage.input_tokens, wire_usage.output_tokens);
        if let Ok(mut total) = self.usage.lock() {
            total.add(&usage);
        }

        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in wire.content {
            match block {
                WireBlock::Text { text } => texts.push(text),
                WireBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall::new(id, name, input)),
                WireBlock::Other => {}
            }
        }

        Ok(CompletionResponse {
            text: texts.join("\n"),
            tool_calls,
            stop_reason: stop_reason(wire.stop_reason.as_deref()),
            usage,
        })
    }

    async fn send_request(&self, body: &Value) -> Result<Value, LlmError> {
        let response = self
            .client
            .post(&self.config.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<WireError>(&raw)
                .map(|e| e.error.message)
                .unwrap_or(raw);
            return Err(LlmError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    /// Tokens used by every response parsed so far
    pub fn total_usage(&self) -> Usage {
        self.usage.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.build_request(&request);
        let response = self.send_request(&body).await?;
        self.parse_response(response)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::{Message, ToolDefinition, ToolResult};

    fn client() -> AnthropicClient {
        AnthropicClient::with_api_key("test-key", AnthropicConfig::default()).unwrap()
    }

    #[test]
    fn test_config_default() {
        let config = AnthropicConfig::default();
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.api_key_env, "ANTHROPIC_API_KEY");
    }

    #[test]
    fn test_client_without_api_key() {
        let config = AnthropicConfig {
            api_key_env: "VIBE_RUNNER_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..Default::default()
        };
        let result = AnthropicClient::new(config);
        assert!(matches!(result, Err(LlmError::MissingApiKey { .. })));
    }

    #[test]
    fn test_build_request_basic() {
        let request = CompletionRequest::new("You are helpful").with_user_message("Hello");
        let body = client().build_request(&request);

        assert_eq!(body["model"], DEFAULT_MODEL);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert_eq!(body["system"], "You are helpful");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"][0]["type"], "text");
        assert_eq!(body["messages"][0]["content"][0]["text"], "Hello");
    }

    #[test]
    fn test_build_request_with_tools() {
        let tool = ToolDefinition::new(
            "read_files",
            "Read files",
            json!({"type": "object", "properties": {"paths": {"type": "array"}}}),
        );
        let request = CompletionRequest::new("test")
            .with_user_message("Read foo.txt")
            .with_tools(vec![tool]);

        let body = client().build_request(&request);
        assert_eq!(body["tools"][0]["name"], "read_files");
    }

    #[test]
    fn test_build_request_with_tool_results() {
        let request = CompletionRequest::new("system").with_messages(vec![
            Message::user("Read the file"),
            Message::tool_results(vec![ToolResult::error("toolu_456", "File not found")]),
        ]);

        let body = client().build_request(&request);
        let last = &body["messages"][1];
        assert_eq!(last["role"], "user");
        assert_eq!(last["content"][0]["type"], "tool_result");
        assert_eq!(last["content"][0]["tool_use_id"], "toolu_456");
        assert!(last["content"][0]["is_error"].as_bool().unwrap());
    }

    #[test]
    fn test_parse_response_with_tool_use() {
        let api_response = json!({
            "content": [
                { "type": "text", "text": "Let me write that" },
                {
                    "type": "tool_use",
                    "id": "toolu_123",
                    "name": "write_files",
                    "input": { "files": [{"path": "app/page.tsx", "content": "x"}] }
                }
            ],
            "stop_reason": "tool_use",
            "usage": { "input_tokens": 50, "output_tokens": 30 }
        });

        let response = client().parse_response(api_response).unwrap();
        assert_eq!(response.text, "Let me write that");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].id, "toolu_123");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn test_parse_response_without_content_is_invalid() {
        let result = client().parse_response(json!({"stop_reason": "end_turn"}));
        assert!(matches!(result, Err(LlmError::InvalidResponse(_))));
    }

    #[test]
    fn test_parse_response_stop_reasons() {
        let client = client();
        let cases = vec![
            ("end_turn", StopReason::EndTurn),
            ("tool_use", StopReason::ToolUse),
            ("max_tokens", StopReason::MaxTokens),
            ("stop_sequence", StopReason::StopSequence),
            ("unknown", StopReason::EndTurn),
        ];

        for (reason, expected) in cases {
            let response = client
                .parse_response(json!({"content": [], "stop_reason": reason}))
                .unwrap();
            assert_eq!(response.stop_reason, expected);
        }
    }

    #[test]
    fn test_parse_response_skips_unknown_blocks() {
        let response = client()
            .parse_response(json!({
                "content": [
                    { "type": "thinking", "thinking": "hmm" },
                    { "type": "text", "text": "first" },
                    { "type": "text", "text": "second" }
                ],
                "stop_reason": "end_turn"
            }))
            .unwrap();
        assert_eq!(response.text, "first\nsecond");
        assert!(response.tool_calls.is_empty());
    }

    #[test]
    fn test_total_usage_accumulation() {
        let client = client();
        let _ = client.parse_response(json!({
            "content": [],
            "usage": { "input_tokens": 100, "output_tokens": 50 }
        }));
        let _ = client.parse_response(json!({
            "content": [],
            "usage": { "input_tokens": 200, "output_tokens": 100 }
        }));

        let total = client.total_usage();
        assert_eq!(total.input_tokens, 300);
        assert_eq!(total.output_tokens, 150);
    }

    #[test]
    fn test_debug_impl_hides_key() {
        let debug_str = format!("{:?}", client());
        assert!(debug_str.contains("AnthropicClient"));
        assert!(!debug_str.contains("test-key"));
    }
}
