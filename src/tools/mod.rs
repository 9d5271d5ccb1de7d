//! Tool system for agent turns
//!
//! Tools act on the run's sandbox session. Each invocation is a durable step
//! named `{tool}-{iteration}-{index}`, so a resumed run replays recorded
//! results instead of repeating side effects. Failures inside the sandbox are
//! returned as diagnostic [`ToolOutput`]s for the agent to react to; only
//! step-log failures (exhausted retries, journal errors) come back as `Err`.

pub(crate) mod context;
mod read_files;
mod registry;
mod run_command;
mod write_files;

pub use context::ToolContext;
pub use read_files::{ReadFilesInput, ReadFilesTool};
pub use registry::{MAX_OUTPUT_CHARS, ToolRegistry};
pub use run_command::{RunCommandInput, RunCommandTool};
pub use write_files::{WriteFilesInput, WriteFilesTool};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WorkerError};
use crate::sandbox::SandboxError;

/// A tool that can be called by the model
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (matches the model's tool_use name)
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// Execute the tool
    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutput>;
}

/// A path and the full content written to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub content: String,
}

/// Result of a tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
    /// Files to upsert into the run state once the call completes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub writes: Vec<FileEntry>,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            writes: Vec::new(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            writes: Vec::new(),
        }
    }

    pub fn with_writes(mut self, writes: Vec<FileEntry>) -> Self {
        self.writes = writes;
        self
    }
}

/// Tool-level failures, always rendered into a diagnostic for the agent
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("InvalidToolInput: {message}")]
    InvalidInput { message: String },

    #[error("Tool not found: {name}")]
    UnknownTool { name: String },

    #[error("ToolExecutionError: {0}")]
    Execution(#[from] SandboxError),
}

impl From<ToolError> for ToolOutput {
    fn from(err: ToolError) -> Self {
        ToolOutput::error(err.to_string())
    }
}

/// Parse a tool's raw input into its typed form
pub(crate) fn parse_input<T: DeserializeOwned>(input: Value) -> std::result::Result<T, ToolError> {
    serde_json::from_value(input).map_err(|e| ToolError::InvalidInput { message: e.to_string() })
}

/// Provider failures go back to the step log for retry; anything else the
/// sandbox reports is a tool failure for the agent to see.
pub(crate) fn recover(err: SandboxError) -> Result<ToolError> {
    match err {
        SandboxError::Provider(_) => Err(WorkerError::Sandbox(err)),
        other => Ok(ToolError::Execution(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_output_success() {
        let output = ToolOutput::success("Operation completed");
        assert_eq!(output.content, "Operation completed");
        assert!(!output.is_error);
        assert!(output.writes.is_empty());
    }

    #[test]
    fn test_tool_error_renders_diagnostic() {
        let output: ToolOutput = ToolError::InvalidInput {
            message: "missing field `command`".to_string(),
        }
        .into();
        assert!(output.is_error);
        assert!(output.content.starts_with("InvalidToolInput:"));
    }

    #[test]
    fn test_parse_input_rejects_malformed() {
        let result: std::result::Result<RunCommandInput, _> = parse_input(serde_json::json!({"cmd": "ls"}));
        assert!(matches!(result, Err(ToolError::InvalidInput { .. })));
    }

    #[test]
    fn test_recover_splits_provider_errors() {
        assert!(recover(SandboxError::Provider("503".to_string())).is_err());
        assert!(matches!(
            recover(SandboxError::FileNotFound { path: "a".to_string() }),
            Ok(ToolError::Execution(_))
        ));
    }

    #[test]
    fn test_writes_not_serialized_when_empty() {
        let json = serde_json::to_value(ToolOutput::success("ok")).unwrap();
        assert!(json.get("writes").is_none());
    }
}
