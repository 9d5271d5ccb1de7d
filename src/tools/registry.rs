//! Tool registry - tool lookup, dispatch and state merging
//!
//! Calls of one turn run concurrently. File writes they report are merged
//! into the run state afterwards, under the run lock and in call order, so
//! the resulting map does not depend on which call finished first.

use std::collections::HashMap;

use futures::future::join_all;
use log::{debug, warn};

use super::{ReadFilesTool, RunCommandTool, Tool, ToolContext, ToolError, ToolOutput, WriteFilesTool};
use crate::error::Result;
use crate::llm::{ToolCall, ToolDefinition, ToolResult};

/// Tool output beyond this many bytes is cut before it reaches the model.
pub const MAX_OUTPUT_CHARS: usize = 50_000;

pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    /// Registry with run_command, write_files and read_files
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add_tool(Box::new(RunCommandTool));
        registry.add_tool(Box::new(WriteFilesTool));
        registry.add_tool(Box::new(ReadFilesTool));
        registry
    }

    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn add_tool(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Tool definitions for the model, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.input_schema()))
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Definitions restricted to the given names, in the given order
    pub fn definitions_for(&self, names: &[&str]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| self.tools.get(*name))
            .map(|t| ToolDefinition::new(t.name(), t.description(), t.input_schema()))
            .collect()
    }

    /// Dispatch a single call and merge its writes
    pub async fn dispatch(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolResult> {
        let output = self.invoke(call, ctx).await?;
        Ok(self.settle(call, output, ctx).await)
    }

    /// Dispatch every call of a turn; results come back in call order
    pub async fn dispatch_all(&self, calls: &[ToolCall], ctx: &ToolContext) -> Result<Vec<ToolResult>> {
        let outputs = join_all(
            calls
                .iter()
                .enumerate()
                .map(|(index, call)| async move { self.invoke(call, &ctx.for_call(index)).await }),
        )
        .await;

        let mut results = Vec::with_capacity(calls.len());
        for (call, output) in calls.iter().zip(outputs) {
            results.push(self.settle(call, output?, ctx).await);
        }
        Ok(results)
    }

    async fn invoke(&self, call: &ToolCall, ctx: &ToolContext) -> Result<ToolOutput> {
        match self.tools.get(&call.name) {
            Some(tool) => {
                debug!("Dispatching {} as step {}", call.name, ctx.step_name(&call.name));
                tool.execute(call.input.clone(), ctx).await
            }
            None => {
                warn!("Model requested unknown tool '{}'", call.name);
                Ok(ToolError::UnknownTool {
                    name: call.name.clone(),
                }
                .into())
            }
        }
    }

    /// Apply writes to the run state and shape the model-facing result
    async fn settle(&self, call: &ToolCall, output: ToolOutput, ctx: &ToolContext) -> ToolResult {
        let ToolOutput {
            mut content,
            is_error,
            writes,
        } = output;

        if !writes.is_empty() {
            let merged = ctx
                .state()
                .lock()
                .await
                .upsert_files(writes.into_iter().map(|entry| (entry.path, entry.content)));
            // A failed batch keeps its diagnostic
            if !is_error {
                content = serde_json::to_string(&merged).unwrap_or(content);
            }
        }

        let content = truncate(content);
        if is_error {
            ToolResult::error(&call.id, content)
        } else {
            ToolResult::success(&call.id, content)
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn truncate(mut content: String) -> String {
    if content.len() <= MAX_OUTPUT_CHARS {
        return content;
    }
    let mut end = MAX_OUTPUT_CHARS;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    let dropped = content.len() - end;
    content.truncate(end);
    content.push_str(&format!("\n... [truncated {} bytes]", dropped));
    content
}
