//! write_files tool - Create or update files in the sandbox
//!
//! The step records the entries that were written. Merging them into the
//! run's file map is left to the registry, so the map is rebuilt the same way
//! whether the step ran or was replayed.

use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FileEntry, Tool, ToolContext, ToolOutput, parse_input, recover};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteFilesInput {
    pub files: Vec<FileEntry>,
}

pub struct WriteFilesTool;

#[async_trait]
impl Tool for WriteFilesTool {
    fn name(&self) -> &'static str {
        "write_files"
    }

    fn description(&self) -> &'static str {
        "Create or update files in the sandbox. Paths are relative to the project root."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "path": {"type": "string"},
                            "content": {"type": "string"}
                        },
                        "required": ["path", "content"]
                    }
                }
            },
            "required": ["files"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let input: WriteFilesInput = match parse_input(input) {
            Ok(input) => input,
            Err(e) => return Ok(e.into()),
        };

        let handle = ctx.handle();
        let files = input.files.as_slice();

        ctx.steps()
            .execute_checked(&ctx.step_name(self.name()), &input, || async move {
                for (written, entry) in files.iter().enumerate() {
                    if let Err(e) = handle.write_file(&entry.path, &entry.content).await {
                        let reason = recover(e)?;
                        warn!("Writing {} failed: {}", entry.path, reason);
                        // Entries before the failure are on disk and must reach the file map too
                        return Ok(ToolOutput::error(format!(
                            "Error: {} (wrote {} of {} file(s))",
                            reason,
                            written,
                            files.len()
                        ))
                        .with_writes(files[..written].to_vec()));
                    }
                }
                Ok(ToolOutput::success(format!("Wrote {} file(s)", files.len())).with_writes(files.to_vec()))
            })
            .await
    }
}
