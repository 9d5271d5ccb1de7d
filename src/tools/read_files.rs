//! read_files tool - Read a batch of files from the sandbox

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{FileEntry, Tool, ToolContext, ToolOutput, parse_input, recover};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadFilesInput {
    pub files: Vec<String>,
}

pub struct ReadFilesTool;

#[async_trait]
impl Tool for ReadFilesTool {
    fn name(&self) -> &'static str {
        "read_files"
    }

    fn description(&self) -> &'static str {
        "Read files from the sandbox. Fails as a whole if any path cannot be read."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "items": {"type": "string"},
                    "description": "Paths to read"
                }
            },
            "required": ["files"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let input: ReadFilesInput = match parse_input(input) {
            Ok(input) => input,
            Err(e) => return Ok(e.into()),
        };

        let handle = ctx.handle();
        let paths = input.files.as_slice();

        ctx.steps()
            .execute_checked(&ctx.step_name(self.name()), &input, || async move {
                let mut contents = Vec::with_capacity(paths.len());
                for path in paths {
                    match handle.read_file(path).await {
                        Ok(content) => contents.push(FileEntry {
                            path: path.clone(),
                            content,
                        }),
                        Err(e) => return Ok(ToolOutput::error(format!("Error: {}", recover(e)?))),
                    }
                }
                Ok(ToolOutput::success(serde_json::to_string(&contents)?))
            })
            .await
    }
}
