//! run_command tool - Execute shell commands in the sandbox

use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Tool, ToolContext, ToolOutput, parse_input, recover};
use crate::error::Result;
use crate::sandbox::{CommandOutput, run_collecting};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCommandInput {
    pub command: String,
}

pub struct RunCommandTool;

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &'static str {
        "run_command"
    }

    fn description(&self) -> &'static str {
        "Run a terminal command in the sandbox, for example to install packages with npm install <package> --yes."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let input: RunCommandInput = match parse_input(input) {
            Ok(input) => input,
            Err(e) => return Ok(e.into()),
        };

        let handle = ctx.handle();
        let timeout = ctx.command_timeout();
        let command = input.command.as_str();

        ctx.steps()
            .execute_checked(&ctx.step_name(self.name()), &input, || async move {
                let (result, output) = run_collecting(handle, command, timeout).await;
                match result {
                    Ok(0) => Ok(ToolOutput::success(output.stdout)),
                    Ok(code) => {
                        warn!("Command '{}' exited with {}", command, code);
                        Ok(ToolOutput::error(failure_report(
                            command,
                            &format!("exit code {}", code),
                            &output,
                        )))
                    }
                    Err(e) => {
                        let reason = recover(e)?;
                        warn!("Command '{}' failed: {}", command, reason);
                        Ok(ToolOutput::error(failure_report(command, &reason.to_string(), &output)))
                    }
                }
            })
            .await
    }
}

/// Diagnostic carrying the command and both captured streams
fn failure_report(command: &str, reason: &str, output: &CommandOutput) -> String {
    format!(
        "Command failed: {}\ncommand: {}\nstdout: {}\nstderr: {}",
        reason, command, output.stdout, output.stderr
    )
}
