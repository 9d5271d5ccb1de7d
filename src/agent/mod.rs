//! Agents and the per-turn runtime
//!
//! An [`Agent`] is a name, a system prompt and the tools it may call. The
//! [`AgentRuntime`] performs one model turn for an agent and dispatches any
//! tool calls it requests. [`inspect_completion`] runs after every turn and
//! records the agent's final report when the completion marker appears.

mod prompt;
mod runtime;

pub use prompt::CODE_AGENT_PROMPT;
pub use runtime::{AgentRuntime, TurnOutcome};

use log::{debug, info};

use crate::domain::RunState;

/// Opening delimiter of the agent's final report
pub const COMPLETION_MARKER: &str = "<task_summary>";

/// Closing delimiter of the agent's final report
pub const COMPLETION_MARKER_END: &str = "</task_summary>";

pub const CODE_AGENT_NAME: &str = "code-agent";

/// Sent after a text-only turn that did not finish the task
pub const CONTINUE_PROMPT: &str =
    "Continue working on the task. When everything is done, reply with your summary wrapped in <task_summary></task_summary>.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Agent {
    pub name: String,
    pub system: String,
    pub tools: Vec<String>,
}

impl Agent {
    pub fn new(name: impl Into<String>, system: impl Into<String>, tools: &[&str]) -> Self {
        Self {
            name: name.into(),
            system: system.into(),
            tools: tools.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// The built-in code-writing agent
    pub fn code_agent() -> Self {
        Self::new(
            CODE_AGENT_NAME,
            CODE_AGENT_PROMPT,
            &["run_command", "write_files", "read_files"],
        )
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(String::as_str).collect()
    }

    /// Durable step name of this agent's model call in `iteration`
    pub fn turn_step(&self, iteration: u32) -> String {
        format!("{}-turn-{}", self.name, iteration)
    }
}

/// Whether an assistant message carries the completion marker
pub fn has_completion_marker(text: &str) -> bool {
    text.contains(COMPLETION_MARKER)
}

/// Text between the completion delimiters, if both are present
pub fn extract_summary(text: &str) -> Option<&str> {
    let start = text.find(COMPLETION_MARKER)? + COMPLETION_MARKER.len();
    let end = text[start..].find(COMPLETION_MARKER_END)? + start;
    Some(text[start..end].trim())
}

/// Post-turn inspection: record the summary on the first marker seen.
///
/// The whole assistant message becomes the summary. Returns true when the
/// turn carried the marker, whether or not a summary was already set.
pub fn inspect_completion(outcome: &TurnOutcome, state: &mut RunState) -> bool {
    let text = outcome.assistant_text();
    if !has_completion_marker(text) {
        return false;
    }

    if state.set_summary_once(text) {
        info!("{} reported completion in iteration {}", outcome.agent, outcome.iteration);
    } else {
        debug!("Ignoring repeated completion from {} in iteration {}", outcome.agent, outcome.iteration);
    }
    true
}
