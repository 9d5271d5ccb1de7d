//! One model turn for one agent.
//!
//! The model call is a durable step named `{agent}-turn-{iteration}`; its
//! response is journaled, so a resumed run rebuilds the same conversation
//! without calling the model again. Tool calls in the response go through
//! the registry, each as its own step.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use super::Agent;
use crate::error::Result;
use crate::llm::{CompletionRequest, CompletionResponse, LlmClient, Message, ToolResult};
use crate::tools::{ToolContext, ToolRegistry};

/// Default deadline for one model call.
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(300);

/// What one turn produced
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub agent: String,
    pub iteration: u32,
    pub response: CompletionResponse,
    pub tool_results: Vec<ToolResult>,
}

impl TurnOutcome {
    pub fn assistant_text(&self) -> &str {
        &self.response.text
    }

    /// The model replied without requesting any tool
    pub fn is_text_only(&self) -> bool {
        self.response.tool_calls.is_empty()
    }
}

pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ToolRegistry>,
    max_tokens: u32,
    llm_timeout: Duration,
}

impl AgentRuntime {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ToolRegistry>) -> Self {
        Self {
            llm,
            registry,
            max_tokens: 8192,
            llm_timeout: DEFAULT_LLM_TIMEOUT,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    /// Run one turn of `agent`, appending the assistant message and any tool
    /// results to `conversation`.
    pub async fn run_turn(
        &self,
        agent: &Agent,
        conversation: &mut Vec<Message>,
        ctx: &ToolContext,
        iteration: u32,
    ) -> Result<TurnOutcome> {
        let request = CompletionRequest::new(&agent.system)
            .with_messages(conversation.clone())
            .with_tools(self.registry.definitions_for(&agent.tool_names()))
            .with_max_tokens(self.max_tokens);

        let llm = &self.llm;
        let request = &request;
        let response: CompletionResponse = ctx
            .steps()
            .execute_with_timeout(&agent.turn_step(iteration), self.llm_timeout, || async move {
                Ok(llm.complete(request.clone()).await?)
            })
            .await?;

        debug!(
            "{} turn {}: {} chars of text, {} tool call(s)",
            agent.name,
            iteration,
            response.text.len(),
            response.tool_calls.len()
        );
        conversation.push(Message::from_response(&response));

        let tool_results = if response.tool_calls.is_empty() {
            Vec::new()
        } else {
            for call in &response.tool_calls {
                info!("{} iteration {} calls {}", agent.name, iteration, call.name);
            }
            let results = self
                .registry
                .dispatch_all(&response.tool_calls, &ctx.for_iteration(iteration))
                .await?;
            conversation.push(Message::tool_results(results.clone()));
            results
        };

        Ok(TurnOutcome {
            agent: agent.name.clone(),
            iteration,
            response,
            tool_results,
        })
    }
}
