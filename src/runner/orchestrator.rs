//! Orchestrator - the per-run iteration loop.
//!
//! Each iteration asks the router what to do, runs one agent turn, then
//! inspects the turn for the completion marker. Exactly one turn is in
//! flight at a time. Cancellation stops the loop between or during turns.

use log::{debug, info};
use tokio_util::sync::CancellationToken;

use super::router::{RouteDecision, route};
use crate::agent::{Agent, AgentRuntime, CONTINUE_PROMPT, inspect_completion};
use crate::domain::{Run, StopReason};
use crate::error::{Result, WorkerError};
use crate::llm::Message;
use crate::tools::ToolContext;

/// Phase of a run's loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Pending,
    Iterating,
    Stopped(StopReason),
}

impl RunPhase {
    fn can_transition_to(&self, next: &RunPhase) -> bool {
        matches!(
            (self, next),
            (RunPhase::Pending, RunPhase::Iterating)
                | (RunPhase::Iterating, RunPhase::Iterating)
                | (RunPhase::Iterating, RunPhase::Stopped(_))
        )
    }
}

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopReport {
    pub stop_reason: StopReason,
    pub iterations: u32,
}

pub struct Orchestrator {
    runtime: AgentRuntime,
    agents: Vec<Agent>,
    max_iterations: u32,
}

impl Orchestrator {
    pub fn new(runtime: AgentRuntime, agents: Vec<Agent>, max_iterations: u32) -> Self {
        Self {
            runtime,
            agents,
            max_iterations,
        }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Drive the loop for `run` until the router stops it or `cancel` fires.
    ///
    /// Errors are fatal to the run: exhausted steps and non-retryable model
    /// failures. Tool failures never surface here. The iteration count is
    /// kept on `run` either way.
    pub async fn run(&self, run: &mut Run, ctx: &ToolContext, cancel: &CancellationToken) -> Result<LoopReport> {
        let run_id = ctx.steps().run_id();
        let mut phase = RunPhase::Pending;
        let mut conversation = vec![Message::user(run.task.as_str())];
        let mut iteration = 0;

        transition(&mut phase, RunPhase::Iterating)?;
        let stop_reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let decision = {
                let state = ctx.state().lock().await;
                route(&state, iteration, self.max_iterations, &self.agents)
            };
            let agent = match decision {
                RouteDecision::Stop(reason) => break reason,
                RouteDecision::Continue(index) => &self.agents[index],
            };

            iteration += 1;
            run.record_iterations(iteration);
            transition(&mut phase, RunPhase::Iterating)?;
            debug!("Run {} iteration {}/{} with {}", run_id, iteration, self.max_iterations, agent.name);

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Cancelled,
                outcome = self.runtime.run_turn(agent, &mut conversation, ctx, iteration) => outcome?,
            };

            let finished = {
                let mut state = ctx.state().lock().await;
                inspect_completion(&outcome, &mut state)
            };
            if outcome.is_text_only() && !finished {
                conversation.push(Message::user(CONTINUE_PROMPT));
            }
        };

        transition(&mut phase, RunPhase::Stopped(stop_reason))?;
        info!("Run {} stopped after {} iteration(s): {}", run_id, iteration, stop_reason);

        Ok(LoopReport {
            stop_reason,
            iterations: iteration,
        })
    }
}

fn transition(phase: &mut RunPhase, next: RunPhase) -> Result<()> {
    if !phase.can_transition_to(&next) {
        return Err(WorkerError::InvalidState(format!(
            "cannot move run from {:?} to {:?}",
            phase, next
        )));
    }
    *phase = next;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TriggerEvent;
    use crate::llm::{CompletionResponse, MockLlmClient, ToolCall};
    use crate::tools::ToolRegistry;
    use crate::tools::context::testing::memory_context;
    use std::sync::Arc;

    fn orchestrator(llm: Arc<MockLlmClient>, max_iterations: u32) -> Orchestrator {
        Orchestrator::new(
            AgentRuntime::new(llm, Arc::new(ToolRegistry::standard())),
            vec![Agent::code_agent()],
            max_iterations,
        )
    }

    fn new_run(task: &str) -> Run {
        Run::new(&TriggerEvent::new(task))
    }

    fn write_page() -> CompletionResponse {
        CompletionResponse::tool_use(vec![ToolCall::new(
            "toolu_1",
            "write_files",
            serde_json::json!({"files": [{"path": "app/page.tsx", "content": "hello"}]}),
        )])
    }

    #[test]
    fn test_phase_transitions() {
        assert!(RunPhase::Pending.can_transition_to(&RunPhase::Iterating));
        assert!(RunPhase::Iterating.can_transition_to(&RunPhase::Stopped(StopReason::Completed)));
        assert!(!RunPhase::Pending.can_transition_to(&RunPhase::Stopped(StopReason::Completed)));
        assert!(!RunPhase::Stopped(StopReason::Completed).can_transition_to(&RunPhase::Iterating));
    }

    #[tokio::test]
    async fn test_stops_after_completion_marker() {
        let llm = Arc::new(MockLlmClient::new(vec![
            write_page(),
            CompletionResponse::text("<task_summary>Hello page</task_summary>"),
        ]));
        let (ctx, _) = memory_context().await;

        let report = orchestrator(llm.clone(), 15)
            .run(&mut new_run("create a hello world page"), &ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::Completed);
        assert_eq!(report.iterations, 2);
        assert_eq!(llm.call_count(), 2);
        assert!(ctx.state().lock().await.is_success());
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let llm = Arc::new(MockLlmClient::new(Vec::new()).with_fallback(CompletionResponse::text("working on it")));
        let (ctx, _) = memory_context().await;

        let report = orchestrator(llm.clone(), 4)
            .run(&mut new_run("never finishes"), &ctx, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.stop_reason, StopReason::BudgetExhausted);
        assert_eq!(report.iterations, 4);
        assert_eq!(llm.call_count(), 4);
        assert!(!ctx.state().lock().await.has_summary());
    }

    #[tokio::test]
    async fn test_nudge_after_text_only_turn() {
        let llm = Arc::new(MockLlmClient::new(vec![
            CompletionResponse::text("Let me think."),
            CompletionResponse::text("<task_summary>done</task_summary>"),
        ]));
        let (ctx, _) = memory_context().await;

        orchestrator(llm.clone(), 15)
            .run(&mut new_run("task"), &ctx, &CancellationToken::new())
            .await
            .unwrap();

        let second = &llm.requests()[1];
        let last = second.messages.last().unwrap();
        assert_eq!(last.text(), CONTINUE_PROMPT);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let llm = Arc::new(MockLlmClient::new(Vec::new()));
        let (ctx, _) = memory_context().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = orchestrator(llm.clone(), 15).run(&mut new_run("task"), &ctx, &cancel).await.unwrap();
        assert_eq!(report.stop_reason, StopReason::Cancelled);
        assert_eq!(report.iterations, 0);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_model_failure_is_fatal() {
        let llm = Arc::new(MockLlmClient::new(Vec::new()));
        let (ctx, _) = memory_context().await;

        let mut run = new_run("task");

        let result = orchestrator(llm, 15).run(&mut run, &ctx, &CancellationToken::new()).await;
        assert!(matches!(result, Err(WorkerError::Llm(_))));
        assert_eq!(run.iteration, 1);
    }
}
