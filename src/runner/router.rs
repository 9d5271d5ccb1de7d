//! Routing policy between iterations.
//!
//! A pure function of the run state and the iteration counter; it never
//! looks at the clock and needs no agent, model or sandbox to evaluate.

use crate::agent::Agent;
use crate::domain::{RunState, StopReason};

/// Default iteration budget of a run.
pub const DEFAULT_MAX_ITERATIONS: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Run one more turn with the agent at this index
    Continue(usize),
    Stop(StopReason),
}

/// Decide the next step after `iteration` completed iterations.
pub fn route(state: &RunState, iteration: u32, max_iterations: u32, agents: &[Agent]) -> RouteDecision {
    if state.has_summary() {
        return RouteDecision::Stop(StopReason::Completed);
    }
    if iteration >= max_iterations {
        return RouteDecision::Stop(StopReason::BudgetExhausted);
    }
    if agents.is_empty() {
        return RouteDecision::Stop(StopReason::NoAgent);
    }
    RouteDecision::Continue(0)
}
