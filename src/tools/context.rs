//! Tool execution context - scoped to one call within one run

use std::sync::Arc;
use std::time::Duration;

use crate::domain::SharedRunState;
use crate::sandbox::SandboxHandle;
use crate::steps::DurableSteps;

/// Default deadline for a single sandbox command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Execution context for tools
#[derive(Clone)]
pub struct ToolContext {
    handle: Arc<dyn SandboxHandle>,
    state: SharedRunState,
    steps: DurableSteps,
    iteration: u32,
    call_index: usize,
    command_timeout: Duration,
}

impl ToolContext {
    pub fn new(handle: Arc<dyn SandboxHandle>, state: SharedRunState, steps: DurableSteps) -> Self {
        Self {
            handle,
            state,
            steps,
            iteration: 0,
            call_index: 0,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Context for the calls of one iteration
    pub fn for_iteration(&self, iteration: u32) -> Self {
        Self {
            iteration,
            call_index: 0,
            ..self.clone()
        }
    }

    /// Context for the `index`-th call of the current iteration
    pub fn for_call(&self, index: usize) -> Self {
        Self {
            call_index: index,
            ..self.clone()
        }
    }

    /// Durable step name of this call
    pub fn step_name(&self, tool: &str) -> String {
        format!("{}-{}-{}", tool, self.iteration, self.call_index)
    }

    pub fn handle(&self) -> &dyn SandboxHandle {
        self.handle.as_ref()
    }

    pub fn state(&self) -> &SharedRunState {
        &self.state
    }

    pub fn steps(&self) -> &DurableSteps {
        &self.steps
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }
}
