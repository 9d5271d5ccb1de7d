//! Worker - one trigger in, one outcome record out.
//!
//! The worker records the trigger, acquires the sandbox, drives the
//! orchestrator and hands the final state to the persister. Every stage is
//! built on durable steps, so [`Worker::resume`] can pick up a run that
//! crashed part-way and finish it without repeating committed effects.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio_util::sync::CancellationToken;

use super::orchestrator::Orchestrator;
use super::router::DEFAULT_MAX_ITERATIONS;
use crate::agent::{Agent, AgentRuntime};
use crate::domain::{OutcomeKind, Run, RunConclusion, RunOutput, RunState, StopReason, TriggerEvent};
use crate::error::{Result, WorkerError};
use crate::id::generate_run_id;
use crate::llm::LlmClient;
use crate::persist::{OutcomeStore, ResultPersister};
use crate::sandbox::{GET_SANDBOX_ID, SandboxHandle, SandboxProvider, SessionManager};
use crate::steps::{DEFAULT_STEP_TIMEOUT, DurableSteps, RetryPolicy, StepJournal};
use crate::tools::{ToolContext, ToolRegistry};

pub const RECEIVE_TRIGGER: &str = "receive-trigger";

/// Sandbox template used when none is configured.
pub const DEFAULT_TEMPLATE: &str = "vibe-nextjs-test-23";

/// Port the agent's development server listens on.
pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub template: String,
    pub port: u16,
    pub max_iterations: u32,
    pub max_tokens: u32,
    pub llm_timeout: Duration,
    pub command_timeout: Duration,
    pub step_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
            port: DEFAULT_PORT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: 8192,
            llm_timeout: Duration::from_secs(300),
            command_timeout: Duration::from_secs(120),
            step_timeout: DEFAULT_STEP_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

/// Everything a caller learns about a finished run
#[derive(Debug)]
pub struct RunReport {
    pub run_id: String,
    pub session_id: Option<String>,
    pub output: RunOutput,
    pub kind: OutcomeKind,
    /// `None` when a fatal error ended the run before the loop stopped
    pub stop_reason: Option<StopReason>,
    pub iterations: u32,
    /// `Err(PersistenceFailure)` when the outcome record was not written
    pub delivery: Result<()>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Result
    }
}

pub struct Worker {
    sessions: SessionManager,
    journal: Arc<dyn StepJournal>,
    persister: ResultPersister,
    orchestrator: Orchestrator,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        sandbox: Arc<dyn SandboxProvider>,
        journal: Arc<dyn StepJournal>,
        store: Arc<dyn OutcomeStore>,
        config: WorkerConfig,
    ) -> Self {
        let runtime = AgentRuntime::new(llm, Arc::new(ToolRegistry::standard()))
            .with_max_tokens(config.max_tokens)
            .with_llm_timeout(config.llm_timeout);

        Self {
            sessions: SessionManager::new(sandbox, config.template.clone(), config.port),
            journal,
            persister: ResultPersister::new(store),
            orchestrator: Orchestrator::new(runtime, vec![Agent::code_agent()], config.max_iterations),
            config,
        }
    }

    /// Start a new run for `trigger`
    pub async fn run(&self, trigger: TriggerEvent, cancel: &CancellationToken) -> Result<RunReport> {
        let run_id = generate_run_id();
        info!("Run {} received task: {}", run_id, trigger.task);
        self.execute(&run_id, Some(trigger), cancel).await
    }

    /// Continue a run from its journal
    pub async fn resume(&self, run_id: &str, cancel: &CancellationToken) -> Result<RunReport> {
        info!("Resuming run {}", run_id);
        self.execute(run_id, None, cancel).await
    }

    fn steps(&self, run_id: &str) -> DurableSteps {
        DurableSteps::new(run_id, self.journal.clone(), self.config.retry.clone()).with_timeout(self.config.step_timeout)
    }

    async fn execute(
        &self,
        run_id: &str,
        trigger: Option<TriggerEvent>,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let steps = self.steps(run_id);

        let trigger = trigger.as_ref();
        let trigger: TriggerEvent = steps
            .execute(RECEIVE_TRIGGER, || async move {
                trigger.cloned().ok_or_else(|| {
                    WorkerError::InvalidState(format!("run {} has no recorded trigger", run_id))
                })
            })
            .await?;

        if let Some((persisted, conclusion)) = self.persister.restore(&steps)? {
            info!("Run {} already saved its outcome as {:?}", run_id, persisted.kind);
            return Ok(RunReport {
                run_id: run_id.to_string(),
                session_id: steps.recorded::<String>(GET_SANDBOX_ID)?,
                output: persisted.output,
                kind: persisted.kind,
                stop_reason: conclusion.stop_reason,
                iterations: conclusion.iterations,
                delivery: persisted.delivery,
            });
        }

        let mut run = Run::with_id(run_id, &trigger);
        let state = RunState::shared();

        let mut handle: Option<Arc<dyn SandboxHandle>> = None;
        let session = self.open_session(&steps, &mut run).await;
        let loop_result = match session {
            Ok(h) => {
                let ctx = ToolContext::new(h.clone(), state.clone(), steps.clone())
                    .with_command_timeout(self.config.command_timeout);
                handle = Some(h);
                self.orchestrator.run(&mut run, &ctx, cancel).await
            }
            Err(e) => Err(e),
        };

        let conclusion = match loop_result {
            Ok(report) => RunConclusion::stopped(report.stop_reason, report.iterations),
            Err(e) => {
                error!("Run {} failed: {}", run_id, e);
                RunConclusion::fatal(run.iteration)
            }
        };
        run.record_iterations(conclusion.iterations);

        let persisted = {
            let state = state.lock().await;
            self.persister
                .persist(&steps, &self.sessions, handle.as_deref(), &state, &conclusion)
                .await
        };
        run.finish(persisted.kind == OutcomeKind::Result);
        info!("Run {} finished with status {:?}", run.id, run.status);

        Ok(RunReport {
            run_id: run.id,
            session_id: run.session_id,
            output: persisted.output,
            kind: persisted.kind,
            stop_reason: conclusion.stop_reason,
            iterations: conclusion.iterations,
            delivery: persisted.delivery,
        })
    }

    async fn open_session(&self, steps: &DurableSteps, run: &mut Run) -> Result<Arc<dyn SandboxHandle>> {
        let session_id = self.sessions.acquire(steps).await?;
        run.attach_session(&session_id);
        self.sessions.connect(steps, &session_id).await
    }
}
