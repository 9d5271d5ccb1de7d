//! Run record and trigger event
//!
//! A Run is one workflow execution for a single task. It is created when a
//! trigger arrives and discarded once its outcome record is persisted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{generate_run_id, now_ms};

/// Event that starts exactly one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub task: String,
}

impl TriggerEvent {
    pub fn new(task: impl Into<String>) -> Self {
        Self { task: task.into() }
    }
}

/// Terminal classification of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Not yet classified
    Pending,
    /// Summary and files were produced
    Success,
    /// Anything else, including fatal errors and exhausted budgets
    Error,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending)
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A summary was recorded
    Completed,
    /// The iteration budget ran out before a summary appeared
    BudgetExhausted,
    /// An external cancellation stopped the loop
    Cancelled,
    /// No agent was available to route to
    NoAgent,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Completed => "completed",
            StopReason::BudgetExhausted => "budget exhausted",
            StopReason::Cancelled => "cancelled",
            StopReason::NoAgent => "no agent",
        };
        write!(f, "{}", s)
    }
}

/// How a run's loop ended, recorded with its outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConclusion {
    /// `None` when a fatal error ended the run
    pub stop_reason: Option<StopReason>,
    pub iterations: u32,
}

impl RunConclusion {
    pub fn stopped(stop_reason: StopReason, iterations: u32) -> Self {
        Self {
            stop_reason: Some(stop_reason),
            iterations,
        }
    }

    pub fn fatal(iterations: u32) -> Self {
        Self {
            stop_reason: None,
            iterations,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.stop_reason.is_none()
    }
}

/// One workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    //=== Identity ===
    pub id: String,
    pub task: String,

    //=== Sandbox ===
    pub session_id: Option<String>,

    //=== Runtime State ===
    pub iteration: u32,
    pub status: RunStatus,

    //=== Timestamps ===
    pub created_at: i64,
    pub updated_at: i64,
}

impl Run {
    /// Create a run for a trigger with a fresh ID
    pub fn new(trigger: &TriggerEvent) -> Self {
        Self::with_id(generate_run_id(), trigger)
    }

    /// Create a run with a known ID (used when resuming)
    pub fn with_id(id: impl Into<String>, trigger: &TriggerEvent) -> Self {
        let now = now_ms();
        Self {
            id: id.into(),
            task: trigger.task.clone(),
            session_id: None,
            iteration: 0,
            status: RunStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn attach_session(&mut self, session_id: impl Into<String>) {
        self.session_id = Some(session_id.into());
        self.touch();
    }

    pub fn record_iterations(&mut self, iterations: u32) {
        self.iteration = iterations;
        self.touch();
    }

    /// Classify the run; a terminal status is never changed again
    pub fn finish(&mut self, success: bool) {
        if self.status.is_terminal() {
            return;
        }
        self.status = if success { RunStatus::Success } else { RunStatus::Error };
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = now_ms();
    }
}
