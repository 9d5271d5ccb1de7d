//! Domain types for vibe-runner
//!
//! This module contains the core domain types:
//! - Run / TriggerEvent: one workflow execution and the event that starts it
//! - RunState: shared mutable state (files, summary) owned by the orchestrator
//! - OutcomeRecord / Fragment / RunOutput: what a finished run leaves behind

pub mod outcome;
pub mod run;
pub mod run_state;

pub use outcome::{FRAGMENT_TITLE, Fragment, GENERIC_ERROR_MESSAGE, OutcomeKind, OutcomeRecord, OutcomeRole, RunOutput};
pub use run::{Run, RunConclusion, RunStatus, StopReason, TriggerEvent};
pub use run_state::{FileMap, RunState, SharedRunState};
