//! Run execution
//!
//! This module provides the run-level control flow:
//! - `route`: pure routing policy between iterations
//! - `Orchestrator`: the iteration loop with cancellation
//! - `Worker`: trigger to persisted outcome, with resume

mod orchestrator;
mod router;
mod worker;

pub use orchestrator::{LoopReport, Orchestrator, RunPhase};
pub use crate::domain::StopReason;
pub use router::{DEFAULT_MAX_ITERATIONS, RouteDecision, route};
pub use worker::{DEFAULT_PORT, DEFAULT_TEMPLATE, RECEIVE_TRIGGER, RunReport, Worker, WorkerConfig};
