//! vibe-runner - a sandboxed code-generation worker
//!
//! Given a natural-language task, a run provisions an isolated sandbox, drives
//! a tool-using model agent against it until the agent reports completion or
//! the iteration budget runs out, and persists exactly one outcome record.
//! Every side effect goes through a durable step log, so an interrupted run
//! can be resumed without repeating committed work.

pub mod agent;
pub mod domain;
pub mod error;
pub mod id;
pub mod llm;
pub mod persist;
pub mod runner;
pub mod sandbox;
pub mod steps;
pub mod tools;

pub use error::{Result, WorkerError};
