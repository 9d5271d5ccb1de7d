//! Sandbox collaborator - isolated, ephemeral execution environments.
//!
//! A [`SandboxProvider`] creates sessions and reconnects to them by ID; a
//! [`SandboxHandle`] exposes the session's filesystem, command surface and
//! network endpoint. Two providers exist:
//!
//! - [`LocalSandboxProvider`] - one directory per session, commands via `sh -c`
//! - [`MemorySandboxProvider`] - in-process sessions with scripted commands
//!
//! [`SessionManager`] wraps session acquisition in durable steps.

mod local;
mod memory;
mod session;

pub use local::{LocalSandbox, LocalSandboxConfig, LocalSandboxProvider};
pub use memory::{MemorySandbox, MemorySandboxProvider, ScriptedCommand};
pub use session::{CONNECT_SANDBOX, GET_SANDBOX_ID, GET_SANDBOX_URL, SessionManager};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// A piece of command output, tagged by stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(String),
    Stderr(String),
}

/// Channel end a running command streams its output into
pub type OutputSender = mpsc::UnboundedSender<OutputChunk>;

/// Captured output of a finished (or failed) command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    fn push(&mut self, chunk: OutputChunk) {
        match chunk {
            OutputChunk::Stdout(s) => self.stdout.push_str(&s),
            OutputChunk::Stderr(s) => self.stderr.push_str(&s),
        }
    }
}

/// Errors raised by sandbox providers and handles
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Sandbox session {session_id} not found")]
    NotFound { session_id: String },

    #[error("Sandbox session {session_id} expired")]
    Expired { session_id: String },

    #[error("Path {path} escapes the sandbox")]
    PathEscape { path: PathBuf },

    #[error("File not found in sandbox: {path}")]
    FileNotFound { path: String },

    #[error("Command timed out after {timeout_ms}ms")]
    CommandTimeout { timeout_ms: u64 },

    #[error("IO error during {operation}: {source}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sandbox provider error: {0}")]
    Provider(String),
}

impl SandboxError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SandboxError::Io { .. } | SandboxError::Provider(_) | SandboxError::CommandTimeout { .. }
        )
    }

    /// Whether the session itself is gone
    pub fn is_session_lost(&self) -> bool {
        matches!(self, SandboxError::NotFound { .. } | SandboxError::Expired { .. })
    }

    pub(crate) fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        SandboxError::Io {
            operation: operation.into(),
            source,
        }
    }
}

/// Creates and reconnects sandbox sessions
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Acquire a fresh session from a template; returns the session ID
    async fn create(&self, template: &str) -> Result<String, SandboxError>;

    /// Reconnect to an existing session
    async fn connect(&self, session_id: &str) -> Result<Arc<dyn SandboxHandle>, SandboxError>;
}

/// A live sandbox session
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    fn session_id(&self) -> &str;

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    async fn read_file(&self, path: &str) -> Result<String, SandboxError>;

    /// Run a shell command, streaming output chunks; returns the exit code
    async fn run_command(&self, command: &str, timeout: Duration, output: OutputSender) -> Result<i32, SandboxError>;

    /// Externally reachable URL for a port inside the sandbox
    fn endpoint(&self, port: u16) -> String;
}

/// Run a command and collect its streamed output into separate buffers.
///
/// The buffers are returned even when the command itself fails, so callers
/// can report whatever was printed before the failure.
pub async fn run_collecting(
    handle: &dyn SandboxHandle,
    command: &str,
    timeout: Duration,
) -> (Result<i32, SandboxError>, CommandOutput) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let result = handle.run_command(command, timeout, tx).await;

    let mut output = CommandOutput::default();
    while let Some(chunk) = rx.recv().await {
        output.push(chunk);
    }
    (result, output)
}
