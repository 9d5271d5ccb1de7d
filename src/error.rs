//! Error types for vibe-runner
//!
//! Centralized error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

use crate::llm::LlmError;
use crate::sandbox::SandboxError;

/// All error types that can abort or degrade a run
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Sandbox session could not be created or reconnected
    #[error("Sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    /// A durable step ran out of retry attempts
    #[error("Step '{step}' exhausted after {attempts} attempts: {last_error}")]
    StepExhausted {
        step: String,
        attempts: u32,
        last_error: String,
    },

    /// The final outcome record could not be written
    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    /// Step journal or outcome store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Model collaborator error
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Sandbox collaborator error
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Invalid state transition or operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    /// Whether the durable step log may retry the failed attempt
    pub fn is_transient(&self) -> bool {
        match self {
            WorkerError::Timeout { .. } => true,
            WorkerError::Llm(e) => e.is_retryable(),
            WorkerError::Sandbox(e) => e.is_transient(),
            WorkerError::Io(_) => true,
            WorkerError::SandboxUnavailable(_)
            | WorkerError::StepExhausted { .. }
            | WorkerError::PersistenceFailure(_)
            | WorkerError::Storage(_)
            | WorkerError::InvalidState(_)
            | WorkerError::Json(_) => false,
        }
    }

    /// Minimum wait the failing collaborator asked for before a retry
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            WorkerError::Llm(LlmError::RateLimited { retry_after }) => Some(*retry_after),
            _ => None,
        }
    }
}

/// Result type alias for vibe-runner operations
pub type Result<T> = std::result::Result<T, WorkerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_unavailable_error() {
        let err = WorkerError::SandboxUnavailable("session sbx-1 expired".to_string());
        assert_eq!(err.to_string(), "Sandbox unavailable: session sbx-1 expired");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_step_exhausted_error() {
        let err = WorkerError::StepExhausted {
            step: "get-sandbox-id".to_string(),
            attempts: 4,
            last_error: "connection reset".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Step 'get-sandbox-id' exhausted after 4 attempts: connection reset"
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = WorkerError::Timeout {
            operation: "code-agent-turn-1".to_string(),
            timeout_ms: 500,
        };
        assert_eq!(err.to_string(), "code-agent-turn-1 timed out after 500ms");
        assert!(err.is_transient());
    }

    #[test]
    fn test_llm_error_transience_follows_client() {
        let retryable: WorkerError = LlmError::RateLimited {
            retry_after: Duration::from_secs(1),
        }
        .into();
        assert!(retryable.is_transient());

        let fatal: WorkerError = LlmError::ApiError {
            status: 400,
            message: "bad request".to_string(),
        }
        .into();
        assert!(!fatal.is_transient());
    }

    #[test]
    fn test_retry_after_only_from_rate_limits() {
        let limited = WorkerError::from(LlmError::RateLimited {
            retry_after: Duration::from_secs(7),
        });
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(WorkerError::Storage("x".to_string()).retry_after(), None);
    }

    #[test]
    fn test_storage_error_not_transient() {
        let err = WorkerError::Storage("file locked".to_string());
        assert_eq!(err.to_string(), "Storage error: file locked");
        assert!(!err.is_transient());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: WorkerError = io_err.into();
        assert!(matches!(err, WorkerError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: WorkerError = json_err.into();
        assert!(matches!(err, WorkerError::Json(_)));
        assert!(!err.is_transient());
    }
}
