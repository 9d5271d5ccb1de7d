//! Core LLM client trait, error type and scripted mock

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::types::{CompletionRequest, CompletionResponse};

/// Stateless LLM client - each call carries the whole conversation
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Single completion request (blocking until complete)
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Model identifier used for requests
    fn model(&self) -> &str;
}

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },

    #[error("Script exhausted after {served} responses")]
    ScriptExhausted { served: usize },
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::ApiError { status, .. } => *status >= 500,
            LlmError::Network(_) => true,
            LlmError::InvalidResponse(_) => false,
            LlmError::MissingApiKey { .. } => false,
            LlmError::ScriptExhausted { .. } => false,
        }
    }
}

/// Scripted LLM client for tests and dry runs
///
/// Serves queued responses in order, then the fallback (if any) forever.
/// Every request is recorded for inspection.
pub struct MockLlmClient {
    responses: Mutex<VecDeque<CompletionResponse>>,
    fallback: Option<CompletionResponse>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Response served once the script runs out
    pub fn with_fallback(mut self, response: CompletionResponse) -> Self {
        self.fallback = Some(response);
        self
    }

    /// Number of completions requested so far
    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Copy of every request received
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let served = {
            let mut requests = self
                .requests
                .lock()
                .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
            requests.push(request);
            requests.len() - 1
        };

        let next = self
            .responses
            .lock()
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?
            .pop_front();

        match next.or_else(|| self.fallback.clone()) {
            Some(response) => Ok(response),
            None => Err(LlmError::ScriptExhausted { served }),
        }
    }

    fn model(&self) -> &str {
        "mock-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_is_retryable() {
        assert!(
            LlmError::RateLimited {
                retry_after: Duration::from_secs(60)
            }
            .is_retryable()
        );
        assert!(
            LlmError::ApiError {
                status: 503,
                message: "overloaded".to_string()
            }
            .is_retryable()
        );
        assert!(
            !LlmError::ApiError {
                status: 400,
                message: "Bad request".to_string()
            }
            .is_retryable()
        );
        assert!(!LlmError::InvalidResponse("bad".to_string()).is_retryable());
        assert!(
            !LlmError::MissingApiKey {
                env_var: "ANTHROPIC_API_KEY".to_string()
            }
            .is_retryable()
        );
    }

    #[tokio::test]
    async fn test_mock_serves_script_in_order() {
        let mock = MockLlmClient::new(vec![
            CompletionResponse::text("first"),
            CompletionResponse::text("second"),
        ]);

        let a = mock.complete(CompletionRequest::new("sys")).await.unwrap();
        let b = mock.complete(CompletionRequest::new("sys")).await.unwrap();
        assert_eq!(a.text, "first");
        assert_eq!(b.text, "second");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_exhausted_without_fallback() {
        let mock = MockLlmClient::new(vec![]);
        let err = mock.complete(CompletionRequest::new("sys")).await.unwrap_err();
        assert!(matches!(err, LlmError::ScriptExhausted { served: 0 }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_mock_fallback_repeats() {
        let mock = MockLlmClient::new(vec![]).with_fallback(CompletionResponse::text("again"));
        for _ in 0..3 {
            let r = mock.complete(CompletionRequest::new("sys")).await.unwrap();
            assert_eq!(r.text, "again");
        }
        assert_eq!(mock.model(), "mock-model");
    }

    #[tokio::test]
    async fn test_mock_records_requests() {
        let mock = MockLlmClient::new(vec![CompletionResponse::text("ok")]);
        mock.complete(CompletionRequest::new("system prompt").with_user_message("build it"))
            .await
            .unwrap();

        let requests = mock.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].system, "system prompt");
    }
}
