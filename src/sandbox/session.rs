//! Sandbox session lifecycle as durable steps.
//!
//! The session ID and the endpoint URL are journaled, so a resumed run
//! reconnects to the same session instead of creating a second one.
//! Reconnecting itself is retried but never journaled: a handle is not data.

use std::sync::Arc;

use log::info;

use super::{SandboxError, SandboxHandle, SandboxProvider};
use crate::error::{Result, WorkerError};
use crate::steps::DurableSteps;

pub const GET_SANDBOX_ID: &str = "get-sandbox-id";
pub const GET_SANDBOX_URL: &str = "get-sandbox-url";
pub const CONNECT_SANDBOX: &str = "connect-sandbox";

pub struct SessionManager {
    provider: Arc<dyn SandboxProvider>,
    template: String,
    port: u16,
}

impl SessionManager {
    pub fn new(provider: Arc<dyn SandboxProvider>, template: impl Into<String>, port: u16) -> Self {
        Self {
            provider,
            template: template.into(),
            port,
        }
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Create a session once per run; replays return the recorded ID
    pub async fn acquire(&self, steps: &DurableSteps) -> Result<String> {
        let provider = &self.provider;
        let template = self.template.as_str();

        let session_id: String = steps
            .execute(GET_SANDBOX_ID, || async move {
                provider.create(template).await.map_err(classify)
            })
            .await?;

        info!("Run {} uses sandbox {}", steps.run_id(), session_id);
        Ok(session_id)
    }

    /// Reconnect to a session by ID
    pub async fn connect(&self, steps: &DurableSteps, session_id: &str) -> Result<Arc<dyn SandboxHandle>> {
        let provider = &self.provider;
        steps
            .attempt(CONNECT_SANDBOX, || async move {
                provider.connect(session_id).await.map_err(classify)
            })
            .await
    }

    /// Externally reachable URL of the configured port, journaled
    pub async fn endpoint(&self, steps: &DurableSteps, handle: &dyn SandboxHandle) -> Result<String> {
        let port = self.port;
        steps
            .execute(GET_SANDBOX_URL, || async move { Ok(handle.endpoint(port)) })
            .await
    }
}

/// Session-level failures are fatal; everything else keeps its transience
fn classify(err: SandboxError) -> WorkerError {
    if err.is_session_lost() {
        WorkerError::SandboxUnavailable(err.to_string())
    } else {
        WorkerError::Sandbox(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::MemorySandboxProvider;
    use crate::steps::{MemoryStepJournal, RetryPolicy, StepJournal};
    use std::time::Duration;

    fn steps(journal: Arc<dyn StepJournal>) -> DurableSteps {
        DurableSteps::new(
            "run-1",
            journal,
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2)),
        )
    }

    #[tokio::test]
    async fn test_acquire_is_memoized() {
        let provider = Arc::new(MemorySandboxProvider::new());
        let manager = SessionManager::new(provider.clone(), "vibe-nextjs", 3000);
        let journal: Arc<dyn StepJournal> = Arc::new(MemoryStepJournal::new());

        let first = manager.acquire(&steps(journal.clone())).await.unwrap();
        let second = manager.acquire(&steps(journal)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.created_count(), 1);
    }

    #[tokio::test]
    async fn test_acquire_retries_transient_create() {
        let provider = Arc::new(MemorySandboxProvider::new());
        provider.fail_next_creates(2);
        let manager = SessionManager::new(provider.clone(), "vibe-nextjs", 3000);

        let id = manager.acquire(&steps(Arc::new(MemoryStepJournal::new()))).await.unwrap();
        assert!(id.starts_with("sbx-"));
        assert_eq!(provider.created_count(), 1);
    }

    #[tokio::test]
    async fn test_acquire_exhaustion() {
        let provider = Arc::new(MemorySandboxProvider::new());
        provider.fail_next_creates(10);
        let manager = SessionManager::new(provider, "vibe-nextjs", 3000);

        let result = manager.acquire(&steps(Arc::new(MemoryStepJournal::new()))).await;
        assert!(matches!(result, Err(WorkerError::StepExhausted { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn test_connect_expired_is_unavailable() {
        let provider = Arc::new(MemorySandboxProvider::new());
        let manager = SessionManager::new(provider.clone(), "vibe-nextjs", 3000);
        let steps = steps(Arc::new(MemoryStepJournal::new()));

        let id = manager.acquire(&steps).await.unwrap();
        provider.expire(&id);

        let result = manager.connect(&steps, &id).await;
        assert!(matches!(result, Err(WorkerError::SandboxUnavailable(_))));
    }

    #[tokio::test]
    async fn test_endpoint_uses_port_and_is_journaled() {
        let provider = Arc::new(MemorySandboxProvider::new());
        let manager = SessionManager::new(provider, "vibe-nextjs", 3000);
        let steps = steps(Arc::new(MemoryStepJournal::new()));

        let id = manager.acquire(&steps).await.unwrap();
        let handle = manager.connect(&steps, &id).await.unwrap();
        let url = manager.endpoint(&steps, handle.as_ref()).await.unwrap();

        assert_eq!(url, format!("https://3000-{}.sandbox.local", id));
        assert!(steps.is_committed(GET_SANDBOX_URL).unwrap());
    }
}
