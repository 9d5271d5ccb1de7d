//! Durable step log - memoized, retried side effects for a single run.
//!
//! Every side-effecting operation of a run (sandbox creation, model turns,
//! tool calls, persistence) goes through [`DurableSteps::execute`]. A step
//! that already committed for this run returns its recorded result without
//! running again; otherwise the operation runs with a timeout and bounded
//! retries, and the result is committed before it is handed back.

mod journal;
mod retry;

pub use journal::{JsonlStepJournal, MemoryStepJournal, StepJournal, StepRecord};
pub use retry::RetryPolicy;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::error::{Result, WorkerError};
use crate::id::now_ms;

/// Default deadline for a single attempt of a step.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(300);

/// Step executor bound to one run.
#[derive(Clone)]
pub struct DurableSteps {
    run_id: String,
    journal: Arc<dyn StepJournal>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl DurableSteps {
    pub fn new(run_id: impl Into<String>, journal: Arc<dyn StepJournal>, policy: RetryPolicy) -> Self {
        Self {
            run_id: run_id.into(),
            journal,
            policy,
            timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    /// Set the per-attempt deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Whether a step already committed for this run.
    pub fn is_committed(&self, name: &str) -> Result<bool> {
        Ok(self.journal.load(&self.run_id, name)?.is_some())
    }

    /// Output of a committed step, without running anything.
    pub fn recorded<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.journal.load(&self.run_id, name)? {
            Some(record) => Ok(Some(serde_json::from_value(record.output)?)),
            None => Ok(None),
        }
    }

    /// Committed steps of this run in commit order.
    pub fn completed(&self) -> Result<Vec<StepRecord>> {
        self.journal.list(&self.run_id)
    }

    /// Run `op` as the durable step `name`.
    pub async fn execute<T, F, Fut>(&self, name: &str, op: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_step(name, None, self.timeout, op).await
    }

    /// Like [`execute`](Self::execute) with a step-specific deadline.
    pub async fn execute_with_timeout<T, F, Fut>(&self, name: &str, timeout: Duration, op: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_step(name, None, timeout, op).await
    }

    /// Like [`execute`](Self::execute), also recording a fingerprint of the
    /// step input. A replay whose input differs from the recorded one is
    /// logged and still served from the journal.
    pub async fn execute_checked<I, T, F, Fut>(&self, name: &str, input: &I, op: F) -> Result<T>
    where
        I: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let fingerprint = fingerprint(input)?;
        self.run_step(name, Some(fingerprint), self.timeout, op).await
    }

    /// Retry `op` under the step policy without memoizing its result.
    ///
    /// Used for operations whose result cannot be journaled, such as
    /// reconnecting to a sandbox session.
    pub async fn attempt<T, F, Fut>(&self, name: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (value, _) = self.retry(name, self.timeout, op).await?;
        Ok(value)
    }

    async fn run_step<T, F, Fut>(&self, name: &str, fingerprint: Option<String>, timeout: Duration, op: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(record) = self.journal.load(&self.run_id, name)? {
            if let (Some(expected), Some(recorded)) = (&fingerprint, &record.fingerprint) {
                if expected != recorded {
                    warn!(
                        "Step '{}' of run {} replayed with different input (recorded {}, got {})",
                        name, self.run_id, recorded, expected
                    );
                }
            }
            debug!("Replaying step '{}' for run {}", name, self.run_id);
            return Ok(serde_json::from_value(record.output)?);
        }

        let (value, attempts) = self.retry(name, timeout, op).await?;

        let record = StepRecord {
            run_id: self.run_id.clone(),
            name: name.to_string(),
            output: serde_json::to_value(&value)?,
            fingerprint,
            attempts,
            committed_at: now_ms(),
        };
        self.journal.commit(&record)?;
        debug!("Committed step '{}' for run {} after {} attempt(s)", name, self.run_id, attempts);

        Ok(value)
    }

    /// Sequential attempts with backoff; never two attempts in flight.
    async fn retry<T, F, Fut>(&self, name: &str, timeout: Duration, mut op: F) -> Result<(T, u32)>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let result = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(WorkerError::Timeout {
                    operation: name.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(value) => return Ok((value, attempt)),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if self.policy.allows_retry(attempt) => {
                    let delay = self.policy.backoff(attempt).max(e.retry_after().unwrap_or_default());
                    warn!(
                        "Step '{}' attempt {}/{} failed: {}; retrying in {:?}",
                        name, attempt, self.policy.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(WorkerError::StepExhausted {
                        step: name.to_string(),
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
            }
        }
    }
}

/// sha256 hex digest of a serialized step input.
pub fn fingerprint<I: Serialize + ?Sized>(input: &I) -> Result<String> {
    let bytes = serde_json::to_vec(input)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}
