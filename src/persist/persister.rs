//! Classification and the single outcome write of a run.

use std::sync::Arc;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use super::OutcomeStore;
use crate::domain::{FRAGMENT_TITLE, Fragment, OutcomeKind, OutcomeRecord, RunConclusion, RunOutput, RunState};
use crate::error::{Result, WorkerError};
use crate::sandbox::{SandboxHandle, SessionManager};
use crate::steps::DurableSteps;

pub const SAVE_RESULT: &str = "save-result";

/// What persisting a run produced
#[derive(Debug)]
pub struct Persisted {
    pub output: RunOutput,
    pub kind: OutcomeKind,
    /// `Err(PersistenceFailure)` when no record could be written
    pub delivery: Result<()>,
}

/// Output of the `save-result` step
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SavedOutcome {
    record_id: String,
    conclusion: RunConclusion,
}

pub struct ResultPersister {
    store: Arc<dyn OutcomeStore>,
}

impl ResultPersister {
    pub fn new(store: Arc<dyn OutcomeStore>) -> Self {
        Self { store }
    }

    /// Classify the run and write its outcome record.
    ///
    /// A fatal conclusion forces the error classification. The run output is
    /// returned even when the write fails.
    pub async fn persist(
        &self,
        steps: &DurableSteps,
        sessions: &SessionManager,
        handle: Option<&dyn SandboxHandle>,
        state: &RunState,
        conclusion: &RunConclusion,
    ) -> Persisted {
        let run_id = steps.run_id();
        let fatal = conclusion.is_fatal();

        let success = match (handle, state.summary()) {
            (Some(handle), Some(summary)) if !fatal && state.is_success() => {
                match sessions.endpoint(steps, handle).await {
                    Ok(endpoint) => Some((endpoint, summary.to_string())),
                    Err(e) => {
                        error!("Run {} could not resolve its sandbox endpoint: {}", run_id, e);
                        None
                    }
                }
            }
            _ => None,
        };

        let (record, output, kind) = match success {
            Some((endpoint, summary)) => {
                let files = state.files().clone();
                let record = OutcomeRecord::result(
                    run_id,
                    summary.clone(),
                    Fragment {
                        sandbox_url: endpoint.clone(),
                        title: FRAGMENT_TITLE.to_string(),
                        files: files.clone(),
                    },
                );
                let output = RunOutput {
                    endpoint,
                    title: FRAGMENT_TITLE.to_string(),
                    files,
                    summary,
                };
                (record, output, OutcomeKind::Result)
            }
            None => (OutcomeRecord::error(run_id), RunOutput::failed(), OutcomeKind::Error),
        };

        let delivery = self.save(steps, &record, conclusion).await;
        match &delivery {
            Ok(()) => info!("Run {} persisted as {:?}", run_id, kind),
            Err(e) => warn!("Run {} outcome not delivered: {}", run_id, e),
        }

        Persisted { output, kind, delivery }
    }

    /// The durable `save-result` step; a record already in the store for
    /// this run is kept instead of appending a second one.
    async fn save(&self, steps: &DurableSteps, record: &OutcomeRecord, conclusion: &RunConclusion) -> Result<()> {
        let store = &self.store;
        let conclusion = *conclusion;
        let saved: std::result::Result<SavedOutcome, WorkerError> = steps
            .execute(SAVE_RESULT, || async move {
                let record_id = match store.find_by_run(&record.run_id)? {
                    Some(existing) => existing.id,
                    None => {
                        store.append(record)?;
                        record.id.clone()
                    }
                };
                Ok(SavedOutcome { record_id, conclusion })
            })
            .await;

        saved.map(|_| ()).map_err(|e| WorkerError::PersistenceFailure(e.to_string()))
    }

    /// The outcome a previous attempt already saved, rebuilt from the stored
    /// record. `None` until `save-result` has committed.
    pub fn restore(&self, steps: &DurableSteps) -> Result<Option<(Persisted, RunConclusion)>> {
        let Some(saved) = steps.recorded::<SavedOutcome>(SAVE_RESULT)? else {
            return Ok(None);
        };
        let record = self.store.find_by_run(steps.run_id())?.ok_or_else(|| {
            WorkerError::Storage(format!(
                "run {} committed outcome {} but the record is missing",
                steps.run_id(),
                saved.record_id
            ))
        })?;

        let persisted = Persisted {
            output: RunOutput::from(&record),
            kind: record.kind,
            delivery: Ok(()),
        };
        Ok(Some((persisted, saved.conclusion)))
    }
}
