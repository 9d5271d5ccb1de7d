//! Result persistence
//!
//! Every run ends with exactly one [`OutcomeRecord`] in an [`OutcomeStore`].
//! The [`ResultPersister`] classifies the run, resolves the sandbox endpoint
//! for successful runs and writes the record as the durable step
//! `save-result`.

mod jsonl;
mod persister;

pub use jsonl::JsonlOutcomeStore;
pub use persister::{Persisted, ResultPersister, SAVE_RESULT};

use std::sync::RwLock;

use crate::domain::OutcomeRecord;
use crate::error::{Result, WorkerError};

/// Append-only storage for outcome records
pub trait OutcomeStore: Send + Sync {
    /// Append a record
    fn append(&self, record: &OutcomeRecord) -> Result<()>;

    /// The record written for a run, if any
    fn find_by_run(&self, run_id: &str) -> Result<Option<OutcomeRecord>>;

    /// All records in write order
    fn list(&self) -> Result<Vec<OutcomeRecord>>;
}

/// In-process store, lost when the process exits
#[derive(Default)]
pub struct MemoryOutcomeStore {
    records: RwLock<Vec<OutcomeRecord>>,
    failing: RwLock<bool>,
}

impl MemoryOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later append fail
    pub fn fail_appends(&self, failing: bool) {
        if let Ok(mut flag) = self.failing.write() {
            *flag = failing;
        }
    }
}

impl OutcomeStore for MemoryOutcomeStore {
    fn append(&self, record: &OutcomeRecord) -> Result<()> {
        if self.failing.read().map(|f| *f).unwrap_or(false) {
            return Err(WorkerError::Storage("outcome store rejected the write".to_string()));
        }
        self.records
            .write()
            .map_err(|e| WorkerError::Storage(e.to_string()))?
            .push(record.clone());
        Ok(())
    }

    fn find_by_run(&self, run_id: &str) -> Result<Option<OutcomeRecord>> {
        let records = self.records.read().map_err(|e| WorkerError::Storage(e.to_string()))?;
        Ok(records.iter().find(|r| r.run_id == run_id).cloned())
    }

    fn list(&self) -> Result<Vec<OutcomeRecord>> {
        let records = self.records.read().map_err(|e| WorkerError::Storage(e.to_string()))?;
        Ok(records.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store() {
        let store = MemoryOutcomeStore::new();
        store.append(&OutcomeRecord::error("run-1")).unwrap();

        assert!(store.find_by_run("run-1").unwrap().is_some());
        assert!(store.find_by_run("run-2").unwrap().is_none());
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_memory_store_failing() {
        let store = MemoryOutcomeStore::new();
        store.fail_appends(true);
        assert!(store.append(&OutcomeRecord::error("run-1")).is_err());
        store.fail_appends(false);
        assert!(store.append(&OutcomeRecord::error("run-1")).is_ok());
    }
}
