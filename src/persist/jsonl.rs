//! JSONL-backed outcome store.
//!
//! A single `outcomes.jsonl` file, appended to and synced on every write. The
//! file is read once and cached; the cache is only updated after the append
//! reached disk.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::warn;

use super::OutcomeStore;
use crate::domain::OutcomeRecord;
use crate::error::{Result, WorkerError};

pub struct JsonlOutcomeStore {
    path: PathBuf,
    cache: RwLock<Option<Vec<OutcomeRecord>>>,
}

impl JsonlOutcomeStore {
    /// Store writing `outcomes.jsonl` in the given directory
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref();
        fs::create_dir_all(base_path)?;
        Ok(Self {
            path: base_path.join("outcomes.jsonl"),
            cache: RwLock::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<OutcomeRecord>> {
        let mut records = Vec::new();
        if !self.path.exists() {
            return Ok(records);
        }
        let reader = BufReader::new(File::open(&self.path)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<OutcomeRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!("Skipping unreadable outcome line in {}: {}", self.path.display(), e),
            }
        }
        Ok(records)
    }

    fn with_records<T>(&self, f: impl FnOnce(&[OutcomeRecord]) -> T) -> Result<T> {
        {
            let cache = self.cache.read().map_err(|e| WorkerError::Storage(e.to_string()))?;
            if let Some(records) = cache.as_ref() {
                return Ok(f(records));
            }
        }
        let mut cache = self.cache.write().map_err(|e| WorkerError::Storage(e.to_string()))?;
        if cache.is_none() {
            *cache = Some(self.read_all()?);
        }
        Ok(f(cache.as_deref().unwrap_or_default()))
    }
}

impl OutcomeStore for JsonlOutcomeStore {
    fn append(&self, record: &OutcomeRecord) -> Result<()> {
        // Populate the cache first so it reflects the file before this append
        self.with_records(|_| ())?;

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        file.sync_data()?;

        let mut cache = self.cache.write().map_err(|e| WorkerError::Storage(e.to_string()))?;
        cache.get_or_insert_with(Vec::new).push(record.clone());
        Ok(())
    }

    fn find_by_run(&self, run_id: &str) -> Result<Option<OutcomeRecord>> {
        self.with_records(|records| records.iter().find(|r| r.run_id == run_id).cloned())
    }

    fn list(&self) -> Result<Vec<OutcomeRecord>> {
        self.with_records(|records| records.to_vec())
    }
}
