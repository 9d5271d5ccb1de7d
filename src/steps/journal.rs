//! Append-only step journals keyed by `(run_id, step_name)`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WorkerError};

/// Committed result of one durable step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub run_id: String,
    pub name: String,
    pub output: Value,
    /// sha256 of the step input, when the caller supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub attempts: u32,
    pub committed_at: i64,
}

/// Storage for committed steps.
///
/// A journal never overwrites: the first commit for a `(run_id, name)` pair
/// is authoritative and later commits for the same key are rejected.
pub trait StepJournal: Send + Sync {
    /// Look up a committed step.
    fn load(&self, run_id: &str, name: &str) -> Result<Option<StepRecord>>;

    /// Commit a step result.
    fn commit(&self, record: &StepRecord) -> Result<()>;

    /// All committed steps of a run in commit order.
    fn list(&self, run_id: &str) -> Result<Vec<StepRecord>>;
}

fn duplicate_commit(record: &StepRecord) -> WorkerError {
    WorkerError::Storage(format!(
        "step '{}' already committed for run {}",
        record.name, record.run_id
    ))
}

/// In-process journal, lost when the process exits.
#[derive(Default)]
pub struct MemoryStepJournal {
    runs: RwLock<HashMap<String, Vec<StepRecord>>>,
}

impl MemoryStepJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StepJournal for MemoryStepJournal {
    fn load(&self, run_id: &str, name: &str) -> Result<Option<StepRecord>> {
        let runs = self.runs.read().map_err(|e| WorkerError::Storage(e.to_string()))?;
        Ok(runs
            .get(run_id)
            .and_then(|steps| steps.iter().find(|s| s.name == name))
            .cloned())
    }

    fn commit(&self, record: &StepRecord) -> Result<()> {
        let mut runs = self.runs.write().map_err(|e| WorkerError::Storage(e.to_string()))?;
        let steps = runs.entry(record.run_id.clone()).or_default();
        if steps.iter().any(|s| s.name == record.name) {
            return Err(duplicate_commit(record));
        }
        steps.push(record.clone());
        Ok(())
    }

    fn list(&self, run_id: &str) -> Result<Vec<StepRecord>> {
        let runs = self.runs.read().map_err(|e| WorkerError::Storage(e.to_string()))?;
        Ok(runs.get(run_id).cloned().unwrap_or_default())
    }
}

/// JSONL-backed journal with one file per run and an in-memory cache.
pub struct JsonlStepJournal {
    base_path: PathBuf,
    cache: RwLock<HashMap<String, Vec<StepRecord>>>,
}

impl JsonlStepJournal {
    /// Create a journal rooted at the given directory.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.base_path.join(format!("{}.steps.jsonl", run_id))
    }

    /// Load a run's file into cache if not already loaded.
    fn ensure_loaded(&self, run_id: &str) -> Result<()> {
        {
            let cache = self.cache.read().map_err(|e| WorkerError::Storage(e.to_string()))?;
            if cache.contains_key(run_id) {
                return Ok(());
            }
        }

        let mut cache = self.cache.write().map_err(|e| WorkerError::Storage(e.to_string()))?;
        if cache.contains_key(run_id) {
            return Ok(());
        }

        let path = self.run_path(run_id);
        let mut records = Vec::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<StepRecord>(&line) {
                    Ok(record) => records.push(record),
                    // A crash mid-append leaves a torn final line; that step simply re-runs.
                    Err(e) => log::warn!("Skipping unreadable step line in {}: {}", path.display(), e),
                }
            }
        }

        cache.insert(run_id.to_string(), records);
        Ok(())
    }

    /// Run IDs with a journal file on disk.
    pub fn runs(&self) -> Result<Vec<String>> {
        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let name = entry?.file_name().to_string_lossy().to_string();
            if let Some(run_id) = name.strip_suffix(".steps.jsonl") {
                runs.push(run_id.to_string());
            }
        }
        runs.sort();
        Ok(runs)
    }
}

impl StepJournal for JsonlStepJournal {
    fn load(&self, run_id: &str, name: &str) -> Result<Option<StepRecord>> {
        self.ensure_loaded(run_id)?;
        let cache = self.cache.read().map_err(|e| WorkerError::Storage(e.to_string()))?;
        Ok(cache
            .get(run_id)
            .and_then(|steps| steps.iter().find(|s| s.name == name))
            .cloned())
    }

    fn commit(&self, record: &StepRecord) -> Result<()> {
        self.ensure_loaded(&record.run_id)?;

        let mut cache = self.cache.write().map_err(|e| WorkerError::Storage(e.to_string()))?;
        let steps = cache.entry(record.run_id.clone()).or_default();
        if steps.iter().any(|s| s.name == record.name) {
            return Err(duplicate_commit(record));
        }

        // File first (source of truth), then cache
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.run_path(&record.run_id))?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        file.sync_data()?;

        steps.push(record.clone());
        Ok(())
    }

    fn list(&self, run_id: &str) -> Result<Vec<StepRecord>> {
        self.ensure_loaded(run_id)?;
        let cache = self.cache.read().map_err(|e| WorkerError::Storage(e.to_string()))?;
        Ok(cache.get(run_id).cloned().unwrap_or_default())
    }
}
