//! Shared run state visible to every tool call and to the router.
//!
//! `files` is upsert-only and keyed by path. `summary` is write-once: the
//! first non-empty value wins and later writes are ignored.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Path-keyed file map, ordered so snapshots serialize deterministically.
pub type FileMap = BTreeMap<String, String>;

/// Handle to a run's state; all mutation happens under this lock.
pub type SharedRunState = Arc<Mutex<RunState>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    files: FileMap,
    summary: Option<String>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap a fresh state for sharing across tool calls.
    pub fn shared() -> SharedRunState {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn files(&self) -> &FileMap {
        &self.files
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn has_summary(&self) -> bool {
        self.summary.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Upsert entries by path (last write per path wins) and return the merged map.
    pub fn upsert_files<I, P, C>(&mut self, entries: I) -> FileMap
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        for (path, content) in entries {
            self.files.insert(path.into(), content.into());
        }
        self.files.clone()
    }

    /// Set the summary unless one is already present.
    ///
    /// Returns true when this call set it.
    pub fn set_summary_once(&mut self, summary: impl Into<String>) -> bool {
        let summary = summary.into();
        if summary.is_empty() || self.has_summary() {
            return false;
        }
        self.summary = Some(summary);
        true
    }

    /// Success requires both a summary and at least one file.
    pub fn is_success(&self) -> bool {
        self.has_summary() && !self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_law() {
        let mut state = RunState::new();
        state.upsert_files([("a", "1"), ("b", "2")]);
        let merged = state.upsert_files([("a", "3")]);

        let expected: FileMap = [("a".to_string(), "3".to_string()), ("b".to_string(), "2".to_string())]
            .into_iter()
            .collect();
        assert_eq!(merged, expected);
        assert_eq!(state.files(), &expected);
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let mut state = RunState::new();
        let first = state.upsert_files([("page.tsx", "x")]);
        let second = state.upsert_files([("page.tsx", "x")]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_summary_first_write_wins() {
        let mut state = RunState::new();
        assert!(state.set_summary_once("<task_summary>first</task_summary>"));
        assert!(!state.set_summary_once("<task_summary>second</task_summary>"));
        assert_eq!(state.summary(), Some("<task_summary>first</task_summary>"));
    }

    #[test]
    fn test_empty_summary_is_ignored() {
        let mut state = RunState::new();
        assert!(!state.set_summary_once(""));
        assert!(!state.has_summary());
        assert!(state.set_summary_once("done"));
    }

    #[test]
    fn test_success_classification_matrix() {
        let mut neither = RunState::new();
        assert!(!neither.is_success());

        let mut files_only = RunState::new();
        files_only.upsert_files([("a", "1")]);
        assert!(!files_only.is_success());

        let mut summary_only = RunState::new();
        summary_only.set_summary_once("done");
        assert!(!summary_only.is_success());

        neither.upsert_files([("a", "1")]);
        neither.set_summary_once("done");
        assert!(neither.is_success());

        files_only.set_summary_once("done");
        assert!(files_only.is_success());
    }

    #[tokio::test]
    async fn test_shared_state_serializes_writers() {
        let state = RunState::shared();
        let mut handles = Vec::new();
        for i in 0..16 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                state.lock().await.upsert_files([(format!("f{}", i), i.to_string())]);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(state.lock().await.files().len(), 16);
    }
}
