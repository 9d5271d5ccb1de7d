//! Outcome record - the single persisted artifact of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run_state::FileMap;
use crate::id::outcome_id;

/// Title attached to every successful fragment.
pub const FRAGMENT_TITLE: &str = "Fragment";

/// Content of the record written when a run does not succeed.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

/// Classification tag of an outcome record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeKind {
    Result,
    Error,
}

/// Role of the message an outcome record represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OutcomeRole {
    Assistant,
}

/// Sandbox endpoint, title and final files of a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub sandbox_url: String,
    pub title: String,
    pub files: FileMap,
}

/// Persisted outcome of a run; written once, never mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    pub id: String,
    pub run_id: String,
    pub role: OutcomeRole,
    pub content: String,
    pub kind: OutcomeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragment: Option<Fragment>,
    pub created_at: DateTime<Utc>,
}

impl OutcomeRecord {
    /// Successful outcome carrying the agent's summary and a fragment
    pub fn result(run_id: &str, summary: impl Into<String>, fragment: Fragment) -> Self {
        Self {
            id: outcome_id(run_id),
            run_id: run_id.to_string(),
            role: OutcomeRole::Assistant,
            content: summary.into(),
            kind: OutcomeKind::Result,
            fragment: Some(fragment),
            created_at: Utc::now(),
        }
    }

    /// Generic failure outcome without a fragment
    pub fn error(run_id: &str) -> Self {
        Self {
            id: outcome_id(run_id),
            run_id: run_id.to_string(),
            role: OutcomeRole::Assistant,
            content: GENERIC_ERROR_MESSAGE.to_string(),
            kind: OutcomeKind::Error,
            fragment: None,
            created_at: Utc::now(),
        }
    }
}

/// Value handed back to the caller of a run, whatever its classification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    pub endpoint: String,
    pub title: String,
    pub files: FileMap,
    pub summary: String,
}

impl RunOutput {
    /// Output of a run that produced no usable result
    pub fn failed() -> Self {
        Self {
            endpoint: String::new(),
            title: FRAGMENT_TITLE.to_string(),
            files: FileMap::new(),
            summary: GENERIC_ERROR_MESSAGE.to_string(),
        }
    }
}

impl From<&OutcomeRecord> for RunOutput {
    fn from(record: &OutcomeRecord) -> Self {
        match &record.fragment {
            Some(fragment) => Self {
                endpoint: fragment.sandbox_url.clone(),
                title: fragment.title.clone(),
                files: fragment.files.clone(),
                summary: record.content.clone(),
            },
            None => Self::failed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_format() {
        assert_eq!(serde_json::to_string(&OutcomeKind::Result).unwrap(), "\"RESULT\"");
        assert_eq!(serde_json::to_string(&OutcomeKind::Error).unwrap(), "\"ERROR\"");
        assert_eq!(serde_json::to_string(&OutcomeRole::Assistant).unwrap(), "\"ASSISTANT\"");
    }

    #[test]
    fn test_error_record_has_no_fragment() {
        let record = OutcomeRecord::error("run-1");
        assert_eq!(record.kind, OutcomeKind::Error);
        assert_eq!(record.content, GENERIC_ERROR_MESSAGE);
        assert!(record.fragment.is_none());

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("fragment").is_none());
        assert_eq!(RunOutput::from(&record), RunOutput::failed());
    }

    #[test]
    fn test_result_record_carries_fragment() {
        let mut files = FileMap::new();
        files.insert("app/page.tsx".to_string(), "export default 1".to_string());
        let record = OutcomeRecord::result(
            "run-1",
            "<task_summary>built</task_summary>",
            Fragment {
                sandbox_url: "https://3000-sbx.example".to_string(),
                title: FRAGMENT_TITLE.to_string(),
                files: files.clone(),
            },
        );

        assert_eq!(record.id, "msg-run-1");
        assert_eq!(record.kind, OutcomeKind::Result);

        let output = RunOutput::from(&record);
        assert_eq!(output.endpoint, "https://3000-sbx.example");
        assert_eq!(output.summary, record.content);
        assert_eq!(record.fragment.unwrap().files, files);
        assert_eq!(output.files, files);
    }

    #[test]
    fn test_failed_output_is_generic() {
        let output = RunOutput::failed();
        assert!(output.endpoint.is_empty());
        assert!(output.files.is_empty());
        assert_eq!(output.summary, GENERIC_ERROR_MESSAGE);
    }
}
