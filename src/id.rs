//! ID generation utilities
//!
//! Provides functions for generating unique identifiers for runs, sandbox
//! sessions and outcome records.

use rand::Rng;

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn random_suffix() -> u16 {
    rand::rng().random()
}

/// Generate a unique run ID
///
/// Format: `run-{timestamp_ms}-{random_hex}`
pub fn generate_run_id() -> String {
    format!("run-{}-{:04x}", now_ms(), random_suffix())
}

/// Generate a sandbox session ID
///
/// Format: `sbx-{timestamp_ms}-{random_hex}`
pub fn generate_session_id() -> String {
    format!("sbx-{}-{:04x}", now_ms(), random_suffix())
}

/// Generate an outcome record ID derived from its run
///
/// Format: `msg-{run_id}`
pub fn outcome_id(run_id: &str) -> String {
    format!("msg-{}", run_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_returns_reasonable_timestamp() {
        // After 2024-01-01
        assert!(now_ms() > 1_704_067_200_000);
    }

    #[test]
    fn test_run_id_format() {
        let id = generate_run_id();
        assert!(id.starts_with("run-"));
        assert_eq!(id.split('-').count(), 3);
    }

    #[test]
    fn test_session_id_format() {
        let id = generate_session_id();
        assert!(id.starts_with("sbx-"));
        let suffix = id.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), 4);
    }

    #[test]
    fn test_outcome_id_is_stable_per_run() {
        assert_eq!(outcome_id("run-1-abcd"), "msg-run-1-abcd");
        assert_eq!(outcome_id("run-1-abcd"), outcome_id("run-1-abcd"));
    }
}
