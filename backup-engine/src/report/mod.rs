//! Job reporting: structured log entries, progress and the final result.
//!
//! Every dump/restore invocation owns one [`JobReporter`]. Log entries are
//! forwarded to the caller's callback, mirrored to `tracing`, and collected
//! into the [`BackupResult`] returned at the end of the job.

pub mod progress;
pub mod reporter;

pub use progress::{format_bytes, ProgressReader, ProgressTracker};
pub use reporter::{JobHooks, JobReporter, LogCallback, ProgressCallback};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a job log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Kind of a job log entry. `Command` entries carry the masked invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogType {
    General,
    Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(rename = "type")]
    pub log_type: LogType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Outcome of one dump or restore invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl BackupResult {
    pub fn succeeded(
        reporter: &JobReporter,
        started_at: DateTime<Utc>,
        path: Option<String>,
        size: Option<u64>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            success: true,
            path,
            size,
            logs: reporter.logs(),
            error: None,
            started_at,
            completed_at: Utc::now(),
            metadata,
        }
    }

    pub fn failed(reporter: &JobReporter, started_at: DateTime<Utc>, error: String) -> Self {
        Self {
            success: false,
            path: None,
            size: None,
            logs: reporter.logs(),
            error: Some(error),
            started_at,
            completed_at: Utc::now(),
            metadata: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_serialization() {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level: LogLevel::Success,
            log_type: LogType::Command,
            message: "Executing mysqldump".to_string(),
            details: Some("mysqldump -h db --databases shop".to_string()),
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["level"], "success");
        assert_eq!(json["type"], "command");
        assert_eq!(json["details"], "mysqldump -h db --databases shop");
    }

    #[test]
    fn test_failed_result_serialization() {
        let reporter = JobReporter::new(&JobHooks::default());
        reporter.error("Dump failed");
        let result = BackupResult::failed(&reporter, Utc::now(), "boom".to_string());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "boom");
        assert!(json.get("path").is_none());
        assert!(json.get("startedAt").is_some());
        assert_eq!(json["logs"].as_array().unwrap().len(), 1);
    }
}
