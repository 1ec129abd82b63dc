//! Per-job log and progress fan-out.

use super::progress::ProgressTracker;
use super::{LogEntry, LogLevel, LogType};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Receives every log entry of a job as it is produced.
pub type LogCallback = Arc<dyn Fn(&LogEntry) + Send + Sync>;

/// Receives integer percentages in `[0, 100]`, never decreasing.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Caller-supplied hooks for one invocation.
#[derive(Clone, Default)]
pub struct JobHooks {
    pub on_log: Option<LogCallback>,
    pub on_progress: Option<ProgressCallback>,
    pub cancel: CancellationToken,
}

impl JobHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(mut self, callback: impl Fn(&LogEntry) + Send + Sync + 'static) -> Self {
        self.on_log = Some(Arc::new(callback));
        self
    }

    pub fn with_progress(mut self, callback: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

struct ReporterInner {
    job_id: String,
    logs: Mutex<Vec<LogEntry>>,
    on_log: Option<LogCallback>,
    progress: ProgressTracker,
}

/// Cheap to clone; all clones feed the same log list and progress tracker.
#[derive(Clone)]
pub struct JobReporter {
    inner: Arc<ReporterInner>,
}

impl JobReporter {
    pub fn new(hooks: &JobHooks) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                job_id: uuid::Uuid::new_v4().to_string(),
                logs: Mutex::new(Vec::new()),
                on_log: hooks.on_log.clone(),
                progress: ProgressTracker::new(hooks.on_progress.clone()),
            }),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.inner.job_id
    }

    pub fn log(&self, level: LogLevel, log_type: LogType, message: impl Into<String>, details: Option<String>) {
        let entry = LogEntry {
            timestamp: chrono::Utc::now(),
            level,
            log_type,
            message: message.into(),
            details,
        };

        match level {
            LogLevel::Info | LogLevel::Success => info!(job_id = %self.inner.job_id, "{}", entry.message),
            LogLevel::Warning => warn!(job_id = %self.inner.job_id, "{}", entry.message),
            LogLevel::Error => error!(job_id = %self.inner.job_id, "{}", entry.message),
        }

        if let Some(callback) = &self.inner.on_log {
            callback(&entry);
        }

        self.inner
            .logs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, LogType::General, message, None);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, LogType::General, message, None);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warning, LogType::General, message, None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, LogType::General, message, None);
    }

    /// Audit entry for an external invocation. `details` must already be masked.
    pub fn command(&self, message: impl Into<String>, details: String) {
        self.log(LogLevel::Info, LogType::Command, message, Some(details));
    }

    /// Report overall job progress.
    pub fn progress(&self, percent: u8) {
        self.inner.progress.report(percent);
    }

    /// Callback mapping `0..=100` of step `step` (of `steps`) onto overall progress.
    pub fn step_progress(&self, step: usize, steps: usize) -> ProgressCallback {
        let reporter = self.clone();
        let steps = steps.max(1);
        Arc::new(move |inner: u8| {
            let overall = (step * 100 + inner.min(100) as usize) / steps;
            reporter.progress(overall.min(100) as u8);
        })
    }

    /// Snapshot of the logs collected so far.
    pub fn logs(&self) -> Vec<LogEntry> {
        self.inner
            .logs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logs_are_collected_and_forwarded() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hooks = JobHooks::new().with_log(move |entry| {
            sink.lock().unwrap().push((entry.level, entry.message.clone()));
        });

        let reporter = JobReporter::new(&hooks);
        reporter.info("starting");
        reporter.command("Executing mysqldump", "mysqldump --databases shop".to_string());
        reporter.warning("careful");

        let logs = reporter.logs();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[1].log_type, LogType::Command);
        assert_eq!(logs[1].details.as_deref(), Some("mysqldump --databases shop"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[2], (LogLevel::Warning, "careful".to_string()));
    }

    #[test]
    fn test_step_progress_is_scaled() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hooks = JobHooks::new().with_progress(move |p| sink.lock().unwrap().push(p));
        let reporter = JobReporter::new(&hooks);

        let second_of_four = reporter.step_progress(1, 4);
        second_of_four(0);
        second_of_four(100);

        assert_eq!(*seen.lock().unwrap(), vec![25, 50]);
    }
}
