//! Custom error types for the backup engine.

use thiserror::Error;

/// Maximum number of stderr bytes kept on a tool failure.
pub const STDERR_TAIL_BYTES: usize = 1024;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {message}")]
    Connection { message: String, stderr: String },

    #[error("{tool} exited with {}: {stderr}", exit_label(.code))]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Tool not found: {0} (is the client installed and on PATH?)")]
    ToolNotFound(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error buckets surfaced to the orchestration layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Connectivity,
    ToolExecution,
    Format,
    Integrity,
    Cancelled,
    Internal,
}

impl EngineError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Config(_) => ErrorCategory::Configuration,
            EngineError::Connection { .. } => ErrorCategory::Connectivity,
            EngineError::ToolFailed { .. } | EngineError::ToolNotFound(_) => {
                ErrorCategory::ToolExecution
            }
            EngineError::Format(_) => ErrorCategory::Format,
            EngineError::Integrity(_) => ErrorCategory::Integrity,
            EngineError::Cancelled => ErrorCategory::Cancelled,
            EngineError::Io(_) | EngineError::Serialization(_) => ErrorCategory::Internal,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        EngineError::Config(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        EngineError::Format(msg.into())
    }

    /// Captured stderr attached to the error, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            EngineError::Connection { stderr, .. } | EngineError::ToolFailed { stderr, .. } => {
                Some(stderr.as_str())
            }
            _ => None,
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "a signal".to_string(),
    }
}

/// Keep the last `STDERR_TAIL_BYTES` of `text`, cut on a char boundary.
pub fn stderr_tail(text: &str) -> String {
    let trimmed = text.trim_end();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

pub type Result<T> = std::result::Result<T, EngineError>;
