//! Backup Engine Library
//!
//! Database backup and restore orchestration over the engines' native
//! dump and restore tools: dialect selection per server version, process
//! supervision, a multi-database TAR archive, and selective restores that
//! rewrite SQL dumps while streaming them.

pub mod archive;
pub mod config;
pub mod dialect;
pub mod dump;
pub mod engine;
pub mod probe;
pub mod process;
pub mod report;
pub mod restore;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use engine::config::{DatabaseMappingEntry, EngineConfig, EngineKind};
pub use engine::{Engine, EngineSettings};
pub use probe::ConnectionTestResult;
pub use report::{BackupResult, JobHooks, LogEntry};
pub use utils::errors::EngineError;
pub type Result<T> = std::result::Result<T, EngineError>;
