//! Utility modules for the backup engine.

pub mod errors;
pub mod fs;
pub mod logger;
pub mod shutdown;

pub use errors::{EngineError, ErrorCategory, Result};
