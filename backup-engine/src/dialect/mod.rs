//! Dialects: per-engine, per-version command construction.
//!
//! A [`Dialect`] turns an [`EngineConfig`] into the exact argument vectors
//! for one engine's dump, restore and client tools. Dialects are stateless
//! and shared across concurrent jobs.
//!
//! The [`DialectRegistry`] holds an ordered list per engine. Resolution walks
//! the list most-specific-first and returns the first dialect whose
//! `supports_version` accepts the detected version; every engine registers a
//! base dialect accepting any version as the last entry.

pub mod mongodb;
pub mod mssql;
pub mod mysql;
pub mod options;
pub mod postgres;
pub mod redis;
pub mod sqlite;
pub mod version;

pub use options::{join_args, split_options};
pub use version::{ServerVersion, VersionRange};

use crate::engine::config::{EngineConfig, EngineKind};
use crate::utils::{EngineError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Where a dump tool writes its output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpOutput {
    /// Streamed on stdout
    Stdout,
    /// Written to a local path appended as the final argument
    PathArgument,
    /// Written to a server-side file that is copied afterwards
    ServerFile,
}

pub trait Dialect: Send + Sync + fmt::Debug {
    /// Human-readable dialect name, used in logs.
    fn name(&self) -> &'static str;

    fn engine(&self) -> EngineKind;

    fn supports_version(&self, version: &str) -> bool;

    fn dump_tool(&self) -> &'static str;

    fn restore_tool(&self) -> &'static str;

    /// Interactive client used for probes and ad-hoc statements.
    fn client_tool(&self) -> &'static str;

    fn dump_output(&self) -> DumpOutput {
        DumpOutput::Stdout
    }

    fn dump_args(&self, config: &EngineConfig, databases: &[String]) -> Result<Vec<String>>;

    fn restore_args(&self, config: &EngineConfig, target: Option<&str>) -> Result<Vec<String>>;

    fn connection_args(&self, config: &EngineConfig) -> Vec<String>;

    /// Client arguments executing one statement with machine-readable output.
    fn query_args(&self, config: &EngineConfig, statement: &str) -> Vec<String>;

    /// Environment variables carrying credentials and TLS settings.
    fn credential_env(&self, _config: &EngineConfig) -> Vec<(String, String)> {
        Vec::new()
    }

    fn liveness_query(&self) -> &'static str;

    fn version_query(&self) -> &'static str;

    fn list_databases_query(&self) -> &'static str;
}

/// Ordered dialect lists per engine, built once and shared by reference.
#[derive(Debug, Default)]
pub struct DialectRegistry {
    dialects: HashMap<EngineKind, Vec<Arc<dyn Dialect>>>,
}

impl DialectRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in dialect, most specific first.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register(Arc::new(mysql::MySqlDialect::mysql_legacy()));
        registry.register(Arc::new(mysql::MySqlDialect::mysql()));
        registry.register(Arc::new(mysql::MySqlDialect::mariadb_modern()));
        registry.register(Arc::new(mysql::MySqlDialect::mariadb()));

        registry.register(Arc::new(postgres::PostgresDialect::legacy()));
        registry.register(Arc::new(postgres::PostgresDialect::base()));

        registry.register(Arc::new(mongodb::MongoDialect::legacy()));
        registry.register(Arc::new(mongodb::MongoDialect::base()));

        registry.register(Arc::new(mssql::MssqlDialect));
        registry.register(Arc::new(sqlite::SqliteDialect));

        registry.register(Arc::new(redis::RedisDialect::acl()));
        registry.register(Arc::new(redis::RedisDialect::base()));

        registry
    }

    /// Append a dialect to its engine's list. Register specific dialects
    /// before the base dialect of the same engine.
    pub fn register(&mut self, dialect: Arc<dyn Dialect>) {
        self.dialects.entry(dialect.engine()).or_default().push(dialect);
    }

    /// Resolve the most specific dialect for an engine and detected version.
    pub fn resolve(&self, engine: EngineKind, version: Option<&str>) -> Result<Arc<dyn Dialect>> {
        let version = version.unwrap_or("");
        self.dialects
            .get(&engine)
            .and_then(|list| list.iter().find(|d| d.supports_version(version)))
            .cloned()
            .ok_or_else(|| {
                EngineError::config(format!(
                    "No dialect registered for {} (version '{}')",
                    engine, version
                ))
            })
    }

    pub fn dialects_for(&self, engine: EngineKind) -> &[Arc<dyn Dialect>] {
        self.dialects.get(&engine).map(Vec::as_slice).unwrap_or(&[])
    }
}
