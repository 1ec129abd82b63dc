//! SQLite dialect: the `sqlite3` shell against a local database file.

use super::options::split_options;
use super::version::VersionRange;
use super::Dialect;
use crate::engine::config::{EngineConfig, EngineKind};
use crate::utils::Result;

#[derive(Debug)]
pub struct SqliteDialect;

impl SqliteDialect {
    fn path_arg(config: &EngineConfig) -> Result<String> {
        Ok(config.require_path()?.to_string_lossy().into_owned())
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "SQLite"
    }

    fn engine(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    fn supports_version(&self, version: &str) -> bool {
        VersionRange::any().contains(version)
    }

    fn dump_tool(&self) -> &'static str {
        "sqlite3"
    }

    fn restore_tool(&self) -> &'static str {
        "sqlite3"
    }

    fn client_tool(&self) -> &'static str {
        "sqlite3"
    }

    fn dump_args(&self, config: &EngineConfig, _databases: &[String]) -> Result<Vec<String>> {
        let mut args = split_options(&config.options)?;
        args.push(Self::path_arg(config)?);
        args.push(".dump".to_string());
        Ok(args)
    }

    fn restore_args(&self, config: &EngineConfig, _target: Option<&str>) -> Result<Vec<String>> {
        let mut args = split_options(&config.restore_options)?;
        args.push("-bail".to_string());
        args.push(Self::path_arg(config)?);
        Ok(args)
    }

    fn connection_args(&self, config: &EngineConfig) -> Vec<String> {
        config
            .path
            .as_ref()
            .map(|p| vec![p.to_string_lossy().into_owned()])
            .unwrap_or_default()
    }

    fn query_args(&self, config: &EngineConfig, statement: &str) -> Vec<String> {
        let mut args = self.connection_args(config);
        args.push(statement.to_string());
        args
    }

    fn liveness_query(&self) -> &'static str {
        "SELECT 1;"
    }

    fn version_query(&self) -> &'static str {
        "SELECT sqlite_version();"
    }

    fn list_databases_query(&self) -> &'static str {
        "SELECT name FROM pragma_database_list;"
    }
}
