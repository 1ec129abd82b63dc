//! SQL Server dialect driven entirely through `sqlcmd`.
//!
//! `BACKUP DATABASE` writes to a path on the server, so dumps use
//! [`DumpOutput::ServerFile`]: the caller copies the `.bak` from the
//! locally visible backup directory afterwards.

use super::options::{push_pair, split_options};
use super::version::VersionRange;
use super::{Dialect, DumpOutput};
use crate::engine::config::{EngineConfig, EngineKind, SslMode};
use crate::utils::fs::{random_suffix, timestamp_suffix};
use crate::utils::{EngineError, Result};
use std::path::PathBuf;

#[derive(Debug)]
pub struct MssqlDialect;

/// `[name]` with closing brackets doubled.
pub fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// `N'text'` with single quotes doubled.
pub fn quote_string(text: &str) -> String {
    format!("N'{}'", text.replace('\'', "''"))
}

fn backup_dir(config: &EngineConfig) -> Result<&str> {
    config
        .backup_path
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| EngineError::config("mssql requires `backup_path`"))
}

/// Server-side path of the `.bak` file for `database`.
pub fn server_backup_file(config: &EngineConfig, file_name: &str) -> Result<String> {
    let dir = backup_dir(config)?;
    // Windows servers see backslash paths, Linux containers forward slashes.
    let sep = if dir.contains('\\') { '\\' } else { '/' };
    Ok(format!("{}{}{}", dir.trim_end_matches(['/', '\\']), sep, file_name))
}

/// Where a server-side backup file is visible to this process.
pub fn local_backup_file(config: &EngineConfig, file_name: &str) -> Result<PathBuf> {
    let dir = match &config.local_backup_path {
        Some(dir) => dir.clone(),
        None => PathBuf::from(backup_dir(config)?),
    };
    Ok(dir.join(file_name))
}

/// Unique file name for one server-side backup of `database`, so
/// concurrent dumps of the same database never share a file.
pub fn server_backup_name(database: &str) -> String {
    format!(
        "{}-{}-{}.bak",
        sanitize(database),
        timestamp_suffix(),
        random_suffix()
    )
}

/// Name of the server-side staging file used to restore into `target`.
pub fn server_restore_file(target: &str) -> String {
    format!("restore-{}-{}.bak", sanitize(target), random_suffix())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

pub fn backup_statement(database: &str, disk: &str) -> String {
    format!(
        "BACKUP DATABASE {} TO DISK = {} WITH COPY_ONLY, FORMAT, INIT, STATS = 10",
        quote_ident(database),
        quote_string(disk)
    )
}

pub fn filelist_statement(disk: &str) -> String {
    format!("RESTORE FILELISTONLY FROM DISK = {}", quote_string(disk))
}

/// `RESTORE DATABASE` overwriting `target`, relocating files per `moves`
/// (logical name, physical path).
pub fn restore_statement(target: &str, disk: &str, moves: &[(String, String)]) -> String {
    let mut statement = format!(
        "RESTORE DATABASE {} FROM DISK = {} WITH REPLACE, STATS = 10",
        quote_ident(target),
        quote_string(disk)
    );
    for (logical, physical) in moves {
        statement.push_str(&format!(
            ", MOVE {} TO {}",
            quote_string(logical),
            quote_string(physical)
        ));
    }
    statement
}

impl MssqlDialect {
    /// `sqlcmd` arguments running `statement` and failing on SQL errors.
    pub fn statement_args(&self, config: &EngineConfig, statement: &str) -> Vec<String> {
        let mut args = self.connection_args(config);
        args.push("-b".to_string());
        args.push("-Q".to_string());
        args.push(statement.to_string());
        args
    }

    /// `BACKUP DATABASE` of `database` to the server path `disk`.
    pub fn backup_args(&self, config: &EngineConfig, database: &str, disk: &str) -> Result<Vec<String>> {
        let mut args = self.statement_args(config, &backup_statement(database, disk));
        args.extend(split_options(&config.options)?);
        Ok(args)
    }

    /// `RESTORE DATABASE` of the staged server file `disk` into `target`.
    pub fn restore_backup_args(
        &self,
        config: &EngineConfig,
        target: &str,
        disk: &str,
        moves: &[(String, String)],
    ) -> Result<Vec<String>> {
        let mut args = self.statement_args(config, &restore_statement(target, disk, moves));
        args.extend(split_options(&config.restore_options)?);
        Ok(args)
    }
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &'static str {
        "SQL Server"
    }

    fn engine(&self) -> EngineKind {
        EngineKind::Mssql
    }

    fn supports_version(&self, version: &str) -> bool {
        VersionRange::any().contains(version)
    }

    fn dump_tool(&self) -> &'static str {
        "sqlcmd"
    }

    fn restore_tool(&self) -> &'static str {
        "sqlcmd"
    }

    fn client_tool(&self) -> &'static str {
        "sqlcmd"
    }

    fn dump_output(&self) -> DumpOutput {
        DumpOutput::ServerFile
    }

    fn dump_args(&self, _config: &EngineConfig, _databases: &[String]) -> Result<Vec<String>> {
        Err(EngineError::config(
            "SQL Server backups are written to a server file; they need a staged backup path",
        ))
    }

    fn restore_args(&self, _config: &EngineConfig, _target: Option<&str>) -> Result<Vec<String>> {
        Err(EngineError::config(
            "SQL Server restores read a staged server file; they need a staged backup path",
        ))
    }

    fn connection_args(&self, config: &EngineConfig) -> Vec<String> {
        let mut args = vec![
            "-S".to_string(),
            format!("{},{}", config.host(), config.port()),
        ];
        push_pair(&mut args, "-U", config.user());
        if config.ssl == SslMode::Required {
            args.push("-N".to_string());
        }
        args
    }

    fn query_args(&self, config: &EngineConfig, statement: &str) -> Vec<String> {
        let mut args = self.connection_args(config);
        args.extend(["-h", "-1", "-W", "-s", "|", "-b", "-Q"].map(String::from));
        args.push(format!("SET NOCOUNT ON; {}", statement));
        args
    }

    fn credential_env(&self, config: &EngineConfig) -> Vec<(String, String)> {
        config
            .password()
            .map(|p| vec![("SQLCMDPASSWORD".to_string(), p.to_string())])
            .unwrap_or_default()
    }

    fn liveness_query(&self) -> &'static str {
        "SELECT 1"
    }

    fn version_query(&self) -> &'static str {
        "SELECT SERVERPROPERTY('ProductVersion')"
    }

    fn list_databases_query(&self) -> &'static str {
        "SELECT name FROM sys.databases ORDER BY name"
    }
}
