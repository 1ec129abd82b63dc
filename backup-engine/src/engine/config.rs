//! Engine connection parameters and restore mapping types.

use crate::utils::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    MySql,
    #[serde(alias = "maria")]
    MariaDb,
    #[serde(alias = "postgresql", alias = "pg")]
    Postgres,
    #[serde(alias = "mongo")]
    MongoDb,
    #[serde(alias = "sqlserver")]
    Mssql,
    Sqlite,
    Redis,
}

impl EngineKind {
    pub fn id(&self) -> &'static str {
        match self {
            EngineKind::MySql => "mysql",
            EngineKind::MariaDb => "mariadb",
            EngineKind::Postgres => "postgres",
            EngineKind::MongoDb => "mongodb",
            EngineKind::Mssql => "mssql",
            EngineKind::Sqlite => "sqlite",
            EngineKind::Redis => "redis",
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            EngineKind::MySql | EngineKind::MariaDb => Some(3306),
            EngineKind::Postgres => Some(5432),
            EngineKind::MongoDb => Some(27017),
            EngineKind::Mssql => Some(1433),
            EngineKind::Redis => Some(6379),
            EngineKind::Sqlite => None,
        }
    }

    /// Engines whose dumps can be packed into a multi-database archive.
    pub fn supports_multi_database(&self) -> bool {
        !self.is_file_based()
    }

    /// Engines restored by replacing a local data file.
    pub fn is_file_based(&self) -> bool {
        matches!(self, EngineKind::Sqlite | EngineKind::Redis)
    }

    /// Databases never included when dumping "all databases".
    pub fn system_databases(&self) -> &'static [&'static str] {
        match self {
            EngineKind::MySql | EngineKind::MariaDb => {
                &["information_schema", "mysql", "performance_schema", "sys"]
            }
            EngineKind::Postgres => &["postgres", "template0", "template1"],
            EngineKind::MongoDb => &["admin", "config", "local"],
            EngineKind::Mssql => &["master", "model", "msdb", "tempdb"],
            EngineKind::Sqlite | EngineKind::Redis => &[],
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Transport security requested for client tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SslMode {
    Disabled,
    #[default]
    Preferred,
    Required,
}

/// One row of a restore mapping, keyed by `original_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseMappingEntry {
    #[serde(alias = "original_name")]
    pub original_name: String,
    #[serde(alias = "target_name")]
    pub target_name: String,
    #[serde(default = "default_selected")]
    pub selected: bool,
}

fn default_selected() -> bool {
    true
}

/// Connection parameters for one engine instance. Never mutated by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub kind: EngineKind,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Credentials used to create databases before a restore
    #[serde(default)]
    pub privileged_user: Option<String>,

    #[serde(default)]
    pub privileged_password: Option<String>,

    /// Databases to dump; empty means every non-system database
    #[serde(default)]
    pub databases: Vec<String>,

    /// Extra dump tool options, shell-quoted
    #[serde(default)]
    pub options: String,

    /// Extra restore tool options, shell-quoted
    #[serde(default)]
    pub restore_options: String,

    #[serde(default)]
    pub ssl: SslMode,

    /// MongoDB authentication database
    #[serde(default)]
    pub auth_database: Option<String>,

    /// MongoDB connection string (takes precedence over host/port)
    #[serde(default)]
    pub uri: Option<String>,

    /// SQLite database file or Redis RDB file
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// MSSQL backup directory as seen by the server
    #[serde(default)]
    pub backup_path: Option<String>,

    /// Where the MSSQL backup directory is visible locally
    #[serde(default)]
    pub local_backup_path: Option<PathBuf>,

    /// MSSQL data directory used to relocate files on renamed restores
    #[serde(default)]
    pub data_path: Option<String>,

    /// Detected server version, if already known
    #[serde(default)]
    pub version: Option<String>,

    /// Restore mapping; absent means restore everything unchanged
    #[serde(default)]
    pub mapping: Option<Vec<DatabaseMappingEntry>>,
}

impl EngineConfig {
    pub fn new(kind: EngineKind) -> Self {
        Self {
            kind,
            host: None,
            port: None,
            user: None,
            password: None,
            privileged_user: None,
            privileged_password: None,
            databases: Vec::new(),
            options: String::new(),
            restore_options: String::new(),
            ssl: SslMode::default(),
            auth_database: None,
            uri: None,
            path: None,
            backup_path: None,
            local_backup_path: None,
            data_path: None,
            version: None,
            mapping: None,
        }
    }

    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }

    pub fn port(&self) -> u16 {
        self.port.or(self.kind.default_port()).unwrap_or(0)
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref().filter(|u| !u.is_empty())
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref().filter(|p| !p.is_empty())
    }

    /// Same configuration with the privileged credential set, when one is configured.
    pub fn privileged(&self) -> Cow<'_, EngineConfig> {
        match &self.privileged_user {
            Some(user) if !user.is_empty() => {
                let mut config = self.clone();
                config.user = Some(user.clone());
                config.password = self.privileged_password.clone();
                Cow::Owned(config)
            }
            _ => Cow::Borrowed(self),
        }
    }

    /// Values that must never appear in human-readable logs.
    pub fn secrets(&self) -> Vec<String> {
        let mut secrets: Vec<String> = [&self.password, &self.privileged_password]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect();
        if let Some(uri) = &self.uri {
            if let Some(password) = uri_password(uri) {
                secrets.push(password);
            }
        }
        secrets
    }

    pub fn require_path(&self) -> Result<&PathBuf> {
        self.path.as_ref().ok_or_else(|| {
            EngineError::config(format!("{} requires a `path` to the data file", self.kind))
        })
    }

    /// Check the fields required by the engine kind.
    pub fn validate(&self) -> Result<()> {
        if self.kind == EngineKind::Sqlite {
            self.require_path()?;
        }
        if self.kind == EngineKind::Mssql && self.backup_path.is_none() {
            return Err(EngineError::config(
                "mssql requires `backup_path` (server-side backup directory)",
            ));
        }
        if let Some(mapping) = &self.mapping {
            let mut seen = std::collections::HashSet::new();
            for entry in mapping {
                if !seen.insert(entry.original_name.as_str()) {
                    return Err(EngineError::config(format!(
                        "Duplicate mapping entry for database '{}'",
                        entry.original_name
                    )));
                }
            }
        }
        Ok(())
    }
}

fn uri_password(uri: &str) -> Option<String> {
    let rest = uri.split_once("://")?.1;
    let authority = rest.split(['/', '?']).next()?;
    let credentials = authority.rsplit_once('@')?.0;
    let password = credentials.split_once(':')?.1;
    (!password.is_empty()).then(|| password.to_string())
}
