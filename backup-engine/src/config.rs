//! Job configuration for the CLI.
//!
//! Loads a TOML job file with `BACKUP_ENGINE__*` environment overrides, so
//! secrets such as `BACKUP_ENGINE__ENGINE__PASSWORD` can stay out of the file.

use crate::engine::config::EngineConfig;
use crate::engine::EngineSettings;
use crate::process::DEFAULT_TERMINATE_GRACE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix; `__` separates nested keys.
pub const ENV_PREFIX: &str = "BACKUP_ENGINE";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Parent directory for per-job temp directories (default: system temp)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,

    /// Seconds between SIGTERM and SIGKILL when a job is cancelled
    #[serde(default = "default_terminate_grace_secs")]
    pub terminate_grace_secs: u64,

    /// Tool name to replacement command line
    #[serde(default)]
    pub tools: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_terminate_grace_secs() -> u64 {
    DEFAULT_TERMINATE_GRACE.as_secs()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            temp_dir: None,
            terminate_grace_secs: default_terminate_grace_secs(),
            tools: HashMap::new(),
        }
    }
}

impl Config {
    /// Load from an optional job file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        Self::load(Some(path))
    }

    /// Runtime settings for the [`Engine`](crate::Engine).
    pub fn settings(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        EngineSettings {
            temp_dir: self.runtime.temp_dir.clone().unwrap_or(defaults.temp_dir),
            terminate_grace: Duration::from_secs(self.runtime.terminate_grace_secs),
            tools: self.runtime.tools.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::{EngineKind, SslMode};
    use tempfile::TempDir;

    const JOB: &str = r#"
[log]
level = "debug"

[runtime]
temp_dir = "/var/tmp/backup-engine"
terminate_grace_secs = 3

[runtime.tools]
mysqldump = "docker exec -i db mysqldump"

[engine]
kind = "mysql"
host = "db.internal"
user = "backup"
databases = ["shop", "billing"]
options = "--column-statistics=0"
ssl = "required"

[[engine.mapping]]
original_name = "shop"
target_name = "shop_restored"

[[engine.mapping]]
original_name = "billing"
target_name = "billing"
selected = false
"#;

    fn write_job(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("job.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_job_file() {
        let dir = TempDir::new().unwrap();
        let config = Config::from_file(&write_job(&dir, JOB)).unwrap();

        assert_eq!(config.log.level, "debug");
        assert_eq!(config.engine.kind, EngineKind::MySql);
        assert_eq!(config.engine.port(), 3306);
        assert_eq!(config.engine.databases, vec!["shop", "billing"]);
        assert_eq!(config.engine.ssl, SslMode::Required);

        let mapping = config.engine.mapping.as_ref().unwrap();
        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping[0].target_name, "shop_restored");
        assert!(mapping[0].selected);
        assert!(!mapping[1].selected);

        let settings = config.settings();
        assert_eq!(settings.temp_dir, PathBuf::from("/var/tmp/backup-engine"));
        assert_eq!(settings.terminate_grace, Duration::from_secs(3));
        assert_eq!(settings.tools["mysqldump"], "docker exec -i db mysqldump");
    }

    #[test]
    fn test_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::from_file(&write_job(&dir, "[engine]\nkind = \"postgres\"\n")).unwrap();

        assert_eq!(config.log.level, "info");
        assert!(config.runtime.tools.is_empty());
        assert_eq!(config.settings().terminate_grace, DEFAULT_TERMINATE_GRACE);
        assert_eq!(config.engine.port(), 5432);
        assert!(config.engine.mapping.is_none());
    }

    #[test]
    fn test_password_from_environment() {
        let dir = TempDir::new().unwrap();
        let path = write_job(&dir, "[engine]\nkind = \"mongodb\"\nhost = \"mongo\"\n");

        std::env::set_var("BACKUP_ENGINE__ENGINE__PASSWORD", "s3cret-from-env");
        let config = Config::from_file(&path);
        std::env::remove_var("BACKUP_ENGINE__ENGINE__PASSWORD");

        assert_eq!(config.unwrap().engine.password.as_deref(), Some("s3cret-from-env"));
    }

    #[test]
    fn test_environment_values_keep_their_text() {
        let dir = TempDir::new().unwrap();
        let path = write_job(&dir, "[engine]\nkind = \"postgres\"\n");

        std::env::set_var("BACKUP_ENGINE__ENGINE__PRIVILEGED_PASSWORD", "007123");
        std::env::set_var("BACKUP_ENGINE__ENGINE__PORT", "5433");
        let config = Config::from_file(&path);
        std::env::remove_var("BACKUP_ENGINE__ENGINE__PRIVILEGED_PASSWORD");
        std::env::remove_var("BACKUP_ENGINE__ENGINE__PORT");

        let config = config.unwrap();
        assert_eq!(config.engine.privileged_password.as_deref(), Some("007123"));
        assert_eq!(config.engine.port(), 5433);
    }

    #[test]
    fn test_missing_engine_section_fails() {
        let dir = TempDir::new().unwrap();
        assert!(Config::from_file(&write_job(&dir, "[log]\nlevel = \"warn\"\n")).is_err());
    }
}
