//! PostgreSQL dialects: `pg_dump` custom format out, `pg_restore` in.

use super::options::{push_pair, split_options};
use super::version::{ServerVersion, VersionRange};
use super::Dialect;
use crate::engine::config::{EngineConfig, EngineKind, SslMode};
use crate::utils::{EngineError, Result};

/// Seconds libpq waits for a connection before giving up.
const CONNECT_TIMEOUT_SECS: &str = "10";

#[derive(Debug)]
pub struct PostgresDialect {
    name: &'static str,
    versions: VersionRange,
    if_exists: bool,
}

impl PostgresDialect {
    pub fn base() -> Self {
        Self {
            name: "PostgreSQL",
            versions: VersionRange::any(),
            if_exists: true,
        }
    }

    /// Servers before 9.4, where `pg_restore --if-exists` is unavailable.
    pub fn legacy() -> Self {
        Self {
            name: "PostgreSQL < 9.4",
            versions: VersionRange::below(ServerVersion::new(9, 4, 0)),
            if_exists: false,
        }
    }

    /// Arguments for feeding a plain SQL script to `psql` connected to `target`.
    pub fn script_args(&self, config: &EngineConfig, target: &str) -> Result<Vec<String>> {
        let mut args = self.connection_args(config);
        args.extend(["-v", "ON_ERROR_STOP=1", "-d", target].map(String::from));
        args.extend(split_options(&config.restore_options)?);
        Ok(args)
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        self.name
    }

    fn engine(&self) -> EngineKind {
        EngineKind::Postgres
    }

    fn supports_version(&self, version: &str) -> bool {
        self.versions.contains(version)
    }

    fn dump_tool(&self) -> &'static str {
        "pg_dump"
    }

    fn restore_tool(&self) -> &'static str {
        "pg_restore"
    }

    fn client_tool(&self) -> &'static str {
        "psql"
    }

    fn dump_args(&self, config: &EngineConfig, databases: &[String]) -> Result<Vec<String>> {
        let [database] = databases else {
            return Err(EngineError::config(format!(
                "pg_dump dumps exactly one database per invocation, got {}",
                databases.len()
            )));
        };
        let mut args = self.connection_args(config);
        args.extend(["-F", "c", "-d"].map(String::from));
        args.push(database.clone());
        args.extend(split_options(&config.options)?);
        Ok(args)
    }

    fn restore_args(&self, config: &EngineConfig, target: Option<&str>) -> Result<Vec<String>> {
        let target = target.ok_or_else(|| {
            EngineError::config("pg_restore needs a target database")
        })?;
        let mut args = self.connection_args(config);
        args.push("--no-owner".to_string());
        args.push("--clean".to_string());
        if self.if_exists {
            args.push("--if-exists".to_string());
        }
        args.push("-d".to_string());
        args.push(target.to_string());
        args.extend(split_options(&config.restore_options)?);
        Ok(args)
    }

    fn connection_args(&self, config: &EngineConfig) -> Vec<String> {
        let mut args = vec![
            "-h".to_string(),
            config.host().to_string(),
            "-p".to_string(),
            config.port().to_string(),
        ];
        push_pair(&mut args, "-U", config.user());
        // Never prompt; the password comes from PGPASSWORD.
        args.push("-w".to_string());
        args
    }

    fn query_args(&self, config: &EngineConfig, statement: &str) -> Vec<String> {
        let mut args = self.connection_args(config);
        args.extend(["-d", "postgres", "-t", "-A", "-c"].map(String::from));
        args.push(statement.to_string());
        args
    }

    fn credential_env(&self, config: &EngineConfig) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some(password) = config.password() {
            env.push(("PGPASSWORD".to_string(), password.to_string()));
        }
        let sslmode = match config.ssl {
            SslMode::Disabled => "disable",
            SslMode::Preferred => "prefer",
            SslMode::Required => "require",
        };
        env.push(("PGSSLMODE".to_string(), sslmode.to_string()));
        env.push(("PGCONNECT_TIMEOUT".to_string(), CONNECT_TIMEOUT_SECS.to_string()));
        env
    }

    fn liveness_query(&self) -> &'static str {
        "SELECT 1"
    }

    fn version_query(&self) -> &'static str {
        "SHOW server_version"
    }

    fn list_databases_query(&self) -> &'static str {
        "SELECT datname FROM pg_database WHERE datistemplate = false ORDER BY datname"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::new(EngineKind::Postgres);
        config.user = Some("postgres".into());
        config.password = Some("pg-secret".into());
        config.ssl = SslMode::Required;
        config
    }

    #[test]
    fn test_dump_args_custom_format() {
        let args = PostgresDialect::base()
            .dump_args(&config(), &["shop".to_string()])
            .unwrap();
        assert_eq!(
            args,
            vec!["-h", "localhost", "-p", "5432", "-U", "postgres", "-w", "-F", "c", "-d", "shop"]
        );
    }

    #[test]
    fn test_dump_rejects_multiple_databases() {
        let err = PostgresDialect::base()
            .dump_args(&config(), &["a".to_string(), "b".to_string()])
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_restore_if_exists_by_version() {
        let modern = PostgresDialect::base().restore_args(&config(), Some("shop")).unwrap();
        assert!(modern.contains(&"--if-exists".to_string()));

        let legacy = PostgresDialect::legacy().restore_args(&config(), Some("shop")).unwrap();
        assert!(!legacy.contains(&"--if-exists".to_string()));
        assert!(legacy.contains(&"--clean".to_string()));
        assert!(PostgresDialect::legacy().supports_version("9.3.25"));
        assert!(!PostgresDialect::legacy().supports_version("9.4.1"));
    }

    #[test]
    fn test_credentials_in_env() {
        let dialect = PostgresDialect::base();
        let env = dialect.credential_env(&config());
        assert!(env.contains(&("PGPASSWORD".to_string(), "pg-secret".to_string())));
        assert!(env.contains(&("PGSSLMODE".to_string(), "require".to_string())));
        let args = dialect.query_args(&config(), "SELECT 1");
        assert!(!args.iter().any(|a| a.contains("pg-secret")));
    }

    #[test]
    fn test_script_args() {
        let args = PostgresDialect::base().script_args(&config(), "shop_copy").unwrap();
        assert!(args.ends_with(&["-d".to_string(), "shop_copy".to_string()]));
    }
}
