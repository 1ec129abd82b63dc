//! MySQL and MariaDB dialects.
//!
//! Both families share mysqldump-compatible arguments; they differ in TLS
//! flag spelling and, for MariaDB >= 10.5, in tool names. The password is
//! passed through `MYSQL_PWD`, never on the command line.

use super::options::{push_pair, split_options};
use super::version::{ServerVersion, VersionRange};
use super::Dialect;
use crate::engine::config::{EngineConfig, EngineKind, SslMode};
use crate::utils::Result;

/// How a client family spells its TLS switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SslFlags {
    /// `--ssl-mode=DISABLED|REQUIRED` (MySQL >= 5.7.11)
    SslMode,
    /// `--skip-ssl` / `--ssl` (MariaDB, older MySQL)
    Toggle,
}

#[derive(Debug)]
pub struct MySqlDialect {
    name: &'static str,
    engine: EngineKind,
    versions: VersionRange,
    ssl_flags: SslFlags,
    dump_tool: &'static str,
    client_tool: &'static str,
}

impl MySqlDialect {
    /// MySQL >= 5.7.11, also the fallback for unknown versions.
    pub fn mysql() -> Self {
        Self {
            name: "MySQL",
            engine: EngineKind::MySql,
            versions: VersionRange::any(),
            ssl_flags: SslFlags::SslMode,
            dump_tool: "mysqldump",
            client_tool: "mysql",
        }
    }

    /// MySQL before `--ssl-mode` existed.
    pub fn mysql_legacy() -> Self {
        Self {
            name: "MySQL < 5.7.11",
            engine: EngineKind::MySql,
            versions: VersionRange::below(ServerVersion::new(5, 7, 11)),
            ssl_flags: SslFlags::Toggle,
            dump_tool: "mysqldump",
            client_tool: "mysql",
        }
    }

    /// MariaDB >= 10.5 ships `mariadb-dump` and `mariadb`.
    pub fn mariadb_modern() -> Self {
        Self {
            name: "MariaDB >= 10.5",
            engine: EngineKind::MariaDb,
            versions: VersionRange::at_least(ServerVersion::new(10, 5, 0)),
            ssl_flags: SslFlags::Toggle,
            dump_tool: "mariadb-dump",
            client_tool: "mariadb",
        }
    }

    pub fn mariadb() -> Self {
        Self {
            name: "MariaDB",
            engine: EngineKind::MariaDb,
            versions: VersionRange::any(),
            ssl_flags: SslFlags::Toggle,
            dump_tool: "mysqldump",
            client_tool: "mysql",
        }
    }

    fn ssl_args(&self, mode: SslMode) -> Option<&'static str> {
        match (self.ssl_flags, mode) {
            (_, SslMode::Preferred) => None,
            (SslFlags::SslMode, SslMode::Disabled) => Some("--ssl-mode=DISABLED"),
            (SslFlags::SslMode, SslMode::Required) => Some("--ssl-mode=REQUIRED"),
            (SslFlags::Toggle, SslMode::Disabled) => Some("--skip-ssl"),
            (SslFlags::Toggle, SslMode::Required) => Some("--ssl"),
        }
    }
}

impl Dialect for MySqlDialect {
    fn name(&self) -> &'static str {
        self.name
    }

    fn engine(&self) -> EngineKind {
        self.engine
    }

    fn supports_version(&self, version: &str) -> bool {
        self.versions.contains(version)
    }

    fn dump_tool(&self) -> &'static str {
        self.dump_tool
    }

    fn restore_tool(&self) -> &'static str {
        self.client_tool
    }

    fn client_tool(&self) -> &'static str {
        self.client_tool
    }

    fn dump_args(&self, config: &EngineConfig, databases: &[String]) -> Result<Vec<String>> {
        let mut args = self.connection_args(config);
        args.extend(
            ["--single-transaction", "--quick", "--routines", "--triggers"]
                .map(String::from),
        );
        // `--databases` makes the dump carry CREATE DATABASE / USE statements,
        // which the restore rewriter relies on for renames.
        if databases.is_empty() {
            args.push("--all-databases".to_string());
        } else {
            args.push("--databases".to_string());
            args.extend(databases.iter().cloned());
        }
        args.extend(split_options(&config.options)?);
        Ok(args)
    }

    fn restore_args(&self, config: &EngineConfig, target: Option<&str>) -> Result<Vec<String>> {
        let mut args = self.connection_args(config);
        args.extend(split_options(&config.restore_options)?);
        if let Some(target) = target {
            args.push(target.to_string());
        }
        Ok(args)
    }

    fn connection_args(&self, config: &EngineConfig) -> Vec<String> {
        let mut args = vec![
            "-h".to_string(),
            config.host().to_string(),
            "-P".to_string(),
            config.port().to_string(),
        ];
        push_pair(&mut args, "-u", config.user());
        if let Some(flag) = self.ssl_args(config.ssl) {
            args.push(flag.to_string());
        }
        args
    }

    fn query_args(&self, config: &EngineConfig, statement: &str) -> Vec<String> {
        let mut args = self.connection_args(config);
        args.extend(["-N", "-s", "-e"].map(String::from));
        args.push(statement.to_string());
        args
    }

    fn credential_env(&self, config: &EngineConfig) -> Vec<(String, String)> {
        config
            .password()
            .map(|p| vec![("MYSQL_PWD".to_string(), p.to_string())])
            .unwrap_or_default()
    }

    fn liveness_query(&self) -> &'static str {
        "SELECT 1"
    }

    fn version_query(&self) -> &'static str {
        "SELECT VERSION()"
    }

    fn list_databases_query(&self) -> &'static str {
        "SHOW DATABASES"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::new(EngineKind::MySql);
        config.host = Some("db.internal".into());
        config.user = Some("backup".into());
        config.password = Some("hunter2".into());
        config
    }

    #[test]
    fn test_dump_args_single_database() {
        let mut config = config();
        config.options = "--skip-lock-tables --where='id > 1'".into();
        let args = MySqlDialect::mysql()
            .dump_args(&config, &["shop".to_string()])
            .unwrap();

        assert_eq!(&args[..6], &["-h", "db.internal", "-P", "3306", "-u", "backup"]);
        let idx = args.iter().position(|a| a == "--databases").unwrap();
        assert_eq!(args[idx + 1], "shop");
        assert!(args.ends_with(&["--skip-lock-tables".to_string(), "--where=id > 1".to_string()]));
    }

    #[test]
    fn test_password_never_in_args() {
        let config = config();
        let dialect = MySqlDialect::mysql();
        let args = dialect.dump_args(&config, &["shop".to_string()]).unwrap();
        assert!(!args.iter().any(|a| a.contains("hunter2")));
        assert_eq!(
            dialect.credential_env(&config),
            vec![("MYSQL_PWD".to_string(), "hunter2".to_string())]
        );
    }

    #[test]
    fn test_ssl_flag_divergence() {
        let mut config = config();
        config.ssl = SslMode::Disabled;

        let mysql = MySqlDialect::mysql().connection_args(&config);
        assert!(mysql.contains(&"--ssl-mode=DISABLED".to_string()));

        let maria = MySqlDialect::mariadb().connection_args(&config);
        assert!(maria.contains(&"--skip-ssl".to_string()));

        config.ssl = SslMode::Preferred;
        let default = MySqlDialect::mysql().connection_args(&config);
        assert!(!default.iter().any(|a| a.contains("ssl")));
    }

    #[test]
    fn test_restore_args_target_last() {
        let mut config = config();
        config.restore_options = "--force".into();
        let args = MySqlDialect::mariadb_modern()
            .restore_args(&config, Some("shop_copy"))
            .unwrap();
        assert_eq!(args.last().unwrap(), "shop_copy");
        assert!(args.contains(&"--force".to_string()));
    }

    #[test]
    fn test_query_args() {
        let args = MySqlDialect::mysql().query_args(&config(), "SELECT 1");
        assert!(args.ends_with(&["-N".to_string(), "-s".to_string(), "-e".to_string(), "SELECT 1".to_string()]));
    }
}
