//! Redis dialects. Dumps use `redis-cli --rdb <path>`; restores replace the
//! RDB file on disk, so there is no restore tool invocation.

use super::options::{push_pair, split_options};
use super::version::{ServerVersion, VersionRange};
use super::{Dialect, DumpOutput};
use crate::engine::config::{EngineConfig, EngineKind, SslMode};
use crate::utils::{EngineError, Result};

#[derive(Debug)]
pub struct RedisDialect {
    name: &'static str,
    versions: VersionRange,
    acl: bool,
}

impl RedisDialect {
    pub fn base() -> Self {
        Self {
            name: "Redis",
            versions: VersionRange::any(),
            acl: false,
        }
    }

    /// Redis 6 introduced ACL users (`--user`).
    pub fn acl() -> Self {
        Self {
            name: "Redis >= 6",
            versions: VersionRange::at_least(ServerVersion::new(6, 0, 0)),
            acl: true,
        }
    }
}

impl Dialect for RedisDialect {
    fn name(&self) -> &'static str {
        self.name
    }

    fn engine(&self) -> EngineKind {
        EngineKind::Redis
    }

    fn supports_version(&self, version: &str) -> bool {
        self.versions.contains(version)
    }

    fn dump_tool(&self) -> &'static str {
        "redis-cli"
    }

    fn restore_tool(&self) -> &'static str {
        "redis-cli"
    }

    fn client_tool(&self) -> &'static str {
        "redis-cli"
    }

    fn dump_output(&self) -> DumpOutput {
        DumpOutput::PathArgument
    }

    fn dump_args(&self, config: &EngineConfig, _databases: &[String]) -> Result<Vec<String>> {
        let mut args = self.connection_args(config);
        args.extend(split_options(&config.options)?);
        args.push("--rdb".to_string());
        Ok(args)
    }

    fn restore_args(&self, _config: &EngineConfig, _target: Option<&str>) -> Result<Vec<String>> {
        Err(EngineError::config(
            "Redis restores replace the RDB file; configure `path` instead of a restore tool",
        ))
    }

    fn connection_args(&self, config: &EngineConfig) -> Vec<String> {
        let mut args = vec![
            "-h".to_string(),
            config.host().to_string(),
            "-p".to_string(),
            config.port().to_string(),
        ];
        if self.acl {
            push_pair(&mut args, "--user", config.user());
        }
        if config.ssl == SslMode::Required {
            args.push("--tls".to_string());
        }
        args
    }

    fn query_args(&self, config: &EngineConfig, statement: &str) -> Vec<String> {
        let mut args = self.connection_args(config);
        args.extend(statement.split_whitespace().map(String::from));
        args
    }

    fn credential_env(&self, config: &EngineConfig) -> Vec<(String, String)> {
        config
            .password()
            .map(|p| vec![("REDISCLI_AUTH".to_string(), p.to_string())])
            .unwrap_or_default()
    }

    fn liveness_query(&self) -> &'static str {
        "PING"
    }

    fn version_query(&self) -> &'static str {
        "INFO server"
    }

    fn list_databases_query(&self) -> &'static str {
        "INFO keyspace"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::new(EngineKind::Redis);
        config.user = Some("backup".into());
        config.password = Some("redis-pw".into());
        config
    }

    #[test]
    fn test_user_only_with_acl() {
        let acl = RedisDialect::acl().connection_args(&config());
        assert_eq!(acl, vec!["-h", "localhost", "-p", "6379", "--user", "backup"]);

        let base = RedisDialect::base().connection_args(&config());
        assert!(!base.contains(&"--user".to_string()));
    }

    #[test]
    fn test_dump_args_end_with_rdb() {
        let args = RedisDialect::base().dump_args(&config(), &[]).unwrap();
        assert_eq!(args.last().unwrap(), "--rdb");
        assert_eq!(RedisDialect::base().dump_output(), DumpOutput::PathArgument);
        assert_eq!(
            RedisDialect::base().credential_env(&config()),
            vec![("REDISCLI_AUTH".to_string(), "redis-pw".to_string())]
        );
    }

    #[test]
    fn test_query_args_split_statement() {
        let args = RedisDialect::base().query_args(&config(), "INFO server");
        assert!(args.ends_with(&["INFO".to_string(), "server".to_string()]));
    }
}
