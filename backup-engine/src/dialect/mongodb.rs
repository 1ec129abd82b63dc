//! MongoDB dialects built on the database tools (`mongodump`/`mongorestore`).
//!
//! The tools have no environment-variable credential channel, so the password
//! travels as a flag and is masked in every logged command line.

use super::options::{push_pair, split_options};
use super::version::{ServerVersion, VersionRange};
use super::Dialect;
use crate::engine::config::{EngineConfig, EngineKind, SslMode};
use crate::utils::{EngineError, Result};

#[derive(Debug)]
pub struct MongoDialect {
    name: &'static str,
    versions: VersionRange,
    tls_flag: &'static str,
    shell: &'static str,
}

impl MongoDialect {
    /// MongoDB >= 4.2 with `--tls` and `mongosh`.
    pub fn base() -> Self {
        Self {
            name: "MongoDB",
            versions: VersionRange::any(),
            tls_flag: "--tls",
            shell: "mongosh",
        }
    }

    pub fn legacy() -> Self {
        Self {
            name: "MongoDB < 4.2",
            versions: VersionRange::below(ServerVersion::new(4, 2, 0)),
            tls_flag: "--ssl",
            shell: "mongo",
        }
    }

    /// `mongorestore` options renaming `original` to `target` while
    /// restoring nothing else from the archive.
    pub fn namespace_args(original: &str, target: &str) -> Vec<String> {
        let mut args = vec!["--nsInclude".to_string(), format!("{}.*", original)];
        if original != target {
            args.push("--nsFrom".to_string());
            args.push(format!("{}.*", original));
            args.push("--nsTo".to_string());
            args.push(format!("{}.*", target));
        }
        args
    }
}

impl Dialect for MongoDialect {
    fn name(&self) -> &'static str {
        self.name
    }

    fn engine(&self) -> EngineKind {
        EngineKind::MongoDb
    }

    fn supports_version(&self, version: &str) -> bool {
        self.versions.contains(version)
    }

    fn dump_tool(&self) -> &'static str {
        "mongodump"
    }

    fn restore_tool(&self) -> &'static str {
        "mongorestore"
    }

    fn client_tool(&self) -> &'static str {
        self.shell
    }

    fn dump_args(&self, config: &EngineConfig, databases: &[String]) -> Result<Vec<String>> {
        if databases.len() > 1 {
            return Err(EngineError::config(format!(
                "mongodump archives one database per invocation, got {}",
                databases.len()
            )));
        }
        let mut args = self.connection_args(config);
        if let Some(database) = databases.first() {
            args.push("--db".to_string());
            args.push(database.clone());
        }
        // Bare --archive streams to stdout.
        args.push("--archive".to_string());
        args.extend(split_options(&config.options)?);
        Ok(args)
    }

    fn restore_args(&self, config: &EngineConfig, _target: Option<&str>) -> Result<Vec<String>> {
        let mut args = self.connection_args(config);
        args.push("--archive".to_string());
        args.push("--drop".to_string());
        args.extend(split_options(&config.restore_options)?);
        Ok(args)
    }

    fn connection_args(&self, config: &EngineConfig) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(uri) = config.uri.as_deref().filter(|u| !u.is_empty()) {
            args.push(format!("--uri={}", uri));
        } else {
            push_pair(&mut args, "--host", Some(config.host()));
            push_pair(&mut args, "--port", Some(&config.port().to_string()));
            push_pair(&mut args, "--username", config.user());
            push_pair(&mut args, "--password", config.password());
            if config.user().is_some() {
                push_pair(
                    &mut args,
                    "--authenticationDatabase",
                    Some(config.auth_database.as_deref().unwrap_or("admin")),
                );
            }
        }
        if config.ssl == SslMode::Required {
            args.push(self.tls_flag.to_string());
        }
        args
    }

    fn query_args(&self, config: &EngineConfig, statement: &str) -> Vec<String> {
        let mut args = match config.uri.as_deref().filter(|u| !u.is_empty()) {
            // The shells take the connection string positionally.
            Some(uri) => {
                let mut args = vec![uri.to_string()];
                if config.ssl == SslMode::Required {
                    args.push(self.tls_flag.to_string());
                }
                args
            }
            None => self.connection_args(config),
        };
        args.extend(["--quiet", "--eval"].map(String::from));
        args.push(statement.to_string());
        args
    }

    fn liveness_query(&self) -> &'static str {
        "db.runCommand({ ping: 1 }).ok"
    }

    fn version_query(&self) -> &'static str {
        "db.version()"
    }

    fn list_databases_query(&self) -> &'static str {
        "db.adminCommand({ listDatabases: 1, nameOnly: true }).databases.map(function (d) { return d.name; }).join('\\n')"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_args_with_credentials() {
        let mut config = EngineConfig::new(EngineKind::MongoDb);
        config.user = Some("root".into());
        config.password = Some("pw".into());
        let args = MongoDialect::base()
            .dump_args(&config, &["app".to_string()])
            .unwrap();
        assert_eq!(
            args,
            vec![
                "--host", "localhost", "--port", "27017", "--username", "root", "--password",
                "pw", "--authenticationDatabase", "admin", "--db", "app", "--archive"
            ]
        );
    }

    #[test]
    fn test_uri_takes_precedence() {
        let mut config = EngineConfig::new(EngineKind::MongoDb);
        config.uri = Some("mongodb://u:p@db:27017".into());
        config.host = Some("ignored".into());
        config.ssl = SslMode::Required;

        let args = MongoDialect::legacy().connection_args(&config);
        assert_eq!(args, vec!["--uri=mongodb://u:p@db:27017", "--ssl"]);

        let query = MongoDialect::base().query_args(&config, "db.version()");
        assert_eq!(query[0], "mongodb://u:p@db:27017");
        assert_eq!(query[1], "--tls");
    }

    #[test]
    fn test_namespace_args() {
        assert_eq!(MongoDialect::namespace_args("app", "app"), vec!["--nsInclude", "app.*"]);
        assert_eq!(
            MongoDialect::namespace_args("app", "app_copy"),
            vec!["--nsInclude", "app.*", "--nsFrom", "app.*", "--nsTo", "app_copy.*"]
        );
    }

    #[test]
    fn test_shell_by_version() {
        assert_eq!(MongoDialect::base().client_tool(), "mongosh");
        assert_eq!(MongoDialect::legacy().client_tool(), "mongo");
        assert!(MongoDialect::legacy().supports_version("4.0.28"));
        assert!(!MongoDialect::legacy().supports_version("7.0.5"));
    }
}
