//! Engine facade: the entry points used by the orchestration layer.
//!
//! An [`Engine`] is built once at startup from a [`DialectRegistry`] and
//! [`EngineSettings`], then shared by reference. Every call builds its own
//! [`JobContext`]; jobs share nothing but the filesystem.

pub mod config;
pub mod files;
pub mod mssql;

use crate::dialect::{split_options, Dialect, DialectRegistry};
use crate::process::{Input, Output, Supervisor, ToolCommand, DEFAULT_TERMINATE_GRACE};
use crate::probe::{self, ConnectionTestResult};
use crate::report::{BackupResult, JobHooks, JobReporter};
use crate::utils::{EngineError, Result};
use crate::{dump, restore};
use config::EngineConfig;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Process-wide runtime settings shared by every job
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Parent of every per-job temp directory
    pub temp_dir: PathBuf,
    pub terminate_grace: Duration,
    /// Tool name to command line, e.g. `mysqldump = "docker exec -i db mysqldump"`
    pub tools: HashMap<String, String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            temp_dir: std::env::temp_dir(),
            terminate_grace: DEFAULT_TERMINATE_GRACE,
            tools: HashMap::new(),
        }
    }
}

impl EngineSettings {
    /// Build the invocation of `tool`, honouring any configured override.
    pub fn command(&self, tool: &str, args: Vec<String>) -> Result<ToolCommand> {
        let Some(line) = self.tools.get(tool) else {
            return Ok(ToolCommand::new(tool, tool, args));
        };
        let mut tokens = split_options(line)?;
        if tokens.is_empty() {
            return Err(EngineError::config(format!("Empty command override for {}", tool)));
        }
        let program = tokens.remove(0);
        tokens.extend(args);
        Ok(ToolCommand::new(tool, program, tokens))
    }
}

/// Everything one job needs: configuration, resolved dialect, logging and
/// a supervisor bound to the job's cancellation token.
#[derive(Clone)]
pub struct JobContext {
    pub config: Arc<EngineConfig>,
    pub dialect: Arc<dyn Dialect>,
    pub settings: Arc<EngineSettings>,
    pub reporter: JobReporter,
    pub supervisor: Supervisor,
    /// Server version, configured or detected
    pub version: Option<String>,
}

impl JobContext {
    pub fn new(
        config: Arc<EngineConfig>,
        dialect: Arc<dyn Dialect>,
        settings: Arc<EngineSettings>,
        reporter: JobReporter,
        cancel: CancellationToken,
    ) -> Self {
        let supervisor = Supervisor::new(reporter.clone(), cancel)
            .with_secrets(config.secrets())
            .with_grace(settings.terminate_grace);
        let version = config.version.clone();
        Self {
            config,
            dialect,
            settings,
            reporter,
            supervisor,
            version,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        self.supervisor.cancel_token()
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel_token().is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    /// Tool invocation carrying the dialect's credential environment.
    pub fn command(&self, tool: &str, args: Vec<String>) -> Result<ToolCommand> {
        self.command_as(&self.config, tool, args)
    }

    pub fn command_as(&self, config: &EngineConfig, tool: &str, args: Vec<String>) -> Result<ToolCommand> {
        Ok(self
            .settings
            .command(tool, args)?
            .envs(self.dialect.credential_env(config)))
    }

    /// Run one statement through the client tool; returns non-empty output lines.
    pub async fn query(&self, statement: &str) -> Result<Vec<String>> {
        self.query_as(&self.config, statement).await
    }

    pub async fn query_as(&self, config: &EngineConfig, statement: &str) -> Result<Vec<String>> {
        let args = self.dialect.query_args(config, statement);
        let command = self.command_as(config, self.dialect.client_tool(), args)?;
        let output = self
            .supervisor
            .clone()
            .quiet()
            .run(command, Input::Null, Output::Capture)
            .await?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }
}

/// Backup/restore engine shared by all jobs.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<DialectRegistry>,
    settings: Arc<EngineSettings>,
}

impl Engine {
    pub fn new(registry: Arc<DialectRegistry>, settings: EngineSettings) -> Self {
        Self {
            registry,
            settings: Arc::new(settings),
        }
    }

    /// Engine with every built-in dialect and default settings.
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(DialectRegistry::with_defaults()), EngineSettings::default())
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn registry(&self) -> &DialectRegistry {
        &self.registry
    }

    /// Build a job context, detecting the server version when not configured.
    ///
    /// A failed detection falls back to the engine's base dialect.
    pub async fn context(
        &self,
        config: &EngineConfig,
        reporter: &JobReporter,
        cancel: CancellationToken,
    ) -> Result<JobContext> {
        config.validate()?;
        let config = Arc::new(config.clone());
        let base = self.registry.resolve(config.kind, None)?;
        let mut ctx = JobContext::new(
            Arc::clone(&config),
            Arc::clone(&base),
            Arc::clone(&self.settings),
            reporter.clone(),
            cancel,
        );

        if ctx.version.is_none() {
            match probe::detect_version(&ctx).await {
                Ok(version) => {
                    debug!(engine = %config.kind, %version, "Detected server version");
                    ctx.version = Some(version);
                }
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(e) => reporter.warning(format!(
                    "Could not detect {} server version ({}); using the {} dialect",
                    config.kind,
                    e,
                    base.name()
                )),
            }
        }

        ctx.dialect = self.registry.resolve(config.kind, ctx.version.as_deref())?;
        Ok(ctx)
    }

    /// Dump the configured databases to `destination`.
    pub async fn dump(&self, config: &EngineConfig, destination: &Path, hooks: JobHooks) -> BackupResult {
        dump::run(self, config, destination, hooks).await
    }

    /// Restore `source` into the configured server.
    pub async fn restore(&self, config: &EngineConfig, source: &Path, hooks: JobHooks) -> BackupResult {
        restore::run(self, config, source, hooks).await
    }

    /// Create any of `databases` that do not exist yet.
    pub async fn prepare_restore(&self, config: &EngineConfig, databases: &[String]) -> Result<()> {
        let reporter = JobReporter::new(&JobHooks::new());
        let ctx = self.context(config, &reporter, CancellationToken::new()).await?;
        restore::prepare::ensure_databases(&ctx, databases).await
    }

    pub async fn test(&self, config: &EngineConfig) -> ConnectionTestResult {
        let reporter = JobReporter::new(&JobHooks::new());
        let base = match config.validate().and_then(|_| self.registry.resolve(config.kind, None)) {
            Ok(dialect) => dialect,
            Err(e) => return ConnectionTestResult::failed(e.to_string()),
        };
        let ctx = JobContext::new(
            Arc::new(config.clone()),
            base,
            Arc::clone(&self.settings),
            reporter,
            CancellationToken::new(),
        );
        probe::test_connection(&ctx).await
    }

    pub async fn get_databases(&self, config: &EngineConfig) -> Result<Vec<String>> {
        let reporter = JobReporter::new(&JobHooks::new());
        let ctx = self.context(config, &reporter, CancellationToken::new()).await?;
        probe::list_databases(&ctx).await
    }

    /// Best-effort database names found in an existing artifact.
    pub async fn analyze_dump(&self, source: &Path) -> Result<Vec<String>> {
        restore::analyze::analyze_dump(source).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_override_is_tokenized() {
        let mut settings = EngineSettings::default();
        settings
            .tools
            .insert("mysqldump".into(), "docker exec -i 'db 1' mysqldump".into());

        let command = settings.command("mysqldump", vec!["--databases".into()]).unwrap();
        assert_eq!(command.tool, "mysqldump");
        assert_eq!(command.program, "docker");
        assert_eq!(command.args, vec!["exec", "-i", "db 1", "mysqldump", "--databases"]);

        let plain = settings.command("psql", vec![]).unwrap();
        assert_eq!(plain.program, "psql");
    }

    #[test]
    fn test_empty_override_rejected() {
        let mut settings = EngineSettings::default();
        settings.tools.insert("psql".into(), "  ".into());
        assert!(matches!(settings.command("psql", vec![]), Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_context_falls_back_when_detection_fails() {
        let mut settings = EngineSettings::default();
        settings.tools.insert("mysql".into(), "sh -c 'exit 1' --".into());
        let engine = Engine::new(Arc::new(DialectRegistry::with_defaults()), settings);

        let reporter = JobReporter::new(&JobHooks::new());
        let config = EngineConfig::new(config::EngineKind::MySql);
        let ctx = engine.context(&config, &reporter, CancellationToken::new()).await.unwrap();

        assert_eq!(ctx.dialect.name(), "MySQL");
        assert!(ctx.version.is_none());
        assert!(reporter.logs().iter().any(|l| l.message.contains("Could not detect")));
    }

    #[tokio::test]
    async fn test_context_uses_detected_version() {
        let mut settings = EngineSettings::default();
        settings.tools.insert("mysql".into(), "sh -c 'echo 5.6.51-log' --".into());
        let engine = Engine::new(Arc::new(DialectRegistry::with_defaults()), settings);

        let reporter = JobReporter::new(&JobHooks::new());
        let config = EngineConfig::new(config::EngineKind::MySql);
        let ctx = engine.context(&config, &reporter, CancellationToken::new()).await.unwrap();

        assert_eq!(ctx.version.as_deref(), Some("5.6.51"));
        assert_eq!(ctx.dialect.name(), "MySQL < 5.7.11");
    }
}
