//! Dump pipeline.
//!
//! One database streams straight into the destination. Several databases
//! are dumped one after another into a private temp directory and packed
//! into a multi-database archive. Either way the artifact is checked for a
//! non-zero size before the job reports success.

use crate::archive::{self, ArchiveManifest, DumpFormat, PackSource};
use crate::dialect::DumpOutput;
use crate::engine::config::{EngineConfig, EngineKind};
use crate::engine::{mssql, Engine, JobContext};
use crate::probe;
use crate::process::{Input, Output};
use crate::report::{format_bytes, BackupResult, JobHooks, JobReporter};
use crate::utils::fs::{create_job_temp_dir, DestinationGuard};
use crate::utils::{EngineError, Result};
use chrono::Utc;
use serde_json::json;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

/// Native dump format per engine. Redis RDB files never go into archives.
pub fn dump_format(kind: EngineKind) -> Option<DumpFormat> {
    match kind {
        EngineKind::MySql | EngineKind::MariaDb | EngineKind::Sqlite => Some(DumpFormat::Sql),
        EngineKind::Postgres => Some(DumpFormat::Custom),
        EngineKind::MongoDb => Some(DumpFormat::Archive),
        EngineKind::Mssql => Some(DumpFormat::Bak),
        EngineKind::Redis => None,
    }
}

struct DumpOutcome {
    size: u64,
    databases: Vec<String>,
    manifest: Option<ArchiveManifest>,
    version: Option<String>,
    dialect: &'static str,
}

/// Dump the configured databases to `destination`.
///
/// Never returns an error: failures are reported through the result.
pub async fn run(engine: &Engine, config: &EngineConfig, destination: &Path, hooks: JobHooks) -> BackupResult {
    let started_at = Utc::now();
    let reporter = JobReporter::new(&hooks);
    let span = info_span!("dump", job_id = %reporter.job_id(), engine = %config.kind);

    let outcome = execute(engine, config, destination, &reporter, hooks.cancel.clone())
        .instrument(span)
        .await;

    match outcome {
        Ok(done) => {
            reporter.success(format!(
                "Backup written to {} ({})",
                destination.display(),
                format_bytes(done.size)
            ));
            let format = dump_format(config.kind).map(|f| f.extension()).unwrap_or("rdb");
            let metadata = json!({
                "format": if done.manifest.is_some() { "tar" } else { format },
                "databases": done.databases,
                "engineVersion": done.version,
                "dialect": done.dialect,
                "manifest": done.manifest,
            });
            BackupResult::succeeded(
                &reporter,
                started_at,
                Some(destination.display().to_string()),
                Some(done.size),
                Some(metadata),
            )
        }
        Err(e) => {
            reporter.error(format!("Backup failed: {}", e));
            BackupResult::failed(&reporter, started_at, e.to_string())
        }
    }
}

async fn execute(
    engine: &Engine,
    config: &EngineConfig,
    destination: &Path,
    reporter: &JobReporter,
    cancel: CancellationToken,
) -> Result<DumpOutcome> {
    config.validate()?;
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let guard = DestinationGuard::new(destination);

    let ctx = engine.context(config, reporter, cancel).await?;
    reporter.info(format!(
        "Starting {} backup using the {} dialect",
        config.kind,
        ctx.dialect.name()
    ));

    let databases = resolve_databases(&ctx).await?;
    let manifest = if databases.len() > 1 {
        Some(dump_many(&ctx, &databases, guard.path()).await?)
    } else {
        dump_one(&ctx, databases.first().map(String::as_str), guard.path()).await?;
        None
    };

    let size = tokio::fs::metadata(guard.path()).await?.len();
    if size == 0 {
        return Err(EngineError::Integrity(format!(
            "{} produced an empty backup file",
            ctx.dialect.dump_tool()
        )));
    }
    info!(size, "Backup verified");
    reporter.progress(100);
    guard.commit();

    Ok(DumpOutcome {
        size,
        databases,
        manifest,
        version: ctx.version.clone(),
        dialect: ctx.dialect.name(),
    })
}

/// Databases to dump, in the caller's order. Empty for single-file engines.
async fn resolve_databases(ctx: &JobContext) -> Result<Vec<String>> {
    if !ctx.config.kind.supports_multi_database() {
        return Ok(Vec::new());
    }
    if !ctx.config.databases.is_empty() {
        return Ok(ctx.config.databases.clone());
    }

    let all = probe::list_databases(ctx).await?;
    if all.is_empty() {
        return Err(EngineError::config(format!(
            "No user databases found on the {} server",
            ctx.config.kind
        )));
    }
    ctx.reporter
        .info(format!("No databases selected; dumping all {}: {}", all.len(), all.join(", ")));
    Ok(all)
}

/// Dump at most one database into `out`, following the dialect's output mode.
async fn dump_one(ctx: &JobContext, database: Option<&str>, out: &Path) -> Result<()> {
    let databases: Vec<String> = database.map(String::from).into_iter().collect();
    if let Some(database) = database {
        ctx.reporter.info(format!("Dumping database {}", database));
    }

    match ctx.dialect.dump_output() {
        DumpOutput::Stdout => {
            let args = ctx.dialect.dump_args(&ctx.config, &databases)?;
            let command = ctx.command(ctx.dialect.dump_tool(), args)?;
            ctx.supervisor
                .run(command, Input::Null, Output::File(out.to_path_buf()))
                .await?;
        }
        DumpOutput::PathArgument => {
            let args = ctx.dialect.dump_args(&ctx.config, &databases)?;
            let command = ctx
                .command(ctx.dialect.dump_tool(), args)?
                .arg(out.display().to_string());
            ctx.supervisor.run(command, Input::Null, Output::Null).await?;
        }
        DumpOutput::ServerFile => {
            let database = database.ok_or_else(|| {
                EngineError::config(format!("{} dumps need a database name", ctx.config.kind))
            })?;
            mssql::dump_database(ctx, database, out).await?;
        }
    }
    Ok(())
}

/// Dump each database to its own temp file, then pack them into `out`.
///
/// The temp directory is removed when this returns, whatever the outcome.
async fn dump_many(ctx: &JobContext, databases: &[String], out: &Path) -> Result<ArchiveManifest> {
    let format = dump_format(ctx.config.kind).ok_or_else(|| {
        EngineError::config(format!("{} does not support multi-database dumps", ctx.config.kind))
    })?;
    let temp = create_job_temp_dir(&ctx.settings.temp_dir, "dump")?;
    ctx.reporter.info(format!(
        "Dumping {} databases into a multi-database archive",
        databases.len()
    ));

    let mut sources = Vec::with_capacity(databases.len());
    for (i, database) in databases.iter().enumerate() {
        ctx.check_cancelled()?;
        let file = temp.path().join(format!("{:03}.{}", i, format.extension()));
        dump_one(ctx, Some(database), &file).await?;

        let size = tokio::fs::metadata(&file).await?.len();
        if size == 0 {
            return Err(EngineError::Integrity(format!(
                "Dump of database {} is empty",
                database
            )));
        }
        ctx.reporter
            .info(format!("Dumped {} ({})", database, format_bytes(size)));
        ctx.reporter.step_progress(i, databases.len() + 1)(100);
        sources.push(PackSource {
            name: database.clone(),
            path: file,
            format,
        });
    }

    ctx.check_cancelled()?;
    let manifest = archive::pack(sources, out, ctx.config.kind.id(), ctx.version.clone()).await?;
    ctx.reporter.info(format!(
        "Packed {} databases ({})",
        manifest.databases.len(),
        format_bytes(manifest.total_size)
    ));

    if let Err(e) = temp.close() {
        warn!("Failed to remove dump temp dir: {}", e);
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectRegistry;
    use crate::engine::EngineSettings;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    // Fake mysqldump: print a small dump for the last argument (the database).
    const FAKE_MYSQLDUMP: &str = "for a; do db=$a; done; \
        echo \"-- Current Database: \\`$db\\`\"; \
        echo \"CREATE DATABASE IF NOT EXISTS \\`$db\\`;\"; \
        echo \"USE \\`$db\\`;\"; \
        echo \"INSERT INTO t VALUES (1);\"";

    fn engine(tool: &str, script: &str, temp_dir: &Path) -> Engine {
        let mut settings = EngineSettings::default();
        settings.temp_dir = temp_dir.to_path_buf();
        settings.tools.insert(tool.into(), format!("sh -c '{}' --", script));
        Engine::new(Arc::new(DialectRegistry::with_defaults()), settings)
    }

    fn mysql_config(databases: &[&str]) -> EngineConfig {
        let mut config = EngineConfig::new(EngineKind::MySql);
        config.version = Some("8.0.35".into());
        config.databases = databases.iter().map(|d| d.to_string()).collect();
        config
    }

    #[tokio::test]
    async fn test_single_database_dump() {
        let dir = TempDir::new().unwrap();
        let engine = engine("mysqldump", FAKE_MYSQLDUMP, dir.path());
        let dest = dir.path().join("out").join("shop.sql");

        let result = engine.dump(&mysql_config(&["shop"]), &dest, JobHooks::new()).await;

        assert!(result.success, "{:?}", result.error);
        assert!(result.size.unwrap() > 0);
        let text = std::fs::read_to_string(&dest).unwrap();
        assert!(text.contains("USE `shop`;"));
        assert!(result
            .logs
            .iter()
            .any(|l| l.details.as_deref().is_some_and(|d| d.contains("--databases shop"))));
    }

    #[tokio::test]
    async fn test_three_database_archive() {
        let dir = TempDir::new().unwrap();
        let temp_root = dir.path().join("tmp");
        let engine = engine("mysqldump", FAKE_MYSQLDUMP, &temp_root);
        let dest = dir.path().join("all.tar");

        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&progress);
        let hooks = JobHooks::new().with_progress(move |p| seen.lock().unwrap().push(p));

        let result = engine
            .dump(&mysql_config(&["shop", "billing", "logs"]), &dest, hooks)
            .await;

        assert!(result.success, "{:?}", result.error);
        assert!(archive::is_multi_db_tar(&dest).await.unwrap());
        let manifest = archive::read_manifest(&dest).await.unwrap();
        assert_eq!(manifest.database_names(), vec!["shop", "billing", "logs"]);
        assert!(manifest.databases.iter().all(|d| d.format == DumpFormat::Sql));
        assert_eq!(result.metadata.as_ref().unwrap()["format"], "tar");

        // Job temp dirs are gone.
        assert_eq!(std::fs::read_dir(&temp_root).unwrap().count(), 0);

        let progress = progress.lock().unwrap();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(progress.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_empty_output_is_an_integrity_failure() {
        let dir = TempDir::new().unwrap();
        let engine = engine("mysqldump", "exit 0", dir.path());
        let dest = dir.path().join("shop.sql");

        let result = engine.dump(&mysql_config(&["shop"]), &dest, JobHooks::new()).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("Integrity error"));
        assert!(!dest.exists(), "partial destination is removed");
    }

    #[tokio::test]
    async fn test_tool_failure_removes_destination() {
        let dir = TempDir::new().unwrap();
        let engine = engine(
            "mysqldump",
            "echo partial; echo \"mysqldump: Got error: 1049: Unknown database\" >&2; exit 2",
            dir.path(),
        );
        let dest = dir.path().join("shop.sql");

        let result = engine.dump(&mysql_config(&["shop"]), &dest, JobHooks::new()).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("Unknown database"));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_dump_all_lists_databases() {
        let dir = TempDir::new().unwrap();
        let mut settings = EngineSettings::default();
        settings.temp_dir = dir.path().to_path_buf();
        settings.tools.insert(
            "mysql".into(),
            "sh -c 'printf \"mysql\\nshop\\nsys\\nbilling\\n\"' --".into(),
        );
        settings
            .tools
            .insert("mysqldump".into(), format!("sh -c '{}' --", FAKE_MYSQLDUMP));
        let engine = Engine::new(Arc::new(DialectRegistry::with_defaults()), settings);
        let dest = dir.path().join("all.tar");

        let result = engine.dump(&mysql_config(&[]), &dest, JobHooks::new()).await;

        assert!(result.success, "{:?}", result.error);
        let manifest = archive::read_manifest(&dest).await.unwrap();
        assert_eq!(manifest.database_names(), vec!["shop", "billing"]);
    }

    #[tokio::test]
    async fn test_redis_rdb_path_argument() {
        let dir = TempDir::new().unwrap();
        let engine = engine("redis-cli", "for a; do p=$a; done; printf REDIS0011data > \"$p\"", dir.path());
        let mut config = EngineConfig::new(EngineKind::Redis);
        config.version = Some("7.2.4".into());
        let dest = dir.path().join("dump.rdb");

        let result = engine.dump(&config, &dest, JobHooks::new()).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(std::fs::read(&dest).unwrap(), b"REDIS0011data");
        assert_eq!(result.metadata.unwrap()["format"], "rdb");
    }
}
